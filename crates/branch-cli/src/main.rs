//! `branchctl`: superficie administrativa del plano de control desde la
//! terminal. Salida JSON en stdout; códigos de salida 0 ok, 2 uso,
//! 4 operación rechazada o fallida, 5 error de infraestructura.

mod args;

use std::process::ExitCode;

use branchflow::{AppConfig, ControlPlane, ControlPlaneError};
use log::debug;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::args::{Command, USAGE};

const EXIT_USAGE: u8 = 2;
const EXIT_REJECTED: u8 = 4;
const EXIT_INFRA: u8 = 5;

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
                             .with_writer(std::io::stderr)
                             .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.is_empty() || matches!(argv[0].as_str(), "-h" | "--help" | "help") {
        println!("{USAGE}");
        return if argv.is_empty() { ExitCode::from(EXIT_USAGE) } else { ExitCode::SUCCESS };
    }
    let command = match args::parse(&argv) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("[branchctl] {msg}\n\n{USAGE}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let plane = match AppConfig::from_env().and_then(ControlPlane::open) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[branchctl] no se pudo abrir el plano de control: {e}");
            return ExitCode::from(EXIT_INFRA);
        }
    };
    debug!("branchctl command={command:?}");

    match run(&plane, command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("[branchctl] {e}");
            ExitCode::from(if e.is_infrastructure() { EXIT_INFRA } else { EXIT_REJECTED })
        }
    }
}

fn run(plane: &ControlPlane, command: Command) -> Result<ExitCode, ControlPlaneError> {
    let code = match command {
        Command::Tenants => emit(&plane.tenants()?, true),
        Command::Register { descriptor, provision } => {
            let provision = provision.unwrap_or(plane.config().provision_on_register);
            let registration = plane.register_tenant(descriptor, provision)?;
            let ok = registration.provision.as_ref().map_or(true, |p| p.success);
            emit(&registration, ok)
        }
        Command::Provision(tenant) => {
            let result = plane.provision(&tenant);
            emit(&result, result.success)
        }
        Command::Status => emit(&plane.status()?, true),
        Command::Pending(tenant) => emit(&plane.pending(&tenant)?, true),
        Command::History(tenant) => emit(&plane.history(&tenant)?, true),
        Command::Apply { tenant, target } => {
            let result = plane.apply(&tenant, target.as_deref());
            emit(&result, result.success)
        }
        Command::ApplyAll => {
            let result = plane.apply_all();
            emit(&result, result.success)
        }
        Command::Rollback(tenant) => {
            let result = plane.rollback_last(&tenant);
            emit(&result, result.success)
        }
        Command::RollbackAll => {
            let result = plane.rollback_all();
            emit(&result, result.success)
        }
        Command::Validate(tenant) => {
            let check = plane.validate(&tenant);
            emit(&check, check.valid)
        }
        Command::ForceRemove { tenant, unit } => {
            let result = plane.force_remove(&tenant, &unit);
            emit(&result, result.success)
        }
        Command::ForceRemoveAll { unit } => {
            let result = plane.force_remove_all(&unit);
            emit(&result, result.success)
        }
        Command::Reconcile => {
            let report = plane.reconcile();
            emit(&report, report.errors.is_empty())
        }
    };
    Ok(code)
}

fn emit<T: Serialize>(value: &T, ok: bool) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("[branchctl] serialización: {e}");
            return ExitCode::from(EXIT_INFRA);
        }
    }
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_REJECTED)
    }
}
