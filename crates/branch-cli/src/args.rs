//! Parseo manual de argumentos de `branchctl`.

use std::collections::BTreeMap;

use branch_core::{EngineKind, TenantDescriptor, TenantId, TlsSettings};

pub const USAGE: &str = "\
Uso: branchctl <comando> [opciones]

  tenants
  register --id <ID> --code <COD> --name <NOMBRE> --engine <sqlite|postgres>
           [--host H] [--port P] [--database DB] [--file RUTA] [--user U]
           [--password PW] [--tls] [--trust-cert] [--param k=v]... [--no-provision]
  provision <tenant>
  status
  pending <tenant>
  history <tenant>
  apply <tenant> [--target <unidad>]
  apply-all
  rollback <tenant>
  rollback-all
  validate <tenant>
  force-remove <tenant> <unidad> --yes
  force-remove-all <unidad> --yes
  reconcile";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Tenants,
    Register { descriptor: TenantDescriptor, provision: Option<bool> },
    Provision(TenantId),
    Status,
    Pending(TenantId),
    History(TenantId),
    Apply { tenant: TenantId, target: Option<String> },
    ApplyAll,
    Rollback(TenantId),
    RollbackAll,
    Validate(TenantId),
    ForceRemove { tenant: TenantId, unit: String },
    ForceRemoveAll { unit: String },
    Reconcile,
}

/// Convierte `args` (sin el nombre del binario) en un comando. El error es
/// un mensaje para el operador.
pub fn parse(args: &[String]) -> Result<Command, String> {
    let (name, rest) = args.split_first().ok_or_else(|| "falta el comando".to_string())?;
    let mut flags = Flags::collect(rest)?;
    let command = match name.as_str() {
        "tenants" => Command::Tenants,
        "status" => Command::Status,
        "apply-all" => Command::ApplyAll,
        "rollback-all" => Command::RollbackAll,
        "reconcile" => Command::Reconcile,
        "provision" => Command::Provision(flags.tenant()?),
        "pending" => Command::Pending(flags.tenant()?),
        "history" => Command::History(flags.tenant()?),
        "rollback" => Command::Rollback(flags.tenant()?),
        "validate" => Command::Validate(flags.tenant()?),
        "apply" => Command::Apply { tenant: flags.tenant()?,
                                    target: flags.value("--target") },
        "force-remove" => {
            let tenant = flags.tenant()?;
            let unit = flags.positional("unidad")?;
            flags.confirmed()?;
            Command::ForceRemove { tenant, unit }
        }
        "force-remove-all" => {
            let unit = flags.positional("unidad")?;
            flags.confirmed()?;
            Command::ForceRemoveAll { unit }
        }
        "register" => register(&mut flags)?,
        other => return Err(format!("comando desconocido: {other}")),
    };
    flags.finish()?;
    Ok(command)
}

fn register(flags: &mut Flags) -> Result<Command, String> {
    let id = TenantId::parse(&flags.required("--id")?).map_err(|e| e.to_string())?;
    let code = flags.required("--code")?;
    let name = flags.required("--name")?;
    let engine: EngineKind = flags.required("--engine")?.parse()?;
    let port = match flags.value("--port") {
        Some(raw) => Some(raw.parse::<u16>().map_err(|_| format!("--port inválido: {raw}"))?),
        None => None,
    };
    let mut params = BTreeMap::new();
    for raw in flags.values("--param") {
        let (k, v) = raw.split_once('=')
                        .ok_or_else(|| format!("--param espera k=v: {raw}"))?;
        params.insert(k.trim().to_string(), v.trim().to_string());
    }
    let descriptor = TenantDescriptor { id,
                                        code,
                                        name,
                                        engine,
                                        host: flags.value("--host"),
                                        port,
                                        database: flags.value("--database"),
                                        file_path: flags.value("--file"),
                                        username: flags.value("--user"),
                                        password: flags.value("--password"),
                                        tls: TlsSettings { enabled: flags.switch("--tls"),
                                                           trust_server_certificate: flags.switch("--trust-cert") },
                                        params,
                                        revision: 0 };
    let provision = flags.switch("--no-provision").then_some(false);
    Ok(Command::Register { descriptor, provision })
}

const SWITCHES: &[&str] = &["--tls", "--trust-cert", "--no-provision", "--yes"];

/// Opciones y posicionales de un comando; cada lectura consume lo leído para
/// que `finish` detecte sobrantes.
struct Flags {
    positionals: Vec<String>,
    options: Vec<(String, Option<String>)>,
}

impl Flags {
    fn collect(args: &[String]) -> Result<Self, String> {
        let mut positionals = Vec::new();
        let mut options = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if !arg.starts_with("--") {
                positionals.push(arg.clone());
            } else if SWITCHES.contains(&arg.as_str()) {
                options.push((arg.clone(), None));
            } else {
                let value = iter.next().ok_or_else(|| format!("{arg} requiere un valor"))?;
                options.push((arg.clone(), Some(value.clone())));
            }
        }
        positionals.reverse();
        Ok(Self { positionals, options })
    }

    fn positional(&mut self, what: &str) -> Result<String, String> {
        self.positionals.pop().ok_or_else(|| format!("falta {what}"))
    }

    fn tenant(&mut self) -> Result<TenantId, String> {
        let raw = self.positional("tenant")?;
        TenantId::parse(&raw).map_err(|e| e.to_string())
    }

    fn values(&mut self, name: &str) -> Vec<String> {
        let mut found = Vec::new();
        self.options.retain(|(k, v)| {
                        if k == name {
                            found.extend(v.clone());
                            false
                        } else {
                            true
                        }
                    });
        found
    }

    fn value(&mut self, name: &str) -> Option<String> {
        self.values(name).pop()
    }

    fn required(&mut self, name: &str) -> Result<String, String> {
        self.value(name).ok_or_else(|| format!("falta {name}"))
    }

    fn switch(&mut self, name: &str) -> bool {
        let before = self.options.len();
        self.options.retain(|(k, _)| k != name);
        self.options.len() != before
    }

    fn confirmed(&mut self) -> Result<(), String> {
        if self.switch("--yes") {
            Ok(())
        } else {
            Err("operación destructiva: confirmar con --yes".into())
        }
    }

    fn finish(self) -> Result<(), String> {
        if let Some(extra) = self.positionals.last() {
            return Err(format!("argumento inesperado: {extra}"));
        }
        match self.options.first() {
            Some((name, _)) => Err(format!("opción desconocida: {name}")),
            None => Ok(()),
        }
    }
}
