//! Configuración de la aplicación.
//! Carga variables de entorno (.env) y expone una estructura inmutable
//! (`AppConfig`) con la conexión al plano de control y los parámetros del
//! orquestador.

use std::env;

use branch_core::constants::DEFAULT_LEASE_SECONDS;
use branch_persistence::config::{init_dotenv, DbConfig};
use branch_persistence::DefaultAccount;
use chrono::Duration;
use uuid::Uuid;

use crate::errors::ControlPlaneError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Conexión al plano de control.
    pub database: DbConfig,
    /// Identidad de esta instancia; prefijo de los dueños de lease.
    pub instance_id: String,
    /// Duración del lease de migración.
    pub lease: Duration,
    /// Crear bases Postgres de sucursal que no existan.
    pub create_databases: bool,
    /// Correr el alta completa al registrar una sucursal.
    pub provision_on_register: bool,
    pub admin: DefaultAccount,
}

impl AppConfig {
    /// Valores por defecto sobre la URL dada.
    pub fn for_database(url: &str) -> Self {
        Self { database: DbConfig::new(url),
               instance_id: default_instance_id(),
               lease: Duration::seconds(DEFAULT_LEASE_SECONDS),
               create_databases: true,
               provision_on_register: true,
               admin: DefaultAccount::default() }
    }

    pub fn from_env() -> Result<Self, ControlPlaneError> {
        init_dotenv();
        let database = DbConfig::from_env()?;
        let mut cfg = Self::for_database(&database.url);
        cfg.database = database;
        if let Some(id) = var("BRANCH_INSTANCE_ID") {
            cfg.instance_id = id;
        }
        if let Some(raw) = var("BRANCH_LEASE_SECONDS") {
            let secs: i64 = raw.parse()
                               .ok()
                               .filter(|s| *s > 0)
                               .ok_or_else(|| ControlPlaneError::Config(format!("BRANCH_LEASE_SECONDS={raw}")))?;
            cfg.lease = Duration::seconds(secs);
        }
        if let Some(raw) = var("BRANCH_CREATE_DATABASES") {
            cfg.create_databases = parse_flag("BRANCH_CREATE_DATABASES", &raw)?;
        }
        if let Some(raw) = var("BRANCH_PROVISION_ON_REGISTER") {
            cfg.provision_on_register = parse_flag("BRANCH_PROVISION_ON_REGISTER", &raw)?;
        }
        if let Some(login) = var("BRANCH_ADMIN_LOGIN") {
            cfg.admin.login = login;
        }
        if let Some(name) = var("BRANCH_ADMIN_NAME") {
            cfg.admin.display_name = name;
        }
        cfg.admin.password = var("BRANCH_ADMIN_PASSWORD");
        Ok(cfg)
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn default_instance_id() -> String {
    format!("branchflow-{}", &Uuid::new_v4().simple().to_string()[..8])
}

pub(crate) fn parse_flag(key: &str, raw: &str) -> Result<bool, ControlPlaneError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ControlPlaneError::Config(format!("{key}={raw} is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = AppConfig::for_database("sqlite:///tmp/cp.db");
        assert_eq!(cfg.lease, Duration::seconds(300));
        assert!(cfg.create_databases && cfg.provision_on_register);
        assert!(cfg.instance_id.starts_with("branchflow-"));
        assert_eq!(cfg.admin.login, "admin");
        assert_eq!((cfg.database.min_connections, cfg.database.max_connections), (2, 16));
    }

    #[test]
    fn flags() {
        assert!(parse_flag("X", "Yes").unwrap());
        assert!(!parse_flag("X", "off").unwrap());
        assert!(matches!(parse_flag("X", "maybe"), Err(ControlPlaneError::Config(_))));
    }
}
