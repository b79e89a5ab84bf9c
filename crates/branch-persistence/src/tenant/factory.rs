//! Apertura de sesiones por motor.
//!
//! SQLite: archivo embebido, se crea al conectar. Postgres: cadena conninfo
//! de libpq construida desde el descriptor; si la base no existe y la
//! creación está habilitada, se crea desde la base de mantenimiento.

use std::path::Path;

use branch_core::{EngineKind, SessionError, SessionFactory, TenantDescriptor, TenantSession};
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::ConnectionError;
use diesel::sql_types::{BigInt, Text};
use diesel::sqlite::SqliteConnection;
use log::{info, warn};

use super::session::DieselSession;
use crate::pool::SQLITE_BUSY_TIMEOUT_MS;

/// Parámetros del descriptor que pasan tal cual a la conninfo de Postgres.
pub const PASSTHROUGH_PARAMS: [&str; 4] = ["connect_timeout", "application_name", "options", "target_session_attrs"];

const DEFAULT_MAINTENANCE_DB: &str = "postgres";

#[derive(QueryableByName, Debug)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    n: i64,
}

#[derive(Debug, Clone)]
pub struct DieselSessionFactory {
    create_databases: bool,
}

impl Default for DieselSessionFactory {
    fn default() -> Self {
        Self { create_databases: true }
    }
}

impl DieselSessionFactory {
    pub fn new(create_databases: bool) -> Self {
        Self { create_databases }
    }

    fn open_sqlite(&self, descriptor: &TenantDescriptor) -> Result<DieselSession, SessionError> {
        let path = descriptor.file_path
                             .as_deref()
                             .filter(|p| !p.trim().is_empty())
                             .ok_or_else(|| SessionError::Config(format!("tenant {} has no file_path", descriptor.id)))?;
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                                                  SessionError::Config(format!("create {}: {e}", parent.display()))
                                              })?;
            }
        }
        let mut conn = SqliteConnection::establish(path).map_err(|e| SessionError::Connect(e.to_string()))?;
        conn.batch_execute(&format!("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {SQLITE_BUSY_TIMEOUT_MS};"))
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        Ok(DieselSession::Sqlite(conn))
    }

    fn open_postgres(&self, descriptor: &TenantDescriptor) -> Result<DieselSession, SessionError> {
        let database = postgres_database(descriptor)?;
        let info = conninfo(descriptor, database)?;
        match PgConnection::establish(&info) {
            Ok(conn) => Ok(DieselSession::Postgres(conn)),
            Err(e) if self.create_databases && is_missing_database(&e) => {
                warn!("tenant {} database {database} missing, creating it", descriptor.id);
                create_database(descriptor, database)?;
                PgConnection::establish(&info).map(DieselSession::Postgres)
                                              .map_err(|e| SessionError::Connect(e.to_string()))
            }
            Err(e) => Err(SessionError::Connect(e.to_string())),
        }
    }
}

impl SessionFactory for DieselSessionFactory {
    fn open(&self, descriptor: &TenantDescriptor) -> Result<Box<dyn TenantSession>, SessionError> {
        let session = match descriptor.engine {
            EngineKind::Sqlite => self.open_sqlite(descriptor)?,
            EngineKind::Postgres => self.open_postgres(descriptor)?,
        };
        Ok(Box::new(session))
    }
}

fn postgres_database(descriptor: &TenantDescriptor) -> Result<&str, SessionError> {
    descriptor.database
              .as_deref()
              .filter(|d| !d.trim().is_empty())
              .ok_or_else(|| SessionError::Config(format!("tenant {} has no database name", descriptor.id)))
}

fn is_missing_database(err: &ConnectionError) -> bool {
    let msg = err.to_string();
    msg.contains("database") && msg.contains("does not exist")
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Cadena conninfo de libpq para `dbname`. Valores entre comillas simples;
/// `sslmode` sale de la configuración TLS del descriptor.
pub fn conninfo(descriptor: &TenantDescriptor, dbname: &str) -> Result<String, SessionError> {
    let host = descriptor.host
                         .as_deref()
                         .filter(|h| !h.trim().is_empty())
                         .ok_or_else(|| SessionError::Config(format!("tenant {} has no host", descriptor.id)))?;
    let mut parts = vec![format!("host={}", quote(host))];
    if let Some(port) = descriptor.port {
        parts.push(format!("port={port}"));
    }
    parts.push(format!("dbname={}", quote(dbname)));
    if let Some(user) = descriptor.username.as_deref() {
        parts.push(format!("user={}", quote(user)));
    }
    if let Some(password) = descriptor.password.as_deref() {
        parts.push(format!("password={}", quote(password)));
    }
    let sslmode = match (descriptor.tls.enabled, descriptor.tls.trust_server_certificate) {
        (false, _) => "disable",
        (true, true) => "require",
        (true, false) => "verify-full",
    };
    parts.push(format!("sslmode={sslmode}"));
    for key in PASSTHROUGH_PARAMS {
        if let Some(value) = descriptor.param(key) {
            parts.push(format!("{key}={}", quote(value)));
        }
    }
    Ok(parts.join(" "))
}

fn is_safe_db_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 63 && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Crea la base de la sucursal conectándose a la base de mantenimiento
/// (`params.maintenance_db`, por defecto `postgres`).
fn create_database(descriptor: &TenantDescriptor, database: &str) -> Result<(), SessionError> {
    if !is_safe_db_name(database) {
        return Err(SessionError::Config(format!("unsafe database name {database:?}, refusing to create it")));
    }
    let maintenance = descriptor.param("maintenance_db").unwrap_or(DEFAULT_MAINTENANCE_DB);
    let admin_info = conninfo(descriptor, maintenance)?;
    let mut admin = PgConnection::establish(&admin_info).map_err(|e| SessionError::Connect(e.to_string()))?;
    let exists: CountRow = diesel::sql_query("SELECT COUNT(*) AS n FROM pg_database WHERE datname = $1")
        .bind::<Text, _>(database)
        .get_result(&mut admin)
        .map_err(|e| SessionError::Query(e.to_string()))?;
    if exists.n > 0 {
        return Ok(());
    }
    match admin.batch_execute(&format!("CREATE DATABASE \"{database}\"")) {
        Ok(()) => {
            info!("tenant {} database {database} created", descriptor.id);
            Ok(())
        }
        // otra instancia la creó entre la consulta y el CREATE
        Err(e) if e.to_string().contains("already exists") => Ok(()),
        Err(e) => Err(SessionError::Query(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branch_core::TenantId;

    fn pg() -> TenantDescriptor {
        let mut d = TenantDescriptor::postgres(TenantId::parse("sur").unwrap(), "SUR", "Sur", "db.local", "sur_db");
        d.port = Some(5433);
        d.username = Some("branch".into());
        d.password = Some("it's".into());
        d
    }

    #[test]
    fn conninfo_quotes_and_maps_tls() {
        let mut d = pg();
        d.params.insert("connect_timeout".into(), "5".into());
        d.params.insert("maintenance_db".into(), "template1".into());
        let info = conninfo(&d, "sur_db").unwrap();
        assert_eq!(info,
                   "host='db.local' port=5433 dbname='sur_db' user='branch' password='it\\'s' sslmode=disable \
                    connect_timeout='5'");

        d.tls.enabled = true;
        assert!(conninfo(&d, "x").unwrap().contains("sslmode=verify-full"));
        d.tls.trust_server_certificate = true;
        assert!(conninfo(&d, "x").unwrap().contains("sslmode=require"));
    }

    #[test]
    fn postgres_requires_host_and_database() {
        let mut d = pg();
        d.host = None;
        assert!(matches!(conninfo(&d, "x"), Err(SessionError::Config(_))));
        d.database = Some(" ".into());
        assert!(matches!(postgres_database(&d), Err(SessionError::Config(_))));
    }

    #[test]
    fn database_names_are_validated_before_create() {
        assert!(is_safe_db_name("sucursal_norte-01"));
        assert!(!is_safe_db_name("x\"; DROP DATABASE y; --"));
        assert!(!is_safe_db_name(""));
        let mut d = pg();
        d.database = Some("bad name".into());
        assert!(matches!(create_database(&d, "bad name"), Err(SessionError::Config(_))));
    }

    #[test]
    fn sqlite_requires_file_path() {
        let mut d = TenantDescriptor::sqlite(TenantId::parse("n").unwrap(), "N", "N", "");
        d.file_path = None;
        let err = DieselSessionFactory::default().open(&d).err();
        assert!(matches!(err, Some(SessionError::Config(_))));
    }
}
