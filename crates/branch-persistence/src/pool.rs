//! Pool de conexiones del plano de control.
//!
//! El backend se elige por la URL: `postgres://` / `postgresql://` usan
//! PostgreSQL; `sqlite://ruta` o una ruta simple usan un archivo SQLite. Los
//! stores reciben un `ControlPool` y despachan con `on_conn!`, que expande el
//! mismo cuerpo Diesel para cada tipo de conexión.

use std::path::Path;

use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use diesel::sqlite::SqliteConnection;
use log::{debug, warn};
use r2d2::{CustomizeConnection, Pool};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// Milisegundos que SQLite espera un lock de escritura antes de fallar con
/// `database is locked`.
pub const SQLITE_BUSY_TIMEOUT_MS: u32 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlBackend {
    Postgres,
    Sqlite,
}

impl ControlBackend {
    /// Detecta el backend y devuelve la cadena de conexión que espera Diesel.
    pub fn from_url(url: &str) -> Result<(Self, String), PersistenceError> {
        let trimmed = url.trim();
        if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
            return Ok((Self::Postgres, trimmed.to_string()));
        }
        let path = trimmed.strip_prefix("sqlite://").unwrap_or(trimmed);
        if path.is_empty() {
            return Err(PersistenceError::Config("empty control database url".into()));
        }
        if path == ":memory:" || path.contains("mode=memory") {
            return Err(PersistenceError::Config("in-memory sqlite cannot back a pooled control plane".into()));
        }
        Ok((Self::Sqlite, path.to_string()))
    }
}

/// Pool listo para usar (ya migrado).
#[derive(Clone)]
pub enum ControlPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl ControlPool {
    pub fn backend(&self) -> ControlBackend {
        match self {
            Self::Postgres(_) => ControlBackend::Postgres,
            Self::Sqlite(_) => ControlBackend::Sqlite,
        }
    }
}

impl std::fmt::Debug for ControlPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            Self::Postgres(pool) => pool.state(),
            Self::Sqlite(pool) => pool.state(),
        };
        f.debug_struct("ControlPool")
         .field("backend", &self.backend())
         .field("connections", &state.connections)
         .field("idle", &state.idle_connections)
         .finish()
    }
}

/// Ejecuta `$body` con `$conn` ligado a `&mut PgConnection` o
/// `&mut SqliteConnection` según el pool. Debe usarse dentro de una función
/// (o closure) que devuelva `Result<_, PersistenceError>`.
macro_rules! on_conn {
    ($pool:expr, $conn:ident => $body:block) => {
        match $pool {
            $crate::pool::ControlPool::Postgres(pool) => {
                let mut pooled = pool.get()?;
                let $conn: &mut ::diesel::pg::PgConnection = &mut pooled;
                $body
            }
            $crate::pool::ControlPool::Sqlite(pool) => {
                let mut pooled = pool.get()?;
                let $conn: &mut ::diesel::sqlite::SqliteConnection = &mut pooled;
                $body
            }
        }
    };
}
pub(crate) use on_conn;

/// Pragmas aplicados a cada conexión SQLite al salir del pool.
#[derive(Debug, Clone, Copy)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!("PRAGMA busy_timeout = {SQLITE_BUSY_TIMEOUT_MS}; PRAGMA journal_mode = WAL; \
                                     PRAGMA foreign_keys = ON;"))
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

fn pool_sizes(min_size: u32, max_size: u32) -> (u32, u32) {
    let validated_min = if min_size == 0 { 1 } else { min_size };
    let validated_max = if max_size == 0 { 1 } else { max_size };
    if validated_min > validated_max {
        warn!("min_size > max_size ({} > {}), ajustando min=max", validated_min, validated_max);
    }
    (validated_min.min(validated_max), validated_max)
}

/// Construye el pool y corre las migraciones pendientes en la primera
/// conexión.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<ControlPool, PersistenceError> {
    let (backend, target) = ControlBackend::from_url(database_url)?;
    let (min, max) = pool_sizes(min_size, max_size);
    debug!("build_pool backend={:?} min={} max={}", backend, min, max);
    match backend {
        ControlBackend::Postgres => {
            let manager = ConnectionManager::<PgConnection>::new(target);
            let pool = Pool::builder().min_idle(Some(min))
                                      .max_size(max)
                                      .build(manager)
                                      .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
            {
                let mut conn = pool.get()
                                   .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
                run_pending_migrations(&mut *conn)?;
            }
            Ok(ControlPool::Postgres(pool))
        }
        ControlBackend::Sqlite => {
            if let Some(parent) = Path::new(&target).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                                                      PersistenceError::Config(format!("create {}: {e}",
                                                                                       parent.display()))
                                                  })?;
                }
            }
            let manager = ConnectionManager::<SqliteConnection>::new(target);
            let pool = Pool::builder().min_idle(Some(min))
                                      .max_size(max)
                                      .connection_customizer(Box::new(SqlitePragmas))
                                      .build(manager)
                                      .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
            {
                let mut conn = pool.get()
                                   .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
                run_pending_migrations(&mut *conn)?;
            }
            Ok(ControlPool::Sqlite(pool))
        }
    }
}

/// Helper: carga `.env`, lee `DbConfig` y construye un pool ya migrado.
pub fn build_pool_from_env() -> Result<ControlPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

pub(crate) fn ms_now(now: chrono::DateTime<chrono::Utc>) -> i64 {
    now.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64, column: &str) -> Result<chrono::DateTime<chrono::Utc>, PersistenceError> {
    chrono::DateTime::from_timestamp_millis(ms).ok_or_else(|| PersistenceError::Corrupt(format!("{column}={ms}")))
}
