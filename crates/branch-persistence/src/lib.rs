//! branch-persistence
//!
//! Implementaciones Diesel de los contratos de `branch-core`:
//!
//! - `pool`: pool r2d2 del plano de control (PostgreSQL o SQLite según URL),
//!   con las migraciones embebidas corridas al construirlo.
//! - `ledger`, `catalog`, `accounts`: stores del plano de control.
//! - `tenant`: sesiones hacia las bases de sucursal, esquema base de retail y
//!   datos de referencia.
//! - `config`: carga de configuración desde .env / entorno.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod accounts;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod pool;
pub mod schema;
pub mod tenant;

pub use accounts::{hash_password, verify_password, DefaultAccount, DieselAccountBootstrapper};
pub use catalog::DieselTenantCatalog;
pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use ledger::DieselLedger;
pub use pool::{build_pool, build_pool_from_env, ControlBackend, ControlPool, PgPool, SqlitePool};
pub use tenant::{retail_registry, DieselSession, DieselSessionFactory, SqlSeedLoader};
