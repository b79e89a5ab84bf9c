//! branchflow
//!
//! Plano de control de bases de datos por sucursal:
//! - `config`: `AppConfig` desde .env / entorno.
//! - `control_plane`: ensamblado de pool, stores, orquestador y alta de
//!   sucursales; superficie administrativa bloqueante.
//! - `async_api`: la misma superficie para hosts async.
//! - `errors`: `ControlPlaneError`.
//!
//! Los crates `branch_core` y `branch_persistence` se re-exportan para que
//! los consumidores no tengan que depender de ellos por separado.

pub mod async_api;
pub mod config;
pub mod control_plane;
pub mod errors;

pub use async_api::{AsyncControlPlane, TenantAdmin};
pub use config::AppConfig;
pub use control_plane::{ControlPlane, Registration};
pub use errors::ControlPlaneError;

pub use branch_core;
pub use branch_persistence;
