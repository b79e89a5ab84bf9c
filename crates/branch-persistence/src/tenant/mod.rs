//! Lado sucursal: sesiones Diesel hacia la base de cada sucursal, la fábrica
//! que las abre, el esquema base de retail y la carga de datos de referencia.

pub mod factory;
pub mod seed;
pub mod session;
pub mod units;

pub use factory::{conninfo, DieselSessionFactory};
pub use seed::{retail_seed_sets, SeedSet, SqlSeedLoader};
pub use session::DieselSession;
pub use units::retail_registry;
