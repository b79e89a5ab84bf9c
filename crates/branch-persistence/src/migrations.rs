//! Runner de las migraciones embebidas del plano de control.
//!
//! Las migraciones viven en `migrations/` de este crate y usan SQL portable,
//! por lo que el mismo set corre sobre PostgreSQL y SQLite. El pool las
//! ejecuta una vez al construirse.

use diesel::backend::Backend;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;

use crate::error::PersistenceError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub fn run_pending_migrations<C, DB>(conn: &mut C) -> Result<(), PersistenceError>
    where DB: Backend,
          C: MigrationHarness<DB>
{
    let applied = conn.run_pending_migrations(MIGRATIONS)
                      .map_err(|e| PersistenceError::Unknown(format!("migration error: {e}")))?;
    if !applied.is_empty() {
        info!("control-plane migrations applied: {}", applied.len());
    }
    Ok(())
}
