use std::collections::HashMap;

use crate::errors::UnitError;
use crate::registry::MigrationUnit;
use crate::session::TenantSession;
use crate::tenant::EngineKind;

/// Unidad de migración escrita en SQL.
///
/// `up`/`down` son SQL portable; `for_engine` permite sustituir ambos para un
/// motor concreto (por ejemplo cuando SQLite no soporta una sentencia). Cada
/// dirección corre en una sola transacción.
#[derive(Debug, Clone)]
pub struct SqlUnit {
    id: String,
    description: String,
    up: String,
    down: String,
    overrides: HashMap<EngineKind, (String, String)>,
}

impl SqlUnit {
    pub fn new(id: &str, up: &str, down: &str) -> Self {
        Self { id: id.to_string(),
               description: String::new(),
               up: up.to_string(),
               down: down.to_string(),
               overrides: HashMap::new() }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn for_engine(mut self, engine: EngineKind, up: &str, down: &str) -> Self {
        self.overrides.insert(engine, (up.to_string(), down.to_string()));
        self
    }

    pub fn up_sql(&self, engine: EngineKind) -> &str {
        self.overrides.get(&engine).map(|(up, _)| up.as_str()).unwrap_or(&self.up)
    }

    pub fn down_sql(&self, engine: EngineKind) -> &str {
        self.overrides.get(&engine).map(|(_, down)| down.as_str()).unwrap_or(&self.down)
    }
}

impl MigrationUnit for SqlUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn apply(&self, session: &mut dyn TenantSession) -> Result<(), UnitError> {
        let engine = session.engine();
        session.execute_atomic(self.up_sql(engine))?;
        Ok(())
    }

    fn revert(&self, session: &mut dyn TenantSession) -> Result<(), UnitError> {
        let engine = session.engine();
        session.execute_atomic(self.down_sql(engine))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySession;

    #[test]
    fn engine_override_wins() {
        let unit = SqlUnit::new("u1", "ALTER TABLE t DROP COLUMN c;", "SELECT 1;")
            .for_engine(EngineKind::Postgres, "ALTER TABLE t DROP COLUMN IF EXISTS c;", "SELECT 2;");
        assert_eq!(unit.up_sql(EngineKind::Sqlite), "ALTER TABLE t DROP COLUMN c;");
        assert_eq!(unit.up_sql(EngineKind::Postgres), "ALTER TABLE t DROP COLUMN IF EXISTS c;");

        let mut session = MemorySession::new(EngineKind::Postgres);
        unit.revert(&mut session).unwrap();
        assert_eq!(session.statements(), vec!["atomic:SELECT 2;"]);
    }
}
