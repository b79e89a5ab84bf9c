//! Datos de referencia de una sucursal nueva.
//!
//! Cada conjunto se protege con un conteo: sólo se inserta si la tabla está
//! vacía, y se inserta en una única transacción. Correr el loader dos veces
//! no duplica filas.

use branch_core::{SeedLoader, SeedReport, SessionError, TenantDescriptor, TenantSession};
use log::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSet {
    pub name: String,
    pub table: String,
    pub insert_sql: String,
}

impl SeedSet {
    pub fn new(name: &str, table: &str, insert_sql: &str) -> Self {
        Self { name: name.to_string(),
               table: table.to_string(),
               insert_sql: insert_sql.to_string() }
    }

    fn probe_sql(&self) -> String {
        format!("SELECT COUNT(*) AS n FROM {}", self.table)
    }
}

pub fn retail_seed_sets() -> Vec<SeedSet> {
    vec![SeedSet::new("payment_methods",
                      "payment_methods",
                      "INSERT INTO payment_methods (code, name) VALUES ('CASH', 'Cash'), ('CARD', 'Card'), \
                       ('TRANSFER', 'Bank transfer'), ('CREDIT', 'Store credit');"),
         SeedSet::new("tax_rates",
                      "tax_rates",
                      "INSERT INTO tax_rates (code, name, rate) VALUES ('STD', 'Standard', 0.1600), \
                       ('RED', 'Reduced', 0.0800), ('EXE', 'Exempt', 0.0000);"),
         SeedSet::new("units_of_measure",
                      "units_of_measure",
                      "INSERT INTO units_of_measure (code, name) VALUES ('EA', 'Each'), ('KG', 'Kilogram'), \
                       ('L', 'Litre'), ('M', 'Metre'), ('BOX', 'Box');"),]
}

pub struct SqlSeedLoader {
    sets: Vec<SeedSet>,
}

impl SqlSeedLoader {
    pub fn new(sets: Vec<SeedSet>) -> Self {
        Self { sets }
    }

    pub fn retail() -> Self {
        Self::new(retail_seed_sets())
    }
}

impl SeedLoader for SqlSeedLoader {
    fn load(&self, descriptor: &TenantDescriptor, session: &mut dyn TenantSession) -> Result<SeedReport, SessionError> {
        let mut report = SeedReport::default();
        for set in &self.sets {
            let existing = session.count(&set.probe_sql())?;
            if existing > 0 {
                debug!("seed:skip tenant={} set={} rows={}", descriptor.id, set.name, existing);
                report.skipped.push(set.name.clone());
                continue;
            }
            session.execute_atomic(&set.insert_sql)?;
            report.seeded.push(set.name.clone());
        }
        info!("seed:done tenant={} seeded={:?} skipped={:?}",
              descriptor.id,
              report.seeded,
              report.skipped);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::{retail_registry, DieselSession};
    use branch_core::TenantId;
    use diesel::sqlite::SqliteConnection;
    use diesel::Connection;

    fn prepared() -> DieselSession {
        let mut session = DieselSession::Sqlite(SqliteConnection::establish(":memory:").unwrap());
        for unit in retail_registry().unwrap().ordered_units() {
            unit.apply(&mut session).unwrap();
        }
        session
    }

    #[test]
    fn seeding_is_idempotent() {
        let descriptor = TenantDescriptor::sqlite(TenantId::parse("norte").unwrap(), "N", "Norte", ":memory:");
        let mut session = prepared();
        let loader = SqlSeedLoader::retail();

        let first = loader.load(&descriptor, &mut session).unwrap();
        assert_eq!(first.seeded, vec!["payment_methods", "tax_rates", "units_of_measure"]);
        assert!(first.skipped.is_empty());

        let second = loader.load(&descriptor, &mut session).unwrap();
        assert!(second.seeded.is_empty());
        assert_eq!(second.skipped.len(), 3);
        assert_eq!(session.count("SELECT COUNT(*) AS n FROM payment_methods").unwrap(), 4);
    }

    #[test]
    fn missing_tables_fail_the_load() {
        let descriptor = TenantDescriptor::sqlite(TenantId::parse("norte").unwrap(), "N", "Norte", ":memory:");
        let mut session = DieselSession::Sqlite(SqliteConnection::establish(":memory:").unwrap());
        assert!(matches!(SqlSeedLoader::retail().load(&descriptor, &mut session), Err(SessionError::Query(_))));
    }
}
