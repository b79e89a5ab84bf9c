//! Pruebas contra Postgres real (requiere DATABASE_URL válido en entorno).


use branch_core::{LedgerStep, MigrationLedger, MigrationStatus, TenantCatalog, TenantDescriptor, TenantId};
use branch_persistence::{ControlBackend, DieselLedger, DieselTenantCatalog};
use chrono::{Duration, Utc};
use test_support::PG_POOL;

fn unique_tenant() -> TenantId {
    TenantId::parse(&format!("it-{}", &uuid::Uuid::new_v4().simple().to_string()[..12])).unwrap()
}

#[test]
fn ledger_cas_on_postgres() {
    let Some(pool) = PG_POOL.as_ref() else {
        eprintln!("skip (no DATABASE_URL)");
        return;
    };
    assert_eq!(pool.backend(), ControlBackend::Postgres);
    let ledger = DieselLedger::new(pool.clone());
    let t = unique_tenant();
    let now = Utc::now();
    ledger.ensure_entry(&t, now).unwrap();
    assert!(ledger.try_acquire_lock(&t, "a", now + Duration::seconds(60), now).unwrap());
    assert!(!ledger.try_acquire_lock(&t, "b", now + Duration::seconds(60), now).unwrap());
    let step = LedgerStep::Applied { unit_id: "u1".into() };
    assert!(ledger.record_progress(&t, "a", &step, MigrationStatus::Succeeded, now).unwrap());
    assert_eq!(ledger.history(&t).unwrap().len(), 1);
    assert!(ledger.release_lock(&t, "a").unwrap());
}

#[test]
fn catalog_roundtrip_on_postgres() {
    let Some(pool) = PG_POOL.as_ref() else {
        eprintln!("skip (no DATABASE_URL)");
        return;
    };
    let catalog = DieselTenantCatalog::new(pool.clone());
    let t = unique_tenant();
    let mut d = TenantDescriptor::postgres(t.clone(), "IT", "Integration", "localhost", t.as_str());
    d.params.insert("application_name".into(), "branchflow-it".into());
    let stored = catalog.upsert(d).unwrap();
    assert_eq!(stored.revision, 1);
    assert_eq!(catalog.get(&t).unwrap().unwrap(), stored);
    assert!(catalog.remove(&t).unwrap());
}
