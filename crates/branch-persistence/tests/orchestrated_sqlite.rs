//! Pila completa sobre SQLite: catálogo y ledger Diesel, bases de sucursal
//! reales y el esquema retail.


use std::sync::Arc;

use branch_core::constants::INTERRUPTED_DETAIL;
use branch_core::{ConnectionResolver, MigrationLedger, MigrationOrchestrator, MigrationStatus, ProvisioningWorkflow,
                  SessionFactory, TenantCatalog, TenantDescriptor};
use branch_persistence::{retail_registry, DefaultAccount, DieselAccountBootstrapper, DieselLedger,
                         DieselSessionFactory, DieselTenantCatalog, SqlSeedLoader};
use chrono::{Duration, Utc};
use tempfile::TempDir;
use test_support::{sqlite_branch, sqlite_pool, tid};

const LATEST: &str = "20240215_0001_customer_loyalty";

struct Stack {
    dir: TempDir,
    catalog: Arc<dyn TenantCatalog>,
    ledger: Arc<dyn MigrationLedger>,
    orchestrator: Arc<MigrationOrchestrator>,
    workflow: ProvisioningWorkflow,
}

impl Stack {
    fn new() -> Self {
        let (dir, pool) = sqlite_pool();
        let catalog: Arc<dyn TenantCatalog> = Arc::new(DieselTenantCatalog::new(pool.clone()));
        let ledger: Arc<dyn MigrationLedger> = Arc::new(DieselLedger::new(pool.clone()));
        let resolver = ConnectionResolver::new(Arc::clone(&catalog), Arc::new(DieselSessionFactory::default()));
        let orchestrator = Arc::new(MigrationOrchestrator::builder(Arc::new(retail_registry().unwrap()),
                                                                   Arc::clone(&ledger),
                                                                   Arc::clone(&catalog),
                                                                   resolver)
                                    .instance_id("it-sqlite")
                                    .build());
        let workflow = ProvisioningWorkflow::new(Arc::clone(&orchestrator),
                                                 Arc::new(SqlSeedLoader::retail()),
                                                 Arc::new(DieselAccountBootstrapper::new(pool,
                                                                                         DefaultAccount::default())));
        Self { dir, catalog, ledger, orchestrator, workflow }
    }

    fn register(&self, id: &str, code: &str) -> TenantDescriptor {
        self.catalog.upsert(sqlite_branch(self.dir.path(), id, code)).unwrap()
    }

    /// Conteo directo sobre la base de la sucursal, sin pasar por el cache.
    fn count(&self, id: &str, sql: &str) -> i64 {
        let descriptor = self.catalog.get(&tid(id)).unwrap().unwrap();
        let mut session = DieselSessionFactory::default().open(&descriptor).unwrap();
        session.count(sql).unwrap()
    }

    fn has_column(&self, id: &str, table: &str, column: &str) -> bool {
        self.count(id,
                   &format!("SELECT COUNT(*) AS n FROM pragma_table_info('{table}') WHERE name = '{column}'"))
        == 1
    }
}

#[test]
fn apply_all_brings_every_branch_to_latest() {
    let stack = Stack::new();
    stack.register("norte", "N01");
    stack.register("sur", "S01");

    let bulk = stack.orchestrator.apply_all();
    assert!(bulk.success, "{}", bulk.message);
    assert_eq!(bulk.succeeded.len(), 2);
    for id in ["norte", "sur"] {
        let result = bulk.result_for(&tid(id)).unwrap();
        assert_eq!(result.units_applied.len(), 7);
        assert_eq!(result.to_unit.as_deref(), Some(LATEST));
        assert!(stack.orchestrator.pending(&tid(id)).unwrap().is_empty());
        assert!(stack.has_column(id, "customers", "loyalty_points"));
        let entry = stack.ledger.read(&tid(id)).unwrap().unwrap();
        assert_eq!(entry.status, MigrationStatus::Succeeded);
        assert!(entry.lock_owner.is_none());
    }

    // segunda corrida: nada pendiente, sigue siendo éxito
    let again = stack.orchestrator.apply(&tid("norte"), None);
    assert!(again.success && again.units_applied.is_empty());
}

#[test]
fn rollback_reverts_the_last_unit_on_the_real_database() {
    let stack = Stack::new();
    stack.register("norte", "N01");
    assert!(stack.orchestrator.apply(&tid("norte"), None).success);

    let rollback = stack.orchestrator.rollback_last(&tid("norte"));
    assert!(rollback.success, "{}", rollback.message);
    assert_eq!(rollback.units_applied, vec![LATEST.to_string()]);
    assert!(!stack.has_column("norte", "customers", "loyalty_points"));
    assert_eq!(stack.orchestrator.pending(&tid("norte")).unwrap(), vec![LATEST.to_string()]);
    let entry = stack.ledger.read(&tid("norte")).unwrap().unwrap();
    assert_eq!(entry.status, MigrationStatus::RolledBack);
    assert_eq!(entry.last_applied_unit.as_deref(), Some("20240201_0001_deliveries"));

    assert!(stack.orchestrator.apply(&tid("norte"), None).success);
    assert!(stack.has_column("norte", "customers", "loyalty_points"));
    assert!(stack.orchestrator.validate(&tid("norte")).valid);
}

#[test]
fn apply_up_to_target_stops_there() {
    let stack = Stack::new();
    stack.register("centro", "C01");
    let result = stack.orchestrator.apply(&tid("centro"), Some("20240115_0001_inventory"));
    assert!(result.success);
    assert_eq!(result.units_applied.len(), 3);
    let history = stack.orchestrator.history(&tid("centro")).unwrap();
    assert_eq!(history.applied.len(), 3);
    assert_eq!(history.pending.len(), 4);
    assert_eq!(stack.count("centro", "SELECT COUNT(*) AS n FROM sqlite_master WHERE name = 'sales'"), 0);
}

#[test]
fn provisioning_seeds_and_bootstraps_once() {
    let stack = Stack::new();
    stack.register("norte", "N01");

    let first = stack.workflow.provision(&tid("norte"));
    assert!(first.success, "{}", first.message);
    let seeded = first.seeded.clone().unwrap();
    assert_eq!(seeded.seeded.len(), 3);
    let account = first.account.clone().unwrap();
    assert!(account.account_created && account.initial_password.is_some());
    assert_eq!(stack.count("norte", "SELECT COUNT(*) AS n FROM tax_rates"), 3);

    let second = stack.workflow.provision(&tid("norte"));
    assert!(second.success, "{}", second.message);
    assert_eq!(second.seeded.unwrap().skipped.len(), 3);
    assert!(!second.account.unwrap().account_created);
    assert_eq!(stack.count("norte", "SELECT COUNT(*) AS n FROM tax_rates"), 3);
}

#[test]
fn reconcile_marks_abandoned_attempt_failed_and_next_apply_resumes() {
    let stack = Stack::new();
    stack.register("norte", "N01");
    assert!(stack.orchestrator.apply(&tid("norte"), Some("20240110_0002_customers")).success);

    // un proceso anterior murió a mitad de apply: lease vencido, estado Applying
    let t = tid("norte");
    let past = Utc::now() - Duration::minutes(10);
    assert!(stack.ledger.try_acquire_lock(&t, "dead/1", past + Duration::minutes(5), past).unwrap());
    assert!(stack.ledger.mark_status(&t, "dead/1", MigrationStatus::Applying, past).unwrap());

    let report = stack.orchestrator.reconcile();
    assert_eq!(report.interrupted, vec![t.clone()]);
    assert!(report.errors.is_empty());
    let entry = stack.ledger.read(&t).unwrap().unwrap();
    assert_eq!(entry.status, MigrationStatus::Failed);
    assert_eq!(entry.error_detail.as_deref(), Some(INTERRUPTED_DETAIL));
    assert!(entry.lock_owner.is_none());
    assert_eq!(entry.last_applied_unit.as_deref(), Some("20240110_0002_customers"));

    let resumed = stack.orchestrator.apply(&t, None);
    assert!(resumed.success);
    assert_eq!(resumed.from_unit.as_deref(), Some("20240110_0002_customers"));
    assert_eq!(resumed.units_applied.len(), 5);
}

#[test]
fn live_foreign_lock_is_reported_not_broken() {
    let stack = Stack::new();
    stack.register("sur", "S01");
    let t = tid("sur");
    stack.ledger.ensure_entry(&t, Utc::now()).unwrap();
    assert!(stack.ledger.try_acquire_lock(&t, "other/1", Utc::now() + Duration::minutes(5), Utc::now()).unwrap());

    let result = stack.orchestrator.apply(&t, None);
    assert!(!result.success);
    assert_eq!(result.error, Some(branch_core::MigrationErrorKind::LockHeld));
    assert!(result.message.contains("other/1"));

    let report = stack.orchestrator.reconcile();
    assert!(report.interrupted.is_empty());
    assert_eq!(report.live_locks.len(), 1);
    assert!(!report.live_locks[0].local);
    assert_eq!(stack.ledger.read(&t).unwrap().unwrap().lock_owner.as_deref(), Some("other/1"));
}

#[test]
fn descriptor_edit_reopens_connection() {
    let stack = Stack::new();
    let original = stack.register("norte", "N01");
    assert!(stack.orchestrator.apply(&tid("norte"), Some("20240110_0001_reference_tables")).success);

    // se mueve la sucursal a otro archivo: la próxima resolución usa la revisión nueva
    let mut moved = original.clone();
    moved.file_path = Some(stack.dir.path().join("moved").join("norte.db").display().to_string());
    let stored = stack.catalog.upsert(moved).unwrap();
    assert_eq!(stored.revision, original.revision + 1);

    let handle = stack.orchestrator.resolver().resolve(&tid("norte")).unwrap();
    assert_eq!(handle.revision(), stored.revision);
    // la base nueva está vacía: el ledger dice que la unidad está aplicada, pero la tabla no existe
    assert_eq!(stack.count("norte", "SELECT COUNT(*) AS n FROM sqlite_master WHERE name = 'payment_methods'"), 0);
}
