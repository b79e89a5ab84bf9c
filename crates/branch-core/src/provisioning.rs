//! Alta completa de una sucursal: ledger, esquema, datos base y cuenta por
//! defecto.
//!
//! El flujo nunca devuelve `Err` ni toca el descriptor guardado: cada paso
//! fallido se reporta en un `ProvisionResult` y la sucursal queda en el
//! estado de ledger que haya dejado el orquestador.

use std::fmt;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::{MigrationError, SessionError, StoreError};
use crate::orchestrator::{CancelFlag, MigrationOrchestrator, MigrationResult};
use crate::session::TenantSession;
use crate::tenant::{TenantDescriptor, TenantId};

/// Nivel de privilegio local de una cuenta dentro de una sucursal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeLevel {
    Viewer = 10,
    Clerk = 20,
    Manager = 50,
    Owner = 100,
}

impl PrivilegeLevel {
    pub const HIGHEST: PrivilegeLevel = PrivilegeLevel::Owner;

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            10 => Some(Self::Viewer),
            20 => Some(Self::Clerk),
            50 => Some(Self::Manager),
            100 => Some(Self::Owner),
            _ => None,
        }
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Viewer => "viewer",
            Self::Clerk => "clerk",
            Self::Manager => "manager",
            Self::Owner => "owner",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    /// Conjuntos de datos insertados en esta corrida.
    pub seeded: Vec<String>,
    /// Conjuntos omitidos porque la tabla ya tenía datos.
    pub skipped: Vec<String>,
}

/// Carga de datos de referencia. Debe ser idempotente: comprobar si los datos
/// existen antes de insertar.
pub trait SeedLoader: Send + Sync {
    fn load(&self, descriptor: &TenantDescriptor, session: &mut dyn TenantSession) -> Result<SeedReport, SessionError>;
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapReport {
    pub account_id: String,
    pub login: String,
    pub account_created: bool,
    pub assignment_created: bool,
    pub privilege: PrivilegeLevel,
    /// Contraseña generada; sólo viaja la vez que se crea la cuenta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_password: Option<String>,
}

impl fmt::Debug for BootstrapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapReport")
         .field("account_id", &self.account_id)
         .field("login", &self.login)
         .field("account_created", &self.account_created)
         .field("assignment_created", &self.assignment_created)
         .field("privilege", &self.privilege)
         .field("initial_password", &self.initial_password.as_ref().map(|_| "***"))
         .finish()
    }
}

/// Cuenta privilegiada por defecto.
///
/// La cuenta es global (se crea una sola vez); la asignación a cada sucursal
/// se agrega si falta, con el nivel local más alto.
pub trait AccountBootstrapper: Send + Sync {
    fn ensure_default_account(&self, tenant: &TenantId) -> Result<BootstrapReport, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResult {
    pub tenant_id: TenantId,
    pub success: bool,
    pub message: String,
    pub migration: Option<MigrationResult>,
    pub seeded: Option<SeedReport>,
    pub account: Option<BootstrapReport>,
}

impl ProvisionResult {
    fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id,
               success: false,
               message: String::new(),
               migration: None,
               seeded: None,
               account: None }
    }

    fn fail(mut self, step: &str, reason: impl fmt::Display) -> Self {
        warn!("provision:{}_failed tenant={} reason={}", step, self.tenant_id, reason);
        self.success = false;
        self.message = format!("{step} failed: {reason}");
        self
    }
}

pub struct ProvisioningWorkflow {
    orchestrator: Arc<MigrationOrchestrator>,
    seeds: Arc<dyn SeedLoader>,
    accounts: Arc<dyn AccountBootstrapper>,
}

impl ProvisioningWorkflow {
    pub fn new(orchestrator: Arc<MigrationOrchestrator>,
               seeds: Arc<dyn SeedLoader>,
               accounts: Arc<dyn AccountBootstrapper>)
               -> Self {
        Self { orchestrator, seeds, accounts }
    }

    pub fn provision(&self, tenant: &TenantId) -> ProvisionResult {
        self.provision_with_cancel(tenant, &CancelFlag::never())
    }

    /// Ledger → esquema al día → datos base → cuenta por defecto.
    pub fn provision_with_cancel(&self, tenant: &TenantId, cancel: &CancelFlag) -> ProvisionResult {
        let mut result = ProvisionResult::new(tenant.clone());

        let descriptor = match self.orchestrator.catalog().get(tenant) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => return result.fail("lookup", MigrationError::TenantNotFound(tenant.clone())),
            Err(e) => return result.fail("lookup", e),
        };
        if let Err(e) = self.orchestrator.ensure_entry(tenant) {
            return result.fail("ledger", e);
        }

        let migration = self.orchestrator.apply_with_cancel(tenant, None, cancel);
        let migrated = migration.success;
        let migration_message = migration.message.clone();
        result.migration = Some(migration);
        if !migrated {
            return result.fail("migration", migration_message);
        }

        match self.load_seeds(&descriptor) {
            Ok(report) => result.seeded = Some(report),
            Err(e) => return result.fail("seed", e),
        }

        match self.accounts.ensure_default_account(tenant) {
            Ok(report) => result.account = Some(report),
            Err(e) => return result.fail("account", e),
        }

        result.success = true;
        result.message = format!("tenant {tenant} provisioned");
        info!("provision:done tenant={}", tenant);
        result
    }

    fn load_seeds(&self, descriptor: &TenantDescriptor) -> Result<SeedReport, String> {
        let handle = self.orchestrator.resolver().resolve(&descriptor.id).map_err(|e| e.to_string())?;
        let mut session = handle.lock();
        self.seeds.load(descriptor, &mut **session).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::ledger::{InMemoryLedger, MigrationLedger, MigrationStatus};
    use crate::resolver::ConnectionResolver;
    use crate::tenant::{InMemoryTenantCatalog, TenantCatalog};
    use crate::testing::{journal, recording_registry, sqlite_tenant, Journal, MemorySessionFactory};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Seeds {
        journal: Journal,
        broken: AtomicBool,
    }

    impl SeedLoader for Seeds {
        fn load(&self, descriptor: &TenantDescriptor, session: &mut dyn TenantSession) -> Result<SeedReport, SessionError> {
            self.journal.lock().push(format!("seed:{}", descriptor.id));
            if self.broken.load(Ordering::SeqCst) {
                return Err(SessionError::Query("tax_rates missing".into()));
            }
            session.execute_atomic("INSERT INTO payment_methods VALUES ('cash')")?;
            Ok(SeedReport { seeded: vec!["payment_methods".into()],
                            skipped: Vec::new() })
        }
    }

    struct Accounts {
        journal: Journal,
        broken: AtomicBool,
    }

    impl AccountBootstrapper for Accounts {
        fn ensure_default_account(&self, tenant: &TenantId) -> Result<BootstrapReport, StoreError> {
            self.journal.lock().push(format!("account:{tenant}"));
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::Storage("accounts table unavailable".into()));
            }
            Ok(BootstrapReport { account_id: "acc-1".into(),
                                 login: "admin".into(),
                                 account_created: true,
                                 assignment_created: true,
                                 privilege: PrivilegeLevel::HIGHEST,
                                 initial_password: None })
        }
    }

    struct Setup {
        catalog: Arc<InMemoryTenantCatalog>,
        factory: Arc<MemorySessionFactory>,
        ledger: Arc<InMemoryLedger>,
        journal: Journal,
        seeds: Arc<Seeds>,
        accounts: Arc<Accounts>,
        workflow: ProvisioningWorkflow,
    }

    fn setup() -> Setup {
        let journal = journal();
        let catalog = Arc::new(InMemoryTenantCatalog::new());
        let factory = Arc::new(MemorySessionFactory::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let resolver = ConnectionResolver::new(catalog.clone(), factory.clone());
        let orchestrator = MigrationOrchestrator::builder(Arc::new(recording_registry(&["u1", "u2"], &journal)),
                                                          ledger.clone(),
                                                          catalog.clone(),
                                                          resolver).clock(Arc::new(FakeClock::default()))
                                                                   .build();
        let seeds = Arc::new(Seeds { journal: journal.clone(),
                                     broken: AtomicBool::new(false) });
        let accounts = Arc::new(Accounts { journal: journal.clone(),
                                           broken: AtomicBool::new(false) });
        let workflow = ProvisioningWorkflow::new(Arc::new(orchestrator), seeds.clone(), accounts.clone());
        Setup { catalog,
                factory,
                ledger,
                journal,
                seeds,
                accounts,
                workflow }
    }

    #[test]
    fn provisions_in_order() {
        let s = setup();
        let t = s.catalog.upsert(sqlite_tenant("norte")).unwrap().id;

        let result = s.workflow.provision(&t);
        assert!(result.success, "{}", result.message);
        assert_eq!(*s.journal.lock(), vec!["apply:u1", "apply:u2", "seed:norte", "account:norte"]);
        assert_eq!(result.migration.unwrap().units_applied, vec!["u1", "u2"]);
        assert_eq!(result.account.unwrap().privilege, PrivilegeLevel::Owner);
        assert!(s.factory
                 .statements(&t)
                 .contains(&"atomic:INSERT INTO payment_methods VALUES ('cash')".to_string()));

        // segunda vez: el esquema ya está al día, seeds y cuenta se revisan igual
        let again = s.workflow.provision(&t);
        assert!(again.success);
        assert!(again.migration.unwrap().units_applied.is_empty());
    }

    #[test]
    fn migration_failure_stops_before_seeds() {
        let s = setup();
        let t = s.catalog.upsert(sqlite_tenant("norte")).unwrap().id;
        s.factory.fail_statements(&t, "apply u2");

        let result = s.workflow.provision(&t);
        assert!(!result.success);
        assert!(result.message.starts_with("migration failed"));
        assert!(result.seeded.is_none());
        assert!(!s.journal.lock().iter().any(|c| c.starts_with("seed") || c.starts_with("account")));
        // el descriptor guardado no se toca
        assert_eq!(s.catalog.get(&t).unwrap().unwrap().revision, 1);
        assert_eq!(s.ledger.read(&t).unwrap().unwrap().status, MigrationStatus::Failed);
    }

    #[test]
    fn seed_and_account_failures_are_reported() {
        let s = setup();
        let t = s.catalog.upsert(sqlite_tenant("norte")).unwrap().id;

        s.seeds.broken.store(true, Ordering::SeqCst);
        let result = s.workflow.provision(&t);
        assert!(result.message.starts_with("seed failed"), "{}", result.message);
        assert!(result.migration.unwrap().success);
        assert!(!s.journal.lock().iter().any(|c| c.starts_with("account")));

        s.seeds.broken.store(false, Ordering::SeqCst);
        s.accounts.broken.store(true, Ordering::SeqCst);
        let result = s.workflow.provision(&t);
        assert!(!result.success);
        assert!(result.message.starts_with("account failed"));
        assert!(result.seeded.is_some());
    }

    #[test]
    fn unknown_tenant_gets_no_ledger_row() {
        let s = setup();
        let ghost = TenantId::parse("fantasma").unwrap();
        let result = s.workflow.provision(&ghost);
        assert!(!result.success);
        assert!(result.message.starts_with("lookup failed"));
        assert!(s.ledger.read(&ghost).unwrap().is_none());
    }

    #[test]
    fn privilege_levels_are_ordered() {
        assert!(PrivilegeLevel::Owner > PrivilegeLevel::Manager);
        assert_eq!(PrivilegeLevel::from_i32(PrivilegeLevel::Clerk.as_i32()), Some(PrivilegeLevel::Clerk));
        assert_eq!(PrivilegeLevel::from_i32(7), None);
    }
}
