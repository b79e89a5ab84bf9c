//! branch-core: ciclo de vida de bases de datos por sucursal (tenant) y
//! orquestación de migraciones.
//!
//! El crate es independiente del almacenamiento: define los contratos
//! (`MigrationLedger`, `TenantCatalog`, `SessionFactory`, `TenantSession`) y
//! trae implementaciones en memoria para pruebas y para uso embebido. Las
//! implementaciones Diesel viven en `branch-persistence`.
//!
//! Módulos:
//! - `tenant`: identidad y descriptor de conexión de cada sucursal, catálogo.
//! - `registry`: catálogo ordenado de unidades de migración.
//! - `resolver`: cache de conexiones por sucursal con invalidación.
//! - `ledger`: registro durable de estado de migración y lease por sucursal.
//! - `orchestrator`: máquina de estados apply/rollback y operaciones masivas.
//! - `provisioning`: alta completa de una sucursal nueva.
pub mod clock;
pub mod constants;
pub mod errors;
pub mod ledger;
pub mod orchestrator;
pub mod provisioning;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod tenant;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use clock::{Clock, FakeClock, SystemClock};
pub use errors::{InvalidTenantId, MigrationError, MigrationErrorKind, RegistryError, SessionError, StoreError, UnitError};
pub use ledger::{AppliedUnitRecord, InMemoryLedger, LedgerEntry, LedgerStep, MigrationLedger, MigrationStatus};
pub use orchestrator::{BulkMigrationResult, CancelFlag, LiveLock, MigrationOrchestrator, MigrationResult,
                       OrchestratorBuilder, OrchestratorSettings, ReconcileReport, SchemaCheck, TenantHistory,
                       TenantMigrationStatus};
pub use provisioning::{AccountBootstrapper, BootstrapReport, PrivilegeLevel, ProvisionResult, ProvisioningWorkflow,
                       SeedLoader, SeedReport};
pub use registry::{MigrationRegistry, MigrationUnit, SqlUnit};
pub use resolver::{ConnectionResolver, TenantHandle};
pub use session::{SessionFactory, TenantSession};
pub use tenant::{ChangeNotifier, EngineKind, InMemoryTenantCatalog, TenantCatalog, TenantChangeListener, TenantDescriptor,
                 TenantId, TlsSettings};
