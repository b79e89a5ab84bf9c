//! Orquestación de migraciones por sucursal.
//!
//! `core` contiene la máquina de estados (apply, rollback, force-remove,
//! fan-out, reconciliación), `builder` su construcción, `result` las formas
//! de respuesta y `cancel` la señal cooperativa de cancelación.

pub mod builder;
pub mod cancel;
pub mod core;
pub mod result;

pub use builder::OrchestratorBuilder;
pub use cancel::CancelFlag;
pub use self::core::{MigrationOrchestrator, OrchestratorSettings};
pub use result::{BulkMigrationResult, LiveLock, MigrationResult, ReconcileReport, SchemaCheck, TenantHistory,
                 TenantMigrationStatus};
