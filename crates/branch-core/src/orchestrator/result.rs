//! Formas de resultado uniformes `(success, message, …)` del orquestador.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{MigrationError, MigrationErrorKind};
use crate::ledger::{AppliedUnitRecord, LedgerEntry, MigrationStatus};
use crate::tenant::{EngineKind, TenantId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub tenant_id: TenantId,
    pub success: bool,
    pub message: String,
    /// Unidades confirmadas en esta invocación (aplicadas o revertidas), en
    /// el orden en que se ejecutaron.
    pub units_applied: Vec<String>,
    pub from_unit: Option<String>,
    pub to_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MigrationErrorKind>,
}

impl MigrationResult {
    pub fn ok(tenant_id: TenantId,
              message: impl Into<String>,
              units_applied: Vec<String>,
              from_unit: Option<String>,
              to_unit: Option<String>)
              -> Self {
        Self { tenant_id,
               success: true,
               message: message.into(),
               units_applied,
               from_unit,
               to_unit,
               error: None }
    }

    /// Resultado fallido; conserva las unidades que sí quedaron confirmadas.
    pub fn failed(tenant_id: TenantId,
                  error: &MigrationError,
                  units_applied: Vec<String>,
                  from_unit: Option<String>,
                  to_unit: Option<String>)
                  -> Self {
        Self { tenant_id,
               success: false,
               message: error.to_string(),
               units_applied,
               from_unit,
               to_unit,
               error: Some(error.kind()) }
    }

    pub fn rejected(tenant_id: TenantId, error: &MigrationError) -> Self {
        Self::failed(tenant_id, error, Vec::new(), None, None)
    }
}

/// Agregado de una operación sobre todas las sucursales.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMigrationResult {
    pub success: bool,
    pub message: String,
    pub succeeded: Vec<TenantId>,
    pub failed: Vec<TenantId>,
    pub results: Vec<MigrationResult>,
}

impl BulkMigrationResult {
    pub fn from_results(operation: &str, results: Vec<MigrationResult>) -> Self {
        let succeeded: Vec<TenantId> = results.iter().filter(|r| r.success).map(|r| r.tenant_id.clone()).collect();
        let failed: Vec<TenantId> = results.iter().filter(|r| !r.success).map(|r| r.tenant_id.clone()).collect();
        let message = format!("{operation}: {} succeeded, {} failed", succeeded.len(), failed.len());
        Self { success: failed.is_empty(),
               message,
               succeeded,
               failed,
               results }
    }

    /// Error global previo al fan-out (por ejemplo, no se pudo listar el catálogo).
    pub fn aborted(operation: &str, reason: &str) -> Self {
        Self { success: false,
               message: format!("{operation}: {reason}"),
               succeeded: Vec::new(),
               failed: Vec::new(),
               results: Vec::new() }
    }

    pub fn result_for(&self, tenant: &TenantId) -> Option<&MigrationResult> {
        self.results.iter().find(|r| &r.tenant_id == tenant)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCheck {
    pub tenant_id: TenantId,
    pub valid: bool,
    pub issues: Vec<String>,
}

/// Proyección de `history(tenant)`: fila del ledger, unidades aplicadas y
/// pendientes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantHistory {
    pub entry: LedgerEntry,
    pub applied: Vec<AppliedUnitRecord>,
    pub pending: Vec<String>,
}

/// Fila del listado de estado de todas las sucursales.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMigrationStatus {
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    pub engine: EngineKind,
    pub last_applied_unit: Option<String>,
    pub status: MigrationStatus,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_detail: Option<String>,
    pub locked: bool,
    pub lock_owner: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub pending_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveLock {
    pub tenant_id: TenantId,
    pub owner: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// El dueño es una operación en curso de este mismo proceso.
    pub local: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Entradas que quedaron en `Applying`/`RollingBack` sin lease vivo y
    /// pasaron a `Failed`.
    pub interrupted: Vec<TenantId>,
    pub live_locks: Vec<LiveLock>,
    pub errors: Vec<String>,
}
