//! Errores del núcleo.
//!
//! `MigrationError` es la taxonomía que el orquestador usa internamente; hacia
//! afuera se proyecta a `MigrationErrorKind` dentro de un `MigrationResult`,
//! nunca como `Err` (las operaciones masivas dependen de ese aislamiento).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tenant::TenantId;

/// Identificador de sucursal mal formado (violación de contrato del llamador).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid tenant id {value:?}: {reason}")]
pub struct InvalidTenantId {
    pub value: String,
    pub reason: &'static str,
}

/// Errores de una sesión contra la base de datos de una sucursal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid connection settings: {0}")]
    Config(String),
    #[error("connect: {0}")]
    Connect(String),
    #[error("query: {0}")]
    Query(String),
}

/// Errores de almacenamiento del plano de control (ledger, catálogo, cuentas).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("no ledger entry for tenant {0}")]
    MissingEntry(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Fallo reportado por una unidad de migración.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("{0}")]
    Failed(String),
}

/// Errores al construir el registro de unidades.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("migration unit with empty id")]
    EmptyId,
    #[error("duplicated migration unit id {0}")]
    Duplicate(String),
    #[error("migration unit {next} must sort after {previous}")]
    OutOfOrder { previous: String, next: String },
}

/// Taxonomía de fallos del orquestador.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("tenant {0} not found")]
    TenantNotFound(TenantId),
    #[error("connection to tenant {tenant} failed: {source}")]
    ConnectionFailed {
        tenant: TenantId,
        #[source]
        source: SessionError,
    },
    #[error("tenant {tenant} is locked by {owner}{}", expires_suffix(.expires_at))]
    LockHeld {
        tenant: TenantId,
        owner: String,
        expires_at: Option<DateTime<Utc>>,
    },
    #[error("unit {unit} failed on tenant {tenant}: {reason}")]
    UnitExecutionFailed { tenant: TenantId, unit: String, reason: String },
    #[error("tenant {0} has no applied migration to roll back")]
    NoMigrationToRollback(TenantId),
    #[error("operation on tenant {tenant} cancelled {detail}")]
    Cancelled { tenant: TenantId, detail: String },
    #[error("migration unit {0} is not registered")]
    UnknownUnit(String),
    #[error("unit {unit} is not recorded as applied on tenant {tenant}")]
    UnitNotApplied { tenant: TenantId, unit: String },
    #[error("lease on tenant {0} was taken over by another owner")]
    LeaseLost(TenantId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn expires_suffix(expires_at: &Option<DateTime<Utc>>) -> String {
    match expires_at {
        Some(ts) => format!(" until {}", ts.to_rfc3339()),
        None => String::new(),
    }
}

/// Proyección serializable de `MigrationError` que viaja en los resultados.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationErrorKind {
    TenantNotFound,
    ConnectionFailed,
    LockHeld,
    UnitExecutionFailed,
    NoMigrationToRollback,
    Cancelled,
    UnknownUnit,
    UnitNotApplied,
    LeaseLost,
    Storage,
}

impl MigrationError {
    pub fn kind(&self) -> MigrationErrorKind {
        match self {
            Self::TenantNotFound(_) => MigrationErrorKind::TenantNotFound,
            Self::ConnectionFailed { .. } => MigrationErrorKind::ConnectionFailed,
            Self::LockHeld { .. } => MigrationErrorKind::LockHeld,
            Self::UnitExecutionFailed { .. } => MigrationErrorKind::UnitExecutionFailed,
            Self::NoMigrationToRollback(_) => MigrationErrorKind::NoMigrationToRollback,
            Self::Cancelled { .. } => MigrationErrorKind::Cancelled,
            Self::UnknownUnit(_) => MigrationErrorKind::UnknownUnit,
            Self::UnitNotApplied { .. } => MigrationErrorKind::UnitNotApplied,
            Self::LeaseLost(_) => MigrationErrorKind::LeaseLost,
            Self::Store(_) => MigrationErrorKind::Storage,
        }
    }
}

impl MigrationErrorKind {
    /// Indica si reintentar la misma operación más tarde puede tener éxito
    /// sin corregir la entrada.
    pub fn is_retriable(self) -> bool {
        matches!(self,
                 Self::ConnectionFailed
                 | Self::LockHeld
                 | Self::UnitExecutionFailed
                 | Self::Cancelled
                 | Self::LeaseLost
                 | Self::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_held_message_includes_expiry() {
        let tenant = TenantId::parse("norte").unwrap();
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let err = MigrationError::LockHeld { tenant: tenant.clone(), owner: "cp-1/x".into(), expires_at: Some(ts) };
        assert_eq!(err.to_string(), format!("tenant norte is locked by cp-1/x until {}", ts.to_rfc3339()));
        let err = MigrationError::LockHeld { tenant, owner: "cp-1/x".into(), expires_at: None };
        assert_eq!(err.to_string(), "tenant norte is locked by cp-1/x");
    }

    #[test]
    fn retriable_kinds() {
        assert!(MigrationErrorKind::LockHeld.is_retriable());
        assert!(MigrationErrorKind::UnitExecutionFailed.is_retriable());
        assert!(!MigrationErrorKind::TenantNotFound.is_retriable());
        assert!(!MigrationErrorKind::NoMigrationToRollback.is_retriable());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let v = serde_json::to_value(MigrationErrorKind::NoMigrationToRollback).unwrap();
        assert_eq!(v, serde_json::json!("no_migration_to_rollback"));
    }
}
