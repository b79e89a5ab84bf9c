//! Errores del facade.
//!
//! Las operaciones de migración nunca fallan con `Err` (se reportan en sus
//! resultados); `ControlPlaneError` cubre arranque, configuración, catálogo y
//! consultas.

use branch_core::{InvalidTenantId, MigrationError, RegistryError, StoreError, TenantId};
use branch_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    InvalidTenantId(#[from] InvalidTenantId),
    #[error("tenant {0} not found")]
    TenantNotFound(TenantId),
    #[error("tenant {0} is already registered")]
    AlreadyRegistered(TenantId),
    #[error("invalid descriptor for tenant {tenant}: {reason}")]
    InvalidDescriptor { tenant: TenantId, reason: String },
    #[error("background task failed: {0}")]
    Join(String),
}

impl ControlPlaneError {
    /// Errores de infraestructura (almacenamiento, pool, tareas) frente a
    /// errores de entrada del operador.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Self::Persistence(_) | Self::Store(_) | Self::Join(_) => true,
            Self::Migration(e) => matches!(e, MigrationError::Store(_) | MigrationError::ConnectionFailed { .. }),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_infrastructure_errors() {
        assert!(ControlPlaneError::Store(StoreError::Storage("down".into())).is_infrastructure());
        assert!(ControlPlaneError::Join("panicked".into()).is_infrastructure());
        let missing = TenantId::parse("norte").unwrap();
        assert!(!ControlPlaneError::TenantNotFound(missing.clone()).is_infrastructure());
        assert!(!ControlPlaneError::Migration(MigrationError::TenantNotFound(missing)).is_infrastructure());
        assert!(!ControlPlaneError::Config("x".into()).is_infrastructure());
    }

    #[test]
    fn messages() {
        let t = TenantId::parse("sur").unwrap();
        let err = ControlPlaneError::InvalidDescriptor { tenant: t, reason: "sqlite tenant requires file_path".into() };
        assert_eq!(err.to_string(), "invalid descriptor for tenant sur: sqlite tenant requires file_path");
    }
}
