//! Fachada async sobre `ControlPlane`.
//!
//! El núcleo es bloqueante (Diesel + rayon); cada operación se despacha con
//! `tokio::task::spawn_blocking` para no ocupar los workers del runtime.

use std::sync::Arc;

use async_trait::async_trait;
use branch_core::{BulkMigrationResult, MigrationResult, ProvisionResult, ReconcileReport, SchemaCheck,
                  TenantDescriptor, TenantHistory, TenantId, TenantMigrationStatus};

use crate::control_plane::{ControlPlane, Registration};
use crate::errors::ControlPlaneError;

/// Superficie administrativa consumida por hosts async (handlers HTTP, jobs).
#[async_trait]
pub trait TenantAdmin: Send + Sync {
    async fn register_tenant(&self,
                             descriptor: TenantDescriptor,
                             provision: bool)
                             -> Result<Registration, ControlPlaneError>;
    async fn tenants(&self) -> Result<Vec<TenantDescriptor>, ControlPlaneError>;
    async fn apply(&self, tenant: TenantId, target: Option<String>) -> Result<MigrationResult, ControlPlaneError>;
    async fn apply_all(&self) -> Result<BulkMigrationResult, ControlPlaneError>;
    async fn rollback_last(&self, tenant: TenantId) -> Result<MigrationResult, ControlPlaneError>;
    async fn rollback_all(&self) -> Result<BulkMigrationResult, ControlPlaneError>;
    async fn force_remove(&self, tenant: TenantId, unit_id: String) -> Result<MigrationResult, ControlPlaneError>;
    async fn pending(&self, tenant: TenantId) -> Result<Vec<String>, ControlPlaneError>;
    async fn history(&self, tenant: TenantId) -> Result<TenantHistory, ControlPlaneError>;
    async fn validate(&self, tenant: TenantId) -> Result<SchemaCheck, ControlPlaneError>;
    async fn status(&self) -> Result<Vec<TenantMigrationStatus>, ControlPlaneError>;
    async fn provision(&self, tenant: TenantId) -> Result<ProvisionResult, ControlPlaneError>;
    async fn reconcile(&self) -> Result<ReconcileReport, ControlPlaneError>;
}

#[derive(Clone)]
pub struct AsyncControlPlane {
    inner: Arc<ControlPlane>,
}

impl AsyncControlPlane {
    pub fn new(inner: Arc<ControlPlane>) -> Self {
        Self { inner }
    }

    pub fn blocking(&self) -> &Arc<ControlPlane> {
        &self.inner
    }

    async fn run<T, F>(&self, op: F) -> Result<T, ControlPlaneError>
        where T: Send + 'static,
              F: FnOnce(&ControlPlane) -> Result<T, ControlPlaneError> + Send + 'static
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner)).await
                                                        .map_err(|e| ControlPlaneError::Join(e.to_string()))?
    }
}

impl From<ControlPlane> for AsyncControlPlane {
    fn from(inner: ControlPlane) -> Self {
        Self::new(Arc::new(inner))
    }
}

#[async_trait]
impl TenantAdmin for AsyncControlPlane {
    async fn register_tenant(&self,
                             descriptor: TenantDescriptor,
                             provision: bool)
                             -> Result<Registration, ControlPlaneError> {
        self.run(move |cp| cp.register_tenant(descriptor, provision)).await
    }

    async fn tenants(&self) -> Result<Vec<TenantDescriptor>, ControlPlaneError> {
        self.run(|cp| cp.tenants()).await
    }

    async fn apply(&self, tenant: TenantId, target: Option<String>) -> Result<MigrationResult, ControlPlaneError> {
        self.run(move |cp| Ok(cp.apply(&tenant, target.as_deref()))).await
    }

    async fn apply_all(&self) -> Result<BulkMigrationResult, ControlPlaneError> {
        self.run(|cp| Ok(cp.apply_all())).await
    }

    async fn rollback_last(&self, tenant: TenantId) -> Result<MigrationResult, ControlPlaneError> {
        self.run(move |cp| Ok(cp.rollback_last(&tenant))).await
    }

    async fn rollback_all(&self) -> Result<BulkMigrationResult, ControlPlaneError> {
        self.run(|cp| Ok(cp.rollback_all())).await
    }

    async fn force_remove(&self, tenant: TenantId, unit_id: String) -> Result<MigrationResult, ControlPlaneError> {
        self.run(move |cp| Ok(cp.force_remove(&tenant, &unit_id))).await
    }

    async fn pending(&self, tenant: TenantId) -> Result<Vec<String>, ControlPlaneError> {
        self.run(move |cp| cp.pending(&tenant)).await
    }

    async fn history(&self, tenant: TenantId) -> Result<TenantHistory, ControlPlaneError> {
        self.run(move |cp| cp.history(&tenant)).await
    }

    async fn validate(&self, tenant: TenantId) -> Result<SchemaCheck, ControlPlaneError> {
        self.run(move |cp| Ok(cp.validate(&tenant))).await
    }

    async fn status(&self) -> Result<Vec<TenantMigrationStatus>, ControlPlaneError> {
        self.run(|cp| cp.status()).await
    }

    async fn provision(&self, tenant: TenantId) -> Result<ProvisionResult, ControlPlaneError> {
        self.run(move |cp| Ok(cp.provision(&tenant))).await
    }

    async fn reconcile(&self) -> Result<ReconcileReport, ControlPlaneError> {
        self.run(|cp| Ok(cp.reconcile())).await
    }
}
