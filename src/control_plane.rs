//! `ControlPlane`: arma pool, stores, resolver, orquestador y flujo de alta,
//! y expone la superficie administrativa de forma bloqueante.

use std::sync::Arc;

use branch_core::{BulkMigrationResult, ConnectionResolver, EngineKind, MigrationLedger, MigrationOrchestrator,
                  MigrationRegistry, MigrationResult, ProvisionResult, ProvisioningWorkflow, ReconcileReport,
                  SchemaCheck, SeedLoader, SessionFactory, TenantCatalog, TenantDescriptor, TenantHistory, TenantId,
                  TenantMigrationStatus};
use branch_persistence::{build_pool, retail_registry, ControlPool, DieselAccountBootstrapper, DieselLedger,
                         DieselSessionFactory, DieselTenantCatalog, SqlSeedLoader};
use log::{info, warn};
use serde::Serialize;

use crate::config::AppConfig;
use crate::errors::ControlPlaneError;

/// Resultado de registrar una sucursal.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub tenant: TenantDescriptor,
    /// Alta en línea (si se pidió). Su fallo no deshace el registro.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provision: Option<ProvisionResult>,
}

pub struct ControlPlane {
    config: AppConfig,
    pool: ControlPool,
    catalog: Arc<dyn TenantCatalog>,
    orchestrator: Arc<MigrationOrchestrator>,
    provisioning: ProvisioningWorkflow,
}

impl ControlPlane {
    /// Plano de control con el esquema retail de sucursal.
    pub fn open(config: AppConfig) -> Result<Self, ControlPlaneError> {
        let registry = retail_registry()?;
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: AppConfig, registry: MigrationRegistry) -> Result<Self, ControlPlaneError> {
        let pool = build_pool(&config.database.url,
                              config.database.min_connections,
                              config.database.max_connections)?;
        let factory = Arc::new(DieselSessionFactory::new(config.create_databases));
        Ok(Self::with_parts(config, pool, registry, factory, Arc::new(SqlSeedLoader::retail())))
    }

    /// Ensamblado explícito: pool ya construido, fábrica de sesiones y
    /// loader de datos a elección.
    pub fn with_parts(config: AppConfig,
                      pool: ControlPool,
                      registry: MigrationRegistry,
                      factory: Arc<dyn SessionFactory>,
                      seeds: Arc<dyn SeedLoader>)
                      -> Self {
        let catalog: Arc<dyn TenantCatalog> = Arc::new(DieselTenantCatalog::new(pool.clone()));
        let ledger: Arc<dyn MigrationLedger> = Arc::new(DieselLedger::new(pool.clone()));
        let accounts = Arc::new(DieselAccountBootstrapper::new(pool.clone(), config.admin.clone()));
        let resolver = ConnectionResolver::new(Arc::clone(&catalog), factory);
        let orchestrator = Arc::new(MigrationOrchestrator::builder(Arc::new(registry),
                                                                   ledger,
                                                                   Arc::clone(&catalog),
                                                                   resolver)
                                    .instance_id(&config.instance_id)
                                    .lease(config.lease)
                                    .build());
        let provisioning = ProvisioningWorkflow::new(Arc::clone(&orchestrator), seeds, accounts);
        info!("control plane ready instance={} backend={:?} units={}",
              config.instance_id,
              pool.backend(),
              orchestrator.registry().len());
        Self { config,
               pool,
               catalog,
               orchestrator,
               provisioning }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pool(&self) -> &ControlPool {
        &self.pool
    }

    pub fn orchestrator(&self) -> &Arc<MigrationOrchestrator> {
        &self.orchestrator
    }

    // ------------------------------------------------------------------
    // catálogo
    // ------------------------------------------------------------------

    /// Guarda una sucursal nueva, crea su fila de ledger y, si `provision`,
    /// corre el alta completa (best-effort: el descriptor queda guardado
    /// aunque el alta falle).
    pub fn register_tenant(&self,
                           descriptor: TenantDescriptor,
                           provision: bool)
                           -> Result<Registration, ControlPlaneError> {
        validate_descriptor(&descriptor)?;
        let id = descriptor.id.clone();
        let stored = self.catalog
                         .insert(descriptor)?
                         .ok_or(ControlPlaneError::AlreadyRegistered(id))?;
        self.orchestrator.ensure_entry(&stored.id)?;
        info!("tenant:registered tenant={} engine={}", stored.id, stored.engine);
        let provision = provision.then(|| {
                                     let result = self.provisioning.provision(&stored.id);
                                     if !result.success {
                                         warn!("tenant:registered_without_provisioning tenant={} reason={}",
                                               stored.id,
                                               result.message);
                                     }
                                     result
                                 });
        Ok(Registration { tenant: stored, provision })
    }

    /// Reemplaza el descriptor de una sucursal existente. El resolver
    /// descarta la conexión cacheada en el próximo uso.
    pub fn update_tenant(&self, descriptor: TenantDescriptor) -> Result<TenantDescriptor, ControlPlaneError> {
        validate_descriptor(&descriptor)?;
        if self.catalog.get(&descriptor.id)?.is_none() {
            return Err(ControlPlaneError::TenantNotFound(descriptor.id));
        }
        Ok(self.catalog.upsert(descriptor)?)
    }

    pub fn tenant(&self, tenant: &TenantId) -> Result<TenantDescriptor, ControlPlaneError> {
        self.catalog
            .get(tenant)?
            .ok_or_else(|| ControlPlaneError::TenantNotFound(tenant.clone()))
    }

    pub fn tenants(&self) -> Result<Vec<TenantDescriptor>, ControlPlaneError> {
        Ok(self.catalog.list()?)
    }

    // ------------------------------------------------------------------
    // migraciones
    // ------------------------------------------------------------------

    pub fn apply(&self, tenant: &TenantId, target: Option<&str>) -> MigrationResult {
        self.orchestrator.apply(tenant, target)
    }

    pub fn apply_all(&self) -> BulkMigrationResult {
        self.orchestrator.apply_all()
    }

    pub fn rollback_last(&self, tenant: &TenantId) -> MigrationResult {
        self.orchestrator.rollback_last(tenant)
    }

    pub fn rollback_all(&self) -> BulkMigrationResult {
        self.orchestrator.rollback_all()
    }

    pub fn force_remove(&self, tenant: &TenantId, unit_id: &str) -> MigrationResult {
        self.orchestrator.force_remove(tenant, unit_id)
    }

    pub fn force_remove_all(&self, unit_id: &str) -> BulkMigrationResult {
        self.orchestrator.force_remove_all(unit_id)
    }

    pub fn pending(&self, tenant: &TenantId) -> Result<Vec<String>, ControlPlaneError> {
        Ok(self.orchestrator.pending(tenant)?)
    }

    pub fn history(&self, tenant: &TenantId) -> Result<TenantHistory, ControlPlaneError> {
        Ok(self.orchestrator.history(tenant)?)
    }

    pub fn validate(&self, tenant: &TenantId) -> SchemaCheck {
        self.orchestrator.validate(tenant)
    }

    pub fn status(&self) -> Result<Vec<TenantMigrationStatus>, ControlPlaneError> {
        Ok(self.orchestrator.status()?)
    }

    pub fn provision(&self, tenant: &TenantId) -> ProvisionResult {
        self.provisioning.provision(tenant)
    }

    pub fn reconcile(&self) -> ReconcileReport {
        self.orchestrator.reconcile()
    }
}

/// Campos mínimos por motor.
fn validate_descriptor(descriptor: &TenantDescriptor) -> Result<(), ControlPlaneError> {
    let missing = |field: &str| ControlPlaneError::InvalidDescriptor { tenant: descriptor.id.clone(),
                                                                       reason: format!("{} tenant requires {field}",
                                                                                       descriptor.engine) };
    let blank = |value: &Option<String>| value.as_deref().map_or(true, |v| v.trim().is_empty());
    if descriptor.code.trim().is_empty() {
        return Err(missing("code"));
    }
    match descriptor.engine {
        EngineKind::Sqlite if blank(&descriptor.file_path) => Err(missing("file_path")),
        EngineKind::Postgres if blank(&descriptor.host) => Err(missing("host")),
        EngineKind::Postgres if blank(&descriptor.database) => Err(missing("database")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_validation_per_engine() {
        let id = TenantId::parse("norte").unwrap();
        let sqlite = TenantDescriptor::sqlite(id.clone(), "N01", "Norte", "/data/norte.db");
        assert!(validate_descriptor(&sqlite).is_ok());

        let mut no_file = sqlite.clone();
        no_file.file_path = Some(" ".into());
        let err = validate_descriptor(&no_file).unwrap_err();
        assert_eq!(err.to_string(), "invalid descriptor for tenant norte: sqlite tenant requires file_path");

        let mut pg = TenantDescriptor::postgres(id.clone(), "N01", "Norte", "db", "norte");
        assert!(validate_descriptor(&pg).is_ok());
        pg.database = None;
        assert!(validate_descriptor(&pg).unwrap_err().to_string().ends_with("requires database"));

        let mut no_code = sqlite;
        no_code.code = String::new();
        assert!(validate_descriptor(&no_code).is_err());
    }
}
