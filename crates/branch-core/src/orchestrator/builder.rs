//! Builder para `MigrationOrchestrator`.
//!
//! Los cuatro colaboradores obligatorios (registro, ledger, catálogo y
//! resolver) se pasan al crear el builder; reloj y settings tienen valores
//! por defecto (`SystemClock`, lease de `DEFAULT_LEASE_SECONDS`).

use std::sync::Arc;

use chrono::Duration;

use super::core::{MigrationOrchestrator, OrchestratorSettings};
use crate::clock::{Clock, SystemClock};
use crate::ledger::MigrationLedger;
use crate::registry::MigrationRegistry;
use crate::resolver::ConnectionResolver;
use crate::tenant::TenantCatalog;

pub struct OrchestratorBuilder {
    registry: Arc<MigrationRegistry>,
    ledger: Arc<dyn MigrationLedger>,
    catalog: Arc<dyn TenantCatalog>,
    resolver: Arc<ConnectionResolver>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
}

impl OrchestratorBuilder {
    pub fn new(registry: Arc<MigrationRegistry>,
               ledger: Arc<dyn MigrationLedger>,
               catalog: Arc<dyn TenantCatalog>,
               resolver: Arc<ConnectionResolver>)
               -> Self {
        Self { registry,
               ledger,
               catalog,
               resolver,
               clock: Arc::new(SystemClock),
               settings: OrchestratorSettings::default() }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn instance_id(mut self, instance_id: &str) -> Self {
        self.settings.instance_id = instance_id.to_string();
        self
    }

    pub fn lease(mut self, lease: Duration) -> Self {
        self.settings.lease = lease;
        self
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> MigrationOrchestrator {
        MigrationOrchestrator::new(self.registry,
                                   self.ledger,
                                   self.catalog,
                                   self.resolver,
                                   self.clock,
                                   self.settings)
    }
}

impl MigrationOrchestrator {
    #[inline]
    pub fn builder(registry: Arc<MigrationRegistry>,
                   ledger: Arc<dyn MigrationLedger>,
                   catalog: Arc<dyn TenantCatalog>,
                   resolver: Arc<ConnectionResolver>)
                   -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry, ledger, catalog, resolver)
    }
}
