//! Resolución y caché de conexiones por sucursal.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::errors::MigrationError;
use crate::session::{SessionFactory, TenantSession};
use crate::tenant::{EngineKind, TenantCatalog, TenantChangeListener, TenantId};

/// Conexión abierta y validada para una revisión concreta del descriptor.
///
/// El `Mutex` serializa el uso de la sesión: una sesión nunca se usa desde
/// dos hilos a la vez.
pub struct TenantHandle {
    tenant: TenantId,
    revision: u64,
    engine: EngineKind,
    session: Mutex<Box<dyn TenantSession>>,
}

impl TenantHandle {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<dyn TenantSession>> {
        self.session.lock()
    }

    pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, Box<dyn TenantSession>>> {
        self.session.try_lock_for(timeout)
    }
}

pub struct ConnectionResolver {
    catalog: Arc<dyn TenantCatalog>,
    factory: Arc<dyn SessionFactory>,
    cache: DashMap<TenantId, Arc<TenantHandle>>,
}

impl ConnectionResolver {
    /// Crea el resolver y lo suscribe a los cambios del catálogo.
    pub fn new(catalog: Arc<dyn TenantCatalog>, factory: Arc<dyn SessionFactory>) -> Arc<Self> {
        let resolver = Arc::new(Self { catalog: Arc::clone(&catalog),
                                       factory,
                                       cache: DashMap::new() });
        let weak = Arc::downgrade(&resolver) as Weak<dyn TenantChangeListener>;
        catalog.subscribe(weak);
        resolver
    }

    /// Devuelve una conexión viva para la sucursal.
    ///
    /// Reutiliza la caché mientras la revisión del descriptor no cambie; en
    /// otro caso abre una sesión nueva, la valida con `ping` y sólo entonces
    /// la cachea. Un fallo al abrir no deja nada en caché.
    pub fn resolve(&self, tenant: &TenantId) -> Result<Arc<TenantHandle>, MigrationError> {
        let descriptor = self.catalog
                             .get(tenant)?
                             .ok_or_else(|| MigrationError::TenantNotFound(tenant.clone()))?;

        // se clona el Arc para no retener la referencia del DashMap durante el remove
        let cached = self.cache.get(tenant).map(|h| Arc::clone(h.value()));
        if let Some(handle) = cached {
            if handle.revision == descriptor.revision {
                return Ok(handle);
            }
            debug!("resolver:stale tenant={} cached_rev={} current_rev={}",
                   tenant, handle.revision, descriptor.revision);
            self.cache.remove_if(tenant, |_, h| Arc::ptr_eq(h, &handle));
        }

        let mut session = self.factory.open(&descriptor).map_err(|source| {
                                                            warn!("resolver:open_failed tenant={} err={}", tenant, source);
                                                            MigrationError::ConnectionFailed { tenant: tenant.clone(),
                                                                                               source }
                                                        })?;
        session.ping().map_err(|source| {
                          warn!("resolver:ping_failed tenant={} err={}", tenant, source);
                          MigrationError::ConnectionFailed { tenant: tenant.clone(), source }
                      })?;

        let handle = Arc::new(TenantHandle { tenant: tenant.clone(),
                                             revision: descriptor.revision,
                                             engine: descriptor.engine,
                                             session: Mutex::new(session) });
        let stored = self.cache
                         .entry(tenant.clone())
                         .and_modify(|current| {
                             if current.revision != descriptor.revision {
                                 *current = Arc::clone(&handle);
                             }
                         })
                         .or_insert_with(|| Arc::clone(&handle));
        info!("resolver:opened tenant={} engine={} rev={}", tenant, descriptor.engine, descriptor.revision);
        Ok(Arc::clone(stored.value()))
    }

    /// Descarta la conexión cacheada. Devuelve `true` si había una.
    pub fn invalidate(&self, tenant: &TenantId) -> bool {
        let removed = self.cache.remove(tenant).is_some();
        if removed {
            debug!("resolver:invalidate tenant={}", tenant);
        }
        removed
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl TenantChangeListener for ConnectionResolver {
    fn descriptor_changed(&self, tenant: &TenantId) {
        self.invalidate(tenant);
    }
}
