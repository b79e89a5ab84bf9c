use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::{TenantDescriptor, TenantId};
use crate::errors::StoreError;

/// Recibe avisos cuando cambia (o se elimina) el descriptor de una sucursal.
pub trait TenantChangeListener: Send + Sync {
    fn descriptor_changed(&self, tenant: &TenantId);
}

/// Catálogo de sucursales registradas en el plano de control.
///
/// Contrato:
/// - `upsert` asigna `revision = 1` al insertar y `revision + 1` al actualizar,
///   y devuelve el descriptor tal como quedó guardado.
/// - `insert` sólo crea: si el id ya existe no escribe nada y devuelve `None`.
/// - Tras una escritura exitosa notifica a los suscriptores.
/// - `list` devuelve las sucursales ordenadas por `code`.
pub trait TenantCatalog: Send + Sync {
    fn get(&self, tenant: &TenantId) -> Result<Option<TenantDescriptor>, StoreError>;
    fn list(&self) -> Result<Vec<TenantDescriptor>, StoreError>;
    fn upsert(&self, descriptor: TenantDescriptor) -> Result<TenantDescriptor, StoreError>;
    fn insert(&self, descriptor: TenantDescriptor) -> Result<Option<TenantDescriptor>, StoreError>;
    fn remove(&self, tenant: &TenantId) -> Result<bool, StoreError>;
    fn subscribe(&self, listener: Weak<dyn TenantChangeListener>);
}

/// Lista de suscriptores compartida por las implementaciones de catálogo.
/// Guarda referencias débiles para no crear ciclos catálogo ↔ resolver.
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: RwLock<Vec<Weak<dyn TenantChangeListener>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Weak<dyn TenantChangeListener>) {
        self.listeners.write().push(listener);
    }

    pub fn notify(&self, tenant: &TenantId) {
        let live: Vec<Arc<dyn TenantChangeListener>> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.descriptor_changed(tenant);
        }
    }
}

/// Catálogo en memoria (pruebas y despliegues embebidos).
#[derive(Default)]
pub struct InMemoryTenantCatalog {
    tenants: DashMap<TenantId, TenantDescriptor>,
    notifier: ChangeNotifier,
}

impl InMemoryTenantCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TenantCatalog for InMemoryTenantCatalog {
    fn get(&self, tenant: &TenantId) -> Result<Option<TenantDescriptor>, StoreError> {
        Ok(self.tenants.get(tenant).map(|d| d.value().clone()))
    }

    fn list(&self) -> Result<Vec<TenantDescriptor>, StoreError> {
        let mut all: Vec<TenantDescriptor> = self.tenants.iter().map(|d| d.value().clone()).collect();
        all.sort_by(|a, b| a.code.cmp(&b.code).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    fn upsert(&self, mut descriptor: TenantDescriptor) -> Result<TenantDescriptor, StoreError> {
        let stored = match self.tenants.entry(descriptor.id.clone()) {
            Entry::Occupied(mut slot) => {
                descriptor.revision = slot.get().revision + 1;
                slot.insert(descriptor.clone());
                descriptor
            }
            Entry::Vacant(slot) => {
                descriptor.revision = 1;
                slot.insert(descriptor.clone());
                descriptor
            }
        };
        self.notifier.notify(&stored.id);
        Ok(stored)
    }

    fn insert(&self, mut descriptor: TenantDescriptor) -> Result<Option<TenantDescriptor>, StoreError> {
        let stored = match self.tenants.entry(descriptor.id.clone()) {
            Entry::Occupied(_) => return Ok(None),
            Entry::Vacant(slot) => {
                descriptor.revision = 1;
                slot.insert(descriptor.clone());
                descriptor
            }
        };
        self.notifier.notify(&stored.id);
        Ok(Some(stored))
    }

    fn remove(&self, tenant: &TenantId) -> Result<bool, StoreError> {
        let removed = self.tenants.remove(tenant).is_some();
        if removed {
            self.notifier.notify(tenant);
        }
        Ok(removed)
    }

    fn subscribe(&self, listener: Weak<dyn TenantChangeListener>) {
        self.notifier.subscribe(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);
    impl TenantChangeListener for Recorder {
        fn descriptor_changed(&self, tenant: &TenantId) {
            self.0.lock().push(tenant.to_string());
        }
    }

    fn descriptor(id: &str, code: &str) -> TenantDescriptor {
        TenantDescriptor::sqlite(TenantId::parse(id).unwrap(), code, id, "/tmp/x.db")
    }

    #[test]
    fn upsert_bumps_revision_and_notifies() {
        let catalog = InMemoryTenantCatalog::new();
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn TenantChangeListener> = Arc::downgrade(&recorder) as Weak<dyn TenantChangeListener>;
        catalog.subscribe(weak);

        let first = catalog.upsert(descriptor("norte", "N01")).unwrap();
        assert_eq!(first.revision, 1);
        let second = catalog.upsert(descriptor("norte", "N01")).unwrap();
        assert_eq!(second.revision, 2);
        assert!(catalog.remove(&first.id).unwrap());
        assert!(!catalog.remove(&first.id).unwrap());
        assert_eq!(*recorder.0.lock(), vec!["norte", "norte", "norte"]);
    }

    #[test]
    fn insert_never_overwrites() {
        let catalog = InMemoryTenantCatalog::new();
        let first = catalog.insert(descriptor("norte", "N01")).unwrap().unwrap();
        assert_eq!(first.revision, 1);
        assert!(catalog.insert(descriptor("norte", "N99")).unwrap().is_none());
        let stored = catalog.get(&first.id).unwrap().unwrap();
        assert_eq!((stored.code.as_str(), stored.revision), ("N01", 1));
    }

    #[test]
    fn list_is_ordered_by_code() {
        let catalog = InMemoryTenantCatalog::new();
        catalog.upsert(descriptor("b", "B02")).unwrap();
        catalog.upsert(descriptor("a", "A01")).unwrap();
        catalog.upsert(descriptor("c", "C03")).unwrap();
        let codes: Vec<String> = catalog.list().unwrap().into_iter().map(|d| d.code).collect();
        assert_eq!(codes, vec!["A01", "B02", "C03"]);
    }

    #[test]
    fn dropped_listener_is_pruned() {
        let catalog = InMemoryTenantCatalog::new();
        {
            let recorder = Arc::new(Recorder::default());
            catalog.subscribe(Arc::downgrade(&recorder) as Weak<dyn TenantChangeListener>);
        }
        catalog.upsert(descriptor("norte", "N01")).unwrap();
        assert!(catalog.notifier.listeners.read().is_empty());
    }
}
