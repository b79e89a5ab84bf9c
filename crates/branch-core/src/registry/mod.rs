//! Registro ordenado de unidades de migración.
//!
//! El registro se compila con el binario: su orden es el orden de las claves
//! (`id`) y nunca cambia una vez publicado. No se persiste.

mod sql;

pub use sql::SqlUnit;

use std::sync::Arc;

use indexmap::IndexMap;

use crate::errors::{RegistryError, UnitError};
use crate::session::TenantSession;

/// Cambio de esquema inmutable, ordenado y con nombre único.
///
/// El orquestador invoca `apply`/`revert` a lo sumo una vez por transición;
/// si una unidad falla, el reintento vuelve a ejecutar la misma unidad desde
/// su estado previo, así que cada autor debe dejarla reintentable.
pub trait MigrationUnit: Send + Sync {
    fn id(&self) -> &str;
    fn description(&self) -> &str {
        ""
    }
    fn apply(&self, session: &mut dyn TenantSession) -> Result<(), UnitError>;
    fn revert(&self, session: &mut dyn TenantSession) -> Result<(), UnitError>;
}

pub struct MigrationRegistry {
    units: IndexMap<String, Arc<dyn MigrationUnit>>,
}

impl MigrationRegistry {
    /// Construye el registro validando que los ids sean no vacíos, únicos y
    /// estrictamente crecientes en el orden dado.
    pub fn new(units: Vec<Arc<dyn MigrationUnit>>) -> Result<Self, RegistryError> {
        let mut map: IndexMap<String, Arc<dyn MigrationUnit>> = IndexMap::with_capacity(units.len());
        for unit in units {
            let id = unit.id().to_string();
            if id.is_empty() {
                return Err(RegistryError::EmptyId);
            }
            if map.contains_key(&id) {
                return Err(RegistryError::Duplicate(id));
            }
            if let Some((previous, _)) = map.last() {
                if previous.as_str() >= id.as_str() {
                    return Err(RegistryError::OutOfOrder { previous: previous.clone(), next: id });
                }
            }
            map.insert(id, unit);
        }
        Ok(Self { units: map })
    }

    pub fn empty() -> Self {
        Self { units: IndexMap::new() }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn ordered_units(&self) -> impl Iterator<Item = &Arc<dyn MigrationUnit>> {
        self.units.values()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.units.keys().map(String::as_str).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn MigrationUnit>> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn latest(&self) -> Option<&str> {
        self.units.keys().next_back().map(String::as_str)
    }

    /// Siguiente unidad después de `id` (la primera si `id` es `None`).
    /// Funciona por clave de orden, incluso si `id` ya no está registrado.
    pub fn unit_after(&self, id: Option<&str>) -> Option<&Arc<dyn MigrationUnit>> {
        match id {
            None => self.units.values().next(),
            Some(id) => self.units.iter().find(|(key, _)| key.as_str() > id).map(|(_, u)| u),
        }
    }

    /// Mayor id registrado estrictamente menor que `id`.
    pub fn previous(&self, id: &str) -> Option<&str> {
        self.units.keys().rev().find(|key| key.as_str() < id).map(String::as_str)
    }

    /// Unidades con clave mayor que `last_applied` y, si hay objetivo, menor o
    /// igual que `target`, en orden.
    pub fn pending(&self, last_applied: Option<&str>, target: Option<&str>) -> Vec<Arc<dyn MigrationUnit>> {
        self.units
            .iter()
            .filter(|(key, _)| last_applied.map_or(true, |last| key.as_str() > last))
            .filter(|(key, _)| target.map_or(true, |t| key.as_str() <= t))
            .map(|(_, unit)| Arc::clone(unit))
            .collect()
    }

    pub fn pending_ids(&self, last_applied: Option<&str>) -> Vec<String> {
        self.pending(last_applied, None).iter().map(|u| u.id().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(ids: &[&str]) -> Result<MigrationRegistry, RegistryError> {
        MigrationRegistry::new(ids.iter()
                                  .map(|id| Arc::new(SqlUnit::new(id, "SELECT 1;", "SELECT 1;")) as Arc<dyn MigrationUnit>)
                                  .collect())
    }

    #[test]
    fn rejects_bad_order() {
        assert_eq!(registry(&["u2", "u1"]).err(),
                   Some(RegistryError::OutOfOrder { previous: "u2".into(), next: "u1".into() }));
        assert_eq!(registry(&["u1", "u1"]).err(), Some(RegistryError::Duplicate("u1".into())));
        assert_eq!(registry(&["u1", ""]).err(), Some(RegistryError::EmptyId));
    }

    #[test]
    fn navigation_by_order_key() {
        let r = registry(&["u1", "u2", "u3"]).unwrap();
        assert_eq!(r.unit_after(None).map(|u| u.id()), Some("u1"));
        assert_eq!(r.unit_after(Some("u1")).map(|u| u.id()), Some("u2"));
        assert!(r.unit_after(Some("u3")).is_none());
        // "u15" no está registrado, pero su clave ordena entre u1 y u2
        assert_eq!(r.unit_after(Some("u15")).map(|u| u.id()), Some("u2"));
        assert_eq!(r.previous("u3"), Some("u2"));
        assert_eq!(r.previous("u1"), None);
        assert_eq!(r.latest(), Some("u3"));
    }

    #[test]
    fn pending_respects_last_and_target() {
        let r = registry(&["u1", "u2", "u3"]).unwrap();
        assert_eq!(r.pending_ids(None), vec!["u1", "u2", "u3"]);
        assert_eq!(r.pending_ids(Some("u1")), vec!["u2", "u3"]);
        let upto: Vec<String> = r.pending(None, Some("u2")).iter().map(|u| u.id().to_string()).collect();
        assert_eq!(upto, vec!["u1", "u2"]);
        assert!(r.pending(Some("u3"), None).is_empty());
        assert!(r.pending(Some("u2"), Some("u1")).is_empty());
    }
}
