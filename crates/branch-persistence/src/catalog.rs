//! `TenantCatalog` persistente sobre la tabla `tenants`.

use std::collections::BTreeMap;
use std::sync::Weak;

use branch_core::{ChangeNotifier, EngineKind, StoreError, TenantCatalog, TenantChangeListener, TenantDescriptor,
                  TenantId, TlsSettings};
use chrono::Utc;
use diesel::prelude::*;
use log::{debug, info};

use crate::error::{with_retry, PersistenceError};
use crate::pool::{on_conn, ControlPool};
use crate::schema::tenants;

#[derive(Queryable, Debug)]
struct TenantRow {
    tenant_id: String,
    code: String,
    name: String,
    engine: String,
    host: Option<String>,
    port: Option<i32>,
    database_name: Option<String>,
    file_path: Option<String>,
    username: Option<String>,
    password: Option<String>,
    tls_enabled: bool,
    trust_server_certificate: bool,
    params: String,
    revision: i64,
    #[allow(dead_code)]
    updated_at_ms: i64,
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = tenants, treat_none_as_null = true)]
struct TenantWrite<'a> {
    tenant_id: &'a str,
    code: &'a str,
    name: &'a str,
    engine: &'a str,
    host: Option<&'a str>,
    port: Option<i32>,
    database_name: Option<&'a str>,
    file_path: Option<&'a str>,
    username: Option<&'a str>,
    password: Option<&'a str>,
    tls_enabled: bool,
    trust_server_certificate: bool,
    params: String,
    revision: i64,
    updated_at_ms: i64,
}

impl TenantRow {
    fn into_descriptor(self) -> Result<TenantDescriptor, PersistenceError> {
        let id = TenantId::parse(&self.tenant_id).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        let engine: EngineKind = self.engine.parse().map_err(PersistenceError::Corrupt)?;
        let params: BTreeMap<String, String> =
            serde_json::from_str(&self.params).map_err(|e| PersistenceError::Corrupt(format!("params of {id}: {e}")))?;
        let port = self.port
                       .map(|p| u16::try_from(p).map_err(|_| PersistenceError::Corrupt(format!("port of {id}: {p}"))))
                       .transpose()?;
        Ok(TenantDescriptor { id,
                              code: self.code,
                              name: self.name,
                              engine,
                              host: self.host,
                              port,
                              database: self.database_name,
                              file_path: self.file_path,
                              username: self.username,
                              password: self.password,
                              tls: TlsSettings { enabled: self.tls_enabled,
                                                 trust_server_certificate: self.trust_server_certificate },
                              params,
                              revision: u64::try_from(self.revision).unwrap_or(0) })
    }
}

fn write_row(descriptor: &TenantDescriptor) -> Result<TenantWrite<'_>, PersistenceError> {
    let params = serde_json::to_string(&descriptor.params).map_err(|e| PersistenceError::Unknown(format!("ser: {e}")))?;
    Ok(TenantWrite { tenant_id: descriptor.id.as_str(),
                     code: &descriptor.code,
                     name: &descriptor.name,
                     engine: descriptor.engine.as_str(),
                     host: descriptor.host.as_deref(),
                     port: descriptor.port.map(i32::from),
                     database_name: descriptor.database.as_deref(),
                     file_path: descriptor.file_path.as_deref(),
                     username: descriptor.username.as_deref(),
                     password: descriptor.password.as_deref(),
                     tls_enabled: descriptor.tls.enabled,
                     trust_server_certificate: descriptor.tls.trust_server_certificate,
                     params,
                     revision: i64::try_from(descriptor.revision).unwrap_or(i64::MAX),
                     updated_at_ms: Utc::now().timestamp_millis() })
}

/// Catálogo de sucursales en el plano de control. Las escrituras notifican
/// a los suscriptores sólo después del commit.
pub struct DieselTenantCatalog {
    pool: ControlPool,
    notifier: ChangeNotifier,
}

impl DieselTenantCatalog {
    pub fn new(pool: ControlPool) -> Self {
        Self { pool, notifier: ChangeNotifier::new() }
    }

    /// Lee la revisión vigente y escribe `revision + 1` (o 1 si es nueva)
    /// dentro de una transacción.
    fn upsert_once(&self, descriptor: &TenantDescriptor) -> Result<TenantDescriptor, PersistenceError> {
        with_retry(|| {
            on_conn!(&self.pool, conn => {
                conn.transaction::<TenantDescriptor, PersistenceError, _>(|tx| {
                    let current: Option<i64> = tenants::table.find(descriptor.id.as_str())
                                                             .select(tenants::revision)
                                                             .first::<i64>(tx)
                                                             .optional()?;
                    let mut stored = descriptor.clone();
                    stored.revision = current.map_or(1, |rev| u64::try_from(rev).unwrap_or(0) + 1);
                    let row = write_row(&stored)?;
                    if current.is_some() {
                        diesel::update(tenants::table.find(descriptor.id.as_str())).set(&row).execute(tx)?;
                    } else {
                        diesel::insert_into(tenants::table).values(&row).execute(tx)?;
                    }
                    Ok(stored)
                })
            })
        })
    }
}

impl TenantCatalog for DieselTenantCatalog {
    fn get(&self, tenant: &TenantId) -> Result<Option<TenantDescriptor>, StoreError> {
        let row: Option<TenantRow> = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(tenants::table.find(tenant.as_str()).first::<TenantRow>(conn).optional()?)
            })
        })?;
        Ok(row.map(TenantRow::into_descriptor).transpose()?)
    }

    fn list(&self) -> Result<Vec<TenantDescriptor>, StoreError> {
        let rows: Vec<TenantRow> = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(tenants::table.order((tenants::code.asc(), tenants::tenant_id.asc())).load::<TenantRow>(conn)?)
            })
        })?;
        Ok(rows.into_iter().map(TenantRow::into_descriptor).collect::<Result<Vec<_>, _>>()?)
    }

    fn upsert(&self, descriptor: TenantDescriptor) -> Result<TenantDescriptor, StoreError> {
        // Dos altas concurrentes del mismo id: la perdedora ve la fila y actualiza.
        let stored = match self.upsert_once(&descriptor) {
            Err(PersistenceError::UniqueViolation(_)) => self.upsert_once(&descriptor)?,
            other => other?,
        };
        info!("catalog:upsert tenant={} revision={}", stored.id, stored.revision);
        self.notifier.notify(&stored.id);
        Ok(stored)
    }

    fn insert(&self, descriptor: TenantDescriptor) -> Result<Option<TenantDescriptor>, StoreError> {
        let mut stored = descriptor;
        stored.revision = 1;
        let inserted = with_retry(|| {
            let row = write_row(&stored)?;
            on_conn!(&self.pool, conn => {
                Ok(diesel::insert_into(tenants::table).values(&row).on_conflict_do_nothing().execute(conn)?)
            })
        })?;
        if inserted == 0 {
            debug!("catalog:insert tenant={} already registered", stored.id);
            return Ok(None);
        }
        info!("catalog:insert tenant={} revision=1", stored.id);
        self.notifier.notify(&stored.id);
        Ok(Some(stored))
    }

    fn remove(&self, tenant: &TenantId) -> Result<bool, StoreError> {
        let deleted = with_retry(|| {
            on_conn!(&self.pool, conn => {
                Ok(diesel::delete(tenants::table.find(tenant.as_str())).execute(conn)?)
            })
        })?;
        debug!("catalog:remove tenant={} deleted={}", tenant, deleted);
        if deleted > 0 {
            self.notifier.notify(tenant);
        }
        Ok(deleted > 0)
    }

    fn subscribe(&self, listener: Weak<dyn TenantChangeListener>) {
        self.notifier.subscribe(listener);
    }
}
