//! Dobles de prueba compartidos.
//!
//! Disponibles con `#[cfg(test)]` o con el feature `test-support`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::errors::{SessionError, UnitError};
use crate::orchestrator::CancelFlag;
use crate::registry::{MigrationRegistry, MigrationUnit};
use crate::session::{SessionFactory, TenantSession};
use crate::tenant::{EngineKind, TenantDescriptor, TenantId};

/// Diario compartido de invocaciones (`"apply:u1"`, `"revert:u1"`).
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Sesión en memoria que registra cada sentencia ejecutada.
pub struct MemorySession {
    engine: EngineKind,
    log: Journal,
    fail_matching: Vec<String>,
    counts: HashMap<String, i64>,
    ping_fails: bool,
}

impl MemorySession {
    pub fn new(engine: EngineKind) -> Self {
        Self { engine,
               log: Arc::default(),
               fail_matching: Vec::new(),
               counts: HashMap::new(),
               ping_fails: false }
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn with_count(mut self, sql: &str, n: i64) -> Self {
        self.counts.insert(sql.to_string(), n);
        self
    }

    fn run(&mut self, prefix: &str, sql: &str) -> Result<(), SessionError> {
        if let Some(pattern) = self.fail_matching.iter().find(|p| sql.contains(p.as_str())) {
            return Err(SessionError::Query(format!("injected failure on '{pattern}'")));
        }
        self.log.lock().push(format!("{prefix}:{sql}"));
        Ok(())
    }
}

impl TenantSession for MemorySession {
    fn engine(&self) -> EngineKind {
        self.engine
    }

    fn ping(&mut self) -> Result<(), SessionError> {
        if self.ping_fails {
            return Err(SessionError::Connect("ping refused".into()));
        }
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<(), SessionError> {
        self.run("exec", sql)
    }

    fn execute_atomic(&mut self, sql: &str) -> Result<(), SessionError> {
        self.run("atomic", sql)
    }

    fn count(&mut self, sql: &str) -> Result<i64, SessionError> {
        self.log.lock().push(format!("count:{sql}"));
        Ok(self.counts.get(sql).copied().unwrap_or(0))
    }
}

/// Fábrica de `MemorySession` con fallos inyectables por sucursal.
#[derive(Default)]
pub struct MemorySessionFactory {
    opened: AtomicUsize,
    refuse: Mutex<HashSet<TenantId>>,
    ping_refuse: Mutex<HashSet<TenantId>>,
    failing_statements: DashMap<TenantId, Vec<String>>,
    logs: DashMap<TenantId, Journal>,
}

impl MemorySessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `open` falla para la sucursal (host caído, credenciales inválidas).
    pub fn refuse(&self, tenant: &TenantId) {
        self.refuse.lock().insert(tenant.clone());
    }

    /// `open` funciona pero el `ping` falla.
    pub fn refuse_ping(&self, tenant: &TenantId) {
        self.ping_refuse.lock().insert(tenant.clone());
    }

    pub fn heal(&self, tenant: &TenantId) {
        self.refuse.lock().remove(tenant);
        self.ping_refuse.lock().remove(tenant);
        self.failing_statements.remove(tenant);
    }

    /// Las sesiones nuevas de la sucursal fallan al ejecutar SQL que contenga `pattern`.
    pub fn fail_statements(&self, tenant: &TenantId, pattern: &str) {
        self.failing_statements.entry(tenant.clone()).or_default().push(pattern.to_string());
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sentencias ejecutadas por todas las sesiones de la sucursal.
    pub fn statements(&self, tenant: &TenantId) -> Vec<String> {
        self.logs.get(tenant).map(|log| log.lock().clone()).unwrap_or_default()
    }
}

impl SessionFactory for MemorySessionFactory {
    fn open(&self, descriptor: &TenantDescriptor) -> Result<Box<dyn TenantSession>, SessionError> {
        if self.refuse.lock().contains(&descriptor.id) {
            return Err(SessionError::Connect(format!("connection refused for {}", descriptor.id)));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let log = Arc::clone(self.logs.entry(descriptor.id.clone()).or_default().value());
        let mut session = MemorySession::new(descriptor.engine);
        session.log = log;
        session.ping_fails = self.ping_refuse.lock().contains(&descriptor.id);
        session.fail_matching = self.failing_statements
                                    .get(&descriptor.id)
                                    .map(|p| p.value().clone())
                                    .unwrap_or_default();
        Ok(Box::new(session))
    }
}

/// Mide cuántas ejecuciones están dentro de una sección al mismo tiempo.
#[derive(Debug, Default)]
pub struct InFlightProbe {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl InFlightProbe {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Unidad instrumentada: anota cada invocación en un diario compartido y
/// ejecuta `apply <id>` / `revert <id>` contra la sesión.
pub struct RecordingUnit {
    id: String,
    journal: Journal,
    fail: Arc<AtomicBool>,
    panic: bool,
    delay: Option<Duration>,
    probe: Option<Arc<InFlightProbe>>,
    cancel_after_apply: Option<CancelFlag>,
}

impl RecordingUnit {
    pub fn new(id: &str, journal: &Journal) -> Self {
        Self { id: id.to_string(),
               journal: Arc::clone(journal),
               fail: Arc::new(AtomicBool::new(false)),
               panic: false,
               delay: None,
               probe: None,
               cancel_after_apply: None }
    }

    /// Bandera para hacer fallar `apply`/`revert` hasta que se limpie.
    pub fn failing(mut self, flag: &Arc<AtomicBool>) -> Self {
        self.fail = Arc::clone(flag);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    pub fn slow(mut self, delay: Duration, probe: &Arc<InFlightProbe>) -> Self {
        self.delay = Some(delay);
        self.probe = Some(Arc::clone(probe));
        self
    }

    pub fn cancel_after_apply(mut self, cancel: &CancelFlag) -> Self {
        self.cancel_after_apply = Some(cancel.clone());
        self
    }

    fn invoke(&self, action: &str, session: &mut dyn TenantSession) -> Result<(), UnitError> {
        self.journal.lock().push(format!("{action}:{}", self.id));
        if let Some(probe) = &self.probe {
            probe.enter();
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(probe) = &self.probe {
            probe.exit();
        }
        if self.panic {
            panic!("unit {} exploded", self.id);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(UnitError::Failed(format!("{action} {} failed on purpose", self.id)));
        }
        session.execute_atomic(&format!("{action} {}", self.id))?;
        Ok(())
    }
}

impl MigrationUnit for RecordingUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&self, session: &mut dyn TenantSession) -> Result<(), UnitError> {
        self.invoke("apply", session)?;
        if let Some(cancel) = &self.cancel_after_apply {
            cancel.cancel();
        }
        Ok(())
    }

    fn revert(&self, session: &mut dyn TenantSession) -> Result<(), UnitError> {
        self.invoke("revert", session)
    }
}

pub fn journal() -> Journal {
    Arc::default()
}

/// Registro de unidades `RecordingUnit` con los ids dados.
pub fn recording_registry(ids: &[&str], journal: &Journal) -> MigrationRegistry {
    let units: Vec<Arc<dyn MigrationUnit>> = ids.iter()
                                                .map(|id| Arc::new(RecordingUnit::new(id, journal)) as Arc<dyn MigrationUnit>)
                                                .collect();
    match MigrationRegistry::new(units) {
        Ok(registry) => registry,
        Err(e) => panic!("invalid test registry: {e}"),
    }
}

pub fn sqlite_tenant(id: &str) -> TenantDescriptor {
    match TenantId::parse(id) {
        Ok(tenant) => TenantDescriptor::sqlite(tenant, &id.to_uppercase(), id, &format!("/var/lib/branch/{id}.db")),
        Err(e) => panic!("invalid test tenant id: {e}"),
    }
}
