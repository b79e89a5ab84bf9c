
use std::sync::{Arc, Mutex, Weak};

use branch_core::{EngineKind, TenantCatalog, TenantChangeListener, TenantDescriptor, TenantId};
use branch_persistence::DieselTenantCatalog;
use test_support::{sqlite_pool, tid};

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl TenantChangeListener for Recorder {
    fn descriptor_changed(&self, tenant: &TenantId) {
        self.0.lock().unwrap().push(tenant.to_string());
    }
}

fn postgres_branch(id: &str, code: &str) -> TenantDescriptor {
    let mut d = TenantDescriptor::postgres(tid(id), code, &format!("Sucursal {id}"), "db.internal", id);
    d.port = Some(5432);
    d.username = Some("branch".into());
    d.password = Some("s3cr3t".into());
    d.tls.enabled = true;
    d.params.insert("connect_timeout".into(), "5".into());
    d
}

#[test]
fn upsert_assigns_revisions_and_roundtrips_fields() {
    let (_dir, pool) = sqlite_pool();
    let catalog = DieselTenantCatalog::new(pool);

    let stored = catalog.upsert(postgres_branch("norte", "N01")).unwrap();
    assert_eq!(stored.revision, 1);
    let loaded = catalog.get(&tid("norte")).unwrap().unwrap();
    assert_eq!(loaded, stored);
    assert_eq!(loaded.engine, EngineKind::Postgres);
    assert_eq!(loaded.password.as_deref(), Some("s3cr3t"));
    assert_eq!(loaded.param("connect_timeout"), Some("5"));
    assert!(loaded.tls.enabled && !loaded.tls.trust_server_certificate);

    let mut edited = loaded.clone();
    edited.host = Some("db2.internal".into());
    edited.revision = 99; // el catálogo ignora la revisión entrante
    let stored = catalog.upsert(edited).unwrap();
    assert_eq!(stored.revision, 2);
    assert_eq!(catalog.get(&tid("norte")).unwrap().unwrap().host.as_deref(), Some("db2.internal"));
}

#[test]
fn list_is_ordered_by_code_and_remove_works() {
    let (dir, pool) = sqlite_pool();
    let catalog = DieselTenantCatalog::new(pool);
    catalog.upsert(test_support::sqlite_branch(dir.path(), "b", "B02")).unwrap();
    catalog.upsert(test_support::sqlite_branch(dir.path(), "a", "A01")).unwrap();
    catalog.upsert(postgres_branch("c", "C03")).unwrap();
    let codes: Vec<String> = catalog.list().unwrap().into_iter().map(|d| d.code).collect();
    assert_eq!(codes, vec!["A01", "B02", "C03"]);

    assert!(catalog.remove(&tid("b")).unwrap());
    assert!(!catalog.remove(&tid("b")).unwrap());
    assert!(catalog.get(&tid("b")).unwrap().is_none());
    assert_eq!(catalog.list().unwrap().len(), 2);
}

#[test]
fn writes_notify_subscribers() {
    let (_dir, pool) = sqlite_pool();
    let catalog = DieselTenantCatalog::new(pool);
    let recorder = Arc::new(Recorder::default());
    let weak: Weak<dyn TenantChangeListener> = Arc::downgrade(&recorder) as Weak<dyn TenantChangeListener>;
    catalog.subscribe(weak);

    catalog.upsert(postgres_branch("norte", "N01")).unwrap();
    catalog.upsert(postgres_branch("norte", "N01")).unwrap();
    catalog.remove(&TenantId::parse("norte").unwrap()).unwrap();
    assert_eq!(*recorder.0.lock().unwrap(), vec!["norte", "norte", "norte"]);
}

#[test]
fn concurrent_inserts_of_one_id_have_a_single_winner() {
    let (_dir, pool) = sqlite_pool();
    let catalog = Arc::new(DieselTenantCatalog::new(pool));
    let racers = 6;
    let barrier = Arc::new(std::sync::Barrier::new(racers));
    let winners = std::thread::scope(|s| {
        let handles: Vec<_> = (0..racers).map(|i| {
                                             let catalog = Arc::clone(&catalog);
                                             let barrier = Arc::clone(&barrier);
                                             s.spawn(move || {
                                                 barrier.wait();
                                                 catalog.insert(postgres_branch("norte", &format!("N0{i}"))).unwrap()
                                             })
                                         })
                                         .collect();
        handles.into_iter().filter_map(|h| h.join().unwrap()).collect::<Vec<_>>()
    });
    assert_eq!(winners.len(), 1);
    let stored = catalog.get(&tid("norte")).unwrap().unwrap();
    assert_eq!(stored.revision, 1);
    assert_eq!(stored.code, winners[0].code);
}
