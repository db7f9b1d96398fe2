use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use retort::prelude::*;
use retort::{ReportEvent, Reporter, Site};

struct Collect(Mutex<Vec<ReportEvent>>);

impl Collect {
    fn new() -> Arc<Self> {
        Arc::new(Collect(Mutex::new(Vec::new())))
    }

    fn events(&self) -> Vec<ReportEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl Reporter for Collect {
    fn report(&self, event: ReportEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[test]
fn static_molecule_lifecycle() {
    let pool = Pool::fixed("static", 2);
    let counter = Molecule::<i64>::new("counter");
    let incr = Molecule::<()>::simple("incr");

    let c = counter.clone();
    let up = reaction(vec![counter.capture(), incr.wildcard()], move |inputs| {
        let n: i64 = inputs.get(0);
        c.emit(n + 1)
    });
    let c = counter.clone();
    Site::builder(&pool)
        .reaction(up)
        .with_static(counter.as_ref())
        .init(move || c.emit(0))
        .install()
        .unwrap();

    assert!(counter.is_static());
    assert_eq!(counter.volatile_value().unwrap(), 0);

    // Emitting a static from outside a consuming reaction is refused.
    match counter.emit(5) {
        Err(Error::StaticMisuse { molecule, .. }) => assert_eq!(molecule, "counter"),
        other => panic!("expected a static-misuse error, got {:?}", other),
    }

    // A consuming reaction re-emits it; the volatile reader follows.
    let consumed = incr.emit_until_consumed(()).unwrap();
    assert_eq!(consumed.wait_timeout(Duration::from_secs(5)), Some(()));
    let deadline = Instant::now() + Duration::from_secs(5);
    while counter.volatile_value().unwrap() != 1 {
        assert!(Instant::now() < deadline, "static was never re-emitted");
        std::thread::sleep(Duration::from_millis(10));
    }
    pool.shutdown_now();
}

#[test]
fn volatile_read_requires_a_static() {
    let pool = Pool::fixed("static", 1);
    let a = Molecule::<i32>::new("a");
    site(&pool, vec![reaction(vec![a.capture()], |_| Ok(()))]).unwrap();
    match a.volatile_value() {
        Err(Error::NotStatic(name)) => assert_eq!(name, "a"),
        other => panic!("expected a not-static error, got {:?}", other),
    }
    pool.shutdown_now();
}

#[test]
fn statics_require_an_init_block_emitting_exactly_once() {
    let pool = Pool::fixed("static", 1);

    let c = Molecule::<i64>::new("c");
    let missing = Site::builder(&pool)
        .reaction(reaction(vec![c.capture()], |_| Ok(())))
        .with_static(c.as_ref())
        .install();
    assert!(matches!(missing, Err(Error::StaticMisuse { .. })));

    let d = Molecule::<i64>::new("d");
    let d2 = d.clone();
    let twice = Site::builder(&pool)
        .reaction(reaction(vec![d.capture()], |_| Ok(())))
        .with_static(d.as_ref())
        .init(move || {
            d2.emit(0)?;
            d2.emit(1)
        })
        .install();
    assert!(matches!(twice, Err(Error::StaticMisuse { .. })));
    pool.shutdown_now();
}

#[test]
fn declared_outputs_must_reemit_consumed_statics() {
    let pool = Pool::fixed("static", 1);
    let c = Molecule::<i64>::new("c");
    let kill = Molecule::<()>::simple("kill");
    let other = Molecule::<i64>::new("other");

    let rx = reaction(vec![c.capture(), kill.wildcard()], |_| Ok(()))
        .with_outputs(vec![other.emits()]);
    let c2 = c.clone();
    let result = Site::builder(&pool)
        .reaction(rx)
        .with_static(c.as_ref())
        .init(move || c2.emit(0))
        .install();
    match result {
        Err(Error::StaticMisuse { molecule, .. }) => assert_eq!(molecule, "c"),
        other => panic!("expected a static-misuse error, got {:?}", other.map(|_| ())),
    }
    pool.shutdown_now();
}

// A body that consumes a static and forgets to re-emit it is reported.
#[test]
fn missing_reemission_is_reported() {
    let pool = Pool::fixed("static", 2);
    let reporter = Collect::new();
    let c = Molecule::<i64>::new("c");
    let kill = Molecule::<()>::simple("kill");

    let swallow = reaction(vec![c.capture(), kill.wildcard()], |_| Ok(()));
    let c2 = c.clone();
    Site::builder(&pool)
        .reaction(swallow)
        .with_static(c.as_ref())
        .init(move || c2.emit(0))
        .reporter(reporter.clone())
        .install()
        .unwrap();

    let consumed = kill.emit_until_consumed(()).unwrap();
    assert_eq!(consumed.wait_timeout(Duration::from_secs(5)), Some(()));

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let hit = reporter.events().iter().any(|e| {
            matches!(e, ReportEvent::StaticMisused { molecule, .. } if molecule == "c")
        });
        if hit {
            break;
        }
        assert!(Instant::now() < deadline, "misuse was never reported");
        std::thread::sleep(Duration::from_millis(10));
    }
    pool.shutdown_now();
}
