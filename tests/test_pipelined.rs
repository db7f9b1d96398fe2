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

// A molecule whose only conditions are per-molecule is pipelined; values
// failing every condition are refused at the door and never stored.
#[test]
fn inadmissible_values_are_refused_at_emit() {
    let pool = Pool::fixed("pipe", 2);
    let reporter = Collect::new();
    let m = Molecule::<i32>::simple("m");
    let trigger = Molecule::<()>::simple("trigger");

    let consume = reaction(vec![m.when(|x| *x > 0), trigger.wildcard()], |_| Ok(()));
    Site::builder(&pool)
        .reaction(consume)
        .reporter(reporter.clone())
        .install()
        .unwrap();

    assert!(m.is_pipelined());

    // Fails the only condition: silently dropped, reported, not stored.
    m.emit(-1).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let refused = reporter.events().iter().any(|e| {
            matches!(e, ReportEvent::PipelinedRefused { molecule, .. } if molecule == "m")
        });
        if refused {
            break;
        }
        assert!(Instant::now() < deadline, "refusal was never reported");
        std::thread::sleep(Duration::from_millis(10));
    }

    // Passes the condition: stored (no trigger yet, so it stays put).
    m.emit(5).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let soup = m.log_soup();
    assert!(soup.contains('5'), "admitted value missing from {}", soup);
    assert!(!soup.contains("-1"), "refused value stored in {}", soup);
    pool.shutdown_now();
}

// Participation in a cross guard disables pipelining.
#[test]
fn cross_guarded_molecules_are_not_pipelined() {
    let pool = Pool::fixed("pipe", 1);
    let m = Molecule::<i32>::new("m");
    let n = Molecule::<i32>::new("n");
    let rx = reaction(vec![m.capture(), n.capture()], |_| Ok(()))
        .with_cross_guard(cross2::<i32, i32>(0, 1, |x, y| x < y));
    site(&pool, vec![rx]).unwrap();
    assert!(!m.is_pipelined());
    assert!(!n.is_pipelined());
    pool.shutdown_now();
}

// An unconditioned consumer admits everything, even alongside a
// conditioned one.
#[test]
fn an_irrefutable_consumer_admits_all_values() {
    let pool = Pool::fixed("pipe", 2);
    let reporter = Collect::new();
    let m = Molecule::<i32>::simple("m");
    let a = Molecule::<()>::simple("a");
    let b = Molecule::<()>::simple("b");

    let conditioned = reaction(vec![m.when(|x| *x > 0), a.wildcard()], |_| Ok(()));
    let unconditioned = reaction(vec![m.capture(), b.wildcard()], |_| Ok(()));
    Site::builder(&pool)
        .reaction(conditioned)
        .reaction(unconditioned)
        .reporter(reporter.clone())
        .install()
        .unwrap();

    assert!(m.is_pipelined());
    m.emit(-7).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(m.log_soup().contains("-7"));
    assert!(!reporter
        .events()
        .iter()
        .any(|e| matches!(e, ReportEvent::PipelinedRefused { .. })));
    pool.shutdown_now();
}
