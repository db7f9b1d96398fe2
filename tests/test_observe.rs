use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use retort::prelude::*;

#[test]
fn when_emitted_fires_on_the_next_emission() {
    let pool = Pool::fixed("obs", 2);
    let a = Molecule::<i32>::new("a");
    let b = Molecule::<i32>::new("b");
    site(&pool, vec![reaction(vec![a.capture(), b.capture()], |_| Ok(()))]).unwrap();

    let emitted = a.when_emitted().unwrap();
    a.emit(1).unwrap();
    assert_eq!(emitted.wait_timeout(Duration::from_secs(5)), Some(()));
    pool.shutdown_now();
}

#[test]
fn when_scheduled_reports_the_attempt_outcome() {
    let pool = Pool::fixed("obs", 2);
    let a = Molecule::<i32>::new("a");
    let b = Molecule::<i32>::new("b");
    site(&pool, vec![reaction(vec![a.capture(), b.capture()], |_| Ok(()))]).unwrap();

    // Alone in the soup, a triggers an attempt that matches nothing.
    let failed = a.when_scheduled().unwrap();
    a.emit(1).unwrap();
    assert_eq!(failed.wait_timeout(Duration::from_secs(5)), Some(None));

    // The arrival of b completes the match.
    let scheduled = b.when_scheduled().unwrap();
    b.emit(2).unwrap();
    assert_eq!(
        scheduled.wait_timeout(Duration::from_secs(5)),
        Some(Some("b".to_string()))
    );
    pool.shutdown_now();
}

#[test]
fn emit_until_consumed_tracks_one_copy() {
    let pool = Pool::fixed("obs", 2);
    let a = Molecule::<i32>::new("a");
    let b = Molecule::<i32>::new("b");
    site(&pool, vec![reaction(vec![a.capture(), b.capture()], |_| Ok(()))]).unwrap();

    let consumed = a.emit_until_consumed(1).unwrap();
    // Not consumable yet.
    assert_eq!(consumed.wait_timeout(Duration::from_millis(200)), None);
    pool.shutdown_now();

    let pool = Pool::fixed("obs2", 2);
    let a = Molecule::<i32>::new("a2");
    let b = Molecule::<i32>::new("b2");
    site(&pool, vec![reaction(vec![a.capture(), b.capture()], |_| Ok(()))]).unwrap();
    let consumed = a.emit_until_consumed(1).unwrap();
    b.emit(2).unwrap();
    assert_eq!(consumed.wait_timeout(Duration::from_secs(5)), Some(()));
    pool.shutdown_now();
}

#[test]
fn soup_dump_is_refused_inside_a_body() {
    let pool = Pool::fixed("obs", 2);
    let a = Molecule::<i32>::new("a");
    let saw_sentinel = Arc::new(AtomicBool::new(false));

    let a2 = a.clone();
    let flag = saw_sentinel.clone();
    let rx = reaction(vec![a.capture()], move |_| {
        flag.store(a2.log_soup().contains("unavailable"), Ordering::SeqCst);
        Ok(())
    });
    site(&pool, vec![rx]).unwrap();

    let consumed = a.emit_until_consumed(1).unwrap();
    assert_eq!(consumed.wait_timeout(Duration::from_secs(5)), Some(()));
    let deadline = Instant::now() + Duration::from_secs(5);
    while !saw_sentinel.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "body never saw the sentinel");
        std::thread::sleep(Duration::from_millis(10));
    }
    pool.shutdown_now();
}

// A failing body with the retry flag gets its inputs back and runs again.
#[test]
fn retry_reinjects_the_inputs() {
    let pool = Pool::fixed("obs", 2);
    let a = Molecule::<i32>::new("a");
    let attempts = Arc::new(AtomicUsize::new(0));
    let result = Arc::new(AtomicI64::new(0));

    let attempts2 = attempts.clone();
    let result2 = result.clone();
    let flaky = reaction(vec![a.capture()], move |inputs| {
        if attempts2.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(Error::reaction("transient"));
        }
        result2.store(inputs.get::<i32>(0) as i64, Ordering::SeqCst);
        Ok(())
    })
    .with_retry();
    site(&pool, vec![flaky]).unwrap();

    a.emit(7).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while result.load(Ordering::SeqCst) != 7 {
        assert!(Instant::now() < deadline, "retried body never completed");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(attempts.load(Ordering::SeqCst) >= 2);
    pool.shutdown_now();
}

// With two reactions runnable on the same molecule, neither is preferred:
// the choice is random, not declaration order.
#[test]
fn eligible_reactions_are_chosen_without_priority() {
    let pool = Pool::fixed("obs", 2);
    let trials = 200;
    let mut first = 0;
    let mut second = 0;
    for _ in 0..trials {
        let t = Molecule::<()>::simple("t");
        let a = Molecule::<()>::simple("a");
        let b = Molecule::<()>::simple("b");
        let winner = Arc::new(AtomicUsize::new(0));

        let w1 = winner.clone();
        let r1 = reaction(vec![t.wildcard(), a.wildcard()], move |_| {
            w1.store(1, Ordering::SeqCst);
            Ok(())
        });
        let w2 = winner.clone();
        let r2 = reaction(vec![t.wildcard(), b.wildcard()], move |_| {
            w2.store(2, Ordering::SeqCst);
            Ok(())
        });
        site(&pool, vec![r1, r2]).unwrap();

        a.emit(()).unwrap();
        b.emit(()).unwrap();
        t.emit(()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match winner.load(Ordering::SeqCst) {
                0 => {
                    assert!(Instant::now() < deadline, "no reaction ever ran");
                    std::thread::sleep(Duration::from_millis(1));
                }
                1 => {
                    first += 1;
                    break;
                }
                _ => {
                    second += 1;
                    break;
                }
            }
        }
    }
    // Each side should win roughly half of the trials; 20% is a safely
    // loose bound for 200 of them.
    assert!(first > trials / 5, "first reaction won only {} times", first);
    assert!(second > trials / 5, "second reaction won only {} times", second);
    pool.shutdown_now();
}
