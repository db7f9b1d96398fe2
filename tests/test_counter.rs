use std::thread;
use std::time::Duration;

use retort::prelude::*;

// counter(n) + incr → counter(n+1), counter(n) + decr → counter(n-1).
// Interleaved increments and decrements from several threads conserve the
// running total: the soup shrinks by exactly the consumed inputs before
// each body runs, so no operation is lost or applied twice.
#[test]
fn counter_conserves_interleaved_operations() {
    let pool = Pool::fixed("counter", 4);
    let counter = Molecule::<i64>::new("counter");
    let incr = Molecule::<()>::simple("incr");
    let decr = Molecule::<()>::simple("decr");
    let get = BlockingMolecule::<(), i64>::new("get");

    let c = counter.clone();
    let up = reaction(vec![counter.capture(), incr.wildcard()], move |inputs| {
        let n: i64 = inputs.get(0);
        c.emit(n + 1)
    });
    let c = counter.clone();
    let down = reaction(vec![counter.capture(), decr.wildcard()], move |inputs| {
        let n: i64 = inputs.get(0);
        c.emit(n - 1)
    });
    let c = counter.clone();
    let read = reaction(vec![counter.capture(), get.wildcard()], move |inputs| {
        let n: i64 = inputs.get(0);
        assert!(inputs.reply(1, n));
        c.emit(n)
    });
    site(&pool, vec![up, down, read]).unwrap();

    counter.emit(100).unwrap();

    let mut handles = Vec::new();
    for t in 0..4 {
        let incr = incr.clone();
        let decr = decr.clone();
        handles.push(thread::spawn(move || {
            let mut consumed = Vec::new();
            for k in 0..250 {
                let sig = if (t + k) % 2 == 0 {
                    incr.emit_until_consumed(()).unwrap()
                } else {
                    decr.emit_until_consumed(()).unwrap()
                };
                consumed.push(sig);
            }
            consumed
        }));
    }

    // Equal numbers of increments and decrements; wait until every single
    // operation has been consumed by a reaction.
    for handle in handles {
        for sig in handle.join().unwrap() {
            assert_eq!(sig.wait_timeout(Duration::from_secs(10)), Some(()));
        }
    }

    assert_eq!(get.emit(()).unwrap(), 100);
    pool.shutdown_now();
}

#[test]
fn soup_dump_shows_pending_values() {
    let pool = Pool::fixed("dump", 2);
    let a = Molecule::<i32>::new("a");
    let b = Molecule::<i32>::new("b");
    let drain = reaction(vec![a.capture(), b.capture()], |_| Ok(()));
    site(&pool, vec![drain]).unwrap();

    a.emit(41).unwrap();
    // No b yet, so the value stays in the soup.
    thread::sleep(Duration::from_millis(100));
    assert!(a.log_soup().contains("41"));
    pool.shutdown_now();
}
