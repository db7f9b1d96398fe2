//! Scheduler / worker thread pools.
//!
//! A [`Pool`] owns two executor groups backed by crossbeam channels:
//!
//! * the **scheduler** — one thread draining a queue of scheduling tasks.
//!   Every site naming this pool has its bag mutations and match searches
//!   serialized through it.
//! * the **workers** — a group of threads running reaction bodies.
//!
//! Fixed pools keep a constant worker count. Blocking pools grow by one
//! worker whenever a body announces a voluntary blocking call and shrink
//! back when the call finishes, so a body blocking on a molecule of its own
//! site cannot starve the site of workers.
//!
//! Worker threads carry thread info: the pool they belong to and, while a
//! body runs, the reaction name and the static molecules the reaction
//! consumed. Emitters consult this info for the static-molecule discipline
//! and to announce blocking calls on the right pool.
//!
//! [`Pool`]: struct.Pool.html
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::errors::{Error, Result};

enum WorkerTask {
    Run {
        reaction: String,
        job: Box<dyn FnOnce() + Send>,
    },
    Stop,
}

enum SchedTask {
    Run(Box<dyn FnOnce() + Send>),
    Stop,
}

#[derive(Clone, Copy, PartialEq)]
enum PoolKind {
    Fixed,
    Blocking,
}

struct PoolState {
    /// Worker count the pool is currently aiming for.
    target: usize,
    /// Worker threads currently running their loop.
    alive: usize,
}

struct PoolInner {
    name: String,
    kind: PoolKind,
    base: usize,
    worker_tx: Sender<WorkerTask>,
    worker_rx: Receiver<WorkerTask>,
    sched_tx: Sender<SchedTask>,
    sched_rx: Receiver<SchedTask>,
    state: Mutex<PoolState>,
    /// Signalled each time a worker retires; shutdown waits on it.
    idle: Condvar,
    active: AtomicBool,
}

// -----------------------------------------------------------------------------
//              - Pool -
// -----------------------------------------------------------------------------
/// A scheduler/worker thread-pool pair.
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Clone for Pool {
    fn clone(&self) -> Self {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl Pool {
    /// Create a pool with a constant worker count.
    pub fn fixed(name: &str, parallelism: usize) -> Pool {
        Self::build(name, parallelism, PoolKind::Fixed)
    }

    /// Create a pool whose worker count grows around announced blocking
    /// calls and shrinks back afterwards.
    pub fn blocking(name: &str, parallelism: usize) -> Pool {
        Self::build(name, parallelism, PoolKind::Blocking)
    }

    fn build(name: &str, parallelism: usize, kind: PoolKind) -> Pool {
        let parallelism = parallelism.max(1);
        let (worker_tx, worker_rx) = unbounded();
        let (sched_tx, sched_rx) = unbounded();
        let inner = Arc::new(PoolInner {
            name: name.to_string(),
            kind,
            base: parallelism,
            worker_tx,
            worker_rx,
            sched_tx,
            sched_rx,
            state: Mutex::new(PoolState {
                target: parallelism,
                alive: parallelism,
            }),
            idle: Condvar::new(),
            active: AtomicBool::new(true),
        });

        let sched_inner = inner.clone();
        thread::spawn(move || scheduler_loop(sched_inner));
        for _ in 0..parallelism {
            spawn_worker(&inner);
        }
        Pool { inner }
    }

    /// Pool name, as given at construction.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// False once `shutdown_now` ran.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Schedule a reaction body on the workers.
    pub fn run_reaction<F>(&self, reaction: String, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_active() {
            return Err(Error::Inactive(self.inner.name.clone()));
        }
        self.inner
            .worker_tx
            .send(WorkerTask::Run {
                reaction,
                job: Box::new(job),
            })
            .map_err(|_| Error::Inactive(self.inner.name.clone()))
    }

    /// Schedule a task on the scheduler thread.
    pub fn run_scheduler<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_active() {
            return Err(Error::Inactive(self.inner.name.clone()));
        }
        self.inner
            .sched_tx
            .send(SchedTask::Run(Box::new(task)))
            .map_err(|_| Error::Inactive(self.inner.name.clone()))
    }

    /// Announce that the current task is about to block voluntarily.
    /// Blocking pools grow their worker target by one; fixed pools ignore
    /// the announcement.
    pub fn started_blocking_call(&self, self_blocking: bool) {
        if self.inner.kind == PoolKind::Blocking {
            let mut st = self.inner.state.lock();
            st.target += 1;
            st.alive += 1;
            debug!(
                "{}: blocking call announced (self-blocking: {}), target now {}",
                self.inner.name, self_blocking, st.target
            );
            drop(st);
            spawn_worker(&self.inner);
        }
    }

    /// Announce that the blocking call finished. On blocking pools, one
    /// worker over target retires after its current task.
    pub fn finished_blocking_call(&self, _self_blocking: bool) {
        if self.inner.kind == PoolKind::Blocking {
            let mut st = self.inner.state.lock();
            if st.target > self.inner.base {
                st.target -= 1;
            }
        }
    }

    /// Cancel all queued work, stop the executors and wait briefly for
    /// idle workers to retire. Bodies already running are not interrupted;
    /// a worker parked inside one simply never rejoins.
    pub fn shutdown_now(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        while self.inner.worker_rx.try_recv().is_ok() {}
        while self.inner.sched_rx.try_recv().is_ok() {}

        let alive = self.inner.state.lock().alive;
        let _ = self.inner.sched_tx.send(SchedTask::Stop);
        for _ in 0..alive {
            let _ = self.inner.worker_tx.send(WorkerTask::Stop);
        }

        let deadline = Instant::now() + Duration::from_millis(100);
        let mut st = self.inner.state.lock();
        while st.alive > 0 {
            if self.inner.idle.wait_until(&mut st, deadline).timed_out() {
                debug!(
                    "{}: shutdown grace period elapsed with {} workers busy",
                    self.inner.name, st.alive
                );
                break;
            }
        }
    }

    /// The pool the calling thread belongs to, if it is a pool thread.
    pub(crate) fn current() -> Option<Pool> {
        CURRENT_POOL.with(|c| c.borrow().clone())
    }

    pub(crate) fn same_pool(&self, other: &Pool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn spawn_worker(inner: &Arc<PoolInner>) {
    let inner = inner.clone();
    thread::spawn(move || worker_loop(inner));
}

fn worker_loop(inner: Arc<PoolInner>) {
    CURRENT_POOL.with(|c| {
        *c.borrow_mut() = Some(Pool {
            inner: inner.clone(),
        })
    });
    loop {
        let stop = match inner.worker_rx.recv() {
            Ok(WorkerTask::Run { reaction, job }) => {
                trace!("{}: worker picked up {{{}}}", inner.name, reaction);
                job();
                false
            }
            Ok(WorkerTask::Stop) | Err(_) => true,
        };
        let mut st = inner.state.lock();
        if stop || st.alive > st.target {
            st.alive -= 1;
            inner.idle.notify_all();
            break;
        }
    }
}

fn scheduler_loop(inner: Arc<PoolInner>) {
    CURRENT_POOL.with(|c| {
        *c.borrow_mut() = Some(Pool {
            inner: inner.clone(),
        })
    });
    loop {
        match inner.sched_rx.recv() {
            Ok(SchedTask::Run(task)) => task(),
            Ok(SchedTask::Stop) | Err(_) => break,
        }
    }
}

// -----------------------------------------------------------------------------
//              - Worker thread info -
// -----------------------------------------------------------------------------
/// Per-thread reaction context: which reaction is running here and which
/// static molecules it consumed, with the re-emissions still owed.
pub(crate) struct ReactionContext {
    pub(crate) reaction: String,
    /// static molecule uid → re-emissions still expected
    pub(crate) statics: HashMap<usize, usize>,
}

thread_local! {
    static CURRENT_POOL: RefCell<Option<Pool>> = RefCell::new(None);
    static REACTION_CONTEXT: RefCell<Option<ReactionContext>> = RefCell::new(None);
}

/// Install (or clear) the reaction context for the current thread,
/// returning the previous one.
pub(crate) fn swap_reaction_context(ctx: Option<ReactionContext>) -> Option<ReactionContext> {
    REACTION_CONTEXT.with(|c| std::mem::replace(&mut *c.borrow_mut(), ctx))
}

/// Run `f` with mutable access to the current reaction context, if any.
pub(crate) fn with_reaction_context<R>(f: impl FnOnce(Option<&mut ReactionContext>) -> R) -> R {
    REACTION_CONTEXT.with(|c| f(c.borrow_mut().as_mut()))
}

/// True while the current thread is running a reaction body (or the site
/// init block).
pub(crate) fn in_reaction_thread() -> bool {
    REACTION_CONTEXT.with(|c| c.borrow().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded as channel;

    #[test]
    fn workers_run_jobs() {
        let pool = Pool::fixed("t", 2);
        let (tx, rx) = channel();
        for i in 0..4 {
            let tx = tx.clone();
            pool.run_reaction("job".into(), move || {
                tx.send(i).unwrap();
            })
            .unwrap();
        }
        let mut got: Vec<i32> = (0..4).map(|_| rx.recv().unwrap()).collect();
        got.sort();
        assert_eq!(got, vec![0, 1, 2, 3]);
        pool.shutdown_now();
    }

    #[test]
    fn scheduler_serializes() {
        let pool = Pool::fixed("t", 4);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = channel();
        for i in 0..16 {
            let log = log.clone();
            let tx = tx.clone();
            pool.run_scheduler(move || {
                // No two tasks overlap on the single scheduler thread, so
                // the log sees strictly increasing values.
                log.lock().push(i);
                tx.send(()).unwrap();
            })
            .unwrap();
        }
        for _ in 0..16 {
            rx.recv().unwrap();
        }
        assert_eq!(*log.lock(), (0..16).collect::<Vec<_>>());
        pool.shutdown_now();
    }

    #[test]
    fn blocking_pool_grows_around_announced_calls() {
        let pool = Pool::blocking("b", 1);
        let (tx, rx) = channel();
        let (inner_tx, inner_rx) = channel();
        let pool_c = pool.clone();
        let tx_c = tx.clone();
        pool.run_reaction("outer".into(), move || {
            // The single base worker blocks here; the announcement makes
            // room for the inner job to run anyway.
            pool_c.started_blocking_call(true);
            let v: i32 = inner_rx.recv().unwrap();
            pool_c.finished_blocking_call(true);
            tx_c.send(v).unwrap();
        })
        .unwrap();
        pool.run_reaction("inner".into(), move || {
            inner_tx.send(42).unwrap();
        })
        .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
        pool.shutdown_now();
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let pool = Pool::fixed("t", 1);
        pool.shutdown_now();
        assert!(!pool.is_active());
        assert!(pool.run_reaction("late".into(), || {}).is_err());
        assert!(pool.run_scheduler(|| {}).is_err());
    }
}
