//! One-shot reply rendezvous.
//!
//! Every blocking emission creates one [`ReplyCore`]: a single slot shared
//! by the waiting emitter and the reaction body that will (hopefully) reply
//! to it. The slot supports a blocking wait, a timed wait whose timeout
//! transition is atomic with respect to a racing reply, a future-style end,
//! and "no reply was ever sent" resolution.
//!
//! The same machinery backs the observation futures ([`Signal`]) used by
//! `when_emitted` and friends.
//!
//! [`ReplyCore`]: struct.ReplyCore.html
//! [`Signal`]: struct.Signal.html
use std::any::Any;
use std::mem::replace;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::errors::{Error, Result};

enum State<T> {
    /// No reply yet; the emitter may still be waiting.
    Pending,
    /// Replied, value not yet collected.
    Sent(T),
    /// Replied and collected.
    Taken,
    /// The emitter stopped waiting. A later reply is discarded.
    TimedOut,
    /// The reacting body finished without replying.
    NoReply(Option<String>),
}

// -----------------------------------------------------------------------------
//              - Reply core -
// -----------------------------------------------------------------------------
/// The shared slot. One producer (the reaction body), one consumer (the
/// emitter), and a timeout that may race the producer.
pub(crate) struct ReplyCore<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T> ReplyCore<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Pending),
            cond: Condvar::new(),
        })
    }

    /// First completion against a pending slot wins; everything else is a
    /// no-op returning `false`.
    pub(crate) fn complete(&self, value: T) -> bool {
        let mut st = self.state.lock();
        match *st {
            State::Pending => {
                *st = State::Sent(value);
                self.cond.notify_all();
                true
            }
            _ => false,
        }
    }

    /// Block until the slot is terminal. `Err` carries the body's failure
    /// message when the reply never came.
    pub(crate) fn wait(&self) -> std::result::Result<T, Option<String>> {
        let mut st = self.state.lock();
        loop {
            match replace(&mut *st, State::Taken) {
                State::Pending => {
                    *st = State::Pending;
                    self.cond.wait(&mut st);
                }
                State::Sent(v) => return Ok(v),
                State::NoReply(cause) => return Err(cause),
                // Taken / TimedOut: the slot was already consumed.
                _ => return Err(None),
            }
        }
    }

    /// Block up to `timeout`. `Ok(None)` means the wait timed out; the
    /// transition to `TimedOut` happens under the lock so a concurrent
    /// `complete` loses cleanly.
    pub(crate) fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Option<T>, Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        loop {
            match replace(&mut *st, State::Taken) {
                State::Pending => {
                    *st = State::Pending;
                    if self.cond.wait_until(&mut st, deadline).timed_out() {
                        return match replace(&mut *st, State::Taken) {
                            // Still nothing: give up. The reacting side will
                            // observe the abandoned slot and skip the value.
                            State::Pending => {
                                *st = State::TimedOut;
                                Ok(None)
                            }
                            State::Sent(v) => Ok(Some(v)),
                            State::NoReply(cause) => Err(cause),
                            _ => Err(None),
                        };
                    }
                }
                State::Sent(v) => return Ok(Some(v)),
                State::TimedOut => {
                    *st = State::TimedOut;
                    return Ok(None);
                }
                State::NoReply(cause) => return Err(cause),
                State::Taken => return Err(None),
            }
        }
    }

    fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), State::Pending)
    }

    fn is_timed_out(&self) -> bool {
        matches!(*self.state.lock(), State::TimedOut)
    }

    fn resolve_no_reply(&self, cause: Option<String>) {
        let mut st = self.state.lock();
        if let State::Pending = *st {
            *st = State::NoReply(cause);
            self.cond.notify_all();
        }
    }
}

// -----------------------------------------------------------------------------
//              - Erased slot, as the site sees it -
// -----------------------------------------------------------------------------
/// Type-erased view of a reply slot, carried inside molecule values.
pub(crate) trait ReplySlot: Send + Sync {
    /// Downcast hook for the typed `Inputs::reply`.
    fn as_any(&self) -> &dyn Any;

    /// True while no reply has been attempted. Used to diagnose a body
    /// that finished without replying.
    fn unreplied(&self) -> bool;

    /// True once the emitter timed out and stopped waiting. Such values
    /// are stale and are skipped by match search.
    fn abandoned(&self) -> bool;

    /// Resolve the slot with "no reply sent", unblocking the emitter with
    /// an error.
    fn close_no_reply(&self, cause: Option<String>);
}

impl<T: Send + 'static> ReplySlot for ReplyCore<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn unreplied(&self) -> bool {
        self.is_pending()
    }

    fn abandoned(&self) -> bool {
        self.is_timed_out()
    }

    fn close_no_reply(&self, cause: Option<String>) {
        self.resolve_no_reply(cause);
    }
}

// -----------------------------------------------------------------------------
//              - Future end -
// -----------------------------------------------------------------------------
/// The future-style end of a blocking emission, returned by
/// `BlockingMolecule::emit_future`. Resolved by the same completion that
/// would have served a blocking wait.
pub struct ReplyFuture<R> {
    core: Arc<ReplyCore<R>>,
    molecule: String,
}

impl<R: Send + 'static> ReplyFuture<R> {
    pub(crate) fn new(core: Arc<ReplyCore<R>>, molecule: String) -> Self {
        Self { core, molecule }
    }

    /// Block until the reply arrives.
    pub fn get(self) -> Result<R> {
        self.core.wait().map_err(|cause| Error::NoReply {
            molecule: self.molecule,
            cause,
        })
    }

    /// Block up to `timeout`; `Ok(None)` on timeout.
    pub fn get_timeout(self, timeout: Duration) -> Result<Option<R>> {
        self.core
            .wait_timeout(timeout)
            .map_err(|cause| Error::NoReply {
                molecule: self.molecule,
                cause,
            })
    }

    /// True once a reply (or a no-reply resolution) is in.
    pub fn is_resolved(&self) -> bool {
        !self.core.is_pending()
    }
}

// -----------------------------------------------------------------------------
//              - Observation futures -
// -----------------------------------------------------------------------------
/// A one-shot observation future, fulfilled by the reaction site at a
/// documented point (`when_emitted`, `emit_until_consumed`,
/// `when_scheduled`).
pub struct Signal<T> {
    core: Arc<ReplyCore<T>>,
}

impl<T: Send + 'static> Signal<T> {
    pub(crate) fn pair() -> (Self, Arc<ReplyCore<T>>) {
        let core = ReplyCore::new();
        (Self { core: core.clone() }, core)
    }

    /// Block until the signal fires.
    pub fn wait(self) -> Option<T> {
        self.core.wait().ok()
    }

    /// Block up to `timeout`; `None` if the signal did not fire in time.
    pub fn wait_timeout(self, timeout: Duration) -> Option<T> {
        self.core.wait_timeout(timeout).ok().flatten()
    }
}
