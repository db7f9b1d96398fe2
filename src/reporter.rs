//! Structured runtime events.
//!
//! The engine never composes log messages itself. Every noteworthy step is
//! turned into a [`ReportEvent`] and handed to the site's [`Reporter`].
//! The default reporter forwards events to the `log` macros; tests install
//! collecting reporters to assert on the event stream.
//!
//! [`ReportEvent`]: enum.ReportEvent.html
//! [`Reporter`]: trait.Reporter.html

/// A structured event emitted by a reaction site or a pool.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    /// A site was installed and assigned to a pool's scheduler.
    SchedulerAssigned {
        /// Site name
        site: String,
        /// Pool name
        pool: String,
    },

    /// A reaction was matched and handed to a worker pool.
    ReactionScheduled {
        /// Site name
        site: String,
        /// Rendered reaction descriptor
        reaction: String,
    },

    /// A worker thread started running a reaction body.
    ReactionStarted {
        /// Rendered reaction descriptor
        reaction: String,
    },

    /// A reaction body returned.
    ReactionFinished {
        /// Rendered reaction descriptor
        reaction: String,
    },

    /// A reaction body failed (error return or panic).
    ReactionFailed {
        /// Rendered reaction descriptor
        reaction: String,
        /// The failure message
        error: String,
        /// Whether the inputs were re-injected for another attempt
        retried: bool,
    },

    /// A reaction body consumed a blocking molecule and finished without
    /// replying to it.
    ReplyNeverSent {
        /// Rendered reaction descriptor
        reaction: String,
        /// The blocking molecule left without a reply
        molecule: String,
    },

    /// A value emitted to a pipelined molecule failed every per-molecule
    /// condition and was dropped at the door.
    PipelinedRefused {
        /// Molecule name
        molecule: String,
        /// Rendered value
        value: String,
    },

    /// A reaction is guaranteed to re-emit all of its own inputs: it can
    /// spin forever without outside help.
    LivelockDetected {
        /// Site name
        site: String,
        /// Rendered reaction descriptor
        reaction: String,
    },

    /// A static molecule was not re-emitted exactly once by a body that
    /// consumed it.
    StaticMisused {
        /// Molecule name
        molecule: String,
        /// What went wrong
        detail: String,
    },
}

/// Receiver of [`ReportEvent`]s.
///
/// [`ReportEvent`]: enum.ReportEvent.html
pub trait Reporter: Send + Sync {
    /// Handle one event. Implementations must not block.
    fn report(&self, event: ReportEvent);
}

/// Default reporter: forwards events to the `log` macros.
///
/// Lifecycle events go to `debug!`, droppable anomalies to `warn!`,
/// misuse to `error!`.
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, event: ReportEvent) {
        use ReportEvent::*;
        match event {
            SchedulerAssigned { site, pool } => debug!("{}: scheduler assigned on pool {}", site, pool),
            ReactionScheduled { site, reaction } => debug!("{}: scheduled {{{}}}", site, reaction),
            ReactionStarted { reaction } => debug!("started {{{}}}", reaction),
            ReactionFinished { reaction } => debug!("finished {{{}}}", reaction),
            ReactionFailed { reaction, error, retried } => {
                if retried {
                    warn!("{{{}}} failed, inputs re-injected: {}", reaction, error);
                } else {
                    error!("{{{}}} failed, inputs dropped: {}", reaction, error);
                }
            }
            ReplyNeverSent { reaction, molecule } => {
                error!("{{{}}} finished without replying to {}", reaction, molecule)
            }
            PipelinedRefused { molecule, value } => {
                debug!("pipelined {}: refused value {}", molecule, value)
            }
            LivelockDetected { site, reaction } => {
                warn!("{}: possible livelock in {{{}}}", site, reaction)
            }
            StaticMisused { molecule, detail } => error!("static {}: {}", molecule, detail),
        }
    }
}
