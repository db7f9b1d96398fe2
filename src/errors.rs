//! Crate default `Error`
use std::fmt;

/// Result type: `std::result::Result<T, Error>`
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapping error type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The molecule was emitted (or queried) before any reaction site
    /// declared a reaction consuming it.
    Unbound(String),

    /// A reaction's input molecule is already consumed by reactions of
    /// another site. A molecule belongs to exactly one site.
    AlreadyBound {
        /// Molecule name
        molecule: String,
        /// Name of the site that owns the molecule
        site: String,
    },

    /// Two reactions in the same site have identical input patterns,
    /// so neither can ever be preferred over the other.
    ShadowedReactions {
        /// Site name
        site: String,
        /// Rendered descriptor of the shadowed reaction
        reaction: String,
    },

    /// One reaction's input patterns are irrefutably weaker than
    /// another's over the same inputs: unavoidable indeterminism.
    Indeterminism {
        /// Site name
        site: String,
        /// The weaker reaction
        weaker: String,
        /// The stronger reaction
        stronger: String,
    },

    /// A static molecule was misused: emitted outside a reaction that
    /// consumed it, declared without a consuming reaction, or not
    /// emitted exactly once by the init block.
    StaticMisuse {
        /// Molecule name
        molecule: String,
        /// What went wrong
        detail: String,
    },

    /// `volatile_value` was called on a molecule that is not static.
    NotStatic(String),

    /// A blocking emission finished without any reply being sent.
    NoReply {
        /// Molecule name
        molecule: String,
        /// Error message of the reaction body, if it failed
        cause: Option<String>,
    },

    /// The pool serving this site was shut down; no further emissions
    /// are accepted.
    Inactive(String),

    /// A reaction body failed. Bodies report failure through this
    /// variant; the site applies the reaction's retry policy to it.
    ReactionFailed(String),
}

impl Error {
    /// Shorthand for a body failure.
    pub fn reaction<S: Into<String>>(msg: S) -> Error {
        Error::ReactionFailed(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Unbound(m) => write!(f, "molecule {} is not bound to any reaction site", m),
            Error::AlreadyBound { molecule, site } => write!(
                f,
                "molecule {} is already bound to reaction site {}",
                molecule, site
            ),
            Error::ShadowedReactions { site, reaction } => {
                write!(f, "{}: identical repeated reactions: {}", site, reaction)
            }
            Error::Indeterminism {
                site,
                weaker,
                stronger,
            } => write!(
                f,
                "{}: unavoidable indeterminism: {{{}}} is weaker than {{{}}}",
                site, weaker, stronger
            ),
            Error::StaticMisuse { molecule, detail } => {
                write!(f, "static molecule {}: {}", molecule, detail)
            }
            Error::NotStatic(m) => write!(f, "molecule {} is not static", m),
            Error::NoReply { molecule, cause } => match cause {
                Some(c) => write!(f, "blocking molecule {}: no reply sent ({})", molecule, c),
                None => write!(f, "blocking molecule {}: no reply sent", molecule),
            },
            Error::Inactive(pool) => write!(f, "pool {} is shut down", pool),
            Error::ReactionFailed(msg) => write!(f, "reaction failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
