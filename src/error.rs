use std::{fmt, sync::Arc, time::Duration};

use crate::{Outcome, TypeTag};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Timeout(#[from] TimeoutFailure),

    #[error(transparent)]
    Capture(#[from] CaptureFailure),

    #[error("Broker is unreachable: {0}")]
    Connection(Arc<str>),

    #[error("Publishing to '{topic}' failed: {reason}")]
    Publish { topic: Arc<str>, reason: Arc<str> },

    #[error("Codec error: {0}")]
    Codec(Arc<str>),

    #[error("Subscription error: {0}")]
    Subscription(Arc<str>),

    #[error("Couldn't commit offset {offset} on '{topic}': {reason}")]
    Commit {
        topic: Arc<str>,
        offset: u64,
        reason: Arc<str>,
    },

    #[error("Type tag `{type_tag}` is registered for `{registered}`, not `{requested}`")]
    TagConflict {
        type_tag: TypeTag,
        registered: &'static str,
        requested: &'static str,
    },

    #[error("Bridge consumer task join error: {0}")]
    BridgeJoin(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn connection(reason: impl fmt::Display) -> Self {
        Error::Connection(Arc::from(reason.to_string()))
    }

    pub fn codec(reason: impl fmt::Display) -> Self {
        Error::Codec(Arc::from(reason.to_string()))
    }

    pub fn subscription(reason: impl fmt::Display) -> Self {
        Error::Subscription(Arc::from(reason.to_string()))
    }

    /// Returns the timeout diagnostic if this is an assertion failure.
    pub fn as_timeout(&self) -> Option<&TimeoutFailure> {
        match self {
            Error::Timeout(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::codec(e)
    }
}

/// Maximum number of non-matching payloads kept in a [`TimeoutFailure`].
pub(crate) const MAX_SAMPLES: usize = 5;

/// No matching event arrived before the deadline.
///
/// Tells apart "nothing of this type was observed" from "events were observed
/// but the condition rejected all of them". In the latter case the first few
/// rejected payloads are kept in [`samples`](Self::samples).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutFailure {
    pub outcome: Outcome,
    pub type_tag: TypeTag,
    pub timeout: Duration,
    /// Events recorded under `(outcome, type_tag)` at the deadline.
    pub observed: usize,
    /// Observed events whose payload was another Rust type sharing the tag.
    pub type_mismatches: usize,
    /// Debug renderings of up to five rejected payloads.
    pub samples: Vec<String>,
}

impl TimeoutFailure {
    /// True when no event of this type was observed at all.
    pub fn nothing_observed(&self) -> bool {
        self.observed == 0
    }

    /// Events that had the right type but failed the condition.
    pub fn rejected(&self) -> usize {
        self.observed - self.type_mismatches
    }
}

impl fmt::Display for TimeoutFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nothing_observed() {
            return write!(
                f,
                "no {} message of type `{}` was observed within {:?}",
                self.outcome, self.type_tag, self.timeout
            );
        }
        write!(
            f,
            "{} {} message(s) of type `{}` observed within {:?}, none matched",
            self.observed, self.outcome, self.type_tag, self.timeout
        )?;
        if self.type_mismatches > 0 {
            write!(
                f,
                " ({} had the same tag but a different type)",
                self.type_mismatches
            )?;
        }
        if !self.samples.is_empty() {
            write!(f, "; rejected: [{}]", self.samples.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for TimeoutFailure {}

/// A broker record couldn't be turned into a captured event.
///
/// The bridge consumer logs it, commits the record, and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureFailure {
    #[error("record at {topic}@{offset} has no type header")]
    MissingTypeTag { topic: Arc<str>, offset: u64 },

    #[error("record at {topic}@{offset} of type `{type_tag}` couldn't be decoded: {reason}")]
    Decode {
        topic: Arc<str>,
        offset: u64,
        type_tag: TypeTag,
        reason: Arc<str>,
    },
}
