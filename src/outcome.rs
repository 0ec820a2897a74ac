use std::fmt;

/// Observation category of a captured message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    /// Accepted by the broker on the producing path.
    Published,
    /// Read from a regular topic.
    Consumed,
    /// Read from an error/retry topic, or reported by a failure hook.
    Failed,
}

impl Outcome {
    pub fn is_published(&self) -> bool {
        matches!(self, Outcome::Published)
    }

    pub fn is_consumed(&self) -> bool {
        matches!(self, Outcome::Consumed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Published => write!(f, "published"),
            Outcome::Consumed => write!(f, "consumed"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}
