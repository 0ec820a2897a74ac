use std::{fmt, sync::Arc};

/// Why a message failed.
///
/// Attached to every [`Outcome::Failed`](crate::Outcome::Failed) event. Two
/// details are equal when their reasons are equal, which is what
/// [`Wiretap::should_be_failed`](crate::Wiretap::should_be_failed) compares.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FailureDetail {
    reason: Arc<str>,
}

impl FailureDetail {
    pub fn new(reason: impl Into<Arc<str>>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Capture the display form of an error.
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        Self::new(err.to_string())
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl From<&str> for FailureDetail {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

impl From<String> for FailureDetail {
    fn from(reason: String) -> Self {
        Self::new(reason)
    }
}
