//! Errors raised by OLTHAD operations.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OlthadError {
    /// The caller asked for something the traversal does not allow.
    #[error("olthad usage error: {0}")]
    Usage(String),

    /// The tree violates a structural invariant.
    #[error("corrupted olthad: {0}")]
    Corrupted(String),
}

impl OlthadError {
    pub(crate) fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }
}
