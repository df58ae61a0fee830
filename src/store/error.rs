//! Store failure categories.
//!
//! Every failure the store client can surface is mapped to one of a fixed
//! set of categories at the adapter boundary. Interpretation of those
//! categories lives in [`crate::outcome`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A typed failure raised by a store session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The coordinator could not gather enough replicas to start the
    /// transaction. Nothing was applied.
    #[error("coordinator unavailable: {message}")]
    Unavailable { message: String },

    /// Replicas did not acknowledge a read in time.
    #[error("read timeout: {message}")]
    ReadTimeout { message: String },

    /// Replicas did not acknowledge a write in time.
    #[error("write timeout: {message}")]
    WriteTimeout { message: String },

    /// The client gave up waiting for a reply.
    #[error("no reply within {}ms", timeout.as_millis())]
    OperationTimeout { timeout: Duration },

    /// No host in the contact list could be reached.
    #[error("no host available: {message}")]
    NoHostAvailable { message: String },

    /// Anything else: syntax errors, driver bugs, unexpected responses.
    #[error("{message}")]
    Unexpected { message: String },
}

impl StoreError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        StoreError::Unexpected {
            message: message.into(),
        }
    }

    /// The category tag recorded on the completion event.
    pub fn cause(&self) -> Cause {
        match self {
            StoreError::Unavailable { .. } => Cause::Unavailable,
            StoreError::ReadTimeout { .. } => Cause::ReadTimeout,
            StoreError::WriteTimeout { .. } => Cause::WriteTimeout,
            StoreError::OperationTimeout { .. } => Cause::OperationTimeout,
            StoreError::NoHostAvailable { .. } => Cause::NoHostAvailable,
            StoreError::Unexpected { .. } => Cause::Unexpected,
        }
    }
}

/// Failure category tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cause {
    Unavailable,
    ReadTimeout,
    WriteTimeout,
    OperationTimeout,
    NoHostAvailable,
    Unexpected,
}

impl Cause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cause::Unavailable => "unavailable",
            Cause::ReadTimeout => "read-timeout",
            Cause::WriteTimeout => "write-timeout",
            Cause::OperationTimeout => "operation-timeout",
            Cause::NoHostAvailable => "no-host-available",
            Cause::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
