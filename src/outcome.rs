//! Outcome classification.
//!
//! Maps the result of one operation to the checker's outcome vocabulary.
//! The mapping is the single point where store failures acquire meaning:
//!
//! | result                                   | outcome |
//! |------------------------------------------|---------|
//! | success, condition held                  | ok      |
//! | success, condition failed / row absent   | fail    |
//! | coordinator unavailable                  | fail    |
//! | read / write acknowledgment timeout      | info    |
//! | client-side operation timeout            | info    |
//! | no reachable host                        | fail, after a backoff |
//! | anything else                            | error   |
//!
//! A timeout must never be reported as `fail`: the effect may have been
//! applied, and `fail` asserts that it definitely was not.

use std::time::Duration;

use crate::history::{EventKind, OpValue};
use crate::store::{Cause, StoreError};

/// Delay applied before reporting a no-host failure.
pub const NO_HOST_BACKOFF: Duration = Duration::from_secs(1);

/// What a workload learned from a successful round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Whether the operation's condition held and its effect took place.
    pub satisfied: bool,
    /// Value to report on the completion event.
    pub value: OpValue,
}

impl Applied {
    pub fn ok(value: OpValue) -> Self {
        Applied {
            satisfied: true,
            value,
        }
    }

    pub fn failed(value: OpValue) -> Self {
        Applied {
            satisfied: false,
            value,
        }
    }
}

/// Classified outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub kind: EventKind,
    /// Value for the completion event; `None` reuses the invoked value.
    pub value: Option<OpValue>,
    pub cause: Option<Cause>,
    /// Diagnostic text for unexpected failures.
    pub error: Option<String>,
    /// Delay to observe before the completion is emitted.
    pub backoff: Option<Duration>,
}

/// Classify with the default no-host backoff.
pub fn classify(result: Result<Applied, StoreError>) -> Outcome {
    classify_with_backoff(result, NO_HOST_BACKOFF)
}

/// Classify an operation result.
pub fn classify_with_backoff(
    result: Result<Applied, StoreError>,
    no_host_backoff: Duration,
) -> Outcome {
    let failure = |kind: EventKind, error: &StoreError| Outcome {
        kind,
        value: None,
        cause: Some(error.cause()),
        error: None,
        backoff: None,
    };

    match result {
        Ok(applied) => Outcome {
            kind: if applied.satisfied {
                EventKind::Ok
            } else {
                EventKind::Fail
            },
            value: Some(applied.value),
            cause: None,
            error: None,
            backoff: None,
        },
        Err(error) => match &error {
            StoreError::Unavailable { .. } => failure(EventKind::Fail, &error),
            StoreError::ReadTimeout { .. }
            | StoreError::WriteTimeout { .. }
            | StoreError::OperationTimeout { .. } => failure(EventKind::Info, &error),
            StoreError::NoHostAvailable { .. } => Outcome {
                backoff: Some(no_host_backoff),
                ..failure(EventKind::Fail, &error)
            },
            StoreError::Unexpected { message } => Outcome {
                error: Some(message.clone()),
                ..failure(EventKind::Error, &error)
            },
        },
    }
}
