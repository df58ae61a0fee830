//! Operation history: event model, recorder, and structural checker.

pub mod checker;
pub mod event;
pub mod recorder;

pub use checker::{CheckResult, CheckStats, Checker, History, Violation, ViolationKind};
pub use event::{Event, EventKind, MicroKind, MicroOp, OpLabel, OpValue, Tags};
pub use recorder::{HistoryFormat, Recorder};
