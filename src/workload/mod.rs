//! Workload generators.
//!
//! A workload decides what each iteration of a worker does and how that
//! operation maps onto the store's statement templates. Three models are
//! provided:
//! - `cas`: single registers with read, write and compare-and-swap
//! - `rw`: transactions of one or two register reads/writes
//! - `list_append`: single-step transactions over append-only lists

pub mod cas;
pub mod list_append;
pub mod rw;

use rand::{Rng, RngCore};

use crate::history::{OpLabel, OpValue, Tags};
use crate::outcome::Applied;
use crate::store::{Session, Statements, StoreError, Template};

pub use cas::CasRegister;
pub use list_append::ListAppend;
pub use rw::{RwRegister, ValueSeq, MAX_OPS_PER_TXN};

/// An operation chosen by a workload, before it is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub f: OpLabel,
    pub value: OpValue,
    pub tags: Tags,
}

/// Per-model operation generator and executor.
pub trait Workload: Send {
    /// Statement templates the workload executes; prepared once per worker.
    fn templates(&self) -> &'static [Template];

    /// Choose the next operation. `n` is the worker's 1-based iteration.
    fn generate(&mut self, rng: &mut dyn RngCore, n: u64) -> Operation;

    /// Run `op` against the store.
    fn execute(
        &mut self,
        session: &mut dyn Session,
        statements: &Statements,
        op: &Operation,
    ) -> Result<Applied, StoreError>;
}

/// Pick a register uniformly, with replacement.
pub(crate) fn pick(registers: &[i64], rng: &mut dyn RngCore) -> i64 {
    registers[rng.gen_range(0..registers.len())]
}

/// Error for an operation the workload does not know how to run.
pub(crate) fn malformed(op: &Operation) -> StoreError {
    StoreError::unexpected(format!("malformed operation: {:?}", op))
}
