//! Multi-operation read/write register workload.
//!
//! Each iteration is one transaction shaped as read, write, read-read,
//! read-write or write-write over the shared register set. The checker
//! infers write-read dependencies from values alone, so every value
//! written during a run is unique across all workers.

use rand::{Rng, RngCore};

use super::{malformed, pick, Operation, Workload};
use crate::history::{MicroKind, MicroOp, OpLabel, OpValue, Tags};
use crate::outcome::Applied;
use crate::store::{Datum, Session, Statements, StoreError, Template};

/// Width, in operations, of the value slots reserved per transaction.
pub const MAX_OPS_PER_TXN: i64 = 4;

const TEMPLATES: &[Template] = &[
    Template::RwRead,
    Template::RwInsertIfAbsent,
    Template::RwReadTwo,
    Template::RwReadThenWrite,
    Template::RwWriteTwo,
];

/// Worker-exclusive sequence of write values.
///
/// Values are `threshold + v` for a counter `v` private to the worker;
/// `threshold` places each worker in its own band.
#[derive(Debug, Clone)]
pub struct ValueSeq {
    threshold: i64,
    v: i64,
}

impl ValueSeq {
    /// Band for `worker` when each worker runs `per_worker_ops` operations.
    pub fn for_worker(worker: usize, per_worker_ops: u64) -> Self {
        Self::new(MAX_OPS_PER_TXN * worker as i64 * per_worker_ops as i64, 1)
    }

    pub fn new(threshold: i64, start: i64) -> Self {
        ValueSeq {
            threshold,
            v: start,
        }
    }

    /// Next single value.
    pub fn next_value(&mut self) -> i64 {
        let value = self.threshold + self.v;
        self.v += 1;
        value
    }

    /// Next pair of values for a two-write transaction. The k-th write
    /// takes slot `v + 2k`.
    pub fn next_pair(&mut self) -> (i64, i64) {
        let first = self.threshold + self.v;
        let second = first + 2;
        self.v += 3;
        (first, second)
    }
}

#[derive(Debug, Clone)]
pub struct RwRegister {
    worker: usize,
    registers: Vec<i64>,
    values: ValueSeq,
}

impl RwRegister {
    pub fn new(worker: usize, per_worker_ops: u64, registers: Vec<i64>) -> Self {
        RwRegister {
            worker,
            registers,
            values: ValueSeq::for_worker(worker, per_worker_ops),
        }
    }

    pub fn with_values(worker: usize, registers: Vec<i64>, values: ValueSeq) -> Self {
        RwRegister {
            worker,
            registers,
            values,
        }
    }

    fn txn(&self, n: u64, ops: Vec<MicroOp>) -> Operation {
        Operation {
            f: OpLabel::Txn,
            value: OpValue::Txn(ops),
            tags: Tags::thread(self.worker, n),
        }
    }
}

impl Workload for RwRegister {
    fn templates(&self) -> &'static [Template] {
        TEMPLATES
    }

    fn generate(&mut self, rng: &mut dyn RngCore, n: u64) -> Operation {
        let a = pick(&self.registers, rng);
        let ops = match rng.gen_range(0..5) {
            0 => vec![MicroOp::read(a)],
            1 => vec![MicroOp::write(a, self.values.next_value())],
            2 => vec![MicroOp::read(a), MicroOp::read(pick(&self.registers, rng))],
            3 => {
                let b = pick(&self.registers, rng);
                vec![MicroOp::read(a), MicroOp::write(b, self.values.next_value())]
            }
            _ => {
                let b = pick(&self.registers, rng);
                let (x, y) = self.values.next_pair();
                vec![MicroOp::write(a, x), MicroOp::write(b, y)]
            }
        };
        self.txn(n, ops)
    }

    fn execute(
        &mut self,
        session: &mut dyn Session,
        statements: &Statements,
        op: &Operation,
    ) -> Result<Applied, StoreError> {
        let ops = match &op.value {
            OpValue::Txn(ops) => ops.as_slice(),
            _ => return Err(malformed(op)),
        };
        let written = |m: &MicroOp| m.value.as_int().ok_or_else(|| malformed(op));

        match ops {
            [r] if r.kind == MicroKind::Read => {
                let rows = statements.execute(session, Template::RwRead, &[r.register.into()])?;
                Ok(Applied::ok(OpValue::Txn(vec![MicroOp {
                    value: rows.first(0),
                    ..r.clone()
                }])))
            }
            [w] if w.kind == MicroKind::Write => {
                let x = written(w)?;
                let rows = statements.execute(
                    session,
                    Template::RwInsertIfAbsent,
                    &[w.register.into(), w.register.into(), x.into()],
                )?;
                if rows.first(0).is_null() {
                    Ok(Applied::ok(op.value.clone()))
                } else {
                    Ok(Applied::failed(op.value.clone()))
                }
            }
            [r1, r2] if r1.kind == MicroKind::Read && r2.kind == MicroKind::Read => {
                let rows = statements.execute(
                    session,
                    Template::RwReadTwo,
                    &[r1.register.into(), r2.register.into()],
                )?;
                Ok(Applied::ok(OpValue::Txn(vec![
                    MicroOp {
                        value: rows.first(0),
                        ..r1.clone()
                    },
                    MicroOp {
                        value: rows.first(1),
                        ..r2.clone()
                    },
                ])))
            }
            [r, w] if r.kind == MicroKind::Read && w.kind == MicroKind::Write => {
                let x = written(w)?;
                let rows = statements.execute(
                    session,
                    Template::RwReadThenWrite,
                    &[r.register.into(), w.register.into(), x.into()],
                )?;
                Ok(Applied::ok(OpValue::Txn(vec![
                    MicroOp {
                        value: rows.first(0),
                        ..r.clone()
                    },
                    w.clone(),
                ])))
            }
            [w1, w2] if w1.kind == MicroKind::Write && w2.kind == MicroKind::Write => {
                let (x, y) = (written(w1)?, written(w2)?);
                let rows = statements.execute(
                    session,
                    Template::RwWriteTwo,
                    &[
                        w1.register.into(),
                        w2.register.into(),
                        w1.register.into(),
                        x.into(),
                        w2.register.into(),
                        y.into(),
                    ],
                )?;
                if rows.first(0).is_null() && rows.first(1).is_null() {
                    Ok(Applied::ok(op.value.clone()))
                } else {
                    Ok(Applied::failed(op.value.clone()))
                }
            }
            _ => Err(malformed(op)),
        }
    }
}
