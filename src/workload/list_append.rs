//! List-append workload.
//!
//! Each iteration reads one register's list or appends a unique value to
//! it. The append is guarded on the register's row being absent, so at most
//! one append per register can ever succeed in a run; every later append to
//! a populated register fails.

use rand::{Rng, RngCore};

use super::{malformed, pick, Operation, Workload};
use crate::history::{MicroKind, MicroOp, OpLabel, OpValue, Tags};
use crate::outcome::Applied;
use crate::store::{Datum, Session, Statements, StoreError, Template};

const TEMPLATES: &[Template] = &[Template::ListRead, Template::ListAppendIfAbsent];

#[derive(Debug, Clone)]
pub struct ListAppend {
    worker: usize,
    per_worker_ops: u64,
    registers: Vec<i64>,
}

impl ListAppend {
    pub fn new(worker: usize, per_worker_ops: u64, registers: Vec<i64>) -> Self {
        ListAppend {
            worker,
            per_worker_ops,
            registers,
        }
    }

    /// Value appended on iteration `n`; unique across workers.
    pub fn value_for(&self, n: u64) -> i64 {
        (self.worker as u64 * self.per_worker_ops + n) as i64
    }

    pub fn read(&self, register: i64, n: u64) -> Operation {
        Operation {
            f: OpLabel::Txn,
            value: OpValue::Txn(vec![MicroOp::read(register)]),
            tags: Tags::thread(self.worker, n),
        }
    }

    pub fn append(&self, register: i64, n: u64) -> Operation {
        Operation {
            f: OpLabel::Txn,
            value: OpValue::Txn(vec![MicroOp::append(register, self.value_for(n))]),
            tags: Tags::thread(self.worker, n),
        }
    }
}

impl Workload for ListAppend {
    fn templates(&self) -> &'static [Template] {
        TEMPLATES
    }

    fn generate(&mut self, rng: &mut dyn RngCore, n: u64) -> Operation {
        let register = pick(&self.registers, rng);
        if rng.gen_bool(0.5) {
            self.read(register, n)
        } else {
            self.append(register, n)
        }
    }

    fn execute(
        &mut self,
        session: &mut dyn Session,
        statements: &Statements,
        op: &Operation,
    ) -> Result<Applied, StoreError> {
        let step = match &op.value {
            OpValue::Txn(ops) if ops.len() == 1 => &ops[0],
            _ => return Err(malformed(op)),
        };

        match step.kind {
            MicroKind::Read => {
                let rows =
                    statements.execute(session, Template::ListRead, &[step.register.into()])?;
                let contents = match rows.first(0) {
                    Datum::Null => Datum::List(Vec::new()),
                    contents => contents,
                };
                Ok(Applied::ok(OpValue::Txn(vec![MicroOp {
                    value: contents,
                    ..step.clone()
                }])))
            }
            MicroKind::Append => {
                let value = step.value.as_int().ok_or_else(|| malformed(op))?;
                let rows = statements.execute(
                    session,
                    Template::ListAppendIfAbsent,
                    &[step.register.into(), Datum::List(vec![value]), step.register.into()],
                )?;
                if rows.first(0).is_null() {
                    Ok(Applied::ok(op.value.clone()))
                } else {
                    Ok(Applied::failed(op.value.clone()))
                }
            }
            MicroKind::Write => Err(malformed(op)),
        }
    }
}
