//! Compare-and-swap register workload.
//!
//! Each iteration targets one register and is a read, a write, or a
//! compare-and-swap with values drawn from `[0, upper_bound)`.
//!
//! A write is two transactions: update the row if it exists, otherwise
//! insert it if it is still absent. Each phase is guarded, so a row that
//! appears between the phases makes the write fail rather than clobber.

use rand::{Rng, RngCore};

use super::{malformed, pick, Operation, Workload};
use crate::history::{OpLabel, OpValue, Tags};
use crate::outcome::Applied;
use crate::store::{Datum, Session, Statements, StoreError, Template};

const TEMPLATES: &[Template] = &[
    Template::CasRead,
    Template::CasUpdateIfPresent,
    Template::CasInsertIfAbsent,
    Template::CasCompareAndSet,
];

#[derive(Debug, Clone)]
pub struct CasRegister {
    registers: Vec<i64>,
    upper_bound: i64,
}

impl CasRegister {
    pub fn new(registers: Vec<i64>, upper_bound: i64) -> Self {
        CasRegister {
            registers,
            upper_bound,
        }
    }

    pub fn read(register: i64) -> Operation {
        Operation {
            f: OpLabel::Read,
            value: OpValue::null(),
            tags: Tags::register(register),
        }
    }

    pub fn write(register: i64, value: i64) -> Operation {
        Operation {
            f: OpLabel::Write,
            value: OpValue::Scalar(Datum::Int(value)),
            tags: Tags::register(register),
        }
    }

    pub fn cas(register: i64, expected: i64, new: i64) -> Operation {
        Operation {
            f: OpLabel::Cas,
            value: OpValue::Pair(expected, new),
            tags: Tags::register(register),
        }
    }

    fn draw(&self, rng: &mut dyn RngCore) -> i64 {
        rng.gen_range(0..self.upper_bound)
    }
}

impl Workload for CasRegister {
    fn templates(&self) -> &'static [Template] {
        TEMPLATES
    }

    fn generate(&mut self, rng: &mut dyn RngCore, _n: u64) -> Operation {
        let register = pick(&self.registers, rng);
        match rng.gen_range(0..3) {
            0 => Self::read(register),
            1 => {
                let value = self.draw(rng);
                Self::write(register, value)
            }
            _ => {
                let expected = self.draw(rng);
                let new = self.draw(rng);
                Self::cas(register, expected, new)
            }
        }
    }

    fn execute(
        &mut self,
        session: &mut dyn Session,
        statements: &Statements,
        op: &Operation,
    ) -> Result<Applied, StoreError> {
        let id = op.tags.register.ok_or_else(|| malformed(op))?;

        match (op.f, &op.value) {
            (OpLabel::Read, _) => {
                let rows = statements.execute(session, Template::CasRead, &[id.into()])?;
                Ok(Applied::ok(OpValue::Scalar(rows.first(0))))
            }
            (OpLabel::Write, OpValue::Scalar(Datum::Int(value))) => {
                let value = *value;
                let updated = statements.execute(
                    session,
                    Template::CasUpdateIfPresent,
                    &[id.into(), value.into(), id.into()],
                )?;
                if !updated.first(0).is_null() {
                    return Ok(Applied::ok(op.value.clone()));
                }

                let inserted = statements.execute(
                    session,
                    Template::CasInsertIfAbsent,
                    &[id.into(), id.into(), value.into()],
                )?;
                if inserted.first(0).is_null() {
                    Ok(Applied::ok(op.value.clone()))
                } else {
                    Ok(Applied::failed(op.value.clone()))
                }
            }
            (OpLabel::Cas, OpValue::Pair(expected, new)) => {
                let rows = statements.execute(
                    session,
                    Template::CasCompareAndSet,
                    &[id.into(), (*expected).into(), (*new).into(), id.into()],
                )?;
                if rows.first(0) == Datum::Int(*expected) {
                    Ok(Applied::ok(op.value.clone()))
                } else {
                    Ok(Applied::failed(op.value.clone()))
                }
            }
            _ => Err(malformed(op)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::history::{EventKind, Recorder};
    use crate::process::ProcessIds;
    use crate::runner::{Shared, Worker, WorkerOptions};
    use crate::store::{Connector, FaultConfig, MemoryCluster, Prepared, Rows};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (MemoryCluster, Box<dyn Session>, Statements) {
        let cluster = MemoryCluster::new(vec!["n1".to_string()], FaultConfig::default());
        let mut session = cluster.connect(0).unwrap();
        let statements = Statements::prepare_all(session.as_mut(), TEMPLATES).unwrap();
        (cluster, session, statements)
    }

    #[test]
    fn test_generated_values_in_bounds() {
        let mut workload = CasRegister::new(vec![1, 2, 3], 5);
        let mut rng = StdRng::seed_from_u64(11);
        let mut labels = std::collections::HashSet::new();
        for n in 1..=300 {
            let op = workload.generate(&mut rng, n);
            labels.insert(op.f);
            assert!([1, 2, 3].contains(&op.tags.register.unwrap()));
            match op.value {
                OpValue::Scalar(Datum::Null) => assert_eq!(op.f, OpLabel::Read),
                OpValue::Scalar(Datum::Int(v)) => assert!((0..5).contains(&v)),
                OpValue::Pair(e, n) => {
                    assert!((0..5).contains(&e));
                    assert!((0..5).contains(&n));
                }
                other => panic!("unexpected value {:?}", other),
            }
        }
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_read_absent_is_null() {
        let (_cluster, mut session, statements) = setup();
        let mut workload = CasRegister::new(vec![5], 5);
        let applied = workload
            .execute(session.as_mut(), &statements, &CasRegister::read(5))
            .unwrap();
        assert!(applied.satisfied);
        assert_eq!(applied.value, OpValue::null());
    }

    #[test]
    fn test_write_inserts_then_updates() {
        let (cluster, mut session, statements) = setup();
        let mut workload = CasRegister::new(vec![5], 5);

        let first = workload
            .execute(session.as_mut(), &statements, &CasRegister::write(5, 1))
            .unwrap();
        assert!(first.satisfied);
        assert_eq!(cluster.cas_value(5), Some(1));

        let second = workload
            .execute(session.as_mut(), &statements, &CasRegister::write(5, 4))
            .unwrap();
        assert!(second.satisfied);
        assert_eq!(cluster.cas_value(5), Some(4));
    }

    /// Update phase sees no row; by the insert phase another client has
    /// already inserted one.
    struct LostInsertRace {
        next_id: u32,
    }

    impl Session for LostInsertRace {
        fn prepare(&mut self, template: Template) -> Result<Prepared, StoreError> {
            self.next_id += 1;
            Ok(Prepared {
                id: self.next_id,
                template,
            })
        }

        fn execute(&mut self, statement: &Prepared, _params: &[Datum]) -> Result<Rows, StoreError> {
            match statement.template {
                Template::CasUpdateIfPresent => Ok(Rows::single(vec![Datum::Null])),
                Template::CasInsertIfAbsent => Ok(Rows::single(vec![Datum::Int(4)])),
                _ => Ok(Rows::empty()),
            }
        }
    }

    struct LostInsertRaceConnector;

    impl Connector for LostInsertRaceConnector {
        fn connect(&self, _worker: usize) -> Result<Box<dyn Session>, StoreError> {
            Ok(Box::new(LostInsertRace { next_id: 0 }))
        }
    }

    #[test]
    fn test_write_fails_when_insert_finds_row() {
        let mut session = LostInsertRace { next_id: 0 };
        let statements = Statements::prepare_all(&mut session, TEMPLATES).unwrap();
        let mut workload = CasRegister::new(vec![5], 5);

        let applied = workload
            .execute(&mut session, &statements, &CasRegister::write(5, 1))
            .unwrap();
        assert!(!applied.satisfied);
        assert_eq!(applied.value, OpValue::Scalar(Datum::Int(1)));
    }

    #[test]
    fn test_lost_insert_race_completes_as_fail() {
        let shared = Shared {
            clock: Clock::new(0),
            ids: ProcessIds::new(),
            recorder: Arc::new(Recorder::in_memory()),
        };
        let options = WorkerOptions {
            no_host_backoff: Duration::from_millis(1),
            seed: 0,
        };
        let workload = Box::new(CasRegister::new(vec![5], 5));
        let mut worker =
            Worker::start(0, &LostInsertRaceConnector, workload, shared.clone(), options).unwrap();
        let process = worker.process();

        assert_eq!(worker.perform(CasRegister::write(5, 1)).unwrap(), EventKind::Fail);
        assert_eq!(worker.process(), process);

        let history = shared.recorder.history().unwrap();
        let completion = &history.events()[1];
        assert_eq!(completion.kind, EventKind::Fail);
        assert_eq!(completion.cause, None);
        assert_eq!(completion.process, process);
    }

    #[test]
    fn test_cas_applies_only_on_match() {
        let (cluster, mut session, statements) = setup();
        let mut workload = CasRegister::new(vec![5], 5);

        let absent = workload
            .execute(session.as_mut(), &statements, &CasRegister::cas(5, 3, 0))
            .unwrap();
        assert!(!absent.satisfied);
        assert_eq!(cluster.cas_value(5), None);

        cluster.put_cas(5, 2);
        let mismatch = workload
            .execute(session.as_mut(), &statements, &CasRegister::cas(5, 3, 0))
            .unwrap();
        assert!(!mismatch.satisfied);
        assert_eq!(cluster.cas_value(5), Some(2));

        let hit = workload
            .execute(session.as_mut(), &statements, &CasRegister::cas(5, 2, 0))
            .unwrap();
        assert!(hit.satisfied);
        assert_eq!(hit.value, OpValue::Pair(2, 0));
        assert_eq!(cluster.cas_value(5), Some(0));
    }

    #[test]
    fn test_missing_register_tag_is_malformed() {
        let (_cluster, mut session, statements) = setup();
        let mut workload = CasRegister::new(vec![5], 5);
        let op = Operation {
            tags: Tags::default(),
            ..CasRegister::read(5)
        };
        assert!(workload.execute(session.as_mut(), &statements, &op).is_err());
    }
}
