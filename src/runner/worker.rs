//! A single worker loop.
//!
//! One worker owns one store session, one generator and one process slot.
//! Each iteration is strictly sequential: record the invoke, run the
//! transaction, classify, record the completion, then apply the process
//! retirement rule.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use super::RunError;
use crate::clock::Clock;
use crate::history::{Event, EventKind, Recorder};
use crate::outcome::classify_with_backoff;
use crate::process::ProcessIds;
use crate::store::{Connector, Session, Statements};
use crate::workload::{Operation, Workload};

/// State shared by every worker of a run.
#[derive(Clone)]
pub struct Shared {
    pub clock: Clock,
    pub ids: ProcessIds,
    pub recorder: Arc<Recorder>,
}

/// Per-worker knobs.
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub no_host_backoff: Duration,
    pub seed: u64,
}

/// Summary of one worker's run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub ops: u64,
    pub ok: u64,
    pub fail: u64,
    pub info: u64,
    pub error: u64,
    /// Process ids this worker acted as, in order.
    pub processes: Vec<u64>,
}

impl WorkerReport {
    fn count(&mut self, kind: EventKind) {
        self.ops += 1;
        match kind {
            EventKind::Ok => self.ok += 1,
            EventKind::Fail => self.fail += 1,
            EventKind::Info => self.info += 1,
            EventKind::Error => self.error += 1,
            EventKind::Invoke => {}
        }
    }
}

pub struct Worker {
    index: usize,
    process: u64,
    n: u64,
    session: Box<dyn Session>,
    statements: Statements,
    workload: Box<dyn Workload>,
    rng: StdRng,
    shared: Shared,
    options: WorkerOptions,
    report: WorkerReport,
}

impl Worker {
    /// Open a session, prepare the workload's statements and take a
    /// process id. Any failure here is fatal to the worker.
    pub fn start(
        index: usize,
        connector: &dyn Connector,
        workload: Box<dyn Workload>,
        shared: Shared,
        options: WorkerOptions,
    ) -> Result<Self, RunError> {
        let mut session = connector.connect(index).map_err(|source| RunError::Connect {
            worker: index,
            source,
        })?;
        let statements = Statements::prepare_all(session.as_mut(), workload.templates())
            .map_err(|source| RunError::Prepare {
                worker: index,
                source,
            })?;

        let process = shared.ids.next();
        debug!(worker = index, process, statements = statements.len(), "worker started");

        Ok(Worker {
            index,
            process,
            n: 0,
            session,
            statements,
            workload,
            rng: StdRng::seed_from_u64(options.seed),
            shared,
            options,
            report: WorkerReport {
                worker: index,
                processes: vec![process],
                ..WorkerReport::default()
            },
        })
    }

    /// Current process id.
    pub fn process(&self) -> u64 {
        self.process
    }

    pub fn report(&self) -> &WorkerReport {
        &self.report
    }

    /// Generate and perform the next operation.
    pub fn step(&mut self) -> Result<EventKind, RunError> {
        self.n += 1;
        let op = self.workload.generate(&mut self.rng, self.n);
        self.perform(op)
    }

    /// Perform one operation and record its invoke and completion.
    pub fn perform(&mut self, op: Operation) -> Result<EventKind, RunError> {
        let process = self.process;
        let recorder = &self.shared.recorder;

        recorder.record(&Event {
            kind: EventKind::Invoke,
            f: op.f,
            value: op.value.clone(),
            process,
            time: self.shared.clock.now_ns(),
            tags: op.tags.clone(),
            cause: None,
            error: None,
        })?;

        let result = self
            .workload
            .execute(self.session.as_mut(), &self.statements, &op);
        let outcome = classify_with_backoff(result, self.options.no_host_backoff);

        if let Some(backoff) = outcome.backoff {
            debug!(worker = self.index, ?backoff, "no host available, backing off");
            thread::sleep(backoff);
        }
        match outcome.kind {
            EventKind::Error => warn!(
                worker = self.index,
                process,
                error = outcome.error.as_deref().unwrap_or(""),
                "unexpected failure"
            ),
            EventKind::Info => debug!(
                worker = self.index,
                process,
                cause = ?outcome.cause,
                "indeterminate"
            ),
            _ => {}
        }

        let kind = outcome.kind;
        recorder.record(&Event {
            kind,
            f: op.f,
            value: outcome.value.unwrap_or(op.value),
            process,
            time: self.shared.clock.now_ns(),
            tags: op.tags,
            cause: outcome.cause,
            error: outcome.error,
        })?;

        self.process = self.shared.ids.retain_or_advance(process, kind);
        if self.process != process {
            self.report.processes.push(self.process);
        }
        self.report.count(kind);
        Ok(kind)
    }

    /// Perform `ops` generated operations, then release the session.
    pub fn run(mut self, ops: u64) -> Result<WorkerReport, RunError> {
        let result = (0..ops).try_for_each(|_| self.step().map(drop));
        self.session.close();
        result?;
        info!(
            worker = self.index,
            ops = self.report.ops,
            ok = self.report.ok,
            fail = self.report.fail,
            info = self.report.info,
            error = self.report.error,
            "worker finished"
        );
        Ok(self.report)
    }
}
