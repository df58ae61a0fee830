//! Worker pool.
//!
//! Runs a fixed number of workers, each in its own thread with its own
//! session. Workers share only the process-id counter, the history
//! recorder and the clock origin. The run completes when every worker has
//! been joined.
//!
//! A worker that cannot establish its session, whose history write fails,
//! or that panics, is fatal. With `fail_fast` the whole process exits
//! immediately; otherwise the remaining workers finish and the first error
//! is returned.

pub mod worker;


use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::{ConfigError, RunConfig};
use crate::history::Recorder;
use crate::process::ProcessIds;
use crate::store::{Connector, StoreError};

pub use worker::{Shared, Worker, WorkerOptions, WorkerReport};

/// Fatal run errors.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("worker {worker} could not connect: {source}")]
    Connect {
        worker: usize,
        #[source]
        source: StoreError,
    },

    #[error("worker {worker} could not prepare statements: {source}")]
    Prepare {
        worker: usize,
        #[source]
        source: StoreError,
    },

    #[error("history write failed: {0}")]
    History(#[from] io::Error),

    #[error("could not spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("worker {worker} panicked")]
    Panicked { worker: usize },
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Reports of workers that finished, ordered by worker index.
    pub workers: Vec<WorkerReport>,
}

impl RunSummary {
    pub fn ops(&self) -> u64 {
        self.workers.iter().map(|w| w.ops).sum()
    }

    pub fn info(&self) -> u64 {
        self.workers.iter().map(|w| w.info).sum()
    }
}

/// Run the configured workload to completion.
pub fn run(
    config: &RunConfig,
    connector: Arc<dyn Connector>,
    recorder: Arc<Recorder>,
) -> Result<RunSummary, RunError> {
    config.validate()?;
    if config.remainder() > 0 {
        warn!(
            dropped = config.remainder(),
            "operation count does not divide evenly across workers"
        );
    }

    let shared = Shared {
        clock: Clock::new(config.start_time_ns),
        ids: ProcessIds::new(),
        recorder: recorder.clone(),
    };
    let per_worker = config.ops_per_worker();
    info!(
        model = config.model.name(),
        threads = config.threads,
        per_worker,
        seed = config.seed,
        "starting run"
    );

    let (report_tx, report_rx) = unbounded();
    let mut handles = Vec::with_capacity(config.threads);

    for index in 0..config.threads {
        let connector = connector.clone();
        let shared = shared.clone();
        let workload = config.model.workload(index, config);
        let options = WorkerOptions {
            no_host_backoff: config.no_host_backoff,
            seed: config.seed.wrapping_add(index as u64),
        };
        let fail_fast = config.fail_fast;
        let report_tx = report_tx.clone();

        let handle = thread::Builder::new()
            .name(format!("worker-{}", index))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    Worker::start(index, connector.as_ref(), workload, shared, options)
                        .and_then(|worker| worker.run(per_worker))
                }))
                .unwrap_or_else(|_| Err(RunError::Panicked { worker: index }));
                if let Err(e) = &result {
                    error!(worker = index, error = %e, "worker failed");
                    if fail_fast {
                        process::exit(1);
                    }
                }
                let _ = report_tx.send((index, result));
            })
            .map_err(RunError::Spawn)?;
        handles.push(handle);
    }
    drop(report_tx);

    let mut reports = Vec::with_capacity(config.threads);
    let mut first_error = None;
    for (index, result) in report_rx.iter() {
        match result {
            Ok(report) => {
                info!(
                    worker = index,
                    done = reports.len() + 1,
                    of = config.threads,
                    "worker joined"
                );
                reports.push(report);
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    for (index, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() {
            first_error.get_or_insert(RunError::Panicked { worker: index });
        }
    }
    recorder.flush()?;

    if let Some(e) = first_error {
        return Err(e);
    }

    reports.sort_by_key(|r| r.worker);
    let summary = RunSummary { workers: reports };
    info!(ops = summary.ops(), info = summary.info(), "run complete");
    Ok(summary)
}
