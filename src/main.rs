//! txnload: run a workload against the in-process cluster and emit its
//! history on stdout (or `--output`).
//!
//! ```bash
//! txnload --model rw-register --threads 4 --ops 1000 --read-timeout-rate 0.05 --check
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use txnload::config::{Model, RunConfig};
use txnload::history::{Checker, HistoryFormat, Recorder};
use txnload::runner::{self, RunError};
use txnload::store::{FaultConfig, MemoryCluster};

/// Generate a transactional workload and record its history.
#[derive(Parser, Debug)]
#[command(name = "txnload")]
#[command(about = "Concurrent transactional load generator with Jepsen-style histories")]
struct Cli {
    /// Contact points, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "127.0.0.1")]
    hosts: Vec<String>,

    /// Number of concurrent workers.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Total operations, divided evenly across workers.
    #[arg(long, default_value_t = 100)]
    ops: u64,

    /// Register ids to operate on, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "1,2,3,4,5")]
    registers: Vec<i64>,

    /// Exclusive upper bound of CAS register values.
    #[arg(long, default_value_t = 5)]
    upper_bound: i64,

    /// Logical time origin in nanoseconds.
    #[arg(long, default_value_t = 0)]
    start_time: i64,

    /// Per-session read timeout in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    read_timeout_ms: u64,

    /// Consistency model to exercise.
    #[arg(long, value_enum, default_value_t = Model::CasRegister)]
    model: Model,

    /// Write the history here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// History line format.
    #[arg(long, value_enum, default_value_t = HistoryFormat::Json)]
    format: HistoryFormat,

    /// Seed for generators and fault injection (random if not set).
    #[arg(long)]
    seed: Option<u64>,

    /// Backoff before reporting a no-host failure, in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    no_host_backoff_ms: u64,

    #[arg(long, default_value_t = 0.0)]
    unavailable_rate: f64,

    #[arg(long, default_value_t = 0.0)]
    read_timeout_rate: f64,

    #[arg(long, default_value_t = 0.0)]
    write_timeout_rate: f64,

    #[arg(long, default_value_t = 0.0)]
    no_host_rate: f64,

    #[arg(long, default_value_t = 0.0)]
    unexpected_rate: f64,

    /// Fraction of timeouts whose effect is applied anyway.
    #[arg(long, default_value_t = 0.5)]
    ambiguous_apply_rate: f64,

    /// Upper bound of injected per-statement latency, in milliseconds.
    #[arg(long, default_value_t = 0)]
    max_latency_ms: u64,

    /// Check the recorded history for structural violations.
    #[arg(long)]
    check: bool,

    /// Print the table definition for the selected model and exit.
    #[arg(long)]
    print_schema: bool,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        let seed = self.seed.unwrap_or_else(rand::random);
        RunConfig {
            hosts: self.hosts,
            threads: self.threads,
            ops: self.ops,
            registers: self.registers,
            upper_bound: self.upper_bound,
            start_time_ns: self.start_time,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            model: self.model,
            no_host_backoff: Duration::from_millis(self.no_host_backoff_ms),
            seed,
            fail_fast: true,
            output: self.output,
            format: self.format,
            faults: FaultConfig {
                unavailable_rate: self.unavailable_rate,
                read_timeout_rate: self.read_timeout_rate,
                write_timeout_rate: self.write_timeout_rate,
                no_host_rate: self.no_host_rate,
                unexpected_rate: self.unexpected_rate,
                ambiguous_apply_rate: self.ambiguous_apply_rate,
                latency_range: (Duration::ZERO, Duration::from_millis(self.max_latency_ms)),
                seed,
                enabled: true,
            },
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let check = cli.check;
    if cli.print_schema {
        println!("{}", cli.model.schema());
        return;
    }
    let config = cli.into_config();

    match execute(&config, check) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            error!(error = %e, "run failed");
            process::exit(1);
        }
    }
}

/// Run to completion. Returns whether the history passed the check (always
/// true when no check was requested).
fn execute(config: &RunConfig, check: bool) -> Result<bool, RunError> {
    let recorder = match &config.output {
        Some(path) => Recorder::create(path, config.format)?,
        None => Recorder::stdout(config.format),
    };
    let recorder = Arc::new(if check { recorder.retaining() } else { recorder });

    let cluster = MemoryCluster::new(config.hosts.clone(), config.faults.clone())
        .with_read_timeout(config.read_timeout);
    let summary = runner::run(config, Arc::new(cluster), recorder.clone())?;
    info!(workers = summary.workers.len(), ops = summary.ops(), "history complete");

    if !check {
        return Ok(true);
    }
    let Some(history) = recorder.history() else {
        return Ok(true);
    };
    let result = Checker::new().verify(&history);
    info!(
        invokes = result.stats.invokes,
        ok = result.stats.ok,
        fail = result.stats.fail,
        info = result.stats.info,
        error = result.stats.error,
        processes = result.stats.processes,
        written_values = result.stats.written_values,
        "history checked"
    );
    for violation in &result.violations {
        warn!(
            kind = ?violation.kind,
            events = ?violation.related_events,
            "{}",
            violation.description
        );
    }
    Ok(result.passed)
}
