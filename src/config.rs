//! Run configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::history::HistoryFormat;
use crate::outcome::NO_HOST_BACKOFF;
use crate::store::template::{CAS_SCHEMA, LIST_SCHEMA, RW_SCHEMA};
use crate::store::FaultConfig;
use crate::workload::{CasRegister, ListAppend, RwRegister, Workload};

/// Consistency model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Model {
    /// Single registers with read, write and compare-and-swap.
    CasRegister,
    /// Transactions of one or two register reads/writes.
    RwRegister,
    /// Single-step transactions over append-only lists.
    ListAppend,
}

impl Model {
    pub fn name(&self) -> &'static str {
        match self {
            Model::CasRegister => "cas-register",
            Model::RwRegister => "rw-register",
            Model::ListAppend => "list-append",
        }
    }

    /// Table definition the model expects.
    pub fn schema(&self) -> &'static str {
        match self {
            Model::CasRegister => CAS_SCHEMA,
            Model::RwRegister => RW_SCHEMA,
            Model::ListAppend => LIST_SCHEMA,
        }
    }

    /// Build the generator for one worker.
    pub fn workload(&self, worker: usize, config: &RunConfig) -> Box<dyn Workload> {
        let per_worker = config.ops_per_worker();
        let registers = config.registers.clone();
        match self {
            Model::CasRegister => Box::new(CasRegister::new(registers, config.upper_bound)),
            Model::RwRegister => Box::new(RwRegister::new(worker, per_worker, registers)),
            Model::ListAppend => Box::new(ListAppend::new(worker, per_worker, registers)),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("at least one worker thread is required")]
    NoThreads,
    #[error("operation count {ops} is smaller than thread count {threads}")]
    TooFewOps { ops: u64, threads: usize },
    #[error("register set is empty")]
    NoRegisters,
    #[error("value upper bound must be positive, got {0}")]
    UpperBound(i64),
    #[error("{name} must be within [0, 1], got {value}")]
    Rate { name: &'static str, value: f64 },
    #[error("read timeout must be non-zero")]
    ZeroTimeout,
}

/// Everything a run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Contact points.
    pub hosts: Vec<String>,
    /// Number of concurrent workers.
    pub threads: usize,
    /// Total operations, divided evenly across workers.
    pub ops: u64,
    /// Register ids operations target.
    pub registers: Vec<i64>,
    /// Exclusive upper bound of CAS values.
    pub upper_bound: i64,
    /// Logical time origin in nanoseconds.
    pub start_time_ns: i64,
    /// Per-session reply ceiling.
    pub read_timeout: Duration,
    /// Selected generator.
    pub model: Model,
    /// Backoff before reporting a no-host failure.
    pub no_host_backoff: Duration,
    /// Seed for operation generators; each worker derives its own stream.
    pub seed: u64,
    /// Exit the process as soon as any worker hits a fatal error.
    pub fail_fast: bool,
    /// History destination; stdout when `None`.
    pub output: Option<PathBuf>,
    pub format: HistoryFormat,
    /// Fault injection for the in-process cluster.
    pub faults: FaultConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            hosts: vec!["127.0.0.1".to_string()],
            threads: 1,
            ops: 100,
            registers: vec![1, 2, 3, 4, 5],
            upper_bound: 5,
            start_time_ns: 0,
            read_timeout: Duration::from_secs(10),
            model: Model::CasRegister,
            no_host_backoff: NO_HOST_BACKOFF,
            seed: 0,
            fail_fast: true,
            output: None,
            format: HistoryFormat::Json,
            faults: FaultConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if self.ops < self.threads as u64 {
            return Err(ConfigError::TooFewOps {
                ops: self.ops,
                threads: self.threads,
            });
        }
        if self.registers.is_empty() {
            return Err(ConfigError::NoRegisters);
        }
        if self.upper_bound < 1 {
            return Err(ConfigError::UpperBound(self.upper_bound));
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        let rates = [
            ("unavailable rate", self.faults.unavailable_rate),
            ("read timeout rate", self.faults.read_timeout_rate),
            ("write timeout rate", self.faults.write_timeout_rate),
            ("no-host rate", self.faults.no_host_rate),
            ("unexpected rate", self.faults.unexpected_rate),
            ("ambiguous apply rate", self.faults.ambiguous_apply_rate),
        ];
        for (name, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Rate { name, value });
            }
        }
        Ok(())
    }

    /// Operations each worker performs.
    pub fn ops_per_worker(&self) -> u64 {
        self.ops / self.threads.max(1) as u64
    }

    /// Operations dropped by the even division.
    pub fn remainder(&self) -> u64 {
        self.ops % self.threads.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(RunConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_even_division() {
        let config = RunConfig {
            threads: 3,
            ops: 100,
            ..RunConfig::default()
        };
        assert_eq!(config.ops_per_worker(), 33);
        assert_eq!(config.remainder(), 1);
    }

    #[test]
    fn test_validation_errors() {
        let validate = |change: fn(&mut RunConfig)| {
            let mut config = RunConfig::default();
            change(&mut config);
            config.validate()
        };

        assert_eq!(validate(|c| c.threads = 0), Err(ConfigError::NoThreads));
        assert_eq!(
            validate(|c| {
                c.threads = 4;
                c.ops = 2;
            }),
            Err(ConfigError::TooFewOps { ops: 2, threads: 4 })
        );
        assert_eq!(
            validate(|c| c.registers.clear()),
            Err(ConfigError::NoRegisters)
        );
        assert_eq!(
            validate(|c| c.upper_bound = 0),
            Err(ConfigError::UpperBound(0))
        );
        assert_eq!(
            validate(|c| c.read_timeout = Duration::ZERO),
            Err(ConfigError::ZeroTimeout)
        );
        assert!(matches!(
            validate(|c| c.faults.read_timeout_rate = 1.5),
            Err(ConfigError::Rate {
                name: "read timeout rate",
                ..
            })
        ));
    }

    #[test]
    fn test_model_schema_and_workload() {
        let config = RunConfig::default();
        assert!(Model::ListAppend.schema().contains("list<bigint>"));
        assert!(Model::CasRegister.schema().contains("cas_registers"));
        assert_eq!(Model::RwRegister.name(), "rw-register");
        assert_eq!(Model::RwRegister.workload(0, &config).templates().len(), 5);
    }
}
