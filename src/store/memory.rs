//! In-process store cluster.
//!
//! Executes the fixed statement templates against in-memory tables with
//! serializable semantics (one statement at a time under a single lock),
//! and injects the failure categories a real cluster produces:
//! - Random faults per statement, drawn from configured rates
//! - Ambiguous timeouts whose effect may or may not have been applied
//! - Latency, with replies slower than the session timeout turning into
//!   client-side operation timeouts
//! - A scripted fault queue for deterministic tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use super::{Connector, Datum, Prepared, Rows, Session, StoreError, Template};

/// Fault injection rates for the in-process cluster.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Probability that the coordinator reports itself unavailable.
    pub unavailable_rate: f64,
    /// Probability of a read acknowledgment timeout.
    pub read_timeout_rate: f64,
    /// Probability of a write acknowledgment timeout.
    pub write_timeout_rate: f64,
    /// Probability that no host can be reached.
    pub no_host_rate: f64,
    /// Probability of an unclassified failure.
    pub unexpected_rate: f64,
    /// Fraction of timeouts whose effect is applied anyway.
    pub ambiguous_apply_rate: f64,
    /// Range of latency injected per statement.
    pub latency_range: (Duration, Duration),
    /// Seed for the per-session fault generators.
    pub seed: u64,
    /// Whether fault injection is enabled at all.
    pub enabled: bool,
}

impl Default for FaultConfig {
    fn default() -> Self {
        FaultConfig {
            unavailable_rate: 0.0,
            read_timeout_rate: 0.0,
            write_timeout_rate: 0.0,
            no_host_rate: 0.0,
            unexpected_rate: 0.0,
            ambiguous_apply_rate: 0.5,
            latency_range: (Duration::ZERO, Duration::ZERO),
            seed: 0,
            enabled: true,
        }
    }
}

impl FaultConfig {
    fn total_rate(&self) -> f64 {
        self.unavailable_rate
            + self.read_timeout_rate
            + self.write_timeout_rate
            + self.no_host_rate
            + self.unexpected_rate
    }
}

/// A fault to deliver on the next executed statement.
#[derive(Debug, Clone)]
pub struct ScriptedFault {
    /// The failure returned to the caller.
    pub error: StoreError,
    /// Whether the statement takes effect before the failure is returned.
    pub applied: bool,
}

impl ScriptedFault {
    pub fn lost(error: StoreError) -> Self {
        ScriptedFault {
            error,
            applied: false,
        }
    }

    pub fn applied(error: StoreError) -> Self {
        ScriptedFault {
            error,
            applied: true,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    cas: HashMap<i64, i64>,
    rw: HashMap<i64, i64>,
    lists: HashMap<i64, Vec<i64>>,
}

/// Shared in-memory cluster. Cloning yields another handle to the same data.
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    hosts: Arc<Vec<String>>,
    tables: Arc<Mutex<Tables>>,
    config: Arc<RwLock<FaultConfig>>,
    scripted: Arc<Mutex<VecDeque<ScriptedFault>>>,
    reachable: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl MemoryCluster {
    pub fn new(hosts: Vec<String>, config: FaultConfig) -> Self {
        MemoryCluster {
            hosts: Arc::new(hosts),
            tables: Arc::new(Mutex::new(Tables::default())),
            config: Arc::new(RwLock::new(config)),
            scripted: Arc::new(Mutex::new(VecDeque::new())),
            reachable: Arc::new(AtomicBool::new(true)),
            read_timeout: Duration::from_secs(10),
        }
    }

    /// Set the client-side timeout applied by sessions opened afterwards.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Coordinator host a worker's session is bound to.
    pub fn host_for(&self, worker: usize) -> Option<&str> {
        if self.hosts.is_empty() {
            return None;
        }
        Some(self.hosts[worker % self.hosts.len()].as_str())
    }

    /// Queue a fault for the next statement executed by any session.
    pub fn inject(&self, fault: ScriptedFault) {
        self.scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(fault);
    }

    /// Replace the fault configuration.
    pub fn set_config(&self, config: FaultConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    /// Make subsequent `connect` calls fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn cas_value(&self, id: i64) -> Option<i64> {
        self.tables().cas.get(&id).copied()
    }

    pub fn rw_value(&self, id: i64) -> Option<i64> {
        self.tables().rw.get(&id).copied()
    }

    pub fn list_contents(&self, id: i64) -> Option<Vec<i64>> {
        self.tables().lists.get(&id).cloned()
    }

    /// Seed a CAS register directly, bypassing transactions.
    pub fn put_cas(&self, id: i64, value: i64) {
        self.tables().cas.insert(id, value);
    }

    /// Seed a list register directly, bypassing transactions.
    pub fn put_list(&self, id: i64, contents: Vec<i64>) {
        self.tables().lists.insert(id, contents);
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Connector for MemoryCluster {
    fn connect(&self, worker: usize) -> Result<Box<dyn Session>, StoreError> {
        let host = match self.host_for(worker) {
            Some(host) if self.reachable.load(Ordering::SeqCst) => host.to_string(),
            _ => {
                return Err(StoreError::NoHostAvailable {
                    message: format!("no contact point reachable for worker {}", worker),
                })
            }
        };
        let seed = {
            let config = self.config.read().unwrap_or_else(|e| e.into_inner());
            config.seed.wrapping_add(worker as u64)
        };
        debug!(worker, host = %host, "session opened");

        Ok(Box::new(MemorySession {
            host,
            cluster: self.clone(),
            rng: StdRng::seed_from_u64(seed),
            prepared: HashMap::new(),
            next_id: 1,
            read_timeout: self.read_timeout,
        }))
    }
}

/// A session bound to one coordinator host.
pub struct MemorySession {
    host: String,
    cluster: MemoryCluster,
    rng: StdRng,
    prepared: HashMap<u32, Template>,
    next_id: u32,
    read_timeout: Duration,
}

impl MemorySession {
    fn draw_fault(&mut self) -> Option<ScriptedFault> {
        if let Some(fault) = self
            .cluster
            .scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Some(fault);
        }

        let config = self
            .cluster
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if !config.enabled || config.total_rate() <= 0.0 {
            return None;
        }

        let roll: f64 = self.rng.gen();
        let mut threshold = config.unavailable_rate;
        if roll < threshold {
            return Some(ScriptedFault::lost(StoreError::Unavailable {
                message: format!("{}: cannot achieve quorum", self.host),
            }));
        }
        threshold += config.read_timeout_rate;
        if roll < threshold {
            let applied = self.rng.gen_bool(config.ambiguous_apply_rate.clamp(0.0, 1.0));
            return Some(ScriptedFault {
                error: StoreError::ReadTimeout {
                    message: format!("{}: replicas did not acknowledge read", self.host),
                },
                applied,
            });
        }
        threshold += config.write_timeout_rate;
        if roll < threshold {
            let applied = self.rng.gen_bool(config.ambiguous_apply_rate.clamp(0.0, 1.0));
            return Some(ScriptedFault {
                error: StoreError::WriteTimeout {
                    message: format!("{}: replicas did not acknowledge write", self.host),
                },
                applied,
            });
        }
        threshold += config.no_host_rate;
        if roll < threshold {
            return Some(ScriptedFault::lost(StoreError::NoHostAvailable {
                message: format!("{}: connection refused", self.host),
            }));
        }
        threshold += config.unexpected_rate;
        if roll < threshold {
            return Some(ScriptedFault::lost(StoreError::unexpected(format!(
                "{}: internal server error",
                self.host
            ))));
        }
        None
    }

    fn draw_latency(&mut self) -> Duration {
        let (min, max) = {
            let config = self.cluster.config.read().unwrap_or_else(|e| e.into_inner());
            if !config.enabled {
                return Duration::ZERO;
            }
            config.latency_range
        };
        if max <= min {
            return min;
        }
        let min_us = min.as_micros() as u64;
        let max_us = max.as_micros() as u64;
        Duration::from_micros(self.rng.gen_range(min_us..=max_us))
    }

    fn apply(&self, template: Template, params: &[Datum]) -> Result<Rows, StoreError> {
        let mut tables = self.cluster.tables();
        let tables = &mut *tables;
        let rows = match template {
            Template::CasRead => read_scalar(&tables.cas, int(params, 0)?),
            Template::CasUpdateIfPresent => {
                let prior = tables.cas.get(&int(params, 0)?).copied();
                if prior.is_some() {
                    tables.cas.insert(int(params, 2)?, int(params, 1)?);
                }
                Rows::single(vec![prior.into()])
            }
            Template::CasInsertIfAbsent => {
                let prior = tables.cas.get(&int(params, 0)?).copied();
                if prior.is_none() {
                    tables.cas.insert(int(params, 1)?, int(params, 2)?);
                }
                Rows::single(vec![prior.into()])
            }
            Template::CasCompareAndSet => {
                let prior = tables.cas.get(&int(params, 0)?).copied();
                if prior == Some(int(params, 1)?) {
                    tables.cas.insert(int(params, 3)?, int(params, 2)?);
                }
                Rows::single(vec![prior.into()])
            }
            Template::RwRead => read_scalar(&tables.rw, int(params, 0)?),
            Template::RwInsertIfAbsent => {
                let prior = tables.rw.get(&int(params, 0)?).copied();
                if prior.is_none() {
                    tables.rw.insert(int(params, 1)?, int(params, 2)?);
                }
                Rows::single(vec![prior.into()])
            }
            Template::RwReadTwo => {
                let a = tables.rw.get(&int(params, 0)?).copied();
                let b = tables.rw.get(&int(params, 1)?).copied();
                Rows::single(vec![a.into(), b.into()])
            }
            Template::RwReadThenWrite => {
                let prior = tables.rw.get(&int(params, 0)?).copied();
                tables.rw.insert(int(params, 1)?, int(params, 2)?);
                Rows::single(vec![prior.into()])
            }
            Template::RwWriteTwo => {
                let a = tables.rw.get(&int(params, 0)?).copied();
                let b = tables.rw.get(&int(params, 1)?).copied();
                if a.is_none() && b.is_none() {
                    tables.rw.insert(int(params, 2)?, int(params, 3)?);
                    tables.rw.insert(int(params, 4)?, int(params, 5)?);
                }
                Rows::single(vec![a.into(), b.into()])
            }
            Template::ListRead => match tables.lists.get(&int(params, 0)?) {
                Some(contents) => Rows::single(vec![Datum::List(contents.clone())]),
                None => Rows::empty(),
            },
            Template::ListAppendIfAbsent => {
                let prior = tables.lists.get(&int(params, 0)?).cloned();
                if prior.is_none() {
                    let values = list(params, 1)?;
                    tables
                        .lists
                        .entry(int(params, 2)?)
                        .or_default()
                        .extend_from_slice(values);
                }
                Rows::single(vec![prior.map_or(Datum::Null, Datum::List)])
            }
        };
        Ok(rows)
    }
}

impl Session for MemorySession {
    fn prepare(&mut self, template: Template) -> Result<Prepared, StoreError> {
        let id = self.next_id;
        self.next_id += 1;
        self.prepared.insert(id, template);
        trace!(host = %self.host, id, ?template, "prepared");
        Ok(Prepared { id, template })
    }

    fn execute(&mut self, statement: &Prepared, params: &[Datum]) -> Result<Rows, StoreError> {
        let template = match self.prepared.get(&statement.id) {
            Some(&t) if t == statement.template => t,
            _ => {
                return Err(StoreError::unexpected(format!(
                    "unknown prepared statement id {}",
                    statement.id
                )))
            }
        };
        if params.len() != template.arity() {
            return Err(StoreError::unexpected(format!(
                "{:?} expects {} parameters, got {}",
                template,
                template.arity(),
                params.len()
            )));
        }

        let fault = self.draw_fault();
        let latency = self.draw_latency();

        if let Some(fault) = fault {
            if fault.applied {
                self.apply(template, params)?;
            }
            pause(latency.min(self.read_timeout));
            trace!(
                host = %self.host,
                ?template,
                error = %fault.error,
                applied = fault.applied,
                "fault injected"
            );
            return Err(fault.error);
        }

        if latency > self.read_timeout {
            self.apply(template, params)?;
            pause(self.read_timeout);
            return Err(StoreError::OperationTimeout {
                timeout: self.read_timeout,
            });
        }

        pause(latency);
        self.apply(template, params)
    }

    fn close(&mut self) {
        self.prepared.clear();
        debug!(host = %self.host, "session closed");
    }
}

fn pause(d: Duration) {
    if !d.is_zero() {
        thread::sleep(d);
    }
}

fn read_scalar(table: &HashMap<i64, i64>, id: i64) -> Rows {
    match table.get(&id) {
        Some(&v) => Rows::single(vec![Datum::Int(v)]),
        None => Rows::empty(),
    }
}

fn int(params: &[Datum], i: usize) -> Result<i64, StoreError> {
    match params.get(i) {
        Some(Datum::Int(v)) => Ok(*v),
        other => Err(StoreError::unexpected(format!(
            "parameter {} must be an integer, got {:?}",
            i, other
        ))),
    }
}

fn list(params: &[Datum], i: usize) -> Result<&[i64], StoreError> {
    match params.get(i) {
        Some(Datum::List(v)) => Ok(v),
        other => Err(StoreError::unexpected(format!(
            "parameter {} must be a list, got {:?}",
            i, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Cause, Statements};
    use std::time::Instant;

    fn cluster() -> MemoryCluster {
        MemoryCluster::new(vec!["n1".to_string(), "n2".to_string()], FaultConfig::default())
    }

    fn run(
        session: &mut dyn Session,
        template: Template,
        params: &[Datum],
    ) -> Result<Rows, StoreError> {
        let statements = Statements::prepare_all(session, &[template]).unwrap();
        statements.execute(session, template, params)
    }

    #[test]
    fn test_connect_round_robins_hosts() {
        let cluster = cluster();
        assert_eq!(cluster.host_for(0), Some("n1"));
        assert_eq!(cluster.host_for(1), Some("n2"));
        assert_eq!(cluster.host_for(2), Some("n1"));
        assert!(cluster.connect(2).is_ok());
    }

    #[test]
    fn test_connect_fails_without_hosts() {
        let empty = MemoryCluster::new(Vec::new(), FaultConfig::default());
        let err = empty.connect(0).err().unwrap();
        assert_eq!(err.cause(), Cause::NoHostAvailable);

        let cluster = cluster();
        cluster.set_reachable(false);
        assert!(cluster.connect(0).is_err());
    }

    #[test]
    fn test_cas_guards() {
        let cluster = cluster();
        let mut session = cluster.connect(0).unwrap();
        let s = session.as_mut();

        // Update on an absent row does nothing.
        let rows = run(s, Template::CasUpdateIfPresent, &[5.into(), 1.into(), 5.into()]).unwrap();
        assert_eq!(rows.first(0), Datum::Null);
        assert_eq!(cluster.cas_value(5), None);

        // Insert on an absent row applies.
        let rows = run(s, Template::CasInsertIfAbsent, &[5.into(), 5.into(), 2.into()]).unwrap();
        assert_eq!(rows.first(0), Datum::Null);
        assert_eq!(cluster.cas_value(5), Some(2));

        // Second insert is blocked.
        let rows = run(s, Template::CasInsertIfAbsent, &[5.into(), 5.into(), 9.into()]).unwrap();
        assert_eq!(rows.first(0), Datum::Int(2));
        assert_eq!(cluster.cas_value(5), Some(2));

        // CAS mismatch, then match.
        run(s, Template::CasCompareAndSet, &[5.into(), 3.into(), 4.into(), 5.into()]).unwrap();
        assert_eq!(cluster.cas_value(5), Some(2));
        run(s, Template::CasCompareAndSet, &[5.into(), 2.into(), 4.into(), 5.into()]).unwrap();
        assert_eq!(cluster.cas_value(5), Some(4));
    }

    #[test]
    fn test_rw_write_two_requires_both_absent() {
        let cluster = cluster();
        let mut session = cluster.connect(0).unwrap();
        let s = session.as_mut();

        run(s, Template::RwReadThenWrite, &[1.into(), 2.into(), 10.into()]).unwrap();
        let rows = run(
            s,
            Template::RwWriteTwo,
            &[1.into(), 2.into(), 1.into(), 11.into(), 2.into(), 12.into()],
        )
        .unwrap();
        assert_eq!(rows.first(0), Datum::Null);
        assert_eq!(rows.first(1), Datum::Int(10));
        assert_eq!(cluster.rw_value(1), None);
        assert_eq!(cluster.rw_value(2), Some(10));
    }

    #[test]
    fn test_list_append_only_into_absent_row() {
        let cluster = cluster();
        let mut session = cluster.connect(0).unwrap();
        let s = session.as_mut();

        let append = |v: i64| [3.into(), Datum::List(vec![v]), 3.into()];
        let first = run(s, Template::ListAppendIfAbsent, &append(1));
        assert_eq!(first.unwrap().first(0), Datum::Null);
        let second = run(s, Template::ListAppendIfAbsent, &append(2));
        assert_eq!(second.unwrap().first(0), Datum::List(vec![1]));
        assert_eq!(cluster.list_contents(3), Some(vec![1]));

        let rows = run(s, Template::ListRead, &[3.into()]).unwrap();
        assert_eq!(rows.first(0), Datum::List(vec![1]));
        assert!(run(s, Template::ListRead, &[4.into()]).unwrap().is_empty());
    }

    #[test]
    fn test_scripted_fault_applied_and_lost() {
        let cluster = cluster();
        let mut session = cluster.connect(0).unwrap();
        let s = session.as_mut();

        cluster.inject(ScriptedFault::applied(StoreError::WriteTimeout {
            message: "slow".to_string(),
        }));
        let err = run(s, Template::CasInsertIfAbsent, &[1.into(), 1.into(), 7.into()]).unwrap_err();
        assert_eq!(err.cause(), Cause::WriteTimeout);
        assert_eq!(cluster.cas_value(1), Some(7));

        cluster.inject(ScriptedFault::lost(StoreError::Unavailable {
            message: "down".to_string(),
        }));
        let err = run(s, Template::CasInsertIfAbsent, &[2.into(), 2.into(), 7.into()]).unwrap_err();
        assert_eq!(err.cause(), Cause::Unavailable);
        assert_eq!(cluster.cas_value(2), None);
    }

    #[test]
    fn test_slow_reply_becomes_operation_timeout() {
        let config = FaultConfig {
            latency_range: (Duration::from_millis(50), Duration::from_millis(50)),
            ..FaultConfig::default()
        };
        let cluster = MemoryCluster::new(vec!["n1".to_string()], config)
            .with_read_timeout(Duration::from_millis(5));
        let mut session = cluster.connect(0).unwrap();

        let start = Instant::now();
        let err = run(session.as_mut(), Template::CasRead, &[1.into()]).unwrap_err();
        assert_eq!(err.cause(), Cause::OperationTimeout);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_random_faults_follow_rates() {
        let config = FaultConfig {
            unavailable_rate: 1.0,
            seed: 7,
            ..FaultConfig::default()
        };
        let cluster = MemoryCluster::new(vec!["n1".to_string()], config);
        let mut session = cluster.connect(0).unwrap();
        for _ in 0..10 {
            let err = run(session.as_mut(), Template::RwRead, &[1.into()]).unwrap_err();
            assert_eq!(err.cause(), Cause::Unavailable);
        }

        cluster.set_config(FaultConfig {
            unavailable_rate: 1.0,
            enabled: false,
            ..FaultConfig::default()
        });
        assert!(run(session.as_mut(), Template::RwRead, &[1.into()]).is_ok());
    }

    #[test]
    fn test_bad_parameters_are_unexpected() {
        let cluster = cluster();
        let mut session = cluster.connect(0).unwrap();
        let err = run(session.as_mut(), Template::CasRead, &[Datum::Null]).unwrap_err();
        assert_eq!(err.cause(), Cause::Unexpected);

        let err = run(session.as_mut(), Template::CasRead, &[]).unwrap_err();
        assert_eq!(err.cause(), Cause::Unexpected);
    }
}
