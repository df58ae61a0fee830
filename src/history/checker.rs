//! History and structural checker.
//!
//! This does not judge consistency; it only verifies that a history is
//! well formed enough for an external checker to trust:
//! - Pairing: every invoke is resolved by exactly one later completion of
//!   the same process and operation, and a process never has two
//!   operations outstanding
//! - Retirement: a process that completed with `info` never appears again
//! - Uniqueness: values written or appended by transactions are distinct
//! - Per-process time never runs backwards

use std::collections::{HashMap, HashSet};

use super::event::{Event, EventKind, OpLabel};

/// Events in emission order, indexed by process.
#[derive(Debug, Clone, Default)]
pub struct History {
    /// All recorded events.
    events: Vec<Event>,
    /// Event indices per process.
    by_process: HashMap<u64, Vec<usize>>,
}

impl History {
    pub fn new() -> Self {
        History::default()
    }

    /// Append an event.
    pub fn push(&mut self, event: Event) {
        let idx = self.events.len();
        self.by_process.entry(event.process).or_default().push(idx);
        self.events.push(event);
    }

    /// All events.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Events of one process, in emission order.
    pub fn process(&self, process: u64) -> Vec<&Event> {
        self.by_process
            .get(&process)
            .map(|idxs| idxs.iter().map(|&i| &self.events[i]).collect())
            .unwrap_or_default()
    }

    /// Distinct processes that appear in the history.
    pub fn processes(&self) -> Vec<u64> {
        let mut ps: Vec<u64> = self.by_process.keys().copied().collect();
        ps.sort_unstable();
        ps
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl FromIterator<Event> for History {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let mut history = History::new();
        for event in iter {
            history.push(event);
        }
        history
    }
}

/// Result of a structural check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Whether all checks passed.
    pub passed: bool,
    /// Violations found.
    pub violations: Vec<Violation>,
    /// Counts gathered while checking.
    pub stats: CheckStats,
}

/// A structural violation.
#[derive(Debug, Clone)]
pub struct Violation {
    pub kind: ViolationKind,
    pub description: String,
    /// Related events, by index.
    pub related_events: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// An invoke was never resolved.
    UnresolvedInvoke,
    /// A completion had no outstanding invoke.
    OrphanCompletion,
    /// A process invoked while an operation was outstanding.
    OverlappingInvoke,
    /// A completion named a different operation than its invoke.
    LabelMismatch,
    /// A process was used after an `info` completion.
    RetiredProcessReused,
    /// The same value was written twice.
    DuplicateValue,
    /// A process's timestamps decreased.
    TimeRegression,
}

/// Counts gathered by the checker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckStats {
    pub invokes: usize,
    pub ok: usize,
    pub fail: usize,
    pub info: usize,
    pub error: usize,
    pub processes: usize,
    pub written_values: usize,
}

/// Structural history checker.
#[derive(Debug, Default)]
pub struct Checker;

impl Checker {
    pub fn new() -> Self {
        Checker
    }

    pub fn verify(&self, history: &History) -> CheckResult {
        let mut violations = Vec::new();
        let mut stats = CheckStats {
            processes: history.by_process.len(),
            ..CheckStats::default()
        };

        let mut outstanding: HashMap<u64, (usize, OpLabel)> = HashMap::new();
        let mut retired: HashMap<u64, usize> = HashMap::new();
        let mut last_time: HashMap<u64, (usize, i64)> = HashMap::new();
        let mut written: HashMap<i64, usize> = HashMap::new();
        let mut reported_retired: HashSet<u64> = HashSet::new();

        for (idx, event) in history.events().iter().enumerate() {
            let p = event.process;

            if let Some(&retired_at) = retired.get(&p) {
                if reported_retired.insert(p) {
                    violations.push(Violation {
                        kind: ViolationKind::RetiredProcessReused,
                        description: format!(
                            "process {} used at event {} after info completion at event {}",
                            p, idx, retired_at
                        ),
                        related_events: vec![retired_at, idx],
                    });
                }
            }

            if let Some(&(prev_idx, prev_time)) = last_time.get(&p) {
                if event.time < prev_time {
                    violations.push(Violation {
                        kind: ViolationKind::TimeRegression,
                        description: format!(
                            "process {} time went from {} to {} (events {} to {})",
                            p, prev_time, event.time, prev_idx, idx
                        ),
                        related_events: vec![prev_idx, idx],
                    });
                }
            }
            last_time.insert(p, (idx, event.time));

            match event.kind {
                EventKind::Invoke => {
                    stats.invokes += 1;
                    if let Some(&(open_idx, _)) = outstanding.get(&p) {
                        violations.push(Violation {
                            kind: ViolationKind::OverlappingInvoke,
                            description: format!(
                                "process {} invoked at event {} while event {} was outstanding",
                                p, idx, open_idx
                            ),
                            related_events: vec![open_idx, idx],
                        });
                    }
                    outstanding.insert(p, (idx, event.f));

                    for value in event.value.written() {
                        stats.written_values += 1;
                        if let Some(&first) = written.get(&value) {
                            violations.push(Violation {
                                kind: ViolationKind::DuplicateValue,
                                description: format!(
                                    "value {} written at events {} and {}",
                                    value, first, idx
                                ),
                                related_events: vec![first, idx],
                            });
                        } else {
                            written.insert(value, idx);
                        }
                    }
                }
                kind => {
                    match kind {
                        EventKind::Ok => stats.ok += 1,
                        EventKind::Fail => stats.fail += 1,
                        EventKind::Info => stats.info += 1,
                        _ => stats.error += 1,
                    }
                    match outstanding.remove(&p) {
                        Some((open_idx, label)) => {
                            if label != event.f {
                                violations.push(Violation {
                                    kind: ViolationKind::LabelMismatch,
                                    description: format!(
                                        "process {} invoked {} at event {} \
                                         but completed {} at event {}",
                                        p,
                                        label.as_str(),
                                        open_idx,
                                        event.f.as_str(),
                                        idx
                                    ),
                                    related_events: vec![open_idx, idx],
                                });
                            }
                        }
                        None => violations.push(Violation {
                            kind: ViolationKind::OrphanCompletion,
                            description: format!(
                                "process {} completed at event {} with nothing outstanding",
                                p, idx
                            ),
                            related_events: vec![idx],
                        }),
                    }
                    if kind == EventKind::Info {
                        retired.insert(p, idx);
                    }
                }
            }
        }

        let mut unresolved: Vec<_> = outstanding.into_iter().collect();
        unresolved.sort_by_key(|&(_, (idx, _))| idx);
        for (p, (idx, _)) in unresolved {
            violations.push(Violation {
                kind: ViolationKind::UnresolvedInvoke,
                description: format!("process {} invoke at event {} never completed", p, idx),
                related_events: vec![idx],
            });
        }

        CheckResult {
            passed: violations.is_empty(),
            violations,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::event::{MicroOp, OpValue, Tags};

    fn ev(kind: EventKind, f: OpLabel, process: u64, time: i64) -> Event {
        Event {
            kind,
            f,
            value: OpValue::null(),
            process,
            time,
            tags: Tags::default(),
            cause: None,
            error: None,
        }
    }

    fn txn(kind: EventKind, process: u64, time: i64, value: i64) -> Event {
        Event {
            value: OpValue::Txn(vec![MicroOp::write(1, value)]),
            ..ev(kind, OpLabel::Txn, process, time)
        }
    }

    #[test]
    fn test_well_formed_history_passes() {
        let history: History = vec![
            ev(EventKind::Invoke, OpLabel::Read, 0, 1),
            ev(EventKind::Invoke, OpLabel::Write, 1, 2),
            ev(EventKind::Ok, OpLabel::Read, 0, 3),
            ev(EventKind::Info, OpLabel::Write, 1, 4),
            ev(EventKind::Invoke, OpLabel::Cas, 2, 5),
            ev(EventKind::Fail, OpLabel::Cas, 2, 6),
        ]
        .into_iter()
        .collect();

        let result = Checker::new().verify(&history);
        assert!(result.passed, "Violations: {:?}", result.violations);
        assert_eq!(result.stats.invokes, 3);
        assert_eq!(result.stats.ok, 1);
        assert_eq!(result.stats.info, 1);
        assert_eq!(result.stats.fail, 1);
        assert_eq!(result.stats.processes, 3);
        assert_eq!(history.processes(), vec![0, 1, 2]);
        assert_eq!(history.process(1).len(), 2);
    }

    #[test]
    fn test_detects_reuse_after_info() {
        let history: History = vec![
            ev(EventKind::Invoke, OpLabel::Read, 0, 1),
            ev(EventKind::Info, OpLabel::Read, 0, 2),
            ev(EventKind::Invoke, OpLabel::Read, 0, 3),
            ev(EventKind::Ok, OpLabel::Read, 0, 4),
        ]
        .into_iter()
        .collect();

        let result = Checker::new().verify(&history);
        assert!(!result.passed);
        let reuse: Vec<_> = result
            .violations
            .iter()
            .filter(|v| v.kind == ViolationKind::RetiredProcessReused)
            .collect();
        assert_eq!(reuse.len(), 1);
        assert_eq!(reuse[0].related_events, vec![1, 2]);
    }

    #[test]
    fn test_detects_pairing_errors() {
        let history: History = vec![
            ev(EventKind::Ok, OpLabel::Read, 0, 1),
            ev(EventKind::Invoke, OpLabel::Read, 1, 2),
            ev(EventKind::Invoke, OpLabel::Read, 1, 3),
            ev(EventKind::Ok, OpLabel::Write, 1, 4),
            ev(EventKind::Invoke, OpLabel::Cas, 2, 5),
        ]
        .into_iter()
        .collect();

        let result = Checker::new().verify(&history);
        let kinds: Vec<_> = result.violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::OrphanCompletion));
        assert!(kinds.contains(&ViolationKind::OverlappingInvoke));
        assert!(kinds.contains(&ViolationKind::LabelMismatch));
        assert!(kinds.contains(&ViolationKind::UnresolvedInvoke));
    }

    #[test]
    fn test_detects_duplicate_values_and_time_regression() {
        let history: History = vec![
            txn(EventKind::Invoke, 0, 10, 101),
            txn(EventKind::Ok, 0, 9, 101),
            txn(EventKind::Invoke, 1, 12, 101),
            txn(EventKind::Fail, 1, 13, 101),
        ]
        .into_iter()
        .collect();

        let result = Checker::new().verify(&history);
        let kinds: Vec<_> = result.violations.iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![ViolationKind::TimeRegression, ViolationKind::DuplicateValue]
        );
        assert_eq!(result.stats.written_values, 2);
    }
}
