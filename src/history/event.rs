//! History event model.

use std::fmt::Write as _;

use serde::ser::{SerializeTuple, Serializer};
use serde::Serialize;

use crate::store::{Cause, Datum};

/// Lifecycle tag of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Invoke,
    Ok,
    Fail,
    Info,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Invoke => "invoke",
            EventKind::Ok => "ok",
            EventKind::Fail => "fail",
            EventKind::Info => "info",
            EventKind::Error => "error",
        }
    }

    /// Whether this kind resolves an outstanding invoke.
    pub fn is_completion(&self) -> bool {
        !matches!(self, EventKind::Invoke)
    }
}

/// Operation name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpLabel {
    Read,
    Write,
    Cas,
    Txn,
}

impl OpLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpLabel::Read => "read",
            OpLabel::Write => "write",
            OpLabel::Cas => "cas",
            OpLabel::Txn => "txn",
        }
    }
}

/// Micro-operation function inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicroKind {
    Read,
    Write,
    Append,
}

impl MicroKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MicroKind::Read => "r",
            MicroKind::Write => "w",
            MicroKind::Append => "append",
        }
    }
}

/// One `(kind, register, value)` step of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroOp {
    pub kind: MicroKind,
    pub register: i64,
    pub value: Datum,
}

impl MicroOp {
    pub fn read(register: i64) -> Self {
        MicroOp {
            kind: MicroKind::Read,
            register,
            value: Datum::Null,
        }
    }

    pub fn write(register: i64, value: i64) -> Self {
        MicroOp {
            kind: MicroKind::Write,
            register,
            value: Datum::Int(value),
        }
    }

    pub fn append(register: i64, value: i64) -> Self {
        MicroOp {
            kind: MicroKind::Append,
            register,
            value: Datum::Int(value),
        }
    }

    /// The value this step writes, if it writes one.
    pub fn written(&self) -> Option<i64> {
        match self.kind {
            MicroKind::Read => None,
            MicroKind::Write | MicroKind::Append => self.value.as_int(),
        }
    }
}

impl Serialize for MicroOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(self.kind.as_str())?;
        tuple.serialize_element(&self.register)?;
        tuple.serialize_element(&self.value)?;
        tuple.end()
    }
}

/// Operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OpValue {
    /// A single value (CAS read/write).
    Scalar(Datum),
    /// `[expected, new]` (CAS compare-and-swap).
    Pair(i64, i64),
    /// Ordered micro-operations.
    Txn(Vec<MicroOp>),
}

impl OpValue {
    pub fn null() -> Self {
        OpValue::Scalar(Datum::Null)
    }

    /// Values written by the micro-operations of a transaction.
    pub fn written(&self) -> Vec<i64> {
        match self {
            OpValue::Txn(ops) => ops.iter().filter_map(MicroOp::written).collect(),
            _ => Vec::new(),
        }
    }
}

/// Model-specific tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tags {
    /// Target register (CAS model).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register: Option<i64>,
    /// Worker index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<usize>,
    /// Worker-local 1-based iteration counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u64>,
}

impl Tags {
    pub fn register(register: i64) -> Self {
        Tags {
            register: Some(register),
            ..Tags::default()
        }
    }

    pub fn thread(tid: usize, n: u64) -> Self {
        Tags {
            tid: Some(tid),
            n: Some(n),
            ..Tags::default()
        }
    }
}

/// One history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub f: OpLabel,
    pub value: OpValue,
    pub process: u64,
    pub time: i64,
    #[serde(flatten)]
    pub tags: Tags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Cause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    /// Render as a single-line EDN map.
    pub fn to_edn(&self) -> String {
        let mut out = String::with_capacity(96);
        out.push_str("{:type :");
        out.push_str(self.kind.as_str());
        out.push_str(", :f :");
        out.push_str(self.f.as_str());
        out.push_str(", :value ");
        edn_value(&mut out, &self.value);
        let _ = write!(out, ", :process {}, :time {}", self.process, self.time);
        if let Some(register) = self.tags.register {
            let _ = write!(out, ", :register {}", register);
        }
        if let Some(tid) = self.tags.tid {
            let _ = write!(out, ", :tid {}", tid);
        }
        if let Some(n) = self.tags.n {
            let _ = write!(out, ", :n {}", n);
        }
        if let Some(cause) = self.cause {
            out.push_str(", :cause :");
            out.push_str(cause.as_str());
        }
        if let Some(error) = &self.error {
            out.push_str(", :error ");
            edn_string(&mut out, error);
        }
        out.push('}');
        out
    }
}

fn edn_datum(out: &mut String, datum: &Datum) {
    match datum {
        Datum::Null => out.push_str("nil"),
        Datum::Int(v) => {
            let _ = write!(out, "{}", v);
        }
        Datum::List(values) => {
            out.push('[');
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "{}", v);
            }
            out.push(']');
        }
    }
}

fn edn_value(out: &mut String, value: &OpValue) {
    match value {
        OpValue::Scalar(datum) => edn_datum(out, datum),
        OpValue::Pair(expected, new) => {
            let _ = write!(out, "[{} {}]", expected, new);
        }
        OpValue::Txn(ops) => {
            out.push('[');
            for (i, op) in ops.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "[:{} {} ", op.kind.as_str(), op.register);
                edn_datum(out, &op.value);
                out.push(']');
            }
            out.push(']');
        }
    }
}

fn edn_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}
