//! Transaction executor adapter.
//!
//! The store is reached only through a narrow interface: prepare a fixed
//! statement template once per session, then execute it with positional
//! parameters and get rows back. No retries happen here; failures are
//! surfaced as a typed [`StoreError`] and interpreted by the caller.

pub mod error;
pub mod memory;
pub mod template;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use error::{Cause, StoreError};
pub use memory::{FaultConfig, MemoryCluster, MemorySession, ScriptedFault};
pub use template::Template;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Datum {
    Null,
    Int(i64),
    List(Vec<i64>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Datum::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<Option<i64>> for Datum {
    fn from(v: Option<i64>) -> Self {
        v.map_or(Datum::Null, Datum::Int)
    }
}

/// Result rows of one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rows {
    rows: Vec<Vec<Datum>>,
}

impl Rows {
    pub fn empty() -> Self {
        Rows { rows: Vec::new() }
    }

    pub fn single(row: Vec<Datum>) -> Self {
        Rows { rows: vec![row] }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column `col` of the first row; `Null` when there is no such cell.
    pub fn first(&self, col: usize) -> Datum {
        self.rows
            .first()
            .and_then(|row| row.get(col))
            .cloned()
            .unwrap_or(Datum::Null)
    }
}

/// Handle to a statement prepared on one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prepared {
    pub id: u32,
    pub template: Template,
}

/// One exclusive store session, owned by a single worker.
pub trait Session: Send {
    /// Compile a template for repeated execution.
    fn prepare(&mut self, template: Template) -> Result<Prepared, StoreError>;

    /// Run a prepared statement with positional parameters.
    fn execute(&mut self, statement: &Prepared, params: &[Datum]) -> Result<Rows, StoreError>;

    /// Release the session.
    fn close(&mut self) {}
}

/// Opens sessions for workers.
pub trait Connector: Send + Sync {
    fn connect(&self, worker: usize) -> Result<Box<dyn Session>, StoreError>;
}

/// The set of statements a worker prepared up front.
#[derive(Debug, Default)]
pub struct Statements {
    prepared: HashMap<Template, Prepared>,
}

impl Statements {
    /// Prepare every template in `templates` on `session`.
    pub fn prepare_all(
        session: &mut dyn Session,
        templates: &[Template],
    ) -> Result<Self, StoreError> {
        let mut prepared = HashMap::with_capacity(templates.len());
        for &template in templates {
            prepared.insert(template, session.prepare(template)?);
        }
        Ok(Statements { prepared })
    }

    /// Look up a prepared statement.
    pub fn get(&self, template: Template) -> Result<&Prepared, StoreError> {
        self.prepared
            .get(&template)
            .ok_or_else(|| {
                StoreError::unexpected(format!("statement {:?} was not prepared", template))
            })
    }

    /// Execute `template` with `params`.
    pub fn execute(
        &self,
        session: &mut dyn Session,
        template: Template,
        params: &[Datum],
    ) -> Result<Rows, StoreError> {
        let statement = self.get(template)?;
        session.execute(statement, params)
    }

    pub fn len(&self) -> usize {
        self.prepared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prepared.is_empty()
    }
}
