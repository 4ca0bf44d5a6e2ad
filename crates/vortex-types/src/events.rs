use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Record, Row, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A row-level change published by the backend.
///
/// `row` is the new row for inserts and updates, and the removed row for deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub op: ChangeOp,
    pub row: Row,
}

impl ChangeEvent {
    pub fn new(table: Table, op: ChangeOp, row: Row) -> Self {
        Self { table, op, row }
    }

    pub fn decode<T: Record>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.row.clone()))
    }

    /// The `id` column of the affected row.
    pub fn row_id(&self) -> Option<Uuid> {
        self.row.get("id")?.as_str()?.parse().ok()
    }
}

/// Which change events a subscriber wants: one table, optionally narrowed to
/// rows whose column equals a value (typically a parent id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub table: Table,
    pub column_eq: Option<(String, Value)>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self { table, column_eq: None }
    }

    pub fn with_eq(mut self, column: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.column_eq = Some((column.to_string(), value));
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        match &self.column_eq {
            Some((column, value)) => event.row.get(column) == Some(value),
            None => true,
        }
    }
}
