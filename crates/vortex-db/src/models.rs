//! Table schemas and row conversion between SQLite values and gateway rows.
//! Column names in generated SQL always come from these static schemas, never
//! from caller input.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;
use vortex_types::Table;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown column {table}.{column}")]
    UnknownColumn { table: Table, column: String },

    #[error("missing required column {table}.{column}")]
    MissingColumn { table: Table, column: String },

    #[error("invalid value for {table}.{column}: {reason}")]
    InvalidValue {
        table: Table,
        column: String,
        reason: String,
    },

    #[error("update of {table} has nothing to set")]
    EmptyPatch { table: Table },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Uuid,
    Text,
    Bool,
    Timestamp,
}

/// Value filled in by the store when an insert omits the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    Null,
    Required,
    NewUuid,
    Now,
    False,
}

#[derive(Debug)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub default: ColumnDefault,
}

const fn col(name: &'static str, kind: ColumnKind, default: ColumnDefault) -> Column {
    Column { name, kind, default }
}

use ColumnDefault::{False, NewUuid, Now, Null, Required};
use ColumnKind::{Bool, Text, Timestamp};

#[derive(Debug)]
pub struct TableSchema {
    pub table: Table,
    pub columns: &'static [Column],
    /// Set to the current time on every update.
    pub touch: Option<&'static str>,
}

static PROFILES: TableSchema = TableSchema {
    table: Table::Profiles,
    columns: &[
        col("id", ColumnKind::Uuid, NewUuid),
        col("user_id", ColumnKind::Uuid, Required),
        col("username", Text, Required),
        col("display_name", Text, Null),
        col("avatar_url", Text, Null),
        col("bio", Text, Null),
        col("status", Text, Null),
        col("is_online", Bool, False),
        col("last_seen", Timestamp, Null),
        col("created_at", Timestamp, Now),
        col("updated_at", Timestamp, Now),
    ],
    touch: Some("updated_at"),
};

static CHATS: TableSchema = TableSchema {
    table: Table::Chats,
    columns: &[
        col("id", ColumnKind::Uuid, NewUuid),
        col("created_by", ColumnKind::Uuid, Required),
        col("created_at", Timestamp, Now),
    ],
    touch: None,
};

static CHAT_MEMBERSHIPS: TableSchema = TableSchema {
    table: Table::ChatMemberships,
    columns: &[
        col("id", ColumnKind::Uuid, NewUuid),
        col("chat_id", ColumnKind::Uuid, Required),
        col("user_id", ColumnKind::Uuid, Required),
        col("is_pinned", Bool, False),
        col("is_archived", Bool, False),
        col("joined_at", Timestamp, Now),
    ],
    touch: None,
};

static MESSAGES: TableSchema = TableSchema {
    table: Table::Messages,
    columns: &[
        col("id", ColumnKind::Uuid, NewUuid),
        col("chat_id", ColumnKind::Uuid, Required),
        col("sender_id", ColumnKind::Uuid, Required),
        col("content", Text, Required),
        col("reply_to", ColumnKind::Uuid, Null),
        col("created_at", Timestamp, Now),
        col("updated_at", Timestamp, Now),
        col("is_delivered", Bool, False),
        col("is_read", Bool, False),
        col("is_pinned", Bool, False),
        col("reaction", Text, Null),
    ],
    touch: Some("updated_at"),
};

static BLOCKS: TableSchema = TableSchema {
    table: Table::Blocks,
    columns: &[
        col("id", ColumnKind::Uuid, NewUuid),
        col("blocker_id", ColumnKind::Uuid, Required),
        col("blocked_id", ColumnKind::Uuid, Required),
        col("created_at", Timestamp, Now),
    ],
    touch: None,
};

impl TableSchema {
    pub fn for_table(table: Table) -> &'static TableSchema {
        match table {
            Table::Profiles => &PROFILES,
            Table::Chats => &CHATS,
            Table::ChatMemberships => &CHAT_MEMBERSHIPS,
            Table::Messages => &MESSAGES,
            Table::Blocks => &BLOCKS,
        }
    }

    pub fn column(&self, name: &str) -> Result<&'static Column, SchemaError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| SchemaError::UnknownColumn {
                table: self.table,
                column: name.to_string(),
            })
    }

    pub fn column_list(&self) -> String {
        self.columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ")
    }

    /// Convert a JSON value into the stored representation of `column`.
    pub fn to_sql(&self, column: &Column, value: &Value) -> Result<SqlValue, SchemaError> {
        let invalid = |reason: String| SchemaError::InvalidValue {
            table: self.table,
            column: column.name.to_string(),
            reason,
        };

        match (column.kind, value) {
            (_, Value::Null) if column.default == Required => Err(SchemaError::MissingColumn {
                table: self.table,
                column: column.name.to_string(),
            }),
            (_, Value::Null) => Ok(SqlValue::Null),
            (ColumnKind::Bool, Value::Bool(b)) => Ok(SqlValue::Integer(i64::from(*b))),
            (ColumnKind::Uuid, Value::String(s)) => s
                .parse::<Uuid>()
                .map(|id| SqlValue::Text(id.to_string()))
                .map_err(|e| invalid(e.to_string())),
            (ColumnKind::Text, Value::String(s)) => Ok(SqlValue::Text(s.clone())),
            (ColumnKind::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| SqlValue::Text(timestamp(dt.with_timezone(&Utc))))
                .map_err(|e| invalid(e.to_string())),
            (kind, other) => Err(invalid(format!("expected {:?}, got {}", kind, other))),
        }
    }

    /// Value stored when an insert leaves `column` out.
    pub fn default_value(&self, column: &Column) -> Result<SqlValue, SchemaError> {
        match column.default {
            Null => Ok(SqlValue::Null),
            Required => Err(SchemaError::MissingColumn {
                table: self.table,
                column: column.name.to_string(),
            }),
            NewUuid => Ok(SqlValue::Text(Uuid::new_v4().to_string())),
            Now => Ok(SqlValue::Text(now())),
            False => Ok(SqlValue::Integer(0)),
        }
    }
}

/// Convert a stored value back into its JSON form.
pub fn from_sql(column: &Column, value: SqlValue) -> Value {
    match (column.kind, value) {
        (_, SqlValue::Null) => Value::Null,
        (ColumnKind::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (_, SqlValue::Text(s)) => Value::String(s),
        (_, SqlValue::Integer(i)) => Value::from(i),
        (_, SqlValue::Real(f)) => Value::from(f),
        (_, SqlValue::Blob(_)) => Value::Null,
    }
}

/// Fixed-width UTC timestamps so that text ordering is chronological.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now() -> String {
    timestamp(Utc::now())
}

/// Auth account row. Never leaves the backend.
pub struct AccountRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}
