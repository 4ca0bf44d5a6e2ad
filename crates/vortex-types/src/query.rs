use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Table;

/// Row predicate understood by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: String, value: Value },
    /// Excludes NULLs, like SQL `<>`.
    Neq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    IsNull { column: String },
    /// Case-insensitive LIKE; `%` and `_` are wildcards, `\` escapes.
    ILike { column: String, pattern: String },
    AnyOf { filters: Vec<Filter> },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Serialize) -> Self {
        Filter::Eq { column: column.into(), value: to_value(value) }
    }

    pub fn neq(column: impl Into<String>, value: impl Serialize) -> Self {
        Filter::Neq { column: column.into(), value: to_value(value) }
    }

    pub fn is_in<V: Serialize>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(to_value).collect(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull { column: column.into() }
    }

    /// Matches rows whose column contains `needle`, case-insensitively.
    pub fn contains(column: impl Into<String>, needle: &str) -> Self {
        Filter::ILike {
            column: column.into(),
            pattern: format!("%{}%", escape_like(needle)),
        }
    }

    pub fn any_of(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::AnyOf { filters: filters.into_iter().collect() }
    }

    /// Every column this filter references, nested filters included.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Filter::Eq { column, .. }
            | Filter::Neq { column, .. }
            | Filter::In { column, .. }
            | Filter::IsNull { column }
            | Filter::ILike { column, .. } => vec![column.as_str()],
            Filter::AnyOf { filters } => filters.iter().flat_map(Filter::columns).collect(),
        }
    }
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Escapes LIKE wildcards so user input matches literally.
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// A table plus the filters, ordering and limit applied to it.
///
/// Used for selects, and as the row selector for counts, updates and deletes
/// (which ignore ordering and limit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<u32>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self { table, filters: Vec::new(), order: None, limit: None }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Serialize) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn neq(self, column: &str, value: impl Serialize) -> Self {
        self.filter(Filter::neq(column, value))
    }

    pub fn is_in<V: Serialize>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filter(Filter::is_in(column, values))
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some(Order { column: column.to_string(), direction });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}
