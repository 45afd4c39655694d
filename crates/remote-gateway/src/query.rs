//! Query descriptors shared by every store implementation.

use serde_json::Value;

/// Equality filter on one column (`column = value`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EqFilter {
    pub column: String,
    pub value: String,
}

impl EqFilter {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Filter on the `id` column.
    pub fn id(value: impl Into<String>) -> Self {
        Self::new("id", value)
    }

    /// Whether a JSON row satisfies this filter.
    ///
    /// Non-string column values are compared through their JSON text, so
    /// `task_id = 7` matches the filter value `"7"`.
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => s == &self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }

    /// PostgREST query pair, e.g. `("task_id", "eq.T1")`.
    pub fn to_query_pair(&self) -> (String, String) {
        (self.column.clone(), format!("eq.{}", self.value))
    }
}

impl std::fmt::Display for EqFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// Single-column ordering. Nulls always sort last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub column: &'static str,
    pub ascending: bool,
}

impl SortOrder {
    pub const fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    pub const fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }

    /// PostgREST `order` parameter value.
    pub fn to_query_value(&self) -> String {
        let direction = if self.ascending { "asc" } else { "desc" };
        format!("{}.{}.nullslast", self.column, direction)
    }
}

/// A collection read: table, optional filter, optional order.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionQuery {
    pub table: String,
    pub filter: Option<EqFilter>,
    pub order: Option<SortOrder>,
}

impl CollectionQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
            order: None,
        }
    }

    pub fn filter(mut self, filter: EqFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn maybe_filter(mut self, filter: Option<EqFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = Some(order);
        self
    }
}
