use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tables exposed through the backend's table API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Users,
    Channels,
    Messages,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Channels => "channels",
            Self::Messages => "messages",
        }
    }

    /// Columns a client may read, filter, order or write.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Users => &["id", "username", "created_at"],
            Self::Channels => &["id", "name", "description", "created_at", "created_by"],
            Self::Messages => &["id", "channel_id", "content", "created_at", "user_id"],
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// A read against one table: `select * from table where .. order by ..`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: None,
        }
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(OrderBy {
            column: column.into(),
            ascending,
        });
        self
    }
}
