//! SQL session capability
//!
//! The reconciler only ever talks to MySQL through [`SqlSession`], a narrow
//! execute/query interface with typed column access. [`SqlConnector`] opens a
//! session against one instance. Both are traits so the planner and the
//! topology manager can be exercised against an in-memory fake.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use super::SqlError;

/// A bind parameter or a column value
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

/// One result row, addressed by column name
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, SqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.values.insert(column.to_ascii_uppercase(), value.into());
        self
    }

    pub fn insert(&mut self, column: &str, value: SqlValue) {
        self.values.insert(column.to_ascii_uppercase(), value);
    }

    fn value(&self, column: &str) -> Result<&SqlValue, SqlError> {
        self.values
            .get(&column.to_ascii_uppercase())
            .ok_or_else(|| SqlError::MissingColumn(column.to_string()))
    }

    /// Text column, `None` for SQL NULL
    pub fn get_str(&self, column: &str) -> Result<Option<&str>, SqlError> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.as_str())),
            SqlValue::Int(_) => Err(SqlError::Decode {
                column: column.to_string(),
                reason: "expected text, found integer".to_string(),
            }),
        }
    }

    /// Text column that must not be NULL
    pub fn get_string(&self, column: &str) -> Result<String, SqlError> {
        self.get_str(column)?
            .map(String::from)
            .ok_or_else(|| SqlError::Decode {
                column: column.to_string(),
                reason: "unexpected NULL".to_string(),
            })
    }

    /// Integer column. Numeric text is accepted since some servers report
    /// counters as DECIMAL.
    pub fn get_i64(&self, column: &str) -> Result<Option<i64>, SqlError> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Int(n) => Ok(Some(*n)),
            SqlValue::Text(s) => s.trim().parse().map(Some).map_err(|_| SqlError::Decode {
                column: column.to_string(),
                reason: format!("expected integer, found {:?}", s),
            }),
        }
    }
}

/// Address of one MySQL instance
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstanceAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Administrative account used by the operator
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub host: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An open session to one instance
#[async_trait]
pub trait SqlSession: Send + Sync {
    /// Run a statement, returning the affected row count
    async fn execute(&self, statement: &str, params: &[SqlValue]) -> Result<u64, SqlError>;

    /// Run a query and collect its rows
    async fn query(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<Row>, SqlError>;
}

/// Opens sessions to instances
#[async_trait]
pub trait SqlConnector: Send + Sync {
    async fn connect(
        &self,
        address: &InstanceAddress,
        credentials: &Credentials,
    ) -> Result<Box<dyn SqlSession>, SqlError>;
}

/// Quote a string as a SQL literal for statements that cannot be prepared
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            '\0' => quoted.push_str("\\0"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}
