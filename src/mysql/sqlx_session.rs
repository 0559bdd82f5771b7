//! sqlx backed SQL sessions
//!
//! Each session owns a single `MySqlConnection`. Statements without bind
//! parameters go through the text protocol because Group Replication control
//! statements cannot be prepared.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::{Column, ConnectOptions, Executor as _, Row as _};
use tokio::sync::Mutex;
use tracing::debug;

use super::session::{Credentials, InstanceAddress, Row, SqlConnector, SqlSession, SqlValue};
use super::SqlError;

/// Opens sqlx connections with a bounded connect and statement time
#[derive(Clone, Debug)]
pub struct SqlxConnector {
    timeout: Duration,
}

impl SqlxConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl SqlConnector for SqlxConnector {
    async fn connect(
        &self,
        address: &InstanceAddress,
        credentials: &Credentials,
    ) -> Result<Box<dyn SqlSession>, SqlError> {
        let options = MySqlConnectOptions::new()
            .host(&address.host)
            .port(address.port)
            .username(&credentials.user)
            .password(&credentials.password)
            .ssl_mode(MySqlSslMode::Preferred);

        let conn = bounded(self.timeout, options.connect())
            .await?
            .map_err(|e| SqlError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        debug!(address = %address, "Opened SQL session");
        Ok(Box::new(SqlxSession {
            conn: Mutex::new(conn),
            timeout: self.timeout,
        }))
    }
}

/// A session on one `MySqlConnection`
pub struct SqlxSession {
    conn: Mutex<MySqlConnection>,
    timeout: Duration,
}

#[async_trait]
impl SqlSession for SqlxSession {
    async fn execute(&self, statement: &str, params: &[SqlValue]) -> Result<u64, SqlError> {
        let mut conn = self.conn.lock().await;
        let result = if params.is_empty() {
            bounded(self.timeout, (&mut *conn).execute(sqlx::raw_sql(statement))).await?
        } else {
            let mut query = sqlx::query(statement);
            for param in params {
                query = match param {
                    SqlValue::Null => query.bind(None::<String>),
                    SqlValue::Int(n) => query.bind(*n),
                    SqlValue::Text(s) => query.bind(s.clone()),
                };
            }
            bounded(self.timeout, query.execute(&mut *conn)).await?
        };

        result
            .map(|done| done.rows_affected())
            .map_err(|e| SqlError::Statement(e.to_string()))
    }

    async fn query(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<Row>, SqlError> {
        let mut conn = self.conn.lock().await;
        let mut query = sqlx::query(statement);
        for param in params {
            query = match param {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Int(n) => query.bind(*n),
                SqlValue::Text(s) => query.bind(s.clone()),
            };
        }

        let rows = bounded(self.timeout, query.fetch_all(&mut *conn))
            .await?
            .map_err(|e| SqlError::Statement(e.to_string()))?;

        rows.iter().map(decode_row).collect()
    }
}

async fn bounded<F: Future>(timeout: Duration, fut: F) -> Result<F::Output, SqlError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| SqlError::Timeout(timeout))
}

fn decode_row(row: &MySqlRow) -> Result<Row, SqlError> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            v.map(SqlValue::Text)
        } else if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            v.map(SqlValue::Int)
        } else if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            match v {
                Some(n) => Some(SqlValue::Int(i64::try_from(n).map_err(|_| {
                    SqlError::Decode {
                        column: column.name().to_string(),
                        reason: format!("{} does not fit in i64", n),
                    }
                })?)),
                None => None,
            }
        } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            v.map(|bytes| SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned()))
        } else {
            return Err(SqlError::Decode {
                column: column.name().to_string(),
                reason: "unsupported column type".to_string(),
            });
        };
        out.insert(column.name(), value.unwrap_or(SqlValue::Null));
    }
    Ok(out)
}
