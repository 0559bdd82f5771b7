//! MySQL access for the reconciler
//!
//! - `session` - the narrow SQL capability the controllers depend on
//! - `sqlx_session` - the production implementation on top of sqlx
//! - `group_replication` - membership queries and Group Replication statements

pub mod group_replication;
pub mod session;
pub mod sqlx_session;

pub use group_replication::{GroupMember, GroupMemberRole, GroupMemberState};
pub use session::{
    Credentials, InstanceAddress, Row, SqlConnector, SqlSession, SqlValue, quote_literal,
};
pub use sqlx_session::SqlxConnector;

use thiserror::Error;

/// Classic protocol port of every server instance
pub const MYSQL_PORT: u16 = 3306;

#[derive(Error, Debug)]
pub enum SqlError {
    #[error("cannot connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("statement failed: {0}")]
    Statement(String),

    #[error("SQL call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("column {column}: {reason}")]
    Decode { column: String, reason: String },

    #[error("missing column {0}")]
    MissingColumn(String),
}

impl SqlError {
    /// Connection problems and timeouts clear up by themselves; a row that
    /// does not decode will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SqlError::Connect { .. } | SqlError::Timeout(_) | SqlError::Statement(_) => true,
            SqlError::Decode { .. } | SqlError::MissingColumn(_) => false,
        }
    }
}
