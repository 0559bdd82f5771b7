//! Group Replication membership and control statements
//!
//! Group Replication itself is a black box; the operator only reads the
//! membership view from `performance_schema` and issues the start/stop
//! statements that make an instance bootstrap, join or leave the group.

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::session::{Credentials, SqlSession, SqlValue, quote_literal};
use super::SqlError;

pub const MEMBERSHIP_QUERY: &str = "SELECT MEMBER_ID, MEMBER_HOST, MEMBER_PORT, MEMBER_STATE, \
     MEMBER_ROLE, MEMBER_VERSION FROM performance_schema.replication_group_members";

pub const ROUTER_OPTIONS_QUERY: &str = "SELECT CAST(router_options AS CHAR) AS ROUTER_OPTIONS \
     FROM mysql_innodb_cluster_metadata.clusters LIMIT 1";

/// Member state as reported by `replication_group_members`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupMemberState {
    Online,
    Recovering,
    Unreachable,
    Error,
    Offline,
}

impl GroupMemberState {
    pub fn parse(value: &str) -> Self {
        match value {
            "ONLINE" => GroupMemberState::Online,
            "RECOVERING" => GroupMemberState::Recovering,
            "UNREACHABLE" => GroupMemberState::Unreachable,
            "ERROR" => GroupMemberState::Error,
            _ => GroupMemberState::Offline,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupMemberRole {
    Primary,
    Secondary,
}

/// One row of the membership view
#[derive(Clone, Debug, PartialEq)]
pub struct GroupMember {
    pub member_id: String,
    pub host: String,
    pub port: i64,
    pub state: GroupMemberState,
    pub role: Option<GroupMemberRole>,
    pub version: Option<String>,
}

impl GroupMember {
    pub fn is_online(&self) -> bool {
        self.state == GroupMemberState::Online
    }
}

/// Read the membership view as seen by the connected instance
pub async fn query_members(session: &dyn SqlSession) -> Result<Vec<GroupMember>, SqlError> {
    let rows = session.query(MEMBERSHIP_QUERY, &[]).await?;
    let mut members = Vec::with_capacity(rows.len());
    for row in rows {
        let role = match row.get_str("MEMBER_ROLE")? {
            Some("PRIMARY") => Some(GroupMemberRole::Primary),
            Some("SECONDARY") => Some(GroupMemberRole::Secondary),
            _ => None,
        };
        members.push(GroupMember {
            member_id: row.get_str("MEMBER_ID")?.unwrap_or_default().to_string(),
            host: row.get_str("MEMBER_HOST")?.unwrap_or_default().to_string(),
            port: row.get_i64("MEMBER_PORT")?.unwrap_or_default(),
            state: GroupMemberState::parse(row.get_str("MEMBER_STATE")?.unwrap_or_default()),
            role,
            version: row
                .get_str("MEMBER_VERSION")?
                .filter(|v| !v.is_empty())
                .map(String::from),
        });
    }
    Ok(members)
}

fn start_statement(credentials: &Credentials) -> String {
    format!(
        "START GROUP_REPLICATION USER={}, PASSWORD={}",
        quote_literal(&credentials.user),
        quote_literal(&credentials.password)
    )
}

/// Point the instance at the current seed list before it starts or joins
pub async fn set_group_seeds(session: &dyn SqlSession, seeds: &[String]) -> Result<(), SqlError> {
    session
        .execute(
            "SET GLOBAL group_replication_group_seeds = ?",
            &[SqlValue::Text(seeds.join(","))],
        )
        .await?;
    Ok(())
}

/// Executed GTID set, used to pick the most advanced instance after an outage
pub async fn gtid_executed(session: &dyn SqlSession) -> Result<String, SqlError> {
    let rows = session
        .query("SELECT @@GLOBAL.gtid_executed AS GTID_EXECUTED", &[])
        .await?;
    match rows.first() {
        Some(row) => Ok(row.get_str("GTID_EXECUTED")?.unwrap_or_default().to_string()),
        None => Ok(String::new()),
    }
}

/// Server version reported by the instance
pub async fn server_version(session: &dyn SqlSession) -> Result<Option<String>, SqlError> {
    let rows = session.query("SELECT @@GLOBAL.version AS VERSION", &[]).await?;
    Ok(rows
        .first()
        .map(|row| row.get_str("VERSION"))
        .transpose()?
        .flatten()
        .map(|v| v.split('-').next().unwrap_or(v).to_string()))
}

/// Number of transactions in a GTID set such as `uuid:1-5:7,uuid2:1-3`
pub fn gtid_transaction_count(gtid_set: &str) -> u64 {
    gtid_set
        .split(',')
        .flat_map(|entry| entry.trim().split(':').skip(1))
        .filter_map(|interval| {
            let mut bounds = interval.trim().splitn(2, '-');
            let start: u64 = bounds.next()?.parse().ok()?;
            let end: u64 = match bounds.next() {
                Some(end) => end.parse().ok()?,
                None => start,
            };
            Some(end.saturating_sub(start) + 1)
        })
        .sum()
}

/// Start a new group on this instance
pub async fn bootstrap(session: &dyn SqlSession, credentials: &Credentials) -> Result<(), SqlError> {
    session
        .execute("SET GLOBAL group_replication_bootstrap_group=ON", &[])
        .await?;
    let started = session.execute(&start_statement(credentials), &[]).await;
    // Always turn bootstrap mode back off so a restart cannot create a second group
    if let Err(e) = session
        .execute("SET GLOBAL group_replication_bootstrap_group=OFF", &[])
        .await
    {
        warn!(error = %e, "Failed to reset group_replication_bootstrap_group");
    }
    started?;
    info!("Bootstrapped group replication");
    Ok(())
}

/// Join an existing group
pub async fn join(session: &dyn SqlSession, credentials: &Credentials) -> Result<(), SqlError> {
    session.execute(&start_statement(credentials), &[]).await?;
    Ok(())
}

/// Take a member out of ERROR state and back into the group
pub async fn rejoin(session: &dyn SqlSession, credentials: &Credentials) -> Result<(), SqlError> {
    session.execute("STOP GROUP_REPLICATION", &[]).await?;
    join(session, credentials).await
}

/// Leave the group cleanly ahead of a scale down
pub async fn leave(session: &dyn SqlSession) -> Result<(), SqlError> {
    session.execute("STOP GROUP_REPLICATION", &[]).await?;
    Ok(())
}

/// Routing options currently stored in the cluster metadata
pub async fn router_options(
    session: &dyn SqlSession,
) -> Result<BTreeMap<String, serde_json::Value>, SqlError> {
    let rows = session.query(ROUTER_OPTIONS_QUERY, &[]).await?;
    let Some(row) = rows.first() else {
        return Ok(BTreeMap::new());
    };
    match row.get_str("ROUTER_OPTIONS")? {
        Some(raw) if !raw.trim().is_empty() => {
            serde_json::from_str(raw).map_err(|e| SqlError::Decode {
                column: "ROUTER_OPTIONS".to_string(),
                reason: e.to_string(),
            })
        }
        _ => Ok(BTreeMap::new()),
    }
}

/// Set one routing option; routers pick it up on their next metadata refresh
pub async fn set_router_option(
    session: &dyn SqlSession,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), SqlError> {
    let statement = format!(
        "UPDATE mysql_innodb_cluster_metadata.clusters SET router_options = \
         JSON_SET(COALESCE(router_options, JSON_OBJECT()), '$.{}', CAST(? AS JSON))",
        json_path_key(key)
    );
    session
        .execute(&statement, &[SqlValue::Text(value.to_string())])
        .await?;
    Ok(())
}

/// Remove a routing option so routers fall back to their built-in default
pub async fn reset_router_option(session: &dyn SqlSession, key: &str) -> Result<(), SqlError> {
    let statement = format!(
        "UPDATE mysql_innodb_cluster_metadata.clusters SET router_options = \
         JSON_REMOVE(COALESCE(router_options, JSON_OBJECT()), '$.{}')",
        json_path_key(key)
    );
    session.execute(&statement, &[]).await?;
    Ok(())
}

// Keys are checked against the known option names before they get here; this
// keeps anything else from breaking out of the JSON path literal.
fn json_path_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
