//! Routing option sync against the cluster metadata

use std::collections::BTreeMap;

use crate::common::*;
use mysql_operator::controller::router_sync::sync_routing_options;
use mysql_operator::mysql::group_replication::ROUTER_OPTIONS_QUERY;
use mysql_operator::mysql::{InstanceAddress, Row, SqlConnector, SqlSession};
use serde_json::{Value, json};

fn options(value: Value) -> BTreeMap<String, Value> {
    serde_json::from_value(value).unwrap()
}

fn connector_with(current: Option<&str>) -> FakeConnector {
    let rows = current
        .map(|raw| vec![Row::new().with("ROUTER_OPTIONS", raw)])
        .unwrap_or_default();
    FakeConnector::new().with_rows(ROUTER_OPTIONS_QUERY, rows)
}

async fn primary(connector: &FakeConnector) -> Box<dyn SqlSession> {
    connector
        .connect(
            &InstanceAddress {
                host: member_host("mycluster", TEST_NAMESPACE, 0),
                port: 3306,
            },
            &test_credentials(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_changed_option_set_and_removed_option_reset() {
    let connector = connector_with(Some(
        r#"{"tags": {"env": "prod"}, "read_only_targets": "secondaries", "custom": 1}"#,
    ));
    let session = primary(&connector).await;

    let changed = sync_routing_options(
        session.as_ref(),
        &options(json!({"read_only_targets": "all"})),
    )
    .await
    .unwrap();
    assert_eq!(changed, 2);

    let statements: Vec<String> = connector.statements().into_iter().map(|(_, s)| s).collect();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].contains("JSON_SET"));
    assert!(statements[0].contains("'$.read_only_targets'"));
    assert!(statements[0].ends_with(r#"["all"]"#));
    assert!(statements[1].contains("JSON_REMOVE"));
    assert!(statements[1].contains("'$.tags'"));
    // Options the operator does not manage are left alone
    assert!(!statements.iter().any(|s| s.contains("custom")));
}

#[tokio::test]
async fn test_in_sync_options_issue_nothing() {
    let connector = connector_with(Some(r#"{"target_cluster": "primary"}"#));
    let session = primary(&connector).await;

    let changed = sync_routing_options(
        session.as_ref(),
        &options(json!({"target_cluster": "primary"})),
    )
    .await
    .unwrap();
    assert_eq!(changed, 0);
    assert!(connector.statements().is_empty());
}

#[tokio::test]
async fn test_empty_metadata_gets_every_option() {
    let connector = connector_with(None);
    let session = primary(&connector).await;

    let changed = sync_routing_options(
        session.as_ref(),
        &options(json!({"tags": {"team": "db"}, "stats_updates_frequency": 30})),
    )
    .await
    .unwrap();
    assert_eq!(changed, 2);
    assert!(
        connector
            .statements()
            .iter()
            .all(|(_, s)| s.contains("JSON_SET"))
    );
}

#[tokio::test]
async fn test_corrupt_metadata_is_an_error() {
    let connector = connector_with(Some("{not json"));
    let session = primary(&connector).await;

    assert!(
        sync_routing_options(session.as_ref(), &options(json!({})))
            .await
            .is_err()
    );
}
