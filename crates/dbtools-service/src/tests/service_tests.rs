//! The composed services, end to end

use std::time::Duration;

use serde_json::{Value, json};

use dbtools_host::{HostBuilder, ProviderError, StartupError, render_markdown};

use super::EditorClient;
use crate::config::Provider;
use crate::services::{ConnectionService, ScriptingService, WorkspaceService, build_host};

fn connect_params(owner_uri: &str) -> Value {
    json!({
        "ownerUri": owner_uri,
        "connection": {
            "serverName": "localhost",
            "databaseName": "app",
            "userName": "postgres",
            "port": 5432
        }
    })
}

fn script_params(owner_uri: &str) -> Value {
    json!({
        "ownerUri": owner_uri,
        "operation": 0,
        "scriptingObjects": [{"type": "Table", "schema": "public", "name": "orders"}]
    })
}

#[tokio::test]
async fn test_capabilities_list_reports_every_method() {
    let mut client = EditorClient::start(build_host(Provider::Pgsql).unwrap());

    let reply = client.request("capabilities/list", json!({})).await;
    assert_eq!(reply["result"]["providerName"], "PGSQL");
    assert_eq!(reply["result"]["providerDisplayName"], "PostgreSQL");

    let methods: Vec<&str> = reply["result"]["methods"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m.as_str().unwrap())
        .collect();
    assert_eq!(
        methods,
        vec![
            "capabilities/list",
            "connection/connect",
            "connection/disconnect",
            "connection/list",
            "log",
            "scripting/scriptAs",
            "workspace/didChangeConfiguration",
        ]
    );
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_connect_sends_completion_notification() {
    let mut client = EditorClient::start(build_host(Provider::Pgsql).unwrap());

    let reply = client
        .request("connection/connect", connect_params("file:///a.sql"))
        .await;
    assert_eq!(reply["result"], true);

    let complete = client.recv().await;
    assert_eq!(complete["method"], "connection/complete");
    assert!(complete.get("id").is_none());
    assert_eq!(complete["params"]["ownerUri"], "file:///a.sql");
    assert_eq!(complete["params"]["provider"], "PGSQL");
    assert_eq!(complete["params"]["connectionSummary"]["databaseName"], "app");

    let listed = client.request("connection/list", Value::Null).await;
    assert_eq!(listed["result"][0]["ownerUri"], "file:///a.sql");
    assert_eq!(
        listed["result"][0]["connectionId"],
        complete["params"]["connectionId"]
    );

    let reply = client
        .request("connection/disconnect", json!({"ownerUri": "file:///a.sql"}))
        .await;
    assert_eq!(reply["result"], true);
    let listed = client.request("connection/list", json!({})).await;
    assert_eq!(listed["result"], json!([]));
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_script_as_without_connection_echoes_params() {
    let mut client = EditorClient::start(build_host(Provider::Pgsql).unwrap());

    let params = script_params("file:///nowhere.sql");
    let reply = client.request("scripting/scriptAs", params.clone()).await;

    assert!(reply.get("result").is_none());
    assert!(
        reply["error"]["message"]
            .as_str()
            .unwrap()
            .contains("file:///nowhere.sql")
    );
    assert_eq!(reply["error"]["data"], params);
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_script_as_reconnects_a_severed_connection_once() {
    let host = build_host(Provider::Pgsql).unwrap();
    let connections = host.provider().get::<ConnectionService>().unwrap();
    let mut client = EditorClient::start(host);

    client
        .request("connection/connect", connect_params("file:///a.sql"))
        .await;
    assert!(connections.mark_severed("file:///a.sql").await);

    let reply = client
        .request("scripting/scriptAs", script_params("file:///a.sql"))
        .await;
    assert_eq!(reply["result"]["ownerUri"], "file:///a.sql");
    assert_eq!(
        reply["result"]["script"],
        "SELECT * FROM \"public\".\"orders\"\nLIMIT 1000;"
    );
    assert_eq!(connections.reconnect_count("file:///a.sql").await, 1);
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_script_as_uses_provider_quoting() {
    let mut client = EditorClient::start(build_host(Provider::Mysql).unwrap());

    client
        .request("connection/connect", connect_params("file:///m.sql"))
        .await;
    let reply = client
        .request("scripting/scriptAs", script_params("file:///m.sql"))
        .await;
    assert_eq!(
        reply["result"]["script"],
        "SELECT * FROM `public`.`orders`\nLIMIT 1000;"
    );
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_workspace_notifications_are_silent() {
    let host = build_host(Provider::Pgsql).unwrap();
    let workspace = host.provider().get::<WorkspaceService>().unwrap();
    let mut client = EditorClient::start(host);

    client
        .notify(
            "workspace/didChangeConfiguration",
            json!({"settings": {"pgsql": {"format": {"keywordCase": "upper"}}}}),
        )
        .await;
    client
        .notify("log", json!({"level": "warning", "message": "editor says hi"}))
        .await;

    // The next frame on the wire is the reply to this request, not a notification reply
    let reply = client.request("connection/list", json!({})).await;
    assert_eq!(reply["id"], 1);

    for _ in 0..50 {
        if !workspace.settings().is_null() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        workspace.settings()["pgsql"]["format"]["keywordCase"],
        "upper"
    );
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_log_notification_with_short_field_name_is_handled() {
    let host = build_host(Provider::Pgsql).unwrap();
    let workspace = host.provider().get::<WorkspaceService>().unwrap();
    let mut client = EditorClient::start(host);

    client.notify("log", json!({"msg": "hi"})).await;

    let reply = client.request("connection/list", json!({})).await;
    assert_eq!(reply["id"], 1);

    for _ in 0..50 {
        if workspace.last_client_log().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(workspace.last_client_log().as_deref(), Some("hi"));
    client.finish().await.unwrap();
}

#[test]
fn test_scripting_without_connection_service_fails_startup() {
    let result = HostBuilder::new("PGSQL")
        .service(ScriptingService::default())
        .build();

    match result {
        Err(StartupError::Initialize { service, source }) => {
            assert_eq!(service, "scripting");
            assert!(matches!(source, ProviderError::MissingService(_)));
        }
        other => panic!("expected an initialization failure, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_markdown_lists_service_methods() {
    let host = build_host(Provider::Pgsql).unwrap();
    let markdown = render_markdown(host.registry());

    assert!(markdown.contains("## `scripting/scriptAs`"));
    assert!(markdown.contains("ScriptAsParams"));
    assert!(markdown.contains("## `workspace/didChangeConfiguration`"));
}
