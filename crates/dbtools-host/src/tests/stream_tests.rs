//! Dispatch behavior over the Content-Length stream binding

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use super::{LogSink, StreamClient, test_registry};

fn client() -> (StreamClient, LogSink) {
    let log: LogSink = Arc::new(Mutex::new(Vec::new()));
    (StreamClient::start(Arc::new(test_registry(log.clone()))), log)
}

#[tokio::test]
async fn test_ping_round_trip() {
    let (mut client, _log) = client();

    client
        .send(json!({"jsonrpc": "2.0", "method": "ping", "id": 1, "params": {}}))
        .await;
    let reply = client.recv().await;

    assert_eq!(reply["jsonrpc"], "2.0");
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"], json!({"ok": true}));
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_unknown_method_is_answered_with_its_id() {
    let (mut client, _log) = client();

    client.send(json!({"method": "unknown.op", "id": 2})).await;
    let reply = client.recv().await;

    assert_eq!(reply["id"], 2);
    assert_eq!(reply["error"]["code"], -32601);
    assert_eq!(reply["error"]["message"], "method not found: unknown.op");
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_id_beyond_i64_is_answered_verbatim() {
    let (mut client, _log) = client();

    client
        .send_bytes(br#"{"jsonrpc":"2.0","method":"ping","id":18446744073709551615,"params":{}}"#)
        .await;
    let reply = client.recv().await;

    assert_eq!(reply["id"], json!(u64::MAX));
    assert_eq!(reply["result"]["ok"], true);
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_the_connection() {
    let (mut client, _log) = client();

    client.send(json!({"method": "boom", "id": 5})).await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], 5);
    assert_eq!(reply["error"]["message"], "boom");
    assert!(reply.get("result").is_none());

    client.send(json!({"method": "ping", "id": 6, "params": {}})).await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], 6);
    assert_eq!(reply["result"]["ok"], true);
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_notification_gets_no_reply_but_runs() {
    let (mut client, log) = client();

    client
        .send(json!({"method": "log", "params": {"msg": "hi"}}))
        .await;
    client.expect_silence(Duration::from_millis(200)).await;
    assert_eq!(*log.lock().unwrap(), vec!["hi".to_string()]);

    // A failing notification handler is silent as well
    client.send(json!({"method": "explode"})).await;
    client.send(json!({"method": "unregistered/note"})).await;
    client.expect_silence(Duration::from_millis(200)).await;
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_eof_stops_the_stream_binding_cleanly() {
    let (client, _log) = client();
    assert!(client.finish().await.is_ok());
}

#[tokio::test]
async fn test_handler_error_becomes_error_reply() {
    let (mut client, _log) = client();

    client.send(json!({"method": "fail", "id": "f-1"})).await;
    let reply = client.recv().await;

    assert_eq!(reply["id"], "f-1");
    assert_eq!(reply["error"]["message"], "no luck");
    assert_eq!(reply["error"]["data"], json!({"code": 7}));
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_handler_without_reply_gets_internal_error() {
    let (mut client, _log) = client();

    client.send(json!({"method": "silent", "id": 9})).await;
    let reply = client.recv().await;

    assert_eq!(reply["id"], 9);
    assert_eq!(reply["error"]["code"], -32603);
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_detached_context_replies_once() {
    let (mut client, _log) = client();

    client.send(json!({"method": "detached", "id": 11})).await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], 11);
    assert_eq!(reply["result"], "late");

    client.expect_silence(Duration::from_millis(200)).await;
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_invalid_params_are_rejected() {
    let (mut client, _log) = client();

    client
        .send(json!({"method": "slow", "id": 3, "params": {"ms": "soon"}}))
        .await;
    let reply = client.recv().await;

    assert_eq!(reply["id"], 3);
    assert_eq!(reply["error"]["code"], -32602);
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frames_do_not_end_the_connection() {
    let (mut client, _log) = client();

    // Not JSON: no id to answer, dropped
    client.send_bytes(b"{not json").await;
    // Invalid shape with a recoverable id: answered
    client.send(json!({"id": 4, "method": 42})).await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], 4);
    assert_eq!(reply["error"]["code"], -32600);

    client.send(json!({"method": "ping", "id": 5, "params": {}})).await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], 5);
    assert_eq!(reply["result"]["ok"], true);
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_replies_complete_out_of_order() {
    let (mut client, _log) = client();

    client
        .send(json!({"method": "slow", "id": 1, "params": {"ms": 300}}))
        .await;
    client.send(json!({"method": "ping", "id": 2, "params": {}})).await;

    let first = client.recv().await;
    let second = client.recv().await;
    assert_eq!(first["id"], 2);
    assert_eq!(first["result"]["ok"], true);
    assert_eq!(second["id"], 1);
    assert_eq!(second["result"]["slept"], 300);
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_in_flight_id_is_rejected() {
    let (mut client, _log) = client();

    client
        .send(json!({"method": "slow", "id": 7, "params": {"ms": 200}}))
        .await;
    client.send(json!({"method": "ping", "id": 7, "params": {}})).await;

    let rejection = client.recv().await;
    assert_eq!(rejection["id"], 7);
    assert_eq!(rejection["error"]["code"], -32600);
    assert!(
        rejection["error"]["message"]
            .as_str()
            .unwrap()
            .contains("duplicate request id")
    );

    let reply = client.recv().await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["slept"], 200);

    // The id is free again once answered
    client.send(json!({"method": "ping", "id": 7, "params": {}})).await;
    assert_eq!(client.recv().await["result"]["ok"], true);
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_server_to_client_request() {
    let (mut client, _log) = client();

    client.send(json!({"method": "ask", "id": 20})).await;
    let question = client.recv().await;
    assert_eq!(question["method"], "client/question");
    assert_eq!(question["params"]["q"], "name?");

    client
        .send(json!({"jsonrpc": "2.0", "id": question["id"].clone(), "result": "dbtools"}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], 20);
    assert_eq!(reply["result"]["answer"], "dbtools");
    client.finish().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_token_stops_the_binding() {
    let (client, _log) = client();
    client.shutdown.cancel();

    let result = tokio::time::timeout(super::REPLY_TIMEOUT, client.server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
