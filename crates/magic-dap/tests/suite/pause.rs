use magic_script::ScriptError;
use serde_json::{json, Value};

use crate::harness::gated::{gated_backend, Gate, BLOCKING_STATEMENT, RESULT};
use crate::harness::{console_envelope, is_event, source, Client};

const PATH: &str = "magic-api:/api/gated.ms";

/// A launched gated script, blocked inside its second statement.
async fn running() -> (Client, Gate) {
    let (backend, mut gate) = gated_backend(50);
    let mut client = Client::spawn(backend);
    let launch = client.initialize_and_launch("api/gated").await;
    assert_eq!(launch["success"], true, "{launch}");
    gate.entered().await;
    (client, gate)
}

fn stopped_reasons(messages: &[Value]) -> Vec<Value> {
    messages
        .iter()
        .filter(|msg| is_event(msg, "stopped"))
        .map(|msg| msg["body"]["reason"].clone())
        .collect()
}

async fn finish(mut client: Client) -> Vec<Value> {
    client.request("disconnect", json!({})).await;
    client.drain().await
}

#[tokio::test]
async fn pause_while_running_stops_at_the_next_statement() {
    let (mut client, mut gate) = running().await;

    let resp = client.request("pause", json!({ "threadId": 1 })).await;
    assert_eq!(resp["success"], true, "{resp}");
    let stopped = client.wait_for_event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "pause");
    assert_eq!(stopped["body"]["threadId"], 1);

    gate.release();
    let stopped = client.wait_for_event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "pause");
    let trace = client.request("stackTrace", json!({ "threadId": 1 })).await;
    assert_eq!(
        trace["body"]["stackFrames"][0]["line"],
        BLOCKING_STATEMENT + 1
    );

    let resp = client.request("continue", json!({ "threadId": 1 })).await;
    assert_eq!(resp["success"], true);
    let result = client.wait_for_console("result").await;
    assert_eq!(result["data"], RESULT);
    assert_eq!(gate.finished().await, Ok(json!(RESULT)));

    let messages = finish(client).await;
    assert_eq!(stopped_reasons(&messages), vec![json!("pause"), json!("pause")]);
}

#[tokio::test]
async fn continue_before_the_next_statement_cancels_the_pause() {
    let (mut client, mut gate) = running().await;

    client.request("pause", json!({ "threadId": 1 })).await;
    client.wait_for_event("stopped").await;
    let resp = client.request("continue", json!({ "threadId": 1 })).await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["body"]["allThreadsContinued"], true);
    client.wait_for_event("continued").await;

    gate.release();
    let result = client.wait_for_console("result").await;
    assert_eq!(result["data"], RESULT);
    assert_eq!(gate.finished().await, Ok(json!(RESULT)));

    let messages = finish(client).await;
    assert_eq!(stopped_reasons(&messages), vec![json!("pause")]);
    assert!(!messages
        .iter()
        .filter_map(console_envelope)
        .any(|env| env["event"] == "pause"));
}

#[tokio::test]
async fn pause_after_the_script_finished_is_a_noop() {
    let (mut client, mut gate) = running().await;
    gate.release();
    client.wait_for_console("result").await;
    assert_eq!(gate.finished().await, Ok(json!(RESULT)));

    let resp = client.request("pause", json!({ "threadId": 1 })).await;
    assert_eq!(resp["success"], true);

    let messages = finish(client).await;
    assert!(stopped_reasons(&messages).is_empty());
}

#[tokio::test]
async fn closed_transport_releases_a_paused_script() {
    let (backend, mut gate) = gated_backend(10_000);
    let mut client = Client::spawn(backend);
    let launch = client.initialize_and_launch("api/gated").await;
    assert_eq!(launch["success"], true, "{launch}");
    client
        .request(
            "setBreakpoints",
            json!({ "source": source(PATH), "breakpoints": [{ "line": 1 }] }),
        )
        .await;
    let stopped = client.wait_for_event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");

    client.close_input().await;

    assert_eq!(gate.finished().await, Err(ScriptError::Aborted));
    let messages = client.drain().await;
    assert!(!messages
        .iter()
        .filter_map(console_envelope)
        .any(|env| env["event"] == "result"));
}
