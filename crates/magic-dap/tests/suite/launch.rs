use std::sync::Arc;
use std::time::Duration;

use magic_config::DebugConfig;
use magic_dap::Backend;
use magic_script::{DebugHooks, Executable, InMemoryResolver, ScriptEngine, ScriptError};
use serde_json::{json, Map, Value};

use crate::harness::{backend, console_envelope, find_event, is_event, source, Client};

const USER_LIST: &str = "var x = 5\nvar y = x + 1\nreturn y";
const USER_LIST_PATH: &str = "magic-api:/api/user/list.ms";

#[tokio::test]
async fn breakpoint_continue_result_terminated() {
    let mut client = Client::spawn(backend(&[("api/user/list", USER_LIST)], 5_000));

    let launch = client.initialize_and_launch("api/user/list").await;
    assert_eq!(launch["success"], true, "{launch}");
    client.wait_for_event("initialized").await;

    let resp = client
        .request(
            "setBreakpoints",
            json!({ "source": source(USER_LIST_PATH), "breakpoints": [{ "line": 2 }] }),
        )
        .await;
    assert_eq!(resp["success"], true, "{resp}");
    let bps = resp["body"]["breakpoints"].as_array().unwrap();
    assert_eq!(bps.len(), 1);
    assert_eq!(bps[0]["verified"], true);
    assert_eq!(bps[0]["line"], 2);

    let start = client.wait_for_console("start").await;
    assert_eq!(start["source"], USER_LIST_PATH);
    assert_eq!(start["data"]["normalizedSource"], "api/user/list.ms");

    let stopped = client.wait_for_event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    assert_eq!(stopped["body"]["threadId"], 1);

    let pause = client.wait_for_console("pause").await;
    assert_eq!(pause["data"]["variables"]["x"], 5);
    // Console ranges stay in instrumented coordinates.
    assert_eq!(pause["data"]["range"][0], 3);

    let trace = client.request("stackTrace", json!({ "threadId": 1 })).await;
    let frames = trace["body"]["stackFrames"].as_array().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["line"], 2);
    assert_eq!(frames[0]["column"], 1);
    assert_eq!(frames[0]["name"], "Magic Script");
    assert_eq!(frames[0]["source"]["path"], USER_LIST_PATH);
    assert_eq!(trace["body"]["totalFrames"], 1);

    let cont = client.request("continue", json!({ "threadId": 1 })).await;
    assert_eq!(cont["success"], true);
    assert_eq!(cont["body"]["allThreadsContinued"], true);
    client.wait_for_event("continued").await;

    let result = client.wait_for_console("result").await;
    assert_eq!(result["data"], 6);
    client.wait_for_event("terminated").await;

    client.request("disconnect", json!({})).await;
    let messages = client.drain().await;
    let terminated = messages
        .iter()
        .filter(|msg| is_event(msg, "terminated"))
        .count();
    assert_eq!(terminated, 1);
}

#[tokio::test]
async fn execution_starts_after_timeout_without_breakpoints() {
    let mut client = Client::spawn(backend(&[("api/user/list", USER_LIST)], 50));

    let launch = client.initialize_and_launch("api/user/list").await;
    assert_eq!(launch["success"], true);

    let notice = client
        .wait_for_output("console", "were not received within 50ms")
        .await;
    assert!(notice["body"]["output"]
        .as_str()
        .unwrap()
        .contains(USER_LIST_PATH));

    let result = client.wait_for_console("result").await;
    assert_eq!(result["data"], 6);
    client.wait_for_event("terminated").await;

    // A late setBreakpoints neither restarts nor pauses the finished run.
    client
        .request(
            "setBreakpoints",
            json!({ "source": source(USER_LIST_PATH), "breakpoints": [{ "line": 1 }] }),
        )
        .await;
    client.request("disconnect", json!({})).await;
    let messages = client.drain().await;
    assert!(find_event(&messages, "stopped").is_none());
    let starts = messages
        .iter()
        .filter_map(console_envelope)
        .filter(|env| env["event"] == "start")
        .count();
    assert_eq!(starts, 1);
}

#[tokio::test]
async fn nothing_runs_before_matching_breakpoints_arrive() {
    let mut client = Client::spawn(backend(&[("api/user/list", USER_LIST)], 10_000));
    client.initialize_and_launch("api/user/list").await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    // Breakpoints for another script do not release the launched one.
    client
        .request(
            "setBreakpoints",
            json!({ "source": source("magic-api:/api/other.ms"), "breakpoints": [{ "line": 1 }] }),
        )
        .await;
    client.request("threads", json!({})).await;
    assert!(
        client.history().iter().all(|msg| console_envelope(msg).is_none()),
        "script started early: {:?}",
        client.history()
    );

    // Type-stripped, percent-encoded form of the same source.
    client
        .request(
            "setBreakpoints",
            json!({ "source": source("magic-api:/user%2Flist.ms"), "breakpoints": [{ "line": 1 }] }),
        )
        .await;
    let stopped = client.wait_for_event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");

    let trace = client.request("stackTrace", json!({ "threadId": 1 })).await;
    assert_eq!(trace["body"]["stackFrames"][0]["line"], 1);

    client.request("disconnect", json!({})).await;
    client.drain().await;
}

#[tokio::test]
async fn empty_breakpoint_list_starts_execution() {
    let mut client = Client::spawn(backend(&[("api/user/list", USER_LIST)], 10_000));
    client.initialize_and_launch("api/user/list").await;

    client
        .request(
            "setBreakpoints",
            json!({ "source": source(USER_LIST_PATH), "breakpoints": [] }),
        )
        .await;
    let result = client.wait_for_console("result").await;
    assert_eq!(result["data"], 6);
    client.wait_for_event("terminated").await;

    client.request("disconnect", json!({})).await;
    client.drain().await;
}

#[tokio::test]
async fn compile_failure_is_fatal() {
    let mut client = Client::spawn(backend(&[("api/broken", "var a = 1\nthis is not valid")], 50));

    let launch = client.initialize_and_launch("api/broken").await;
    assert_eq!(launch["success"], false);
    let message = launch["message"].as_str().unwrap();
    assert!(message.contains("line 2"), "{message}");
    client.wait_for_event("terminated").await;

    client.request("disconnect", json!({})).await;
    let messages = client.drain().await;
    assert!(find_event(&messages, "initialized").is_none());
    let terminated = messages
        .iter()
        .filter(|msg| is_event(msg, "terminated"))
        .count();
    assert_eq!(terminated, 1);
}

#[tokio::test]
async fn compile_error_on_first_line_reports_line_one() {
    let mut client = Client::spawn(backend(&[("api/broken", "this is not valid")], 50));

    let launch = client.initialize_and_launch("api/broken").await;
    assert_eq!(launch["success"], false);
    let message = launch["message"].as_str().unwrap();
    assert!(message.contains("line 1:"), "{message}");
    client.wait_for_event("terminated").await;

    client.request("disconnect", json!({})).await;
    client.drain().await;
}

#[tokio::test]
async fn unknown_script_is_fatal() {
    let mut client = Client::spawn(backend(&[], 50));

    let launch = client.initialize_and_launch("api/missing").await;
    assert_eq!(launch["success"], false);
    assert_eq!(launch["message"], "script not found: api/missing");
    client.wait_for_event("terminated").await;

    client.request("disconnect", json!({})).await;
    client.drain().await;
}

#[tokio::test]
async fn launch_without_program_is_rejected() {
    let mut client = Client::spawn(backend(&[], 50));
    client.request("initialize", json!({})).await;

    let launch = client.request("launch", json!({ "noDebug": false })).await;
    assert_eq!(launch["success"], false);
    assert!(launch["message"]
        .as_str()
        .unwrap()
        .starts_with("invalid launch configuration"));

    // `fileKey` is accepted as an alias.
    let mut client2 = Client::spawn(backend(&[("api/user/list", USER_LIST)], 50));
    client2.request("initialize", json!({})).await;
    let launch = client2
        .request("launch", json!({ "fileKey": "api/user/list" }))
        .await;
    assert_eq!(launch["success"], true, "{launch}");
    client2.wait_for_console("result").await;

    client.request("disconnect", json!({})).await;
    client.drain().await;
    client2.request("disconnect", json!({})).await;
    client2.drain().await;
}

#[tokio::test]
async fn script_output_is_relayed_line_by_line() {
    let script = "print \"hello\"\nwrite \"partial\"\neprint \"oops\"\nreturn 1";
    let mut client = Client::spawn(backend(&[("api/echo", script)], 10_000));
    client.initialize_and_launch("api/echo").await;
    client
        .request(
            "setBreakpoints",
            json!({ "source": source("magic-api:/api/echo.ms"), "breakpoints": [] }),
        )
        .await;

    let hello = client.wait_for_output("stdout", "hello").await;
    assert_eq!(hello["body"]["output"], "hello\n");
    let oops = client.wait_for_output("stderr", "oops").await;
    assert_eq!(oops["body"]["output"], "oops\n");
    // The unterminated write is flushed when the script finishes.
    let partial = client.wait_for_output("stdout", "partial").await;
    assert_eq!(partial["body"]["output"], "partial");
    client.wait_for_console("result").await;

    client.request("disconnect", json!({})).await;
    client.drain().await;
}

#[tokio::test]
async fn runtime_errors_are_reported_on_the_console() {
    let mut client = Client::spawn(backend(&[("api/fail", "throw \"boom\"")], 10_000));
    client.initialize_and_launch("api/fail").await;
    client
        .request(
            "setBreakpoints",
            json!({ "source": source("magic-api:/api/fail.ms"), "breakpoints": [] }),
        )
        .await;

    let error = client.wait_for_console("error").await;
    assert_eq!(error["data"]["message"], "boom");
    client.wait_for_event("terminated").await;

    client.request("disconnect", json!({})).await;
    client.drain().await;
}

struct PanickingEngine;

impl ScriptEngine for PanickingEngine {
    fn compile(&self, _text: &str) -> Result<Arc<dyn Executable>, ScriptError> {
        Ok(Arc::new(PanickingEngine))
    }

    fn evaluate(&self, _expression: &str, _scope: &Map<String, Value>) -> Result<Value, ScriptError> {
        Ok(Value::Null)
    }
}

impl Executable for PanickingEngine {
    fn execute(&self, _hooks: &dyn DebugHooks, _env: Map<String, Value>) -> Result<Value, ScriptError> {
        panic!("datasource `primary` is not configured");
    }
}

#[tokio::test]
async fn script_panic_reports_its_message() {
    let resolver = InMemoryResolver::new();
    resolver.insert_text("api/panics", "return 1");
    let backend = Backend::new(Arc::new(resolver), Arc::new(PanickingEngine)).with_config(DebugConfig {
        start_timeout_ms: 50,
        start_poll_interval_ms: 10,
        ..DebugConfig::default()
    });
    let mut client = Client::spawn(backend);

    let launch = client.initialize_and_launch("api/panics").await;
    assert_eq!(launch["success"], true, "{launch}");

    let error = client.wait_for_console("error").await;
    assert_eq!(
        error["data"]["message"],
        "script execution panicked: datasource `primary` is not configured"
    );
    client.wait_for_event("terminated").await;

    client.request("disconnect", json!({})).await;
    client.drain().await;
}
