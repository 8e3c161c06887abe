//! Unit tests for MCP protocol implementation.
//!
//! Tests JSON-RPC 2.0 request/response handling, tool definitions,
//! and the investigation tools end to end against a scripted agent.

use super::*;
use crate::server::test_support::test_state;
use crate::server::INVESTIGATION_NOTIFICATION;
use serde_json::json;
use std::time::Duration;

fn server() -> McpServer {
    McpServer::new(test_state(vec![(
        "CLASSIFY",
        Ok(r#"{"route": "greeting"}"#),
        0,
    )]))
}

fn tool_text(response: &JsonRpcResponse) -> String {
    response.result.as_ref().unwrap()["content"][0]["text"]
        .as_str()
        .unwrap()
        .to_string()
}

// ============================================================================
// JsonRpcResponse tests
// ============================================================================

#[test]
fn test_jsonrpc_response_success_with_id() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"result": "ok"}));

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, json!(1));
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap()["result"], "ok");
}

#[test]
fn test_jsonrpc_response_error_without_id() {
    let response = JsonRpcResponse::error(None, -32700, "Parse error");

    assert_eq!(response.id, Value::Null);
    assert_eq!(response.error.unwrap().code, -32700);
}

#[test]
fn test_jsonrpc_response_serialization_omits_error() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"test": true}));
    let serialized = serde_json::to_string(&response).unwrap();

    assert!(serialized.contains("\"jsonrpc\":\"2.0\""));
    assert!(!serialized.contains("\"error\""));
}

#[test]
fn test_notification_serialization() {
    let notification = JsonRpcNotification::new("notifications/investigation", json!({"x": 1}));
    let value = serde_json::to_value(&notification).unwrap();
    assert_eq!(value["method"], "notifications/investigation");
    assert!(value.get("id").is_none());
}

// ============================================================================
// Tool definitions
// ============================================================================

#[test]
fn test_tool_definitions() {
    let names: Vec<String> = tool_definitions().into_iter().map(|t| t.name).collect();
    assert_eq!(
        names,
        vec![
            "investigation_submit",
            "investigation_get",
            "investigation_list",
            "investigation_subscribe",
            "investigation_signals",
            "investigation_reports",
            "report_get",
            "service_health"
        ]
    );
    for tool in tool_definitions() {
        assert_eq!(tool.input_schema["type"], "object");
    }
}

// ============================================================================
// Request dispatch
// ============================================================================

#[tokio::test]
async fn test_parse_error() {
    let response = server().handle_line("{not json").await.unwrap();
    assert_eq!(response.error.unwrap().code, -32700);
}

#[tokio::test]
async fn test_blank_line_and_notifications_get_no_response() {
    let server = server();
    assert!(server.handle_line("").await.is_none());
    assert!(server
        .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await
        .is_none());
}

#[tokio::test]
async fn test_initialize() {
    let response = server()
        .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#)
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["serverInfo"]["name"], "signal-triage");
    assert_eq!(result["protocolVersion"], "2024-11-05");
}

#[tokio::test]
async fn test_unknown_method() {
    let response = server()
        .handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#)
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32601);
}

#[tokio::test]
async fn test_unknown_tool_is_tool_error() {
    let response = server()
        .handle_line(
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"reasoning_linear","arguments":{}}}"#,
        )
        .await
        .unwrap();
    assert_eq!(response.result.as_ref().unwrap()["isError"], true);
    assert!(tool_text(&response).contains("Unknown tool"));
}

#[tokio::test]
async fn test_get_unknown_investigation() {
    let response = server()
        .handle_line(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"investigation_get","arguments":{"investigation_id":"INV-MISSING"}}}"#,
        )
        .await
        .unwrap();
    assert!(tool_text(&response).contains("Investigation not found: INV-MISSING"));
}

#[tokio::test]
async fn test_submit_then_get() {
    let server = server();
    let response = server
        .handle_line(
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"investigation_submit","arguments":{"query":"hello"}}}"#,
        )
        .await
        .unwrap();
    let submission: Value = serde_json::from_str(&tool_text(&response)).unwrap();
    let id = submission["investigation_id"].as_str().unwrap().to_string();
    assert_eq!(submission["status"], "routing");

    let mut status = Value::Null;
    for _ in 0..50 {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {"name": "investigation_get", "arguments": {"investigation_id": id}}
        });
        let response = server.handle_line(&request.to_string()).await.unwrap();
        let snapshot: Value = serde_json::from_str(&tool_text(&response)).unwrap();
        status = snapshot["status"].clone();
        if status == "complete" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, "complete");
}

#[tokio::test]
async fn test_subscribe_pushes_notifications() {
    let mut server = server();
    let mut rx = server.outbound_rx.take().unwrap();

    let state = server.state.clone();
    let inv = state.orchestrator.investigate("hello").await.unwrap();
    let request = json!({
        "jsonrpc": "2.0",
        "id": 6,
        "method": "tools/call",
        "params": {"name": "investigation_subscribe", "arguments": {"investigation_id": inv.id}}
    });
    let response = server.handle_line(&request.to_string()).await.unwrap();
    assert!(tool_text(&response).contains("\"subscribed\": true"));

    let line = rx.recv().await.unwrap();
    let notification: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(notification["method"], INVESTIGATION_NOTIFICATION);
    assert_eq!(notification["params"]["event"]["type"], "current_state");
    assert_eq!(notification["params"]["event"]["data"]["status"], "complete");
}

fn call(id: u32, tool: &str, arguments: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": tool, "arguments": arguments}
    })
    .to_string()
}

#[tokio::test]
async fn test_signal_and_report_tools() {
    let server = McpServer::new(test_state(vec![
        ("CLASSIFY", Ok(r#"{"route": "report", "drug_name": "Cardizol-X"}"#), 0),
        ("Signal Assessment Report", Ok("# Cardizol-X report\nCRITICAL findings."), 0),
    ]));
    let inv = server
        .state
        .orchestrator
        .investigate("Report on Cardizol-X")
        .await
        .unwrap();

    let response = server
        .handle_line(&call(8, "investigation_signals", json!({})))
        .await
        .unwrap();
    let signals: Value = serde_json::from_str(&tool_text(&response)).unwrap();
    assert_eq!(signals["count"], 1);
    assert_eq!(signals["signals"][0]["investigation_id"], inv.id.as_str());
    assert!(signals["signals"][0].get("evidence").is_none());

    let response = server
        .handle_line(&call(9, "investigation_reports", json!({})))
        .await
        .unwrap();
    let reports: Value = serde_json::from_str(&tool_text(&response)).unwrap();
    assert_eq!(reports["reports"][0]["risk_level"], "CRITICAL");
    assert_eq!(reports["reports"][0]["has_report"], true);

    let response = server
        .handle_line(&call(
            10,
            "report_get",
            json!({"investigation_id": inv.id, "drug": "cardizol-x"}),
        ))
        .await
        .unwrap();
    let report: Value = serde_json::from_str(&tool_text(&response)).unwrap();
    assert!(report["report_text"].as_str().unwrap().contains("Cardizol-X report"));

    let response = server
        .handle_line(&call(
            11,
            "report_get",
            json!({"investigation_id": inv.id, "drug": "Neurofen-Plus"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.result.as_ref().unwrap()["isError"], true);
    assert!(tool_text(&response).contains("No report found for Neurofen-Plus"));
}

#[tokio::test]
async fn test_service_health_tool() {
    let server = server();
    let response = server
        .handle_line(&call(12, "service_health", json!({})))
        .await
        .unwrap();
    let health: Value = serde_json::from_str(&tool_text(&response)).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["agent"]["status"], "connected");
    assert_eq!(health["investigations_count"], 0);
}
