use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{JsonRpcNotification, Outbound, SharedState};
use crate::error::{McpError, McpResult};

/// Method name of pushed investigation events.
pub const INVESTIGATION_NOTIFICATION: &str = "notifications/investigation";

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    outbound: &Outbound,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "investigation_submit" => handle_submit(state, arguments).await,
        "investigation_get" => handle_get(state, arguments).await,
        "investigation_list" => handle_list(state).await,
        "investigation_subscribe" => handle_subscribe(state, outbound, arguments).await,
        "investigation_signals" => handle_signals(state).await,
        "investigation_reports" => handle_reports(state).await,
        "report_get" => handle_report_get(state, arguments).await,
        "service_health" => handle_health(state).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

#[derive(serde::Deserialize)]
struct SubmitParams {
    query: String,
}

#[derive(serde::Deserialize)]
struct InvestigationParams {
    investigation_id: String,
}

#[derive(serde::Deserialize)]
struct ReportParams {
    investigation_id: String,
    drug: String,
}

async fn handle_submit(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: SubmitParams = parse_arguments("investigation_submit", arguments)?;
    if params.query.trim().is_empty() {
        return Err(McpError::InvalidParameters {
            tool_name: "investigation_submit".to_string(),
            message: "query must not be empty".to_string(),
        });
    }

    let submission = state.orchestrator.submit(&params.query).await;
    serde_json::to_value(submission).map_err(McpError::Json)
}

async fn handle_get(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "investigation_get",
        arguments,
        |params: InvestigationParams| async move {
            state.orchestrator.get(&params.investigation_id).await
        },
    )
    .await
}

async fn handle_list(state: &SharedState) -> McpResult<Value> {
    let investigations = state.orchestrator.list().await;
    Ok(json!({
        "count": investigations.len(),
        "investigations": investigations,
    }))
}

async fn handle_signals(state: &SharedState) -> McpResult<Value> {
    let signals = state.orchestrator.signals().await;
    Ok(json!({
        "count": signals.len(),
        "signals": signals,
    }))
}

async fn handle_reports(state: &SharedState) -> McpResult<Value> {
    let reports = state.orchestrator.reports().await;
    Ok(json!({
        "count": reports.len(),
        "reports": reports,
    }))
}

async fn handle_report_get(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("report_get", arguments, |params: ReportParams| async move {
        state
            .orchestrator
            .report(&params.investigation_id, &params.drug)
            .await
    })
    .await
}

async fn handle_health(state: &SharedState) -> McpResult<Value> {
    let health = state.orchestrator.health().await;
    serde_json::to_value(health).map_err(McpError::Json)
}

/// Start forwarding events as notifications and acknowledge the subscription.
async fn handle_subscribe(
    state: &SharedState,
    outbound: &Outbound,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: InvestigationParams = parse_arguments("investigation_subscribe", arguments)?;
    let id = params.investigation_id;

    let mut stream = state
        .orchestrator
        .subscribe(&id)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    let outbound = outbound.clone();
    let task_id = id.clone();
    tokio::spawn(async move {
        let mut forwarded = 0usize;
        while let Some(event) = stream.next().await {
            let notification = JsonRpcNotification::new(
                INVESTIGATION_NOTIFICATION,
                json!({ "investigation_id": task_id, "event": event }),
            );
            let Ok(line) = serde_json::to_string(&notification) else {
                continue;
            };
            if outbound.send(line).is_err() {
                break;
            }
            forwarded += 1;
        }
        debug!(investigation_id = %task_id, forwarded, "Subscription stream ended");
    });

    Ok(json!({
        "investigation_id": id,
        "subscribed": true,
        "notification_method": INVESTIGATION_NOTIFICATION,
    }))
}

fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Parse typed arguments, run the operation, serialize its result.
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}
