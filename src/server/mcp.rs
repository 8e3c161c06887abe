//! MCP protocol implementation for JSON-RPC 2.0 communication.
//!
//! Requests arrive as newline-delimited JSON on stdin. Responses and
//! subscription notifications share one outbound queue drained by a single
//! stdout writer task, so lines never interleave.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null if the request could not be parsed).
    pub id: Value,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (e.g., -32700 for parse error).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-initiated JSON-RPC notification.
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Notification method name.
    pub method: String,
    /// Notification payload.
    pub params: Value,
}

impl JsonRpcNotification {
    /// Create a notification with the given method and payload.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Server identification.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

/// Server capabilities advertised during initialization.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

/// Tool capabilities configuration.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change at runtime.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// MCP protocol version.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Server identification.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Tool name used in tools/call.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema for the arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// Content type (always "text").
    #[serde(rename = "type")]
    pub content_type: String,
    /// Pretty-printed JSON result or error text.
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// Result content items.
    pub content: Vec<ToolResultContent>,
    /// Set when the tool failed.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Queue of serialized lines bound for stdout.
pub type Outbound = UnboundedSender<String>;

/// MCP server running over stdio.
pub struct McpServer {
    state: SharedState,
    outbound: Outbound,
    outbound_rx: Option<UnboundedReceiver<String>>,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        let (outbound, outbound_rx) = unbounded_channel();
        Self {
            state,
            outbound,
            outbound_rx: Some(outbound_rx),
        }
    }

    /// Run the server using async stdio.
    ///
    /// After EOF, returns once every open subscription stream has drained.
    pub async fn run(mut self) -> std::io::Result<()> {
        info!("Signal triage server starting...");

        let writer = self.outbound_rx.take().map(|mut rx| {
            tokio::spawn(async move {
                let mut stdout = tokio::io::stdout();
                while let Some(line) = rx.recv().await {
                    debug!(response = %line, "Sending message");
                    stdout.write_all(line.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
                Ok::<(), std::io::Error>(())
            })
        });

        let mut reader = BufReader::new(tokio::io::stdin());
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            if let Some(response) = self.handle_line(line.trim()).await {
                self.send(&response);
            }
        }

        drop(self);
        if let Some(writer) = writer {
            match writer.await {
                Ok(result) => result?,
                Err(e) => error!(error = %e, "Writer task failed"),
            }
        }
        Ok(())
    }

    fn send<T: Serialize>(&self, message: &T) {
        match serde_json::to_string(message) {
            Ok(line) => {
                if self.outbound.send(line).is_err() {
                    error!("Outbound queue closed, dropping message");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize outbound message"),
        }
    }

    /// Parse and dispatch one input line.
    ///
    /// Returns None for blank lines and notifications.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        if line.is_empty() {
            return None;
        }
        debug!(request = %line, "Received request");

        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                error!(error = %e, "Failed to parse request");
                Some(JsonRpcResponse::error(
                    None,
                    -32700,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    /// Handle a single JSON-RPC request
    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" | "notifications/initialized" | "notifications/cancelled" => {
                debug!(method = %request.method, "Received notification");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "signal-triage".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");
        JsonRpcResponse::success(id, json!({ "tools": tool_definitions() }))
    }

    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let (content, is_error) =
            match handle_tool_call(&self.state, &self.outbound, &params.name, params.arguments)
                .await
            {
                Ok(result) => {
                    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                        error!(error = %e, "Failed to serialize tool result");
                        format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                    });
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text,
                        },
                        None,
                    )
                }
                Err(e) => (
                    ToolResultContent {
                        content_type: "text".to_string(),
                        text: format!("Error: {}", e),
                    },
                    Some(true),
                ),
            };

        let tool_result = ToolCallResult {
            content: vec![content],
            is_error,
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }
}

/// Every tool advertised by `tools/list`.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        get_submit_tool(),
        get_get_tool(),
        get_list_tool(),
        get_subscribe_tool(),
        get_signals_tool(),
        get_reports_tool(),
        get_report_tool(),
        get_health_tool(),
    ]
}

fn no_arguments_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "additionalProperties": false
    })
}

fn investigation_id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "investigation_id": {
                "type": "string",
                "description": "Investigation identifier returned by investigation_submit"
            }
        },
        "required": ["investigation_id"],
        "additionalProperties": false
    })
}

fn get_submit_tool() -> Tool {
    Tool {
        name: "investigation_submit".to_string(),
        description: "Submit a free-text drug safety request. Classifies intent, starts the matching pipeline in the background and returns the investigation id.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The request, e.g. 'Investigate Cardizol-X for cardiac safety signals'"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

fn get_get_tool() -> Tool {
    Tool {
        name: "investigation_get".to_string(),
        description: "Read the full current snapshot of an investigation: status, route, signals, sub-investigations, reports, progress and reasoning trace.".to_string(),
        input_schema: investigation_id_schema(),
    }
}

fn get_list_tool() -> Tool {
    Tool {
        name: "investigation_list".to_string(),
        description: "List every known investigation with its status and counters.".to_string(),
        input_schema: no_arguments_schema(),
    }
}

fn get_subscribe_tool() -> Tool {
    Tool {
        name: "investigation_subscribe".to_string(),
        description: "Stream live progress for an investigation as 'notifications/investigation' messages, starting with a current_state snapshot.".to_string(),
        input_schema: investigation_id_schema(),
    }
}

fn get_signals_tool() -> Tool {
    Tool {
        name: "investigation_signals".to_string(),
        description: "List every flagged signal across investigations, tagged with its investigation id. Raw scanner text is omitted.".to_string(),
        input_schema: no_arguments_schema(),
    }
}

fn get_reports_tool() -> Tool {
    Tool {
        name: "investigation_reports".to_string(),
        description: "List report metadata across investigations: drug, reaction, risk level and whether a report body exists.".to_string(),
        input_schema: no_arguments_schema(),
    }
}

fn get_report_tool() -> Tool {
    Tool {
        name: "report_get".to_string(),
        description: "Read one generated safety report by investigation id and drug name. The drug name is matched case-insensitively.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "investigation_id": {
                    "type": "string",
                    "description": "Investigation identifier returned by investigation_submit"
                },
                "drug": {
                    "type": "string",
                    "description": "Drug name the report covers"
                }
            },
            "required": ["investigation_id", "drug"],
            "additionalProperties": false
        }),
    }
}

fn get_health_tool() -> Tool {
    Tool {
        name: "service_health".to_string(),
        description: "Report agent service reachability and how many investigations are registered and running.".to_string(),
        input_schema: no_arguments_schema(),
    }
}
