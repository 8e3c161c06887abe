use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request body for the converse endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ConverseRequest {
    /// Target agent.
    pub agent_id: String,
    /// Message text.
    pub input: String,
    /// Conversation to continue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ConverseRequest {
    /// Create a new converse request
    pub fn new(agent_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            input: input.into(),
            conversation_id: None,
        }
    }

    /// Continue an existing conversation
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// A tool invocation recorded by the agent while answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Tool identifier (e.g. `safety.calculate_reporting_ratio`).
    pub tool_id: String,
    /// Tool parameters. Always a JSON object.
    pub input: Map<String, Value>,
    /// Raw tool output, `Value::Null` when the agent reported none.
    pub result: Value,
}

/// Normalized agent reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    /// Agent that answered.
    pub agent_id: String,
    /// Final reply text.
    pub text: String,
    /// Conversation the reply belongs to, for follow-up calls.
    pub conversation_id: Option<String>,
    /// Tool invocations in call order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Untouched response body.
    #[serde(default)]
    pub raw: Value,
}

/// Reachability of the agent service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Status endpoint answered with success.
    Connected,
    /// Status endpoint answered with an error status.
    Error,
    /// No answer at all.
    Unreachable,
}

/// Result of an agent service status check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    /// Reachability.
    pub status: ConnectionStatus,
    /// Service version when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Error status code or transport failure text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AgentHealth {
    /// Connected, optionally reporting a version.
    pub fn connected(version: Option<String>) -> Self {
        Self {
            status: ConnectionStatus::Connected,
            version,
            detail: None,
        }
    }

    /// Not connected, with a reason.
    pub fn failed(status: ConnectionStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            version: None,
            detail: Some(detail.into()),
        }
    }

    /// Whether the service is usable.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

fn first_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find(|v| !v.is_null())
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl ToolCallRecord {
    /// Normalize one tool call, accepting both camelCase and snake_case callee schemas.
    pub fn from_value(value: &Value) -> Self {
        let tool_id = first_field(value, &["toolId", "tool_id", "name"])
            .and_then(Value::as_str)
            .unwrap_or("unknown_tool")
            .to_string();

        let input = first_field(value, &["parameters", "params", "input", "args"])
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let result = first_field(value, &["result", "results", "output"])
            .cloned()
            .unwrap_or(Value::Null);

        Self {
            tool_id,
            input,
            result,
        }
    }

    /// String parameter lookup
    pub fn param(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }

    /// Whether this record carries a non-empty result
    pub fn has_result(&self) -> bool {
        match &self.result {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            _ => true,
        }
    }
}

impl AgentReply {
    /// Build a reply from a raw converse response body.
    ///
    /// Text lookup order: `response.message` (or `response` as a plain string),
    /// top-level `message`, the last `text`/`reasoning` step, then `output`.
    pub fn from_raw(
        agent_id: impl Into<String>,
        raw: Value,
        requested_conversation: Option<&str>,
    ) -> Self {
        let text = Self::extract_text(&raw);

        let conversation_id = non_empty_str(first_field(&raw, &["conversation_id", "conversationId"]))
            .or_else(|| requested_conversation.map(str::to_string));

        let mut tool_calls: Vec<ToolCallRecord> = first_field(&raw, &["tool_calls", "toolCalls"])
            .and_then(Value::as_array)
            .map(|calls| calls.iter().map(ToolCallRecord::from_value).collect())
            .unwrap_or_default();

        if tool_calls.is_empty() {
            tool_calls = raw
                .get("steps")
                .and_then(Value::as_array)
                .map(|steps| {
                    steps
                        .iter()
                        .filter(|s| s.get("type").and_then(Value::as_str) == Some("tool_call"))
                        .map(ToolCallRecord::from_value)
                        .collect()
                })
                .unwrap_or_default();
        }

        Self {
            agent_id: agent_id.into(),
            text,
            conversation_id,
            tool_calls,
            raw,
        }
    }

    fn extract_text(raw: &Value) -> String {
        if let Some(response) = raw.get("response") {
            let nested = match response {
                Value::Object(_) => non_empty_str(response.get("message")),
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            };
            if let Some(text) = nested {
                return text;
            }
        }

        if let Some(text) = non_empty_str(raw.get("message")) {
            return text;
        }

        if let Some(steps) = raw.get("steps").and_then(Value::as_array) {
            for step in steps.iter().rev() {
                let field = match step.get("type").and_then(Value::as_str) {
                    Some("text") => "text",
                    Some("reasoning") => "reasoning",
                    _ => continue,
                };
                if let Some(text) = non_empty_str(step.get(field)) {
                    return text;
                }
            }
        }

        non_empty_str(raw.get("output")).unwrap_or_default()
    }
}
