use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Agent service failure.
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Knowledge search failure.
    #[error("Knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    /// A stage failed.
    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    /// MCP protocol failure.
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// No investigation with this id is registered.
    #[error("Investigation not found: {investigation_id}")]
    NotFound { investigation_id: String },

    /// The investigation has no report for this drug.
    #[error("No report found for {drug} in {investigation_id}")]
    ReportNotFound {
        investigation_id: String,
        drug: String,
    },
}

/// Agent capability errors
#[derive(Debug, Error)]
pub enum AgentError {
    /// Retries exhausted on transient failures.
    #[error("Agent unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    /// Retries exhausted on 429 responses.
    #[error("Rate limited by agent service after {retries} retries")]
    RateLimited { retries: u32 },

    /// Non-retryable error status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Body could not be decoded.
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// Request exceeded its timeout.
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Knowledge retrieval errors
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Error status from the search service.
    #[error("Search API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Body could not be decoded.
    #[error("Invalid search response: {message}")]
    InvalidResponse { message: String },

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Stage execution errors
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage's agent call failed.
    #[error("{stage} agent call failed: {source}")]
    Agent {
        stage: String,
        #[source]
        source: AgentError,
    },

    /// The investigation deadline passed mid-stage.
    #[error("{stage} exceeded the investigation deadline")]
    TimedOut { stage: String },

    /// Preconditions for the stage were not met.
    #[error("{stage} cannot run: {reason}")]
    Invalid { stage: String, reason: String },
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    /// No tool with this name.
    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// Arguments missing or of the wrong shape.
    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    /// The underlying operation failed.
    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    /// Result could not be serialized.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for agent calls
pub type AgentResult<T> = Result<T, AgentError>;

/// Result type alias for knowledge retrieval
pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

/// Result type alias for stage execution
pub type StageResult<T> = Result<T, StageError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
