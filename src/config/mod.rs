use std::env;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Agent service connection.
    pub agent: AgentServiceConfig,
    /// Knowledge search connection.
    pub knowledge: KnowledgeConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// HTTP timeouts and retries.
    pub request: RequestConfig,
    /// Agent id per role.
    pub agents: AgentIds,
    /// Investigation limits.
    pub orchestrator: OrchestratorConfig,
}

/// Agent service connection
#[derive(Debug, Clone)]
pub struct AgentServiceConfig {
    /// API key sent as `ApiKey <key>`.
    pub api_key: String,
    /// Service base URL.
    pub base_url: String,
}

/// Knowledge retrieval service connection
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Search service base URL.
    pub base_url: String,
    /// API key, empty for unauthenticated clusters.
    pub api_key: String,
    /// Index holding the knowledge documents.
    pub index: String,
    /// Documents retrieved per question.
    pub max_results: usize,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Retries for transport failures and 5xx responses.
    pub max_retries: u32,
    /// Base delay, doubled on each retry.
    pub retry_delay_ms: u64,
    /// Retries for 429 responses, independent of `max_retries`.
    pub rate_limit_retries: u32,
    /// Wait used when a 429 carries no `Retry-After`.
    pub rate_limit_default_wait_secs: u64,
    /// Cap on any 429 wait.
    pub rate_limit_max_wait_secs: u64,
}

/// Agent identifiers used by each stage
#[derive(Debug, Clone)]
pub struct AgentIds {
    /// Intent classifier.
    pub classifier: String,
    /// Signal scanner.
    pub scanner: String,
    /// Case investigator.
    pub investigator: String,
    /// Safety reporter.
    pub reporter: String,
    /// Knowledge answerer.
    pub knowledge: String,
}

/// Investigation lifecycle limits
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wall-clock budget for one investigation.
    pub investigation_timeout_ms: u64,
    /// Registry bound on finished investigations.
    pub max_investigations: usize,
    /// Earlier queries shown to the classifier.
    pub history_window: usize,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let agent = AgentServiceConfig {
            api_key: env::var("AGENT_API_KEY").map_err(|_| AppError::Config {
                message: "AGENT_API_KEY is required".to_string(),
            })?,
            base_url: env_or("AGENT_BASE_URL", "http://localhost:5601"),
        };

        let knowledge = KnowledgeConfig {
            base_url: env_or("KNOWLEDGE_BASE_URL", "http://localhost:9200"),
            api_key: env_or("KNOWLEDGE_API_KEY", ""),
            index: env_or("KNOWLEDGE_INDEX", "knowledge_base"),
            max_results: env_parse("KNOWLEDGE_MAX_RESULTS", 3),
        };

        let logging = LoggingConfig {
            level: env_or("LOG_LEVEL", "info"),
            format: match env_or("LOG_FORMAT", "pretty").to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let defaults = RequestConfig::default();
        let request = RequestConfig {
            timeout_ms: env_parse("REQUEST_TIMEOUT_MS", defaults.timeout_ms),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_parse("RETRY_DELAY_MS", defaults.retry_delay_ms),
            rate_limit_retries: env_parse("RATE_LIMIT_RETRIES", defaults.rate_limit_retries),
            rate_limit_default_wait_secs: env_parse(
                "RATE_LIMIT_DEFAULT_WAIT_SECS",
                defaults.rate_limit_default_wait_secs,
            ),
            rate_limit_max_wait_secs: env_parse(
                "RATE_LIMIT_MAX_WAIT_SECS",
                defaults.rate_limit_max_wait_secs,
            ),
        };

        let agents = AgentIds {
            classifier: env_or("AGENT_CLASSIFIER", "master_orchestrator"),
            scanner: env_or("AGENT_SCANNER", "signal_scanner"),
            investigator: env_or("AGENT_INVESTIGATOR", "case_investigator"),
            reporter: env_or("AGENT_REPORTER", "safety_reporter"),
            knowledge: env_or("AGENT_KNOWLEDGE", "master_orchestrator"),
        };

        let orchestrator_defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            investigation_timeout_ms: env_parse(
                "INVESTIGATION_TIMEOUT_MS",
                orchestrator_defaults.investigation_timeout_ms,
            ),
            max_investigations: env_parse(
                "MAX_INVESTIGATIONS",
                orchestrator_defaults.max_investigations,
            ),
            history_window: env_parse("HISTORY_WINDOW", orchestrator_defaults.history_window),
        };

        Ok(Config {
            agent,
            knowledge,
            logging,
            request,
            agents,
            orchestrator,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            max_retries: 2,
            retry_delay_ms: 1000,
            rate_limit_retries: 3,
            rate_limit_default_wait_secs: 20,
            rate_limit_max_wait_secs: 60,
        }
    }
}

impl Default for AgentIds {
    fn default() -> Self {
        Self {
            classifier: "master_orchestrator".to_string(),
            scanner: "signal_scanner".to_string(),
            investigator: "case_investigator".to_string(),
            reporter: "safety_reporter".to_string(),
            knowledge: "master_orchestrator".to_string(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            investigation_timeout_ms: 600_000,
            max_investigations: 256,
            history_window: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_config_defaults() {
        let config = RequestConfig::default();
        assert_eq!(config.timeout_ms, 120_000);
        assert_eq!(config.rate_limit_retries, 3);
        assert_eq!(config.rate_limit_default_wait_secs, 20);
    }

    #[test]
    fn test_agent_ids_defaults() {
        let ids = AgentIds::default();
        assert_eq!(ids.classifier, "master_orchestrator");
        assert_eq!(ids.scanner, "signal_scanner");
        assert_eq!(ids.reporter, "safety_reporter");
    }

    #[test]
    fn test_orchestrator_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_investigations, 256);
        assert_eq!(config.history_window, 3);
    }
}
