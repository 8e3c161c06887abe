use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{AgentHealth, AgentReply, ConnectionStatus, ConverseRequest};
use super::AgentCapability;
use crate::config::{AgentServiceConfig, RequestConfig};
use crate::error::{AgentError, AgentResult};

/// Upper bound on a single transient-failure backoff.
const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// Outcome of a single HTTP attempt
enum Attempt {
    RateLimited { retry_after_secs: Option<u64> },
    Failed(AgentError),
}

/// Client for the agent converse API
#[derive(Clone)]
pub struct AgentClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl AgentClient {
    /// Create a new agent client
    pub fn new(config: &AgentServiceConfig, request_config: RequestConfig) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(AgentError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a converse request, retrying on rate limits and transient failures
    pub async fn converse(&self, request: ConverseRequest) -> AgentResult<AgentReply> {
        let url = format!("{}/api/agent_builder/converse", self.base_url);
        let agent_id = request.agent_id.clone();

        let mut rate_limit_hits = 0;
        let mut retries = 0;

        loop {
            let start = Instant::now();

            match self.execute_request(&url, &request).await {
                Ok(raw) => {
                    let reply =
                        AgentReply::from_raw(&agent_id, raw, request.conversation_id.as_deref());
                    info!(
                        agent = %agent_id,
                        latency_ms = start.elapsed().as_millis(),
                        reply_chars = reply.text.len(),
                        tool_calls = reply.tool_calls.len(),
                        "Agent call succeeded"
                    );
                    return Ok(reply);
                }
                Err(Attempt::RateLimited { retry_after_secs }) => {
                    if rate_limit_hits >= self.request_config.rate_limit_retries {
                        error!(agent = %agent_id, retries = rate_limit_hits, "Rate limit retries exhausted");
                        return Err(AgentError::RateLimited {
                            retries: rate_limit_hits,
                        });
                    }
                    rate_limit_hits += 1;
                    let wait = self.rate_limit_wait(retry_after_secs);
                    warn!(
                        agent = %agent_id,
                        retry = rate_limit_hits,
                        max = self.request_config.rate_limit_retries,
                        wait_secs = wait.as_secs(),
                        "Rate limited (429), waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(Attempt::Failed(e)) => {
                    error!(
                        agent = %agent_id,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Agent call failed"
                    );
                    if !is_transient(&e) {
                        return Err(e);
                    }
                    if retries >= self.request_config.max_retries {
                        return Err(AgentError::Unavailable {
                            message: e.to_string(),
                            retries,
                        });
                    }
                    retries += 1;
                    let delay = self.retry_delay(retries);
                    warn!(
                        agent = %agent_id,
                        retry = retries,
                        delay_ms = delay.as_millis(),
                        "Retrying agent request"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Exponential backoff for the `retry`-th attempt, saturating and capped.
    fn retry_delay(&self, retry: u32) -> Duration {
        let factor = 2_u64.saturating_pow(retry.saturating_sub(1));
        let ms = self
            .request_config
            .retry_delay_ms
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY_MS);
        Duration::from_millis(ms)
    }

    /// Query the service status endpoint. Never fails; problems are reported
    /// in the returned value.
    pub async fn status(&self) -> AgentHealth {
        let url = format!("{}/api/status", self.base_url);
        let response = match self
            .client
            .get(&url)
            .header("Authorization", format!("ApiKey {}", self.api_key))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Agent service unreachable");
                return AgentHealth::failed(ConnectionStatus::Unreachable, e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Agent service status check failed");
            return AgentHealth::failed(ConnectionStatus::Error, status.as_u16().to_string());
        }

        let version = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| {
                body.pointer("/version/number")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        AgentHealth::connected(Some(version.unwrap_or_else(|| "unknown".to_string())))
    }

    fn rate_limit_wait(&self, retry_after_secs: Option<u64>) -> Duration {
        let secs = retry_after_secs
            .unwrap_or(self.request_config.rate_limit_default_wait_secs)
            .min(self.request_config.rate_limit_max_wait_secs);
        Duration::from_secs(secs)
    }

    /// Execute a single request (internal)
    async fn execute_request(&self, url: &str, request: &ConverseRequest) -> Result<Value, Attempt> {
        debug!(
            agent = %request.agent_id,
            preview = %request.input.chars().take(100).collect::<String>(),
            "Calling agent"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("ApiKey {}", self.api_key))
            .header("kbn-xsrf", "true")
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                Attempt::Failed(if e.is_timeout() {
                    AgentError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    AgentError::Http(e)
                })
            })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(Attempt::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Attempt::Failed(AgentError::Api {
                status: status.as_u16(),
                message: error_body,
            }));
        }

        response.json::<Value>().await.map_err(|e| {
            Attempt::Failed(AgentError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
        })
    }
}

fn is_transient(err: &AgentError) -> bool {
    match err {
        AgentError::Http(_) | AgentError::Timeout { .. } => true,
        AgentError::Api { status, .. } => *status >= 500,
        _ => false,
    }
}

#[async_trait]
impl AgentCapability for AgentClient {
    async fn call(
        &self,
        agent_id: &str,
        message: &str,
        conversation_id: Option<&str>,
    ) -> AgentResult<AgentReply> {
        let mut request = ConverseRequest::new(agent_id, message);
        if let Some(id) = conversation_id {
            request = request.with_conversation(id);
        }
        self.converse(request).await
    }

    async fn health(&self) -> AgentHealth {
        self.status().await
    }
}
