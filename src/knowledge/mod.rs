//! Knowledge-base retrieval.
//!
//! Documents retrieved here are injected into knowledge-stage prompts as
//! attributed grounding context. Semantic search is tried first; a keyword
//! query is issued when the semantic index is unavailable or returns nothing.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::KnowledgeConfig;
use crate::error::{KnowledgeError, KnowledgeResult};

/// A ranked knowledge-base document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    /// Document title.
    pub title: String,
    /// Topic category.
    #[serde(default)]
    pub category: String,
    /// Body text.
    #[serde(default)]
    pub content: String,
}

/// Retrieval capability used by the knowledge stage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    /// Return documents ranked by relevance to `query`.
    async fn search(&self, query: &str) -> KnowledgeResult<Vec<KnowledgeDocument>>;
}

/// Search client for an Elasticsearch-compatible `_search` endpoint.
#[derive(Clone)]
pub struct KnowledgeClient {
    client: Client,
    base_url: String,
    api_key: String,
    index: String,
    max_results: usize,
}

impl KnowledgeClient {
    /// Create a new knowledge client
    pub fn new(config: &KnowledgeConfig, timeout_ms: u64) -> KnowledgeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(KnowledgeError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            index: config.index.clone(),
            max_results: config.max_results,
        })
    }

    fn semantic_body(&self, query: &str) -> Value {
        json!({
            "query": {
                "semantic": {
                    "field": "content_semantic",
                    "query": query,
                }
            },
            "size": self.max_results,
            "_source": ["title", "category", "content"],
        })
    }

    fn keyword_body(&self, query: &str) -> Value {
        json!({
            "query": {
                "multi_match": {
                    "query": query,
                    "fields": ["title^3", "content"],
                    "type": "best_fields",
                    "fuzziness": "AUTO",
                }
            },
            "size": self.max_results,
            "_source": ["title", "category", "content"],
        })
    }

    async fn run_search(&self, body: &Value) -> KnowledgeResult<Vec<KnowledgeDocument>> {
        let url = format!("{}/{}/_search", self.base_url, self.index);

        let mut request = self.client.post(&url).json(body);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("ApiKey {}", self.api_key));
        }

        let response = request.send().await?;
        let status = response.status();

        // A missing index is an empty result, not a failure.
        if status.as_u16() == 404 {
            return Ok(Vec::new());
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(KnowledgeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| KnowledgeError::InvalidResponse {
                message: e.to_string(),
            })?;

        Ok(parse_hits(&body))
    }
}

/// Extract `_source` documents from a search response body
pub fn parse_hits(body: &Value) -> Vec<KnowledgeDocument> {
    body.get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("_source"))
                .filter_map(|source| serde_json::from_value(source.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl KnowledgeSearch for KnowledgeClient {
    async fn search(&self, query: &str) -> KnowledgeResult<Vec<KnowledgeDocument>> {
        match self.run_search(&self.semantic_body(query)).await {
            Ok(docs) if !docs.is_empty() => {
                info!(hits = docs.len(), "Semantic search returned documents");
                return Ok(docs);
            }
            Ok(_) => debug!("Semantic search returned no hits, trying keyword search"),
            Err(e) => warn!(error = %e, "Semantic search unavailable, falling back to keyword search"),
        }

        let docs = self.run_search(&self.keyword_body(query)).await?;
        info!(hits = docs.len(), "Keyword search completed");
        Ok(docs)
    }
}

/// Format documents as attributed grounding context.
pub fn format_context(docs: &[KnowledgeDocument]) -> String {
    docs.iter()
        .map(|doc| {
            let content: String = doc.content.chars().take(2000).collect();
            format!("--- {} ({}) ---\n{}", doc.title, doc.category, content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
