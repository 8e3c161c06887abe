//! Integration tests for knowledge retrieval
//!
//! Verifies semantic-first search with keyword fallback against a mocked
//! `_search` endpoint.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use signal_triage::config::KnowledgeConfig;
use signal_triage::knowledge::{KnowledgeClient, KnowledgeSearch};

fn create_test_client(base_url: &str, api_key: &str) -> KnowledgeClient {
    let config = KnowledgeConfig {
        base_url: base_url.to_string(),
        api_key: api_key.to_string(),
        index: "knowledge_base".to_string(),
        max_results: 3,
    };
    KnowledgeClient::new(&config, 5000).expect("Failed to create client")
}

fn hits(titles: &[&str]) -> serde_json::Value {
    json!({
        "hits": {
            "hits": titles
                .iter()
                .map(|t| json!({"_source": {"title": t, "category": "methodology", "content": "..."}}))
                .collect::<Vec<_>>()
        }
    })
}

#[tokio::test]
async fn test_semantic_search_used_first() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/knowledge_base/_search"))
        .and(header("Authorization", "ApiKey kb-key"))
        .and(body_partial_json(json!({"query": {"semantic": {"field": "content_semantic"}}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(&["PRR methodology"])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), "kb-key");
    let docs = client.search("What is PRR?").await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].title, "PRR methodology");
}

#[tokio::test]
async fn test_keyword_fallback_when_semantic_fails() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/knowledge_base/_search"))
        .and(body_partial_json(json!({"query": {"semantic": {"field": "content_semantic"}}})))
        .respond_with(ResponseTemplate::new(400).set_body_string("no semantic field"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/knowledge_base/_search"))
        .and(body_partial_json(json!({"query": {"multi_match": {"fuzziness": "AUTO"}}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(&["ROR", "Signal detection"])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), "");
    let docs = client.search("What is ROR?").await.unwrap();
    let titles: Vec<&str> = docs.iter().map(|d| d.title.as_str()).collect();
    assert_eq!(titles, vec!["ROR", "Signal detection"]);
}

#[tokio::test]
async fn test_missing_index_is_empty() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/knowledge_base/_search"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), "");
    assert!(client.search("anything").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_keyword_failure_is_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/knowledge_base/_search"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), "");
    assert!(client.search("anything").await.is_err());
}
