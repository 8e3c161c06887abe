use serde_json::{Map, Value};
use tokio::time::timeout_at;
use tracing::{info, warn};

use super::{Stage, StageContext};
use crate::error::StageResult;
use crate::extract::record_reasoning;
use crate::knowledge::{format_context, KnowledgeDocument};
use crate::prompts;
use crate::state::{Delta, Investigation, ReasoningStep};

const SEARCH_TOOL: &str = "knowledge.search_knowledge";
const QUERY_PREVIEW_CHARS: usize = 100;

/// Retrieval failures degrade to an ungrounded answer.
async fn retrieve(ctx: &StageContext, inv: &Investigation) -> Vec<KnowledgeDocument> {
    match timeout_at(ctx.deadline, ctx.knowledge.search(&inv.query)).await {
        Ok(Ok(docs)) => docs,
        Ok(Err(e)) => {
            warn!(investigation_id = %inv.id, error = %e, "Knowledge retrieval failed, answering without context");
            Vec::new()
        }
        Err(_) => {
            warn!(investigation_id = %inv.id, "Knowledge retrieval timed out, answering without context");
            Vec::new()
        }
    }
}

fn retrieval_step(agent: &str, query: &str, docs: &[KnowledgeDocument]) -> ReasoningStep {
    let preview: String = query.chars().take(QUERY_PREVIEW_CHARS).collect();
    let mut input = Map::new();
    input.insert("search_query".to_string(), Value::String(preview.clone()));

    let titles = docs
        .iter()
        .map(|d| d.title.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    ReasoningStep {
        tool_result: Some(titles),
        ..ReasoningStep::tool_call(
            agent,
            format!("Retrieved {} relevant knowledge documents", docs.len()),
            SEARCH_TOOL,
            input,
            Some(format!("Semantic search: '{}' -> {} results", preview, docs.len())),
        )
    }
}

/// Answer a conceptual question, grounded on retrieved documents when any.
pub async fn run(ctx: &StageContext, inv: &Investigation) -> StageResult<Delta> {
    let agent = ctx.agents.knowledge.as_str();
    let mut delta = Delta::default().step(ReasoningStep::thinking(
        agent,
        "This is a knowledge question. Searching the knowledge base for relevant documents before answering.",
    ));

    let docs = retrieve(ctx, inv).await;
    if !docs.is_empty() {
        delta = delta.step(retrieval_step(agent, &inv.query, &docs));
    }
    info!(investigation_id = %inv.id, documents = docs.len(), "Knowledge context retrieved");

    let message = prompts::knowledge_message(&inv.query, &format_context(&docs));
    let reply = ctx
        .call_agent(Stage::Knowledge, agent, &message, inv.conversation(agent))
        .await?;
    delta = delta.conversation(agent, reply.conversation_id.as_deref());
    delta.reasoning_trace.extend(record_reasoning(agent, &reply));

    let conclusion = if docs.is_empty() {
        "Knowledge question answered from general expertise.".to_string()
    } else {
        format!("Knowledge question answered using {} retrieved document(s).", docs.len())
    };
    delta = delta
        .step(ReasoningStep::conclusion(agent, conclusion))
        .progress("Knowledge question answered");
    delta.direct_response = Some(reply.text);
    Ok(delta)
}
