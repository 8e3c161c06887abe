use tracing::info;

use super::{Stage, StageContext};
use crate::error::StageResult;
use crate::extract::record_reasoning;
use crate::prompts;
use crate::state::{Delta, Investigation, ReasoningStep};

/// Quick factual answer from a single agent call.
///
/// Entity-scoped questions go to the investigator, database-wide ones to the
/// scanner.
pub async fn run(ctx: &StageContext, inv: &Investigation) -> StageResult<Delta> {
    let drug = inv.drug.as_deref();
    let agent = match drug {
        Some(_) => ctx.agents.investigator.as_str(),
        None => ctx.agents.scanner.as_str(),
    };

    let mut delta = Delta::default().step(ReasoningStep::thinking(
        agent,
        match drug {
            Some(drug) => format!("Answering a data question scoped to {}. Querying the adverse event index directly.", drug),
            None => "Answering a data question across the adverse event database.".to_string(),
        },
    ));

    let message = prompts::direct_query_message(&inv.query, drug);
    let reply = ctx
        .call_agent(Stage::DirectQuery, agent, &message, inv.conversation(agent))
        .await?;
    delta = delta.conversation(agent, reply.conversation_id.as_deref());

    delta.reasoning_trace.extend(record_reasoning(agent, &reply));
    info!(
        investigation_id = %inv.id,
        agent = %agent,
        tool_calls = reply.tool_calls.len(),
        "Direct query answered"
    );

    delta = delta
        .step(ReasoningStep::conclusion(agent, "Data query answered."))
        .progress("Data query completed");
    delta.direct_response = Some(reply.text);
    Ok(delta)
}
