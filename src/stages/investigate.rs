use tracing::{info, warn};

use super::{first_conversation, join_within, Branch, Stage, StageContext};
use crate::error::StageResult;
use crate::extract::record_reasoning;
use crate::prompts;
use crate::state::{Delta, Investigation, ReasoningStep, SignalRecord, SubInvestigationRecord};

/// Signals to work on, synthesizing a placeholder for a directly named entity.
///
/// Returns the items plus any synthesized signal that must be recorded.
pub fn signals_or_placeholder(inv: &Investigation) -> (Vec<SignalRecord>, Option<SignalRecord>) {
    if !inv.signals.is_empty() {
        return (inv.signals.clone(), None);
    }
    match &inv.drug {
        Some(drug) => {
            let placeholder = SignalRecord::placeholder(drug, inv.reaction.as_deref());
            info!(
                investigation_id = %inv.id,
                drug = %drug,
                "No scanner signals, synthesizing direct investigation signal"
            );
            (vec![placeholder.clone()], Some(placeholder))
        }
        None => (Vec::new(), None),
    }
}

async fn investigate_one(
    ctx: &StageContext,
    index: usize,
    total: usize,
    signal: &SignalRecord,
) -> StageResult<Branch<SubInvestigationRecord>> {
    let agent = ctx.agents.investigator.as_str();
    let mut steps = vec![ReasoningStep::thinking(
        agent,
        format!(
            "Investigating signal {}/{}: {} -> {} (PRR: {}, Spike: {}x). Querying demographics, concomitant medications, and outcome severity.",
            index + 1,
            total,
            signal.drug,
            signal.reaction,
            signal.strength,
            signal.spike_ratio
        ),
    )];

    let message = prompts::investigation_message(
        &signal.drug,
        &signal.reaction,
        signal.strength,
        signal.case_count,
        signal.spike_ratio,
    );
    // Branches run concurrently, so each opens its own conversation.
    let reply = ctx
        .call_agent(Stage::Investigate, agent, &message, None)
        .await?;

    steps.extend(record_reasoning(agent, &reply));
    let record = SubInvestigationRecord::from_findings(&signal.drug, &signal.reaction, reply.text);
    steps.push(ReasoningStep::conclusion(
        agent,
        format!(
            "Investigation of {} -> {} complete. {}",
            signal.drug,
            signal.reaction,
            if record.interaction_detected {
                "Drug interaction detected."
            } else {
                "No significant drug interactions found."
            }
        ),
    ));

    Ok(Branch {
        record,
        steps,
        conversation_id: reply.conversation_id,
    })
}

/// Investigate every signal concurrently.
pub async fn run(ctx: &StageContext, inv: &Investigation) -> StageResult<Delta> {
    let (signals, synthesized) = signals_or_placeholder(inv);
    let mut delta = Delta::default();
    delta.signals.extend(synthesized);

    if signals.is_empty() {
        return Ok(delta.progress("No signals to investigate"));
    }

    let agent = ctx.agents.investigator.as_str();
    let total = signals.len();
    delta = delta.step(ReasoningStep::thinking(
        agent,
        format!(
            "Beginning deep investigation of {} flagged signal(s). Will analyze demographics, drug interactions, outcome severity, and geographic patterns for each.",
            total
        ),
    ));

    let results = join_within(
        Stage::Investigate,
        ctx.deadline,
        signals
            .iter()
            .enumerate()
            .map(|(i, signal)| investigate_one(ctx, i, total, signal)),
    )
    .await;

    delta = delta.conversation(agent, first_conversation(&results));

    let mut degraded = 0;
    for (signal, result) in signals.iter().zip(results) {
        match result {
            Ok(branch) => {
                delta.reasoning_trace.extend(branch.steps);
                delta.sub_investigations.push(branch.record);
            }
            Err(e) => {
                degraded += 1;
                warn!(
                    investigation_id = %inv.id,
                    drug = %signal.drug,
                    error = %e,
                    "Investigation branch failed"
                );
                let message = e.to_string();
                delta.sub_investigations.push(SubInvestigationRecord::degraded(
                    &signal.drug,
                    &signal.reaction,
                    &message,
                ));
                delta.reasoning_trace.push(ReasoningStep::conclusion(
                    agent,
                    format!("Investigation of {} failed: {}", signal.drug, message),
                ));
            }
        }
    }

    info!(
        investigation_id = %inv.id,
        investigated = total,
        degraded,
        "Investigation fan-out joined"
    );

    Ok(delta.progress(format!(
        "Case investigation completed: {} signal(s) investigated",
        total
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{context, context_for, ConversationAgent};
    use crate::state::{Priority, StepType};
    use std::sync::Arc;

    fn inv_with_signals(drugs: &[&str]) -> Investigation {
        let mut inv = Investigation::new("INV-1", "scan");
        inv.signals = drugs
            .iter()
            .map(|d| SignalRecord::new(*d, "Hepatotoxicity"))
            .collect();
        inv
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order_under_uneven_latency() {
        let ctx = context(vec![
            ("Drug: Slow", Ok("Slow findings."), 80),
            ("Drug: Medium", Ok("Medium findings."), 30),
            ("Drug: Fast", Ok("Fast findings."), 0),
        ]);
        let inv = inv_with_signals(&["Slow", "Medium", "Fast"]);
        let delta = run(&ctx, &inv).await.unwrap();

        let drugs: Vec<&str> = delta
            .sub_investigations
            .iter()
            .map(|s| s.drug.as_str())
            .collect();
        assert_eq!(drugs, vec!["Slow", "Medium", "Fast"]);
        assert_eq!(delta.sub_investigations[0].findings, "Slow findings.");
        assert!(delta.signals.is_empty());
    }

    #[tokio::test]
    async fn test_branch_failure_is_degraded_not_fatal() {
        let ctx = context(vec![
            ("Drug: Broken", Err(502), 0),
            ("Drug: Fine", Ok("Potential interaction detected with warfarin."), 0),
        ]);
        let inv = inv_with_signals(&["Broken", "Fine"]);
        let delta = run(&ctx, &inv).await.unwrap();

        assert_eq!(delta.sub_investigations.len(), 2);
        assert!(delta.sub_investigations[0].degraded);
        assert!(delta.sub_investigations[0].findings.starts_with("Error:"));
        assert!(!delta.sub_investigations[1].degraded);
        assert!(delta.sub_investigations[1].interaction_detected);
    }

    #[tokio::test]
    async fn test_placeholder_for_direct_request() {
        let ctx = context(vec![("Drug: Cardizol-X", Ok("Findings."), 0)]);
        let mut inv = Investigation::new("INV-1", "Investigate Cardizol-X");
        inv.drug = Some("Cardizol-X".into());
        let delta = run(&ctx, &inv).await.unwrap();

        assert_eq!(delta.signals.len(), 1);
        assert_eq!(delta.signals[0].priority, Priority::Unknown);
        assert_eq!(delta.signals[0].reaction, "All adverse events");
        assert_eq!(delta.sub_investigations.len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_investigate() {
        let ctx = context(Vec::new());
        let inv = Investigation::new("INV-1", "scan");
        let delta = run(&ctx, &inv).await.unwrap();
        assert!(delta.sub_investigations.is_empty());
        assert!(delta.reasoning_trace.is_empty());
    }

    #[tokio::test]
    async fn test_steps_grouped_per_branch_in_input_order() {
        let ctx = context(vec![
            ("Drug: A", Ok("a."), 40),
            ("Drug: B", Ok("b."), 0),
        ]);
        let inv = inv_with_signals(&["A", "B"]);
        let delta = run(&ctx, &inv).await.unwrap();

        let conclusions: Vec<&str> = delta
            .reasoning_trace
            .iter()
            .filter(|s| s.step_type == StepType::Conclusion)
            .map(|s| s.content.as_str())
            .collect();
        assert!(conclusions[0].contains("A -> Hepatotoxicity"));
        assert!(conclusions[1].contains("B -> Hepatotoxicity"));
    }

    #[tokio::test]
    async fn test_branches_open_fresh_conversations_and_one_is_recorded() {
        let agent = Arc::new(ConversationAgent::default());
        let ctx = context_for(agent.clone());
        let investigator = ctx.agents.investigator.clone();

        let mut inv = inv_with_signals(&["A", "B"]);
        inv.merge(Delta::default().conversation(&investigator, Some("conv-old")));
        let delta = run(&ctx, &inv).await.unwrap();

        let calls = agent.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(_, conversation)| conversation.is_none()));
        assert_eq!(
            delta.conversations.get(&investigator),
            Some(&format!("conv-{}", investigator))
        );
    }
}
