use tracing::info;

use super::{Stage, StageContext};
use crate::error::StageResult;
use crate::extract::{extract_signals, record_reasoning};
use crate::prompts::DEFAULT_SCAN_QUERY;
use crate::state::{Delta, Investigation, ReasoningStep};

/// Broad surveillance scan: one scanner call, signals mined from its reply.
pub async fn run(ctx: &StageContext, inv: &Investigation) -> StageResult<Delta> {
    let agent = ctx.agents.scanner.as_str();
    let query = if inv.query.trim().is_empty() {
        DEFAULT_SCAN_QUERY
    } else {
        inv.query.as_str()
    };

    let mut delta = Delta::default().step(ReasoningStep::thinking(
        agent,
        "Starting signal surveillance scan. Analyzing adverse event reporting for anomalies.",
    ));

    let reply = ctx
        .call_agent(Stage::Scan, agent, query, inv.conversation(agent))
        .await?;
    delta = delta.conversation(agent, reply.conversation_id.as_deref());
    delta.reasoning_trace.extend(record_reasoning(agent, &reply));

    let mut signals = extract_signals(&reply.text, &reply.tool_calls);
    for signal in &mut signals {
        signal.evidence = reply.text.clone();
    }

    info!(
        investigation_id = %inv.id,
        signals = signals.len(),
        "Signal scan completed"
    );

    let conclusion = if signals.is_empty() {
        "Signal scan complete. No statistically significant safety signals detected in the current window.".to_string()
    } else {
        let listed = signals
            .iter()
            .map(|s| format!("{} -> {} (PRR: {})", s.drug, s.reaction, s.strength))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Signal scan complete. Detected {} potential safety signal(s): {}.",
            signals.len(),
            listed
        )
    };

    let progress = format!("Signal scan completed: {} signal(s) detected", signals.len());
    delta.signals = signals;
    Ok(delta
        .step(ReasoningStep::conclusion(agent, conclusion))
        .progress(progress))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{context, context_for, ConversationAgent};
    use crate::state::StepType;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scan_extracts_signals_with_evidence() {
        let ctx = context(vec![(
            "Scan",
            Ok("Let me review the last 90 days of reports.\nFLAGGED SIGNAL: Cardizol-X → QT Prolongation\n- PRR: 6.1\n- Priority: HIGH"),
            0,
        )]);
        let inv = Investigation::new("INV-1", "Scan for emerging signals");
        let delta = run(&ctx, &inv).await.unwrap();

        assert_eq!(delta.signals.len(), 1);
        assert_eq!(delta.signals[0].drug, "Cardizol-X");
        assert!(delta.signals[0].evidence.contains("FLAGGED SIGNAL"));
        assert_eq!(delta.reasoning_trace.first().map(|s| s.step_type), Some(StepType::Thinking));
        assert_eq!(delta.reasoning_trace.last().map(|s| s.step_type), Some(StepType::Conclusion));
    }

    #[tokio::test]
    async fn test_scan_failure_propagates() {
        let ctx = context(vec![("Scan", Err(500), 0)]);
        let inv = Investigation::new("INV-1", "Scan for emerging signals");
        let err = run(&ctx, &inv).await.unwrap_err();
        assert!(err.to_string().starts_with("scan agent call failed"));
    }

    #[tokio::test]
    async fn test_scan_continues_and_records_scanner_conversation() {
        let agent = Arc::new(ConversationAgent::default());
        let ctx = context_for(agent.clone());
        let scanner = ctx.agents.scanner.clone();

        let mut inv = Investigation::new("INV-1", "Scan for emerging signals");
        inv.merge(Delta::default().conversation(&scanner, Some("conv-earlier")));
        let delta = run(&ctx, &inv).await.unwrap();

        let calls = agent.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(scanner.clone(), Some("conv-earlier".to_string()))]);
        assert_eq!(
            delta.conversations.get(&scanner).map(String::as_str),
            Some(format!("conv-{}", scanner).as_str())
        );
    }
}
