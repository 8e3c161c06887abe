use tracing::{info, warn};

use super::investigate::signals_or_placeholder;
use super::{first_conversation, join_within, Branch, Stage, StageContext};
use crate::error::StageResult;
use crate::extract::record_reasoning;
use crate::prompts;
use crate::state::{Delta, Investigation, ReasoningStep, ReportRecord, RiskLevel, SignalRecord};

/// One report to generate.
#[derive(Debug, Clone)]
struct ReportItem {
    drug: String,
    reaction: String,
    findings: String,
}

/// Work items: investigation findings first, otherwise the signals themselves.
fn report_items(inv: &Investigation, delta: &mut Delta) -> Vec<ReportItem> {
    if !inv.sub_investigations.is_empty() {
        return inv
            .sub_investigations
            .iter()
            .map(|s| ReportItem {
                drug: s.drug.clone(),
                reaction: s.reaction.clone(),
                findings: s.findings.clone(),
            })
            .collect();
    }

    let (signals, synthesized) = signals_or_placeholder(inv);
    delta.signals.extend(synthesized);
    signals
        .into_iter()
        .map(|s| ReportItem {
            drug: s.drug,
            reaction: s.reaction,
            findings: String::new(),
        })
        .collect()
}

async fn report_one(
    ctx: &StageContext,
    item: &ReportItem,
    signal: Option<&SignalRecord>,
    seed: RiskLevel,
) -> StageResult<Branch<ReportRecord>> {
    let agent = ctx.agents.reporter.as_str();
    let mut steps = vec![ReasoningStep::thinking(
        agent,
        format!(
            "Generating safety report for {} -> {}. Compiling evidence from investigation findings.",
            item.drug, item.reaction
        ),
    )];

    let message = prompts::report_message(
        &item.drug,
        &item.reaction,
        signal.map(|s| s.strength),
        signal.map(|s| s.spike_ratio),
        signal.map(|s| s.priority.as_str()),
        &item.findings,
    );
    let reply = ctx.call_agent(Stage::Report, agent, &message, None).await?;

    steps.extend(record_reasoning(agent, &reply));
    let risk_level = seed.upgraded_by(&reply.text);
    steps.push(ReasoningStep::conclusion(
        agent,
        format!(
            "Safety report for {} -> {} complete. Risk level: {}.",
            item.drug, item.reaction, risk_level
        ),
    ));

    Ok(Branch {
        record: ReportRecord {
            drug: item.drug.clone(),
            reaction: item.reaction.clone(),
            risk_level,
            report_text: reply.text,
            degraded: false,
        },
        steps,
        conversation_id: reply.conversation_id,
    })
}

/// Generate one report per investigated item concurrently.
pub async fn run(ctx: &StageContext, inv: &Investigation) -> StageResult<Delta> {
    let mut delta = Delta::default();
    let items = report_items(inv, &mut delta);

    if items.is_empty() {
        return Ok(delta.progress("No findings to report"));
    }

    let agent = ctx.agents.reporter.as_str();
    delta = delta.step(ReasoningStep::thinking(
        agent,
        format!(
            "Preparing {} safety assessment report(s) from investigation findings.",
            items.len()
        ),
    ));

    let known: Vec<SignalRecord> = inv
        .signals
        .iter()
        .chain(delta.signals.iter())
        .cloned()
        .collect();
    let matched: Vec<Option<&SignalRecord>> = items
        .iter()
        .map(|item| known.iter().find(|s| s.drug == item.drug))
        .collect();
    let seeds: Vec<RiskLevel> = matched
        .iter()
        .map(|s| s.map_or(RiskLevel::Medium, |s| RiskLevel::from(s.priority)))
        .collect();

    let results = join_within(
        Stage::Report,
        ctx.deadline,
        items
            .iter()
            .zip(matched.iter())
            .zip(seeds.iter())
            .map(|((item, signal), seed)| report_one(ctx, item, *signal, *seed)),
    )
    .await;

    delta = delta.conversation(agent, first_conversation(&results));

    let mut degraded = 0;
    for ((item, seed), result) in items.iter().zip(seeds).zip(results) {
        match result {
            Ok(branch) => {
                delta.reasoning_trace.extend(branch.steps);
                delta.reports.push(branch.record);
            }
            Err(e) => {
                degraded += 1;
                warn!(
                    investigation_id = %inv.id,
                    drug = %item.drug,
                    error = %e,
                    "Report branch failed"
                );
                delta.reports.push(ReportRecord {
                    drug: item.drug.clone(),
                    reaction: item.reaction.clone(),
                    risk_level: seed,
                    report_text: format!("Report generation failed: {}", e),
                    degraded: true,
                });
                delta.reasoning_trace.push(ReasoningStep::conclusion(
                    agent,
                    format!("Report for {} failed: {}", item.drug, e),
                ));
            }
        }
    }

    info!(
        investigation_id = %inv.id,
        reports = items.len(),
        degraded,
        "Report fan-out joined"
    );

    Ok(delta.progress(format!(
        "Report generation completed: {} report(s) generated",
        items.len()
    )))
}
