//! Reasoning recorder.
//!
//! Turns one agent reply into ordered transparency steps: up to four
//! "thinking" sentences lifted from the reply text, then a `tool_call` step
//! per recorded tool invocation, each followed by a `tool_result` step when the
//! tool returned something.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::agent::{AgentReply, ToolCallRecord};
use crate::state::ReasoningStep;

const MAX_THINKING_STEPS: usize = 4;
const SENTENCES_SCANNED: usize = 15;
const MIN_SENTENCE_CHARS: usize = 20;
const TOOL_RESULT_CHARS: usize = 300;

static REASONING_OPENER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(I (will|need to|should|am going to|can see|notice|observe)|Let me|Based on|The (data|results|analysis) (shows?|indicates?|suggests?|reveals?)|This (indicates?|suggests?|shows?|means?)|Looking at).*?[.!]",
    )
    .expect("reasoning opener pattern must compile")
});

/// Human-readable metadata for a known tool.
#[derive(Debug, Clone, Copy)]
pub struct ToolInfo {
    /// What the tool does.
    pub description: &'static str,
    /// Representative query the tool runs.
    pub query: &'static str,
}

/// Known tools keyed by operation name (the part after the namespace dot).
static TOOL_CATALOG: Lazy<HashMap<&'static str, ToolInfo>> = Lazy::new(|| {
    HashMap::from([
        (
            "scan_adverse_event_trends",
            ToolInfo {
                description: "Scan Adverse Event Trends",
                query: "FROM reports | WHERE report_date >= NOW() - ?time_range DAYS | STATS event_count, serious_count, fatal_count BY drug_name | SORT event_count DESC | LIMIT 20",
            },
        ),
        (
            "calculate_reporting_ratio",
            ToolInfo {
                description: "Calculate Proportional Reporting Ratio (PRR)",
                query: "FROM reports | STATS drug_reaction, drug_total, other_reaction, other_total | EVAL prr = (drug_reaction / drug_total) / (other_reaction / other_total)",
            },
        ),
        (
            "detect_temporal_spike",
            ToolInfo {
                description: "Detect Temporal Spike",
                query: "FROM reports | WHERE drug_name == ?drug_name | STATS recent_count, baseline_count | EVAL spike_ratio = recent_daily_rate / baseline_daily_rate",
            },
        ),
        (
            "analyze_patient_demographics",
            ToolInfo {
                description: "Analyze Patient Demographics",
                query: "FROM reports | WHERE drug_name == ?drug_name | STATS count, avg_age BY patient_sex, patient_age_group",
            },
        ),
        (
            "find_concomitant_drugs",
            ToolInfo {
                description: "Find Concomitant Drugs",
                query: "FROM reports | WHERE drug_name == ?drug_name | STATS co_report_count, serious_pct BY concomitant_drugs | SORT co_report_count DESC",
            },
        ),
        (
            "check_outcome_severity",
            ToolInfo {
                description: "Check Outcome Severity",
                query: "FROM reports | WHERE drug_name == ?drug_name | STATS total, fatal, hospitalized, life_threatening | EVAL fatality_rate, serious_rate",
            },
        ),
        (
            "geo_distribution",
            ToolInfo {
                description: "Geographic Distribution",
                query: "FROM reports | WHERE drug_name == ?drug_name | STATS event_count, serious_count BY reporter_country | SORT event_count DESC",
            },
        ),
        (
            "compile_signal_summary",
            ToolInfo {
                description: "Compile Signal Summary",
                query: "FROM reports | WHERE drug_name == ?drug_name | STATS total_reports, serious_count, fatal_count, last_90d BY reaction_term",
            },
        ),
        (
            "search_knowledge",
            ToolInfo {
                description: "Search Knowledge Base",
                query: "FROM knowledge | WHERE content LIKE ?search_query OR title LIKE ?search_query | LIMIT 3",
            },
        ),
        (
            "search_drug_label",
            ToolInfo {
                description: "Search Drug Label Information",
                query: "FROM knowledge | WHERE drug_name == ?drug_name AND category == 'drug_label' | LIMIT 1",
            },
        ),
        (
            "search_regulatory_guidance",
            ToolInfo {
                description: "Search Regulatory Guidance",
                query: "FROM knowledge | WHERE category IN ('methodology', 'regulatory') AND content LIKE ?topic | LIMIT 3",
            },
        ),
    ])
});

/// Catalog lookup for a namespaced tool id such as `safety.geo_distribution`.
pub fn tool_info(tool_id: &str) -> Option<ToolInfo> {
    let operation = tool_id.rsplit('.').next().unwrap_or(tool_id);
    TOOL_CATALOG.get(operation).copied()
}

fn describe(tool_id: &str) -> String {
    tool_info(tool_id)
        .map(|info| info.description.to_string())
        .unwrap_or_else(|| tool_id.to_string())
}

/// Split prose after `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next_i, next_c)) = chars.peek() {
                if next_c.is_whitespace() {
                    sentences.push(&text[start..next_i]);
                    start = next_i;
                }
            }
        }
    }
    sentences.push(&text[start..]);

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Sentences from the reply that read like the agent explaining itself.
pub fn thinking_sentences(text: &str) -> Vec<String> {
    split_sentences(text)
        .into_iter()
        .take(SENTENCES_SCANNED)
        .filter(|s| s.chars().count() > MIN_SENTENCE_CHARS && REASONING_OPENER.is_match(s))
        .take(MAX_THINKING_STEPS)
        .map(str::to_string)
        .collect()
}

fn summarize_result(result: &Value) -> String {
    let full = match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    full.chars().take(TOOL_RESULT_CHARS).collect()
}

fn tool_steps(agent: &str, call: &ToolCallRecord) -> Vec<ReasoningStep> {
    let description = describe(&call.tool_id);
    let mut steps = vec![ReasoningStep::tool_call(
        agent,
        description.clone(),
        &call.tool_id,
        call.input.clone(),
        tool_info(&call.tool_id).map(|info| info.query.to_string()),
    )];

    if call.has_result() {
        steps.push(ReasoningStep::tool_result(
            agent,
            format!("Results from {}", description),
            &call.tool_id,
            summarize_result(&call.result),
        ));
    }
    steps
}

/// Build the ordered reasoning steps for one agent reply.
pub fn record_reasoning(agent: &str, reply: &AgentReply) -> Vec<ReasoningStep> {
    let mut steps: Vec<ReasoningStep> = thinking_sentences(&reply.text)
        .into_iter()
        .map(|sentence| ReasoningStep::thinking(agent, sentence))
        .collect();

    for call in &reply.tool_calls {
        steps.extend(tool_steps(agent, call));
    }
    steps
}
