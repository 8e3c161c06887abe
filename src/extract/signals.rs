//! Signal parsing.
//!
//! # Accepted grammar
//!
//! The primary parser reads scanner text line by line.
//!
//! A **header** line opens a new record and closes the previous one. A line is
//! a header when it contains `FLAGGED SIGNAL` (any case), or when it contains
//! an arrow (`→` or `->`) together with `signal`, `flag` or `🔴`. The text
//! before the first arrow is the drug and the text after it is the reaction,
//! with markdown emphasis and leading list markers stripped. A header without
//! an arrow, or with an empty drug, closes the current record without opening
//! a new one.
//!
//! Every other line is matched against labels while a record is open. The
//! label is the text before the last `:` and the value the text after it
//! (the whole line when there is no colon). Later lines overwrite earlier ones.
//!
//! | label contains                         | field          |
//! |----------------------------------------|----------------|
//! | `prr`, `strength`, `reporting ratio`   | strength       |
//! | `spike`                                | spike ratio    |
//! | `recent cases`, `case count`, `cases`  | case count (`,` separators allowed) |
//! | `priority`                             | CRITICAL / HIGH / MEDIUM / LOW |
//!
//! On a strength line, `∞`, `infinite` or `exclusive` anywhere in the line
//! sets strength to [`EXCLUSIVE_STRENGTH`]. Unparseable numbers leave the
//! field at its default. New records default to HIGH priority.
//!
//! The fallback parser mines the agent's tool-call trace and only runs when
//! the primary parser yields nothing.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::agent::ToolCallRecord;
use crate::state::{Priority, SignalRecord, EXCLUSIVE_STRENGTH};

static DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"));
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,]*").expect("valid regex"));
static HEADER_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)flagged signal:?").expect("valid regex"));
static LEADING_NOISE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[*#\-:\s]+").expect("valid regex"));
static TRAILING_NOISE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*#\-:\s]+$").expect("valid regex"));

/// Threshold above which a tool-reported metric counts as evidence.
const EVIDENCE_THRESHOLD: f64 = 2.0;
const SPIKE_ONLY_REACTION: &str = "Adverse Event";

/// Extract signals from scanner text, falling back to the tool-call trace.
///
/// Never fails; worst case returns an empty list.
pub fn extract_signals(text: &str, tool_calls: &[ToolCallRecord]) -> Vec<SignalRecord> {
    let parsed = parse_signal_text(text);
    if !parsed.is_empty() || tool_calls.is_empty() {
        return parsed;
    }

    let mined = mine_tool_calls(tool_calls);
    debug!(signals = mined.len(), "Text parser found nothing, mined tool-call trace");
    mined
}

/// Primary line-oriented parser.
pub fn parse_signal_text(text: &str) -> Vec<SignalRecord> {
    let mut signals = Vec::new();
    let mut current: Option<SignalRecord> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if is_header(line) {
            if let Some(done) = current.take() {
                signals.push(done);
            }
            current = parse_header(line);
            continue;
        }

        if let Some(signal) = current.as_mut() {
            apply_label(signal, line);
        }
    }

    if let Some(done) = current {
        signals.push(done);
    }
    signals
}

fn arrow_split(line: &str) -> Option<(&str, &str)> {
    let positions = [("→", line.find('→')), ("->", line.find("->"))];
    positions
        .iter()
        .filter_map(|(arrow, pos)| pos.map(|p| (p, arrow.len())))
        .min_by_key(|(p, _)| *p)
        .map(|(p, len)| (&line[..p], &line[p + len..]))
}

fn is_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    if lower.contains("flagged signal") {
        return true;
    }
    arrow_split(line).is_some()
        && (lower.contains("signal") || lower.contains("flag") || line.contains('🔴'))
}

fn clean_drug(raw: &str) -> String {
    let stripped = raw.replace("**", "").replace('🔴', "");
    let stripped = HEADER_MARKER.replace_all(&stripped, "");
    let stripped = LEADING_NOISE.replace(&stripped, "");
    stripped.trim().to_string()
}

fn clean_reaction(raw: &str) -> String {
    let stripped = raw.replace("**", "");
    TRAILING_NOISE.replace(stripped.trim(), "").trim().to_string()
}

fn parse_header(line: &str) -> Option<SignalRecord> {
    let (drug, reaction) = arrow_split(line)?;
    let drug = clean_drug(drug);
    if drug.is_empty() {
        return None;
    }
    Some(SignalRecord::new(drug, clean_reaction(reaction)))
}

fn apply_label(signal: &mut SignalRecord, line: &str) {
    let (label, value) = match line.rfind(':') {
        Some(pos) => (&line[..pos], &line[pos + 1..]),
        None => (line, line),
    };
    let label = label.to_lowercase();

    if label.contains("prr") || label.contains("strength") || label.contains("reporting ratio") {
        if let Some(v) = first_decimal(value) {
            signal.strength = v;
        }
        let lower = line.to_lowercase();
        if line.contains('∞') || lower.contains("infinite") || lower.contains("exclusive") {
            signal.strength = EXCLUSIVE_STRENGTH;
        }
    } else if label.contains("spike") {
        if let Some(v) = first_decimal(value) {
            signal.spike_ratio = v;
        }
    } else if label.contains("recent cases") || label.contains("case count") || label.contains("cases")
    {
        if let Some(m) = INTEGER.find(value) {
            if let Ok(count) = m.as_str().replace(',', "").parse::<u64>() {
                signal.case_count = count;
            }
        }
    } else if label.contains("priority") {
        let upper = value.to_uppercase();
        let level = [
            ("CRITICAL", Priority::Critical),
            ("HIGH", Priority::High),
            ("MEDIUM", Priority::Medium),
            ("LOW", Priority::Low),
        ]
        .into_iter()
        .find(|(word, _)| upper.contains(word));
        if let Some((_, priority)) = level {
            signal.priority = priority;
        }
    }
}

fn first_decimal(value: &str) -> Option<f64> {
    DECIMAL.find(value).and_then(|m| m.as_str().parse().ok())
}

/// Rows of an `esql_results` tool result as column-name maps.
fn result_rows(result: &Value) -> Vec<Map<String, Value>> {
    let blocks: Vec<&Value> = match result {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut rows = Vec::new();
    for block in blocks {
        if block.get("type").and_then(Value::as_str) != Some("esql_results") {
            continue;
        }
        let Some(data) = block.get("data") else {
            continue;
        };
        let columns: Vec<&str> = data
            .get("columns")
            .and_then(Value::as_array)
            .map(|cols| {
                cols.iter()
                    .filter_map(|c| c.get("name").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        let values = data.get("values").and_then(Value::as_array);

        for row in values.into_iter().flatten() {
            if let Some(cells) = row.as_array() {
                rows.push(
                    columns
                        .iter()
                        .zip(cells)
                        .map(|(name, cell)| (name.to_string(), cell.clone()))
                        .collect(),
                );
            }
        }
    }
    rows
}

/// Fallback parser over the structured tool-call trace.
pub fn mine_tool_calls(tool_calls: &[ToolCallRecord]) -> Vec<SignalRecord> {
    let mut spikes: IndexMap<String, f64> = IndexMap::new();
    let mut strengths: IndexMap<(String, String), f64> = IndexMap::new();

    for call in tool_calls {
        let drug = call.param("drug_name").unwrap_or_default().to_string();

        if call.tool_id.ends_with("detect_temporal_spike") {
            for row in result_rows(&call.result) {
                if let Some(spike) = row.get("spike_ratio").and_then(Value::as_f64) {
                    if spike > EVIDENCE_THRESHOLD {
                        spikes.insert(drug.clone(), spike);
                    }
                }
            }
        } else if call.tool_id.ends_with("calculate_reporting_ratio") {
            let reaction = call.param("reaction_term").unwrap_or_default().to_string();
            for row in result_rows(&call.result) {
                let prr = row.get("prr").and_then(Value::as_f64);
                let drug_total = row.get("drug_total").and_then(Value::as_f64).unwrap_or(0.0);
                if let Some(prr) = prr {
                    if prr > EVIDENCE_THRESHOLD && drug_total > 0.0 {
                        strengths.insert((drug.clone(), reaction.clone()), prr);
                    }
                }
            }
        }
    }

    if !strengths.is_empty() {
        return strengths
            .into_iter()
            .map(|((drug, reaction), prr)| SignalRecord {
                strength: prr,
                spike_ratio: spikes.get(&drug).copied().unwrap_or(0.0),
                priority: if prr > 5.0 {
                    Priority::High
                } else {
                    Priority::Medium
                },
                ..SignalRecord::new(drug, reaction)
            })
            .collect();
    }

    spikes
        .into_iter()
        .map(|(drug, spike)| SignalRecord {
            spike_ratio: spike,
            priority: if spike > 3.0 {
                Priority::High
            } else {
                Priority::Medium
            },
            ..SignalRecord::new(drug, SPIKE_ONLY_REACTION)
        })
        .collect()
}
