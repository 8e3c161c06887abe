//! Intent classification.
//!
//! The classifier agent is asked for a JSON object naming one route. When the
//! reply cannot be parsed (or the call fails) a deterministic keyword
//! classifier over the query decides instead.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use super::{Stage, StageContext};
use crate::error::StageResult;
use crate::prompts;
use crate::state::{Delta, Investigation, ReasoningStep, Route};

/// Canonical entity names keyed by lowercase alias. Longer aliases first so
/// `cardizol-x` wins over `cardizol`.
const KNOWN_ENTITIES: &[(&str, &str)] = &[
    ("cardizol-x", "Cardizol-X"),
    ("neurofen-plus", "Neurofen-Plus"),
    ("arthrex-200", "Arthrex-200"),
    ("cardizol", "Cardizol-X"),
    ("neurofen", "Neurofen-Plus"),
    ("arthrex", "Arthrex-200"),
];

const CONCEPTUAL_PATTERNS: &[&str] = &[
    "what is",
    "what are",
    "explain",
    "define",
    "how does",
    "how do",
    "tell me about prr",
    "tell me about ror",
    "what does",
    "meaning of",
    "difference between",
];

const LABEL_KEYWORDS: &[&str] = &[
    "contraindication",
    "warning",
    "precaution",
    "interaction",
    "dosage",
    "dose",
    "mechanism",
    "half-life",
    "prescribing",
    "label",
    "indication",
    "black box",
    "elderly",
    "pregnancy",
    "pediatric",
    "renal",
    "hepatic impairment",
    "adverse reaction",
    "side effect",
    "clinical pharmacology",
];

const QUANTITATIVE_KEYWORDS: &[&str] = &[
    "how many",
    "top ",
    "count",
    "fatality rate",
    "geographic",
    "demographics",
];

const ACTION_KEYWORDS: &[&str] = &["generate", "write", "create", "compile", "report"];

/// Domain vocabulary matched on word boundaries so short acronyms such as
/// `ich` or `ror` never fire inside ordinary words.
static DOMAIN_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)\b(?:
            drugs? | adverse | events? | safety | signals? | pharmacovigilance
            | prr | ror | faers | fda | reactions? | side[\ -]effects? | clinical
            | patients? | doses? | dosage | prescriptions? | medications?
            | hepato\w* | cardiac | rhabdomyolysis | reports? | scan(?:s|ning|ned)?
            | investigat\w* | labels? | contraindications? | warnings? | interactions?
            | toxicity | mortality | meddra | icsr | psur | ich | rems | ebgm | bcpnn
            | statins? | opioids? | nsaids? | arrhythmias? | hepatitis | serious
            | fatal\w* | hospitali[sz]ations? | surveillance
        )\b",
    )
    .expect("valid regex")
});

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "greetings",
    "thanks",
    "thank you",
    "good morning",
    "good afternoon",
    "good evening",
    "howdy",
];

/// Route and entities chosen for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Chosen route.
    pub route: Route,
    /// Named entity, if any.
    pub drug: Option<String>,
    /// Named outcome, if any.
    pub reaction: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    route: String,
    #[serde(default, alias = "drug")]
    drug_name: Option<String>,
    #[serde(default, alias = "reaction")]
    reaction_term: Option<String>,
}

/// Parse the classifier reply as JSON, or the first `{...}` span within it.
fn parse_reply(text: &str) -> Option<RawClassification> {
    let trimmed = text.trim();
    if let Ok(parsed) = serde_json::from_str(trimmed) {
        return Some(parsed);
    }

    let start = trimmed.find('{')?;
    let end = start + trimmed[start..].find('}')?;
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn canonical_entity(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    KNOWN_ENTITIES
        .iter()
        .find(|(alias, _)| lower.contains(alias))
        .map(|(_, canonical)| *canonical)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Whether any needle occurs at the start of a word in `haystack`.
///
/// Suffixes are allowed (`warning` matches "warnings") but a needle never
/// matches from the middle of a word (`count` does not match "account").
fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| {
        haystack.match_indices(needle).any(|(at, _)| {
            haystack[..at]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric())
        })
    })
}

fn is_greeting(lower: &str) -> bool {
    let cleaned: String = lower
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.split_whitespace().count() > 4 {
        return false;
    }
    GREETINGS
        .iter()
        .any(|g| cleaned == *g || cleaned.starts_with(&format!("{} ", g)))
}

/// Deterministic keyword classifier. Always returns a route.
pub fn keyword_classify(query: &str) -> Classification {
    let lower = query.trim().to_lowercase();
    let drug = canonical_entity(&lower).map(str::to_string);
    let has_domain = DOMAIN_KEYWORDS.is_match(&lower);

    let route = if drug.is_none() && !has_domain {
        if is_greeting(&lower) {
            Route::Greeting
        } else {
            Route::OutOfDomain
        }
    } else if drug.is_none() && contains_any(&lower, CONCEPTUAL_PATTERNS) {
        Route::Knowledge
    } else if drug.is_some() && contains_any(&lower, LABEL_KEYWORDS) {
        Route::Knowledge
    } else if contains_any(&lower, QUANTITATIVE_KEYWORDS) {
        Route::QuickFactual
    } else if contains_any(&lower, ACTION_KEYWORDS) {
        Route::Report
    } else if drug.is_some() {
        Route::DeepDive
    } else {
        Route::BroadScan
    };

    validate(Classification {
        route,
        drug,
        reaction: None,
    })
}

/// Entity-dependent routes without an entity are downgraded to a broad scan.
fn validate(mut classification: Classification) -> Classification {
    if classification.route.requires_entity() && classification.drug.is_none() {
        info!(
            route = %classification.route,
            "Route requires an entity but none was resolved, falling back to broad_scan"
        );
        classification.route = Route::BroadScan;
    }
    classification
}

fn from_raw(raw: RawClassification) -> Classification {
    let route = raw.route.parse().unwrap_or_else(|_| {
        warn!(invalid_route = %raw.route, "Invalid route returned by classifier, falling back to broad_scan");
        Route::BroadScan
    });

    let drug = non_empty(raw.drug_name).map(|d| {
        canonical_entity(&d)
            .map(str::to_string)
            .unwrap_or(d)
    });

    validate(Classification {
        route,
        drug,
        reaction: non_empty(raw.reaction_term),
    })
}

/// Classify the query with the agent, falling back to keywords.
pub async fn classify(ctx: &StageContext, query: &str) -> Classification {
    let message = prompts::classification_message(query, &ctx.history);

    match ctx
        .call_agent(Stage::Classify, &ctx.agents.classifier, &message, None)
        .await
    {
        Ok(reply) => match parse_reply(&reply.text) {
            Some(raw) => from_raw(raw),
            None => {
                warn!(
                    reply_preview = %reply.text.chars().take(200).collect::<String>(),
                    "Classifier reply was not JSON, using keyword fallback"
                );
                keyword_classify(query)
            }
        },
        Err(e) => {
            warn!(error = %e, "Classifier call failed, using keyword fallback");
            keyword_classify(query)
        }
    }
}

/// Classify and record the route and entities.
pub async fn run(ctx: &StageContext, inv: &Investigation) -> StageResult<Delta> {
    let classification = classify(ctx, &inv.query).await;

    info!(
        investigation_id = %inv.id,
        route = %classification.route,
        drug = ?classification.drug,
        reaction = ?classification.reaction,
        "Query classified"
    );

    let mut conclusion = format!("Query classified -> Route: {}", classification.route);
    if let Some(drug) = &classification.drug {
        conclusion.push_str(&format!(", Drug: {}", drug));
    }
    if let Some(reaction) = &classification.reaction {
        conclusion.push_str(&format!(", Reaction: {}", reaction));
    }
    conclusion.push('.');

    let progress = match &classification.drug {
        Some(drug) => format!("Routed to '{}' for {}", classification.route, drug),
        None => format!("Routed to '{}'", classification.route),
    };

    Ok(Delta {
        route: Some(classification.route),
        drug: classification.drug,
        reaction: classification.reaction,
        ..Delta::default()
    }
    .progress(progress)
    .step(ReasoningStep::conclusion(&ctx.agents.classifier, conclusion)))
}
