//! Centralized prompt definitions and canned replies
//!
//! Every message sent to an agent is assembled here so that stage executors
//! only decide *what* to ask, never how it is worded.

/// Instruction block for the intent classifier.
///
/// The route labels listed here are the closed set accepted by
/// [`crate::state::Route`].
pub const CLASSIFICATION_PROMPT: &str = r#"CLASSIFY the following user query into one of these routes and extract entities.

## Routes:
- "broad_scan" -> Broad safety scan across ALL drugs (e.g. "scan for signals", "any emerging safety issues")
- "deep_dive" -> Deep-dive into a SPECIFIC drug's adverse event data (e.g. "Investigate Cardizol-X", "Is Neurofen-Plus causing liver problems?")
- "report" -> Generate a formal safety assessment report (e.g. "Generate safety report for Arthrex-200")
- "quick_factual" -> Quick factual or statistical question about the adverse event data (e.g. "How many events?", "Top 5 drugs by fatality")
- "knowledge" -> Knowledge question about drug labels, methodology, guidelines, contraindications, warnings, dosage or interactions that does NOT need database queries (e.g. "What is PRR?", "Warnings for Neurofen-Plus in elderly?")
- "out_of_domain" -> Question unrelated to drugs, drug safety or medicine (e.g. "What is the weather?", "Tell me a joke")
- "greeting" -> A bare greeting or pleasantry with no question (e.g. "hi", "hello there", "thanks")

## Rules:
- If the query asks about drug LABELS, warnings, contraindications, dosage, mechanism or prescribing information -> route = "knowledge" (even if a drug name is mentioned)
- If the query needs actual adverse event DATA, demographics or case counts -> route = "deep_dive" or "quick_factual"
- Respond with ONLY a JSON object of the form {"route": "...", "drug_name": "...", "reaction_term": "..."}. No markdown, no explanation, no extra text."#;

/// Knowledge-expert framing for the knowledge stage.
pub const KNOWLEDGE_EXPERT_PROMPT: &str = "You are now acting as a drug safety knowledge expert. \
Answer this question clearly, accurately, and concisely. Use markdown formatting for readability.";

/// Default scan instruction used when the query itself is empty.
pub const DEFAULT_SCAN_QUERY: &str = "Scan for any emerging drug safety signals in the adverse event data from the last 90 days. \
Look for drugs with unusual spikes in reporting, particularly for serious reactions.";

/// Reply for queries outside the drug-safety domain.
pub const OUT_OF_DOMAIN_RESPONSE: &str = r#"## Out of Scope

I appreciate your question, but this assistant is dedicated to **drug safety and adverse event surveillance**.

I can help you with:

- **Signal Detection** - Scan for emerging drug safety signals
- **Drug Investigation** - Investigate specific drugs for adverse events
- **Data Queries** - Adverse event counts, demographics, geographic distribution
- **Safety Reports** - Generate safety assessment reports
- **Knowledge** - PRR, ROR, reporting guidelines, drug labels

### Try one of these:
- *"Scan for any emerging drug safety signals in the last 90 days"*
- *"Investigate Cardizol-X for cardiac safety signals"*
- *"What is PRR?"*
- *"Generate safety report for Arthrex-200"*"#;

/// Reply for bare greetings.
pub const GREETING_RESPONSE: &str = r#"Hello! I triage drug safety signals.

Ask me to scan for emerging signals, investigate a specific drug, answer a quick data question, explain a methodology, or generate a safety report. For example: *"Investigate Cardizol-X for cardiac safety signals"*."#;

/// Build the classifier message for a query and the recent query history.
pub fn classification_message(query: &str, history: &[String]) -> String {
    let mut message = String::from(CLASSIFICATION_PROMPT);

    if !history.is_empty() {
        message.push_str("\n\n## Recent queries (oldest first):\n");
        for previous in history {
            message.push_str(&format!("- \"{}\"\n", previous));
        }
    }

    message.push_str(&format!(
        "\n\n## User Query:\n\"{}\"\n\n## Response (JSON only):\n",
        query
    ));
    message
}

/// Build the per-signal investigation request.
pub fn investigation_message(
    drug: &str,
    reaction: &str,
    strength: f64,
    case_count: u64,
    spike_ratio: f64,
) -> String {
    format!(
        "Investigate this flagged drug safety signal:\n\
         Drug: {drug}\n\
         Reaction: {reaction}\n\
         PRR: {strength}\n\
         Recent cases (90d): {case_count}\n\
         Spike ratio: {spike_ratio}x\n\n\
         Please perform a full investigation covering demographics, \
         concomitant drugs, outcome severity, and geographic distribution."
    )
}

/// Build the per-investigation report request.
pub fn report_message(
    drug: &str,
    reaction: &str,
    strength: Option<f64>,
    spike_ratio: Option<f64>,
    priority: Option<&str>,
    findings: &str,
) -> String {
    let or_na = |v: Option<f64>| v.map_or_else(|| "N/A".to_string(), |v| v.to_string());
    format!(
        "Generate a Drug Safety Signal Assessment Report for:\n\n\
         Drug: {drug}\n\
         Reaction: {reaction}\n\
         PRR: {}\n\
         Spike ratio: {}x\n\
         Priority: {}\n\n\
         Investigation findings:\n{}\n\n\
         Please compile the full data for {drug} and generate the complete structured safety report.",
        or_na(strength),
        or_na(spike_ratio),
        priority.unwrap_or("N/A"),
        if findings.is_empty() {
            "No findings available"
        } else {
            findings
        },
    )
}

/// Build a quick factual question, scoped to one drug when known.
pub fn direct_query_message(query: &str, drug: Option<&str>) -> String {
    let scope = match drug {
        Some(drug) => format!("Answer this specific data question about {drug}:\n{query}"),
        None => format!("Answer this data question about the adverse event database:\n{query}"),
    };
    format!(
        "{scope}\n\nUse the appropriate tools to get the exact data requested. \
         Be concise and data-focused in your response."
    )
}

/// Build the knowledge question, prefixed with retrieved context when available.
pub fn knowledge_message(query: &str, context: &str) -> String {
    let grounding = if context.is_empty() {
        String::new()
    } else {
        format!(
            "Here is relevant context from our knowledge base:\n\n{context}\n\n\
             Use the above context to inform and ground your answer. \
             Cite specific documents when applicable.\n\n"
        )
    };
    format!("{KNOWLEDGE_EXPERT_PROMPT}\n\n{grounding}Question: {query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_prompt_lists_every_route() {
        for label in [
            "broad_scan",
            "deep_dive",
            "report",
            "quick_factual",
            "knowledge",
            "out_of_domain",
            "greeting",
        ] {
            assert!(
                CLASSIFICATION_PROMPT.contains(&format!("\"{}\"", label)),
                "missing route {label}"
            );
        }
        assert!(CLASSIFICATION_PROMPT.contains("JSON"));
    }

    #[test]
    fn test_classification_message_includes_history() {
        let history = vec!["Scan for signals".to_string()];
        let message = classification_message("Investigate Cardizol-X", &history);
        assert!(message.contains("Recent queries"));
        assert!(message.contains("- \"Scan for signals\""));
        assert!(message.ends_with("## Response (JSON only):\n"));

        let bare = classification_message("hi", &[]);
        assert!(!bare.contains("Recent queries"));
    }

    #[test]
    fn test_report_message_placeholders() {
        let message = report_message("Arthrex-200", "All adverse events", None, None, None, "");
        assert!(message.contains("PRR: N/A"));
        assert!(message.contains("Priority: N/A"));
        assert!(message.contains("No findings available"));
    }

    #[test]
    fn test_direct_query_message_scoping() {
        assert!(direct_query_message("How many?", Some("Cardizol-X")).contains("about Cardizol-X"));
        assert!(direct_query_message("How many?", None).contains("adverse event database"));
    }

    #[test]
    fn test_knowledge_message_grounding() {
        let grounded = knowledge_message("What is PRR?", "--- PRR (methodology) ---\nratio");
        assert!(grounded.contains("Cite specific documents"));
        assert!(grounded.ends_with("Question: What is PRR?"));

        let ungrounded = knowledge_message("What is PRR?", "");
        assert!(!ungrounded.contains("knowledge base"));
    }

    #[test]
    fn test_canned_replies_are_not_empty() {
        assert!(!OUT_OF_DOMAIN_RESPONSE.is_empty());
        assert!(!GREETING_RESPONSE.is_empty());
        assert!(!DEFAULT_SCAN_QUERY.is_empty());
    }
}
