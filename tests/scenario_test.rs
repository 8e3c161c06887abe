//! End-to-end investigation scenarios
//!
//! Drives full investigations through the orchestrator with a scripted agent
//! standing in for the agent service.

use async_trait::async_trait;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use signal_triage::agent::{AgentCapability, AgentReply};
use signal_triage::broadcast::ProgressEvent;
use signal_triage::config::{AgentIds, OrchestratorConfig};
use signal_triage::error::{AgentError, AgentResult, KnowledgeResult};
use signal_triage::knowledge::{KnowledgeDocument, KnowledgeSearch};
use signal_triage::state::{Priority, RiskLevel, Route, Status, StepType};
use signal_triage::Orchestrator;

/// One scripted reply: first rule whose needle occurs in the message wins.
struct Rule {
    needle: &'static str,
    reply: Result<&'static str, u16>,
    delay_ms: u64,
}

fn ok(needle: &'static str, reply: &'static str) -> Rule {
    Rule {
        needle,
        reply: Ok(reply),
        delay_ms: 0,
    }
}

struct FakeAgent {
    rules: Vec<Rule>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeAgent {
    fn new(rules: Vec<Rule>) -> Arc<Self> {
        Arc::new(Self {
            rules,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls_to(&self, agent_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == agent_id)
            .count()
    }
}

#[async_trait]
impl AgentCapability for FakeAgent {
    async fn call(
        &self,
        agent_id: &str,
        message: &str,
        _conversation_id: Option<&str>,
    ) -> AgentResult<AgentReply> {
        self.calls
            .lock()
            .unwrap()
            .push((agent_id.to_string(), message.to_string()));

        let Some(rule) = self.rules.iter().find(|r| message.contains(r.needle)) else {
            return Ok(AgentReply::from_raw(agent_id, json!({"message": "No data."}), None));
        };
        if rule.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(rule.delay_ms)).await;
        }
        match rule.reply {
            Ok(text) => Ok(AgentReply::from_raw(agent_id, json!({ "message": text }), None)),
            Err(status) => Err(AgentError::Api {
                status,
                message: "scripted failure".to_string(),
            }),
        }
    }
}

struct FakeKnowledge(Vec<KnowledgeDocument>);

#[async_trait]
impl KnowledgeSearch for FakeKnowledge {
    async fn search(&self, _query: &str) -> KnowledgeResult<Vec<KnowledgeDocument>> {
        Ok(self.0.clone())
    }
}

fn orchestrator(agent: Arc<FakeAgent>) -> Orchestrator {
    orchestrator_with(agent, OrchestratorConfig::default())
}

fn orchestrator_with(agent: Arc<FakeAgent>, settings: OrchestratorConfig) -> Orchestrator {
    Orchestrator::new(
        agent,
        Arc::new(FakeKnowledge(vec![KnowledgeDocument {
            title: "Cardizol-X label".to_string(),
            category: "drug_label".to_string(),
            content: "Contraindicated with QT-prolonging agents.".to_string(),
        }])),
        AgentIds::default(),
        settings,
    )
}

/// Classifier replies that fail to parse, forcing the keyword fallback.
const UNPARSEABLE: &str = "I think this is about drugs.";

#[tokio::test]
async fn test_deep_dive_completes_with_one_report() {
    let agent = FakeAgent::new(vec![
        ok("CLASSIFY", r#"{"route": "deep_dive", "drug_name": "Cardizol-X", "reaction_term": "QT Prolongation"}"#),
        ok("Investigate this flagged drug safety signal", "Let me check demographics. Potential interaction detected with amiodarone."),
        ok("Safety Signal Assessment Report", "## Report\nOverall this is a HIGH RISK signal."),
    ]);
    let orch = orchestrator(agent.clone());

    let inv = orch
        .investigate("Investigate Cardizol-X for cardiac safety signals")
        .await
        .unwrap();

    assert_eq!(inv.status, Status::Complete);
    assert_eq!(inv.route, Some(Route::DeepDive));
    assert_eq!(inv.drug.as_deref(), Some("Cardizol-X"));
    assert_eq!(inv.signals.len(), 1);
    assert_eq!(inv.signals[0].priority, Priority::Unknown);
    assert_eq!(inv.signals[0].reaction, "QT Prolongation");
    assert_eq!(inv.sub_investigations.len(), 1);
    assert!(inv.sub_investigations[0].interaction_detected);
    assert_eq!(inv.reports.len(), 1);
    assert_eq!(inv.reports[0].risk_level, RiskLevel::High);
    assert_eq!(inv.counters.total_reports, 1);
    assert!(inv.errors.is_empty());
    assert_eq!(agent.calls_to("case_investigator"), 1);
    assert_eq!(agent.calls_to("safety_reporter"), 1);
}

#[tokio::test]
async fn test_out_of_domain_redirects_without_signals() {
    let agent = FakeAgent::new(vec![ok("CLASSIFY", UNPARSEABLE)]);
    let orch = orchestrator(agent.clone());

    let inv = orch.investigate("What is the weather today?").await.unwrap();

    assert_eq!(inv.status, Status::Complete);
    assert_eq!(inv.route, Some(Route::OutOfDomain));
    assert!(inv.direct_response.as_deref().is_some_and(|r| !r.is_empty()));
    assert!(inv.signals.is_empty());
    // Classifier conclusion plus the redirect, nothing else.
    assert_eq!(inv.reasoning_trace.len(), 2);
    assert!(inv
        .reasoning_trace
        .iter()
        .all(|s| s.step_type == StepType::Conclusion));
    assert_eq!(agent.calls_to("signal_scanner"), 0);
}

#[tokio::test]
async fn test_report_route_synthesizes_placeholder_signal() {
    let agent = FakeAgent::new(vec![
        ok("CLASSIFY", UNPARSEABLE),
        ok("Drug: Arthrex-200", "Hepatic events are elevated. Risk assessed as moderate."),
    ]);
    let orch = orchestrator(agent.clone());

    let inv = orch
        .investigate("Generate safety report for Arthrex-200")
        .await
        .unwrap();

    assert_eq!(inv.route, Some(Route::Report));
    assert_eq!(inv.signals.len(), 1);
    assert_eq!(inv.signals[0].drug, "Arthrex-200");
    assert_eq!(inv.signals[0].priority, Priority::Unknown);
    assert_eq!(inv.reports.len(), 1);
    assert_eq!(inv.reports[0].drug, "Arthrex-200");
    assert_eq!(inv.reports[0].risk_level, RiskLevel::Medium);
    assert!(inv.sub_investigations.is_empty());
}

#[tokio::test]
async fn test_broad_scan_fans_out_in_signal_order() {
    let scan_reply = "Looking at the last 90 days of reports.\n\
        FLAGGED SIGNAL: Cardizol-X → QT Prolongation\n\
        - PRR: 6.2\n\
        - Priority: CRITICAL\n\
        FLAGGED SIGNAL: Neurofen-Plus → Hepatotoxicity\n\
        - PRR: 3.1\n\
        - Priority: MEDIUM\n\
        FLAGGED SIGNAL: Arthrex-200 → Rash\n\
        - PRR: ∞ (exclusive)\n";
    let agent = FakeAgent::new(vec![
        ok("CLASSIFY", r#"{"route": "broad_scan"}"#),
        ok("Scan for", scan_reply),
        Rule {
            needle: "signal:\nDrug: Cardizol-X",
            reply: Ok("Cardizol findings."),
            delay_ms: 80,
        },
        Rule {
            needle: "signal:\nDrug: Neurofen-Plus",
            reply: Err(502),
            delay_ms: 0,
        },
        Rule {
            needle: "signal:\nDrug: Arthrex-200",
            reply: Ok("Arthrex findings."),
            delay_ms: 10,
        },
        ok("Report for:\n\nDrug:", "Routine report."),
    ]);
    let orch = orchestrator(agent);

    let inv = orch
        .investigate("Scan for any emerging drug safety signals")
        .await
        .unwrap();

    assert_eq!(inv.status, Status::Complete);
    let drugs: Vec<&str> = inv.signals.iter().map(|s| s.drug.as_str()).collect();
    assert_eq!(drugs, vec!["Cardizol-X", "Neurofen-Plus", "Arthrex-200"]);
    assert_eq!(inv.signals[2].strength, 999.0);

    let investigated: Vec<&str> = inv
        .sub_investigations
        .iter()
        .map(|s| s.drug.as_str())
        .collect();
    assert_eq!(investigated, drugs);
    assert!(inv.sub_investigations[1].degraded);
    assert!(!inv.sub_investigations[0].degraded);

    assert_eq!(inv.reports.len(), 3);
    assert_eq!(inv.reports[0].risk_level, RiskLevel::Critical);
    assert_eq!(inv.reports[1].risk_level, RiskLevel::Medium);
    assert!(inv
        .progress_messages
        .last()
        .is_some_and(|m| m.contains("HIGH PRIORITY signals: 2")));
}

#[tokio::test]
async fn test_scan_without_signals_skips_to_compile() {
    let agent = FakeAgent::new(vec![
        ok("CLASSIFY", r#"{"route": "broad_scan"}"#),
        ok("Scan for", "No statistically significant changes observed."),
    ]);
    let orch = orchestrator(agent.clone());

    let inv = orch.investigate("Scan for emerging signals").await.unwrap();
    assert_eq!(inv.status, Status::Complete);
    assert!(inv.signals.is_empty());
    assert_eq!(agent.calls_to("case_investigator"), 0);
    assert_eq!(agent.calls_to("safety_reporter"), 0);
}

#[tokio::test]
async fn test_knowledge_route_is_grounded() {
    let agent = FakeAgent::new(vec![
        ok("CLASSIFY", UNPARSEABLE),
        ok("--- Cardizol-X label (drug_label) ---", "Avoid QT-prolonging agents [Cardizol-X label]."),
    ]);
    let orch = orchestrator(agent);

    let inv = orch
        .investigate("What are the contraindications of Cardizol-X?")
        .await
        .unwrap();

    assert_eq!(inv.route, Some(Route::Knowledge));
    assert_eq!(
        inv.direct_response.as_deref(),
        Some("Avoid QT-prolonging agents [Cardizol-X label].")
    );
    assert!(inv
        .reasoning_trace
        .iter()
        .any(|s| s.tool_name.as_deref() == Some("knowledge.search_knowledge")));
}

#[tokio::test]
async fn test_direct_query_failure_is_terminal_error() {
    let agent = FakeAgent::new(vec![
        Rule {
            needle: "CLASSIFY",
            reply: Ok(r#"{"route": "quick_factual"}"#),
            delay_ms: 30,
        },
        Rule {
            needle: "data question",
            reply: Err(500),
            delay_ms: 0,
        },
    ]);
    let orch = orchestrator(agent);

    let submission = orch.submit("How many adverse events were fatal?").await;
    let events: Vec<ProgressEvent> = orch
        .subscribe(&submission.investigation_id)
        .await
        .unwrap()
        .collect()
        .await;

    let inv = orch.get(&submission.investigation_id).await.unwrap();
    assert_eq!(inv.status, Status::Error);
    assert_eq!(inv.errors.len(), 1);
    assert!(inv.errors[0].contains("scripted failure"));
    assert!(inv.progress_messages.contains(&inv.errors[0]));
    assert!(inv.direct_response.is_none());

    match events.last() {
        Some(ProgressEvent::Error { message }) => assert_eq!(message, &inv.errors[0]),
        other => panic!("expected trailing error event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_late_subscriber_gets_snapshot_then_live_events() {
    let agent = FakeAgent::new(vec![
        ok("CLASSIFY", r#"{"route": "deep_dive", "drug_name": "Neurofen-Plus"}"#),
        Rule {
            needle: "Investigate this flagged",
            reply: Ok("Findings."),
            delay_ms: 150,
        },
        ok("Safety Signal Assessment Report", "Report."),
    ]);
    let orch = orchestrator(agent);

    let submission = orch.submit("Investigate Neurofen-Plus").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events: Vec<ProgressEvent> = orch
        .subscribe(&submission.investigation_id)
        .await
        .unwrap()
        .collect()
        .await;

    match &events[0] {
        ProgressEvent::CurrentState {
            progress_messages, ..
        } => assert!(!progress_messages.is_empty()),
        other => panic!("expected current_state first, got {:?}", other),
    }
    let kinds: Vec<&str> = events[1..].iter().map(|e| e.kind()).collect();
    assert!(kinds.iter().all(|k| *k == "progress" || *k == "reasoning"));
    let last_status = events.iter().rev().find_map(|e| match e {
        ProgressEvent::Progress { status, .. } => Some(*status),
        _ => None,
    });
    assert_eq!(last_status, Some(Status::Complete));
}

#[tokio::test]
async fn test_fan_out_deadline_degrades_slow_branch() {
    let agent = FakeAgent::new(vec![
        ok("CLASSIFY", r#"{"route": "deep_dive", "drug_name": "Cardizol-X"}"#),
        Rule {
            needle: "Investigate this flagged",
            reply: Ok("Too late."),
            delay_ms: 5_000,
        },
    ]);
    let orch = orchestrator_with(
        agent,
        OrchestratorConfig {
            investigation_timeout_ms: 200,
            ..OrchestratorConfig::default()
        },
    );

    let inv = orch.investigate("Investigate Cardizol-X").await.unwrap();

    assert_eq!(inv.sub_investigations.len(), 1);
    assert!(inv.sub_investigations[0].degraded);
    assert!(inv.sub_investigations[0]
        .findings
        .contains("exceeded the investigation deadline"));
    // Reporting still runs, one record per investigated item.
    assert_eq!(inv.reports.len(), 1);
    assert_eq!(inv.status, Status::Complete);
}

#[tokio::test]
async fn test_registry_lists_submissions() {
    let agent = FakeAgent::new(vec![ok("CLASSIFY", r#"{"route": "greeting"}"#)]);
    let orch = orchestrator(agent);

    orch.investigate("hello").await.unwrap();
    orch.investigate("hi there").await.unwrap();

    let listed = orch.list().await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].query, "hello");
    assert!(listed.iter().all(|s| s.status == Status::Complete));
}
