use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Investigation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting on the classifier.
    Routing,
    /// Broad surveillance scan in flight.
    Scanning,
    /// Per-signal investigations in flight.
    Investigating,
    /// Per-investigation reports in flight.
    Reporting,
    /// Quick factual query in flight.
    Querying,
    /// Knowledge answer in flight.
    Knowledge,
    /// Greeting reply.
    Greeting,
    /// Out-of-domain redirect.
    OutOfScope,
    /// Final summary being assembled.
    Compiling,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Error,
}

impl Status {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Routing => "routing",
            Status::Scanning => "scanning",
            Status::Investigating => "investigating",
            Status::Reporting => "reporting",
            Status::Querying => "querying",
            Status::Knowledge => "knowledge",
            Status::Greeting => "greeting",
            Status::OutOfScope => "out_of_scope",
            Status::Compiling => "compiling",
            Status::Complete => "complete",
            Status::Error => "error",
        }
    }

    /// Position in the forward-only lifecycle. Route-specific single stages
    /// share a rank with Reporting since they are mutually exclusive.
    fn rank(&self) -> u8 {
        match self {
            Status::Routing => 0,
            Status::Scanning => 1,
            Status::Investigating => 2,
            Status::Reporting
            | Status::Querying
            | Status::Knowledge
            | Status::Greeting
            | Status::OutOfScope => 3,
            Status::Compiling => 4,
            Status::Complete | Status::Error => 5,
        }
    }

    /// Whether no further merges are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Complete | Status::Error)
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    pub fn can_advance_to(&self, next: Status) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Status::Error || next.rank() >= self.rank()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed set of classifier routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Scan all entities for emerging signals.
    #[serde(alias = "full_scan")]
    BroadScan,
    /// Investigate one named entity.
    #[serde(alias = "investigate")]
    DeepDive,
    /// Produce formal reports for one named entity.
    Report,
    /// Answer a data question directly.
    #[serde(alias = "data_query")]
    QuickFactual,
    /// Answer a conceptual question grounded by retrieval.
    #[serde(alias = "general")]
    Knowledge,
    /// Redirect an unrelated request.
    #[serde(alias = "out_of_scope")]
    OutOfDomain,
    /// Reply to a bare greeting.
    Greeting,
}

impl Route {
    /// Get the route label as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::BroadScan => "broad_scan",
            Route::DeepDive => "deep_dive",
            Route::Report => "report",
            Route::QuickFactual => "quick_factual",
            Route::Knowledge => "knowledge",
            Route::OutOfDomain => "out_of_domain",
            Route::Greeting => "greeting",
        }
    }

    /// Routes that cannot run without a resolved entity.
    pub fn requires_entity(&self) -> bool {
        matches!(self, Route::DeepDive | Route::Report)
    }

    /// Routes that run the scan/investigate/report pipeline.
    pub fn is_pipeline(&self) -> bool {
        matches!(self, Route::BroadScan | Route::DeepDive | Route::Report)
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Route {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "broad_scan" | "full_scan" => Ok(Route::BroadScan),
            "deep_dive" | "investigate" => Ok(Route::DeepDive),
            "report" => Ok(Route::Report),
            "quick_factual" | "data_query" => Ok(Route::QuickFactual),
            "knowledge" | "general" => Ok(Route::Knowledge),
            "out_of_domain" | "out_of_scope" => Ok(Route::OutOfDomain),
            "greeting" => Ok(Route::Greeting),
            _ => Err(format!("Unknown route: {}", s)),
        }
    }
}

/// Signal priority as reported by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Informational.
    Low,
    /// Worth monitoring.
    Medium,
    /// Needs review.
    High,
    /// Needs immediate review.
    Critical,
    /// Synthesized signals that never went through a scan.
    Unknown,
}

impl Priority {
    /// Get the priority as an uppercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
            Priority::Unknown => "UNKNOWN",
        }
    }

    /// Whether the signal should be investigated first.
    pub fn is_high(&self) -> bool {
        matches!(self, Priority::High | Priority::Critical)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Report risk level. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// No action needed.
    Low,
    /// Continued monitoring.
    Medium,
    /// Label review recommended.
    High,
    /// Regulatory action recommended.
    Critical,
}

impl RiskLevel {
    /// Get the risk level as an uppercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    /// Apply textual upgrade cues from a generated report. Never downgrades.
    pub fn upgraded_by(self, report_text: &str) -> RiskLevel {
        let upper = report_text.to_uppercase();
        let cue = if upper.contains("CRITICAL") {
            RiskLevel::Critical
        } else if upper.contains("HIGH RISK") {
            RiskLevel::High
        } else {
            RiskLevel::Low
        };
        self.max(cue)
    }
}

impl From<Priority> for RiskLevel {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Low => RiskLevel::Low,
            Priority::Medium | Priority::Unknown => RiskLevel::Medium,
            Priority::High => RiskLevel::High,
            Priority::Critical => RiskLevel::Critical,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasoning step kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Narrated intent before acting.
    Thinking,
    /// A tool invocation made by an agent.
    ToolCall,
    /// The output of a tool invocation.
    ToolResult,
    /// The stage's outcome.
    Conclusion,
}

/// One entry in an investigation's transparency log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// Agent the step is attributed to.
    pub agent: String,
    /// Step kind.
    pub step_type: StepType,
    /// Human-readable narration.
    pub content: String,
    /// Tool name for tool steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool parameters for tool calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Map<String, Value>>,
    /// Query text the tool ran, when one was extracted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_query: Option<String>,
    /// Tool output, possibly truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
    /// When the step was recorded.
    pub timestamp: DateTime<Utc>,
}

impl ReasoningStep {
    fn plain(agent: &str, step_type: StepType, content: impl Into<String>) -> Self {
        Self {
            agent: agent.to_string(),
            step_type,
            content: content.into(),
            tool_name: None,
            tool_input: None,
            tool_query: None,
            tool_result: None,
            timestamp: Utc::now(),
        }
    }

    /// A thinking step.
    pub fn thinking(agent: &str, content: impl Into<String>) -> Self {
        Self::plain(agent, StepType::Thinking, content)
    }

    /// A conclusion step.
    pub fn conclusion(agent: &str, content: impl Into<String>) -> Self {
        Self::plain(agent, StepType::Conclusion, content)
    }

    /// A tool call with its parameters.
    pub fn tool_call(
        agent: &str,
        content: impl Into<String>,
        tool_name: &str,
        tool_input: Map<String, Value>,
        tool_query: Option<String>,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.to_string()),
            tool_input: Some(tool_input),
            tool_query,
            ..Self::plain(agent, StepType::ToolCall, content)
        }
    }

    /// A tool result.
    pub fn tool_result(
        agent: &str,
        content: impl Into<String>,
        tool_name: &str,
        tool_result: String,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.to_string()),
            tool_result: Some(tool_result),
            ..Self::plain(agent, StepType::ToolResult, content)
        }
    }
}

/// An entity/outcome pair flagged for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    /// Drug name.
    pub drug: String,
    /// Adverse reaction term.
    pub reaction: String,
    /// Disproportionality strength (PRR). `999.0` marks an exclusive association.
    pub strength: f64,
    /// Number of reported cases.
    pub case_count: u64,
    /// Recent-to-baseline reporting ratio.
    pub spike_ratio: f64,
    /// Scanner-assigned priority.
    pub priority: Priority,
    /// Raw scanner text the record was mined from.
    pub evidence: String,
}

/// Strength assigned to associations reported as unbounded or exclusive.
pub const EXCLUSIVE_STRENGTH: f64 = 999.0;

impl SignalRecord {
    /// New scanner-derived record with default metrics.
    pub fn new(drug: impl Into<String>, reaction: impl Into<String>) -> Self {
        Self {
            drug: drug.into(),
            reaction: reaction.into(),
            strength: 0.0,
            case_count: 0,
            spike_ratio: 0.0,
            priority: Priority::High,
            evidence: String::new(),
        }
    }

    /// Synthetic signal for a directly requested entity.
    pub fn placeholder(drug: &str, reaction: Option<&str>) -> Self {
        Self {
            priority: Priority::Unknown,
            evidence: "Direct investigation request via classifier".to_string(),
            ..Self::new(drug, reaction.unwrap_or("All adverse events"))
        }
    }
}

/// Findings for one investigated signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubInvestigationRecord {
    /// Drug name.
    pub drug: String,
    /// Adverse reaction term.
    pub reaction: String,
    /// Full investigator text.
    pub findings: String,
    /// Whether the findings mention a detected drug interaction.
    pub interaction_detected: bool,
    /// Tail of the findings.
    pub overall_assessment: String,
    /// Set when the investigator call failed for this item.
    #[serde(default)]
    pub degraded: bool,
}

const ASSESSMENT_TAIL_CHARS: usize = 500;

impl SubInvestigationRecord {
    /// Record built from investigator text.
    pub fn from_findings(drug: &str, reaction: &str, findings: String) -> Self {
        let lower = findings.to_lowercase();
        let interaction_detected = lower.contains("interaction")
            && (lower.contains("yes") || lower.contains("detected") || lower.contains("potential"));

        let char_count = findings.chars().count();
        let overall_assessment: String = findings
            .chars()
            .skip(char_count.saturating_sub(ASSESSMENT_TAIL_CHARS))
            .collect();

        Self {
            drug: drug.to_string(),
            reaction: reaction.to_string(),
            findings,
            interaction_detected,
            overall_assessment,
            degraded: false,
        }
    }

    /// Placeholder for a failed or timed-out investigation.
    pub fn degraded(drug: &str, reaction: &str, error: &str) -> Self {
        Self {
            drug: drug.to_string(),
            reaction: reaction.to_string(),
            findings: format!("Error: {}", error),
            interaction_detected: false,
            overall_assessment: format!("Investigation failed: {}", error),
            degraded: true,
        }
    }
}

/// A generated safety assessment report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    /// Drug name.
    pub drug: String,
    /// Adverse reaction term.
    pub reaction: String,
    /// Final risk level after textual upgrades.
    pub risk_level: RiskLevel,
    /// Markdown report body. Empty when generation failed.
    pub report_text: String,
    /// Set when the reporter call failed for this item.
    #[serde(default)]
    pub degraded: bool,
}

impl ReportRecord {
    /// Whether a report body was generated.
    pub fn has_report(&self) -> bool {
        !self.report_text.trim().is_empty()
    }
}

/// A signal listed across investigations. The raw scanner evidence is left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalListing {
    /// Investigation the signal belongs to.
    pub investigation_id: String,
    /// Drug name.
    pub drug: String,
    /// Adverse reaction term.
    pub reaction: String,
    /// Disproportionality strength.
    pub strength: f64,
    /// Number of reported cases.
    pub case_count: u64,
    /// Recent-to-baseline reporting ratio.
    pub spike_ratio: f64,
    /// Scanner-assigned priority.
    pub priority: Priority,
}

/// A report listed across investigations, without its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportListing {
    /// Investigation the report belongs to.
    pub investigation_id: String,
    /// Drug name.
    pub drug: String,
    /// Adverse reaction term.
    pub reaction: String,
    /// Final risk level.
    pub risk_level: RiskLevel,
    /// Whether a report body was generated.
    pub has_report: bool,
    /// Set when generation failed.
    pub degraded: bool,
}

/// Derived list counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Length of `signals`.
    pub total_signals: usize,
    /// Length of `sub_investigations`.
    pub total_investigations: usize,
    /// Length of `reports`.
    pub total_reports: usize,
}

/// The shared record for one investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investigation {
    /// `INV-` followed by eight uppercase hex digits.
    pub id: String,
    /// Lifecycle status.
    pub status: Status,
    /// Submission time.
    pub started_at: DateTime<Utc>,
    /// The request as submitted.
    pub query: String,
    /// Route chosen by the classifier.
    pub route: Option<Route>,
    /// Entity resolved by the classifier.
    pub drug: Option<String>,
    /// Outcome resolved by the classifier.
    pub reaction: Option<String>,
    /// Answer text for non-pipeline routes.
    pub direct_response: Option<String>,
    /// Flagged signals.
    pub signals: Vec<SignalRecord>,
    /// Per-signal findings.
    pub sub_investigations: Vec<SubInvestigationRecord>,
    /// Generated reports.
    pub reports: Vec<ReportRecord>,
    /// Human-readable progress log.
    pub progress_messages: Vec<String>,
    /// Error messages.
    pub errors: Vec<String>,
    /// Transparency log.
    pub reasoning_trace: Vec<ReasoningStep>,
    /// Derived list lengths.
    pub counters: Counters,
    /// Latest agent-service conversation per agent id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conversations: BTreeMap<String, String>,
}

impl Investigation {
    /// Fresh record in `Routing`.
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            progress_messages: vec![format!("Investigation {} started", id)],
            id,
            status: Status::Routing,
            started_at: Utc::now(),
            query: query.into(),
            route: None,
            drug: None,
            reaction: None,
            direct_response: None,
            signals: Vec::new(),
            sub_investigations: Vec::new(),
            reports: Vec::new(),
            errors: Vec::new(),
            reasoning_trace: Vec::new(),
            counters: Counters::default(),
            conversations: BTreeMap::new(),
        }
    }

    /// Merge a stage delta into this record.
    ///
    /// Lists append, `direct_response` overwrites, route and entities are
    /// first-write-wins, status only moves forward. Conversation ids are
    /// replaced per agent. Returns `false` when the
    /// investigation is already terminal and the delta was dropped.
    pub fn merge(&mut self, delta: Delta) -> bool {
        if self.status.is_terminal() {
            warn!(
                investigation_id = %self.id,
                status = %self.status,
                "Dropping delta for terminal investigation"
            );
            return false;
        }

        if let Some(next) = delta.status {
            if self.status.can_advance_to(next) {
                self.status = next;
            } else {
                warn!(
                    investigation_id = %self.id,
                    from = %self.status,
                    to = %next,
                    "Ignoring backward status transition"
                );
            }
        }

        if self.route.is_none() {
            self.route = delta.route;
        }
        if self.drug.is_none() {
            self.drug = delta.drug;
        }
        if self.reaction.is_none() {
            self.reaction = delta.reaction;
        }
        if delta.direct_response.is_some() {
            self.direct_response = delta.direct_response;
        }

        self.signals.extend(delta.signals);
        self.sub_investigations.extend(delta.sub_investigations);
        self.reports.extend(delta.reports);
        self.progress_messages.extend(delta.progress_messages);
        self.errors.extend(delta.errors);
        self.reasoning_trace.extend(delta.reasoning_trace);
        self.conversations.extend(delta.conversations);

        self.counters = Counters {
            total_signals: self.signals.len(),
            total_investigations: self.sub_investigations.len(),
            total_reports: self.reports.len(),
        };
        true
    }

    /// Conversation to continue for `agent`, if one was recorded.
    pub fn conversation(&self, agent: &str) -> Option<&str> {
        self.conversations.get(agent).map(String::as_str)
    }

    /// Signals tagged with this investigation's id.
    pub fn signal_listings(&self) -> impl Iterator<Item = SignalListing> + '_ {
        self.signals.iter().map(|s| SignalListing {
            investigation_id: self.id.clone(),
            drug: s.drug.clone(),
            reaction: s.reaction.clone(),
            strength: s.strength,
            case_count: s.case_count,
            spike_ratio: s.spike_ratio,
            priority: s.priority,
        })
    }

    /// Report metadata tagged with this investigation's id.
    pub fn report_listings(&self) -> impl Iterator<Item = ReportListing> + '_ {
        self.reports.iter().map(|r| ReportListing {
            investigation_id: self.id.clone(),
            drug: r.drug.clone(),
            reaction: r.reaction.clone(),
            risk_level: r.risk_level,
            has_report: r.has_report(),
            degraded: r.degraded,
        })
    }

    /// First report whose drug matches case-insensitively.
    pub fn find_report(&self, drug: &str) -> Option<&ReportRecord> {
        let wanted = drug.trim().to_lowercase();
        self.reports.iter().find(|r| r.drug.to_lowercase() == wanted)
    }

    /// Registry listing entry.
    pub fn summary(&self) -> InvestigationSummary {
        InvestigationSummary {
            id: self.id.clone(),
            status: self.status,
            route: self.route,
            query: self.query.clone(),
            started_at: self.started_at,
            counters: self.counters,
            errors: self.errors.len(),
        }
    }
}

/// Listing entry for the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationSummary {
    /// Investigation id.
    pub id: String,
    /// Current status.
    pub status: Status,
    /// Chosen route, once classified.
    pub route: Option<Route>,
    /// The request as submitted.
    pub query: String,
    /// Submission time.
    pub started_at: DateTime<Utc>,
    /// Derived list lengths.
    pub counters: Counters,
    /// Number of recorded errors.
    pub errors: usize,
}

/// Incremental update emitted by a stage executor.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    /// Requested status, applied only if it moves forward.
    pub status: Option<Status>,
    /// Route, kept only if none is set.
    pub route: Option<Route>,
    /// Entity, kept only if none is set.
    pub drug: Option<String>,
    /// Outcome, kept only if none is set.
    pub reaction: Option<String>,
    /// Replaces any earlier answer.
    pub direct_response: Option<String>,
    /// Appended signals.
    pub signals: Vec<SignalRecord>,
    /// Appended findings.
    pub sub_investigations: Vec<SubInvestigationRecord>,
    /// Appended reports.
    pub reports: Vec<ReportRecord>,
    /// Appended progress messages.
    pub progress_messages: Vec<String>,
    /// Appended errors.
    pub errors: Vec<String>,
    /// Appended reasoning steps.
    pub reasoning_trace: Vec<ReasoningStep>,
    /// Conversation ids to record, keyed by agent id.
    pub conversations: BTreeMap<String, String>,
}

impl Delta {
    /// Delta that only requests a status change.
    pub fn with_status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Append a progress message.
    pub fn progress(mut self, message: impl Into<String>) -> Self {
        self.progress_messages.push(message.into());
        self
    }

    /// Append a reasoning step.
    pub fn step(mut self, step: ReasoningStep) -> Self {
        self.reasoning_trace.push(step);
        self
    }

    /// Record the conversation an agent replied on.
    pub fn conversation(mut self, agent: &str, conversation_id: Option<&str>) -> Self {
        if let Some(id) = conversation_id {
            self.conversations.insert(agent.to_string(), id.to_string());
        }
        self
    }

    /// Terminal error delta carrying `message` verbatim.
    pub fn error(agent: &str, message: &str) -> Self {
        Self {
            errors: vec![message.to_string()],
            ..Self::with_status(Status::Error)
        }
        .progress(message)
        .step(ReasoningStep::conclusion(agent, message))
    }
}
