//! Stage executors.
//!
//! Each stage reads an investigation snapshot and returns a [`Delta`]. Stages
//! never touch the store directly; the router merges their output.
//!
//! - [`classify`]: intent routing with keyword fallback
//! - [`scan`]: broad signal surveillance
//! - [`investigate`]: per-signal fan-out
//! - [`report`]: per-investigation fan-out
//! - [`direct`]: quick factual answers
//! - [`knowledge`]: retrieval-grounded answers
//! - [`conversational`]: canned greeting and redirect replies
//! - [`compile`]: final summary

pub mod classify;
/// Final summary.
pub mod compile;
pub mod conversational;
/// Quick factual answers.
pub mod direct;
mod fanout;
/// Per-signal investigation fan-out.
pub mod investigate;
/// Retrieval-grounded answers.
pub mod knowledge;
/// Per-investigation report fan-out.
pub mod report;
/// Broad surveillance scan.
pub mod scan;

pub use fanout::{first_conversation, join_within, Branch};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};

use crate::agent::{AgentCapability, AgentReply};
use crate::config::AgentIds;
use crate::error::{StageError, StageResult};
use crate::knowledge::KnowledgeSearch;
use crate::state::{Delta, Investigation, Status};

/// Pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Intent routing.
    Classify,
    /// Broad surveillance scan.
    Scan,
    /// Per-signal investigation fan-out.
    Investigate,
    /// Per-investigation report fan-out.
    Report,
    /// Quick factual answer.
    DirectQuery,
    /// Retrieval-grounded answer.
    Knowledge,
    /// Canned greeting.
    Greeting,
    /// Canned out-of-domain redirect.
    OutOfScope,
    /// Final summary.
    Compile,
}

impl Stage {
    /// Stage name as used in progress messages and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Scan => "scan",
            Stage::Investigate => "investigate",
            Stage::Report => "report",
            Stage::DirectQuery => "direct_query",
            Stage::Knowledge => "knowledge",
            Stage::Greeting => "greeting",
            Stage::OutOfScope => "out_of_scope",
            Stage::Compile => "compile",
        }
    }

    /// Investigation status while this stage is running.
    pub fn status(&self) -> Status {
        match self {
            Stage::Classify => Status::Routing,
            Stage::Scan => Status::Scanning,
            Stage::Investigate => Status::Investigating,
            Stage::Report => Status::Reporting,
            Stage::DirectQuery => Status::Querying,
            Stage::Knowledge => Status::Knowledge,
            Stage::Greeting => Status::Greeting,
            Stage::OutOfScope => Status::OutOfScope,
            Stage::Compile => Status::Compiling,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Collaborators and limits shared by every stage of one investigation.
#[derive(Clone)]
pub struct StageContext {
    /// Agent service.
    pub agent: Arc<dyn AgentCapability>,
    /// Knowledge-base search.
    pub knowledge: Arc<dyn KnowledgeSearch>,
    /// Agent ids per role.
    pub agents: AgentIds,
    /// Absolute deadline for the whole investigation.
    pub deadline: Instant,
    /// Recent queries, oldest first, for classifier context.
    pub history: Vec<String>,
}

impl StageContext {
    /// Agent call bounded by the investigation deadline, continuing
    /// `conversation_id` when given.
    pub async fn call_agent(
        &self,
        stage: Stage,
        agent_id: &str,
        message: &str,
        conversation_id: Option<&str>,
    ) -> StageResult<AgentReply> {
        match timeout_at(self.deadline, self.agent.call(agent_id, message, conversation_id)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(source)) => Err(StageError::Agent {
                stage: stage.to_string(),
                source,
            }),
            Err(_) => Err(StageError::TimedOut {
                stage: stage.to_string(),
            }),
        }
    }
}

/// Run one stage against a snapshot.
pub async fn execute(stage: Stage, ctx: &StageContext, inv: &Investigation) -> StageResult<Delta> {
    match stage {
        Stage::Classify => classify::run(ctx, inv).await,
        Stage::Scan => scan::run(ctx, inv).await,
        Stage::Investigate => investigate::run(ctx, inv).await,
        Stage::Report => report::run(ctx, inv).await,
        Stage::DirectQuery => direct::run(ctx, inv).await,
        Stage::Knowledge => knowledge::run(ctx, inv).await,
        Stage::Greeting => Ok(conversational::greeting(ctx, inv)),
        Stage::OutOfScope => Ok(conversational::out_of_scope(ctx, inv)),
        Stage::Compile => Ok(compile::run(inv)),
    }
}
