//! Submit / Read / Subscribe surface over the router, store and broadcaster.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::agent::{AgentCapability, AgentClient, AgentHealth};
use crate::broadcast::{Broadcaster, EventStream};
use crate::config::{AgentIds, Config, OrchestratorConfig};
use crate::error::{AppError, AppResult};
use crate::knowledge::{KnowledgeClient, KnowledgeSearch};
use crate::router::Router;
use crate::stages::StageContext;
use crate::state::{
    Investigation, InvestigationSummary, ReportListing, ReportRecord, SignalListing, StateStore,
    Status,
};

/// Acknowledgement returned by [`Orchestrator::submit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Id to read or subscribe with.
    pub investigation_id: String,
    /// Status at submission, always `Routing`.
    pub status: Status,
}

/// Service status returned by [`Orchestrator::health`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// `healthy` when the agent service is connected, `degraded` otherwise.
    pub status: String,
    /// Agent service reachability.
    pub agent: AgentHealth,
    /// Registered investigations.
    pub investigations_count: usize,
    /// Investigations still running.
    pub running: usize,
}

/// Entry point for running investigations.
#[derive(Clone)]
pub struct Orchestrator {
    agent: Arc<dyn AgentCapability>,
    knowledge: Arc<dyn KnowledgeSearch>,
    agents: AgentIds,
    settings: OrchestratorConfig,
    store: Arc<StateStore>,
    broadcaster: Arc<Broadcaster>,
    router: Arc<Router>,
}

impl Orchestrator {
    /// Wire an orchestrator around the given collaborators.
    pub fn new(
        agent: Arc<dyn AgentCapability>,
        knowledge: Arc<dyn KnowledgeSearch>,
        agents: AgentIds,
        settings: OrchestratorConfig,
    ) -> Self {
        let store = Arc::new(StateStore::new(settings.max_investigations));
        let broadcaster = Arc::new(Broadcaster::new());
        let router = Arc::new(Router::new(store.clone(), broadcaster.clone()));
        Self {
            agent,
            knowledge,
            agents,
            settings,
            store,
            broadcaster,
            router,
        }
    }

    /// Build HTTP collaborators from configuration.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let agent = AgentClient::new(&config.agent, config.request.clone())?;
        let knowledge = KnowledgeClient::new(&config.knowledge, config.request.timeout_ms)?;
        info!(
            agent_url = %agent.base_url(),
            knowledge_url = %config.knowledge.base_url,
            "Orchestrator collaborators initialized"
        );
        Ok(Self::new(
            Arc::new(agent),
            Arc::new(knowledge),
            config.agents.clone(),
            config.orchestrator.clone(),
        ))
    }

    fn new_id() -> String {
        let hex = Uuid::new_v4().simple().to_string().to_uppercase();
        format!("INV-{}", &hex[..8])
    }

    async fn prepare(&self, query: &str) -> (String, StageContext) {
        let id = Self::new_id();
        let history = self
            .store
            .recent_queries(self.settings.history_window, &id)
            .await;
        self.store.insert(Investigation::new(id.clone(), query)).await;

        let ctx = StageContext {
            agent: self.agent.clone(),
            knowledge: self.knowledge.clone(),
            agents: self.agents.clone(),
            deadline: tokio::time::Instant::now()
                + Duration::from_millis(self.settings.investigation_timeout_ms),
            history,
        };
        info!(investigation_id = %id, query = %query, "Investigation submitted");
        (id, ctx)
    }

    fn spawn_driver(&self, id: String, ctx: StageContext) -> Submission {
        let router = self.router.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = router.drive(&task_id, &ctx).await {
                error!(investigation_id = %task_id, error = %e, "Investigation driver failed");
            }
        });

        Submission {
            investigation_id: id,
            status: Status::Routing,
        }
    }

    /// Register an investigation and run it in the background.
    pub async fn submit(&self, query: &str) -> Submission {
        let (id, ctx) = self.prepare(query).await;
        self.spawn_driver(id, ctx)
    }

    /// Like [`submit`](Self::submit), but the returned stream is registered
    /// before the driver starts, so it sees every event.
    pub async fn submit_and_subscribe(&self, query: &str) -> AppResult<(Submission, EventStream)> {
        let (id, ctx) = self.prepare(query).await;
        let events = self.subscribe(&id).await?;
        Ok((self.spawn_driver(id, ctx), events))
    }

    /// Register an investigation and run it to completion.
    pub async fn investigate(&self, query: &str) -> AppResult<Investigation> {
        let (id, ctx) = self.prepare(query).await;
        self.router.drive(&id, &ctx).await
    }

    /// Full snapshot of one investigation.
    pub async fn get(&self, id: &str) -> AppResult<Investigation> {
        self.store.get(id).await.ok_or_else(|| AppError::NotFound {
            investigation_id: id.to_string(),
        })
    }

    /// Summaries of every registered investigation.
    pub async fn list(&self) -> Vec<InvestigationSummary> {
        self.store.list().await
    }

    /// Every flagged signal across investigations.
    pub async fn signals(&self) -> Vec<SignalListing> {
        self.store.signals().await
    }

    /// Metadata of every report across investigations.
    pub async fn reports(&self) -> Vec<ReportListing> {
        self.store.reports().await
    }

    /// The report for `drug` in one investigation, matched case-insensitively.
    pub async fn report(&self, id: &str, drug: &str) -> AppResult<ReportRecord> {
        let found = self
            .store
            .with_investigation(id, |inv| inv.find_report(drug).cloned())
            .await
            .ok_or_else(|| AppError::NotFound {
                investigation_id: id.to_string(),
            })?;
        found.ok_or_else(|| AppError::ReportNotFound {
            investigation_id: id.to_string(),
            drug: drug.to_string(),
        })
    }

    /// Agent service reachability plus registry counts.
    pub async fn health(&self) -> HealthSummary {
        let agent = self.agent.health().await;
        let status = if agent.is_connected() { "healthy" } else { "degraded" };
        HealthSummary {
            status: status.to_string(),
            agent,
            investigations_count: self.store.len().await,
            running: self.store.running().await,
        }
    }

    /// Subscribe to live events, starting with a `current_state` snapshot.
    pub async fn subscribe(&self, id: &str) -> AppResult<EventStream> {
        let broadcaster = &self.broadcaster;
        self.store
            .with_investigation(id, |inv| broadcaster.register(id, inv))
            .await
            .ok_or_else(|| AppError::NotFound {
                investigation_id: id.to_string(),
            })
    }
}
