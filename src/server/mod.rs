//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers for the investigation surface
//! - Shared application state

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::config::Config;
use crate::error::AppResult;
use crate::orchestrator::Orchestrator;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// Investigation surface.
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Create application state with HTTP collaborators built from `config`.
    pub fn new(config: Config) -> AppResult<Self> {
        let orchestrator = Orchestrator::from_config(&config)?;
        Ok(Self::with_orchestrator(config, orchestrator))
    }

    /// Create application state around an existing orchestrator.
    pub fn with_orchestrator(config: Config, orchestrator: Orchestrator) -> Self {
        tracing::info!(
            classifier = %config.agents.classifier,
            scanner = %config.agents.scanner,
            investigator = %config.agents.investigator,
            reporter = %config.agents.reporter,
            "AppState initializing with agent configuration"
        );
        Self {
            config,
            orchestrator,
        }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
