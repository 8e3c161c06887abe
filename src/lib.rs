//! # Signal Triage
//!
//! An intent-routed investigation orchestrator for drug-safety signal triage.
//! A free-text request is classified into a route, driven through a graph of
//! analysis stages backed by tool-using agents, and accumulated into a shared
//! investigation record whose progress is streamed to live subscribers.
//!
//! ## Routes
//!
//! - **Broad scan**: scan, investigate each flagged signal, report on each
//! - **Deep dive**: investigate one named drug, then report
//! - **Report**: report directly on one named drug
//! - **Quick factual**: one data question answered by an agent
//! - **Knowledge**: retrieval-grounded answer to a conceptual question
//! - **Greeting / out of domain**: canned replies, no agent calls
//!
//! ## Architecture
//!
//! ```text
//! MCP client (stdio) -> Orchestrator -> Router -> Stages -> Agent service (HTTP)
//!                            |            |         \-> Knowledge search (HTTP)
//!                            |            v
//!                            |        StateStore --> Broadcaster --> subscribers
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use signal_triage::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let orchestrator = Orchestrator::from_config(&config)?;
//!     let investigation = orchestrator
//!         .investigate("Investigate Cardizol-X for cardiac safety signals")
//!         .await?;
//!     println!("{} reports", investigation.reports.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Agent capability trait and HTTP client.
pub mod agent;
/// Knowledge-base retrieval trait and HTTP client.
pub mod knowledge;
/// Prompt texts and canned replies.
pub mod prompts;
/// Investigation record, deltas and the registry.
pub mod state;
/// Evidence extraction and reasoning recording.
pub mod extract;
/// Stage executors.
pub mod stages;
/// Transition table and driver loop.
pub mod router;
/// Live progress fan-out.
pub mod broadcast;
/// Submit / Read / Subscribe surface.
pub mod orchestrator;
/// MCP server over stdio.
pub mod server;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use orchestrator::{HealthSummary, Orchestrator, Submission};
pub use server::{AppState, McpServer, SharedState};
