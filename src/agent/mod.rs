//! Agent capability client and wire types.
//!
//! Stages talk to tool-using agents through the [`AgentCapability`] trait.
//! [`AgentClient`] is the HTTP implementation against a converse endpoint.

mod client;
mod types;


pub use client::AgentClient;
pub use types::*;

use async_trait::async_trait;

use crate::error::AgentResult;

/// A black-box request/response capability backed by a tool-using agent.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    /// Send `message` to `agent_id`, optionally continuing a conversation.
    async fn call(
        &self,
        agent_id: &str,
        message: &str,
        conversation_id: Option<&str>,
    ) -> AgentResult<AgentReply>;

    /// Check that the backing service is reachable.
    ///
    /// Capabilities without a remote service are always connected.
    async fn health(&self) -> AgentHealth {
        AgentHealth::connected(None)
    }
}
