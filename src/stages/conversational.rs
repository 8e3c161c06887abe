//! Canned replies that never call an agent.

use super::StageContext;
use crate::prompts::{GREETING_RESPONSE, OUT_OF_DOMAIN_RESPONSE};
use crate::state::{Delta, Investigation, ReasoningStep};

/// Canned welcome, no agent call.
pub fn greeting(ctx: &StageContext, _inv: &Investigation) -> Delta {
    let mut delta = Delta::default()
        .step(ReasoningStep::conclusion(
            &ctx.agents.classifier,
            "Greeting detected. Replying with an introduction to available capabilities.",
        ))
        .progress("Greeting answered");
    delta.direct_response = Some(GREETING_RESPONSE.to_string());
    delta
}

/// Canned redirect, no agent call.
pub fn out_of_scope(ctx: &StageContext, inv: &Investigation) -> Delta {
    let mut delta = Delta::default()
        .step(ReasoningStep::conclusion(
            &ctx.agents.classifier,
            format!(
                "Query '{}' is outside the drug safety domain. Redirecting to supported capabilities.",
                inv.query
            ),
        ))
        .progress("Query outside drug safety scope, redirected");
    delta.direct_response = Some(OUT_OF_DOMAIN_RESPONSE.to_string());
    delta
}
