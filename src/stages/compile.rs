use crate::state::{Delta, Investigation, ReasoningStep, Route};

const SYSTEM_AGENT: &str = "system";

/// One-line summary of what the investigation produced.
pub fn summarize(inv: &Investigation) -> String {
    match inv.route {
        Some(Route::Knowledge) => "Knowledge question answered successfully.".to_string(),
        Some(Route::QuickFactual) => "Data query completed successfully.".to_string(),
        Some(route) if route.is_pipeline() => {
            let mut summary = format!(
                "Investigation complete. Signals detected: {}, Cases investigated: {}, Reports generated: {}.",
                inv.counters.total_signals,
                inv.counters.total_investigations,
                inv.counters.total_reports
            );
            let high = inv.signals.iter().filter(|s| s.priority.is_high()).count();
            if high > 0 {
                summary.push_str(&format!(" HIGH PRIORITY signals: {}.", high));
            }
            summary
        }
        _ => "Investigation complete.".to_string(),
    }
}

/// Final stage: summary progress message plus a closing conclusion.
pub fn run(inv: &Investigation) -> Delta {
    let summary = summarize(inv);
    let delta = Delta::default().progress(summary.clone());
    match inv.route {
        Some(Route::OutOfDomain) | Some(Route::Greeting) => delta,
        _ => delta.step(ReasoningStep::conclusion(SYSTEM_AGENT, summary)),
    }
}
