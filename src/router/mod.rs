//! Stage graph and driver loop.
//!
//! The graph is an explicit table of `(stage, event) -> transition`, testable
//! without running any stage. The driver runs one stage at a time, derives
//! its event from the produced delta, and commits the delta together with the
//! status of whatever comes next.

use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::broadcast::{Broadcaster, ProgressEvent};
use crate::error::{AppError, AppResult, StageError};
use crate::stages::{self, Stage, StageContext};
use crate::state::{Delta, Investigation, Route, StateStore, Status};

const SYSTEM_AGENT: &str = "system";

/// Outcome of a stage, as far as routing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    /// The classifier picked a route.
    Classified(Route),
    /// The scan flagged at least one signal.
    SignalsFound,
    /// The scan flagged nothing.
    NoSignals,
    /// At least one item was investigated.
    Investigated,
    /// There was nothing to investigate.
    NothingInvestigated,
    /// A single-shot stage finished.
    Done,
    /// The stage failed.
    Failed,
}

/// Edge taken out of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Run this stage next.
    Next(Stage),
    /// Finish successfully.
    Complete,
    /// Finish with an error.
    Error,
}

impl Transition {
    /// Status the investigation enters when this edge is taken.
    pub fn status(&self) -> Status {
        match self {
            Transition::Next(stage) => stage.status(),
            Transition::Complete => Status::Complete,
            Transition::Error => Status::Error,
        }
    }
}

/// Entry stage for a classified route.
pub fn route_entry(route: Route) -> Stage {
    match route {
        Route::BroadScan => Stage::Scan,
        Route::DeepDive => Stage::Investigate,
        Route::Report => Stage::Report,
        Route::QuickFactual => Stage::DirectQuery,
        Route::Knowledge => Stage::Knowledge,
        Route::OutOfDomain => Stage::OutOfScope,
        Route::Greeting => Stage::Greeting,
    }
}

/// The transition table. `None` marks an event a stage can never produce.
pub fn transition(stage: Stage, event: &StageEvent) -> Option<Transition> {
    use StageEvent::*;

    let next = match (stage, event) {
        (_, Failed) => Transition::Error,
        (Stage::Classify, Classified(route)) => Transition::Next(route_entry(*route)),
        (Stage::Scan, SignalsFound) => Transition::Next(Stage::Investigate),
        (Stage::Scan, NoSignals) => Transition::Next(Stage::Compile),
        (Stage::Investigate, Investigated) => Transition::Next(Stage::Report),
        (Stage::Investigate, NothingInvestigated) => Transition::Next(Stage::Compile),
        (
            Stage::Report
            | Stage::DirectQuery
            | Stage::Knowledge
            | Stage::Greeting
            | Stage::OutOfScope,
            Done,
        ) => Transition::Next(Stage::Compile),
        (Stage::Compile, Done) => Transition::Complete,
        _ => return None,
    };
    Some(next)
}

/// Derive the routing event from a stage's delta and the pre-stage snapshot.
pub fn event_for(stage: Stage, before: &Investigation, delta: &Delta) -> StageEvent {
    match stage {
        Stage::Classify => match delta.route.or(before.route) {
            Some(route) => StageEvent::Classified(route),
            None => StageEvent::Failed,
        },
        Stage::Scan if delta.signals.is_empty() => StageEvent::NoSignals,
        Stage::Scan => StageEvent::SignalsFound,
        Stage::Investigate
            if before.sub_investigations.is_empty() && delta.sub_investigations.is_empty() =>
        {
            StageEvent::NothingInvestigated
        }
        Stage::Investigate => StageEvent::Investigated,
        _ => StageEvent::Done,
    }
}

/// Drives investigations through the stage graph.
pub struct Router {
    store: Arc<StateStore>,
    broadcaster: Arc<Broadcaster>,
}

impl Router {
    /// Router committing into `store` and publishing through `broadcaster`.
    pub fn new(store: Arc<StateStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self { store, broadcaster }
    }

    /// Run `id` from classification to a terminal status.
    pub async fn drive(&self, id: &str, ctx: &StageContext) -> AppResult<Investigation> {
        let mut stage = Stage::Classify;

        loop {
            let snapshot = self.store.get(id).await.ok_or_else(|| AppError::NotFound {
                investigation_id: id.to_string(),
            })?;
            if snapshot.status.is_terminal() {
                break;
            }

            let started = Instant::now();
            let outcome = stages::execute(stage, ctx, &snapshot).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let mut delta = match outcome {
                Ok(delta) => delta,
                Err(e) => {
                    error!(
                        investigation_id = %id,
                        stage = %stage,
                        latency_ms,
                        error = %e,
                        "Stage failed"
                    );
                    self.fail(id, stage, &e).await?;
                    break;
                }
            };

            let event = event_for(stage, &snapshot, &delta);
            let Some(next) = transition(stage, &event) else {
                let e = StageError::Invalid {
                    stage: stage.to_string(),
                    reason: format!("no transition for {:?}", event),
                };
                error!(investigation_id = %id, stage = %stage, error = %e, "Invalid transition");
                self.fail(id, stage, &e).await?;
                break;
            };

            info!(
                investigation_id = %id,
                stage = %stage,
                latency_ms,
                next = ?next,
                "Stage completed"
            );

            delta.status = Some(next.status());
            self.commit(id, stage, delta).await?;

            match next {
                Transition::Next(following) => stage = following,
                Transition::Complete | Transition::Error => break,
            }
        }

        self.broadcaster.close(id);
        self.store.get(id).await.ok_or_else(|| AppError::NotFound {
            investigation_id: id.to_string(),
        })
    }

    /// Merge and publish under the store's write lock.
    async fn commit(&self, id: &str, stage: Stage, delta: Delta) -> AppResult<()> {
        let message = delta.progress_messages.last().cloned();
        let steps = delta.reasoning_trace.clone();
        let broadcaster = &self.broadcaster;

        let published = self
            .store
            .apply_with(id, delta, |inv| {
                let mut events = vec![ProgressEvent::progress(stage, inv, message)];
                if !steps.is_empty() {
                    events.push(ProgressEvent::Reasoning { stage, steps });
                }
                broadcaster.publish(id, &events);
            })
            .await?;

        if published.is_none() {
            warn!(investigation_id = %id, stage = %stage, "Delta dropped, investigation already finished");
        }
        Ok(())
    }

    async fn fail(&self, id: &str, stage: Stage, e: &StageError) -> AppResult<()> {
        let message = e.to_string();
        let broadcaster = &self.broadcaster;
        self.store
            .apply_with(id, Delta::error(SYSTEM_AGENT, &message), |inv| {
                broadcaster.publish(
                    id,
                    &[
                        ProgressEvent::progress(stage, inv, Some(message.clone())),
                        ProgressEvent::Error {
                            message: message.clone(),
                        },
                    ],
                );
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::context;
    use crate::state::SignalRecord;
    use futures::StreamExt;

    #[test]
    fn test_classify_routes_to_entry_stage() {
        let cases = [
            (Route::BroadScan, Stage::Scan),
            (Route::DeepDive, Stage::Investigate),
            (Route::Report, Stage::Report),
            (Route::QuickFactual, Stage::DirectQuery),
            (Route::Knowledge, Stage::Knowledge),
            (Route::OutOfDomain, Stage::OutOfScope),
            (Route::Greeting, Stage::Greeting),
        ];
        for (route, stage) in cases {
            assert_eq!(
                transition(Stage::Classify, &StageEvent::Classified(route)),
                Some(Transition::Next(stage))
            );
        }
    }

    #[test]
    fn test_conditional_edges() {
        assert_eq!(
            transition(Stage::Scan, &StageEvent::SignalsFound),
            Some(Transition::Next(Stage::Investigate))
        );
        assert_eq!(
            transition(Stage::Scan, &StageEvent::NoSignals),
            Some(Transition::Next(Stage::Compile))
        );
        assert_eq!(
            transition(Stage::Investigate, &StageEvent::NothingInvestigated),
            Some(Transition::Next(Stage::Compile))
        );
        assert_eq!(
            transition(Stage::Compile, &StageEvent::Done),
            Some(Transition::Complete)
        );
    }

    #[test]
    fn test_failure_from_any_stage_is_terminal() {
        for stage in [Stage::Classify, Stage::Scan, Stage::Report, Stage::Compile] {
            assert_eq!(transition(stage, &StageEvent::Failed), Some(Transition::Error));
        }
    }

    #[test]
    fn test_impossible_events_have_no_edge() {
        assert_eq!(transition(Stage::Compile, &StageEvent::SignalsFound), None);
        assert_eq!(
            transition(Stage::Scan, &StageEvent::Classified(Route::Report)),
            None
        );
    }

    #[test]
    fn test_event_for_scan() {
        let inv = Investigation::new("INV-1", "scan");
        let mut delta = Delta::default();
        assert_eq!(event_for(Stage::Scan, &inv, &delta), StageEvent::NoSignals);
        delta.signals.push(SignalRecord::new("A", "Rash"));
        assert_eq!(event_for(Stage::Scan, &inv, &delta), StageEvent::SignalsFound);
    }

    #[tokio::test]
    async fn test_drive_greeting_to_complete() {
        let store = Arc::new(StateStore::new(8));
        let broadcaster = Arc::new(Broadcaster::new());
        let router = Router::new(store.clone(), broadcaster.clone());
        let ctx = context(vec![("CLASSIFY", Ok(r#"{"route": "greeting"}"#), 0)]);

        let inv = Investigation::new("INV-1", "hello");
        let stream = broadcaster.register("INV-1", &inv);
        store.insert(inv).await;

        let finished = router.drive("INV-1", &ctx).await.unwrap();
        assert_eq!(finished.status, Status::Complete);
        assert_eq!(finished.route, Some(Route::Greeting));

        let kinds: Vec<&str> = stream.map(|e| e.kind()).collect().await;
        assert_eq!(
            kinds,
            vec!["current_state", "progress", "reasoning", "progress", "reasoning", "progress"]
        );
    }

    #[tokio::test]
    async fn test_drive_stage_failure_sets_error() {
        let store = Arc::new(StateStore::new(8));
        let router = Router::new(store.clone(), Arc::new(Broadcaster::new()));
        let ctx = context(vec![
            ("CLASSIFY", Ok(r#"{"route": "quick_factual"}"#), 0),
            ("data question", Err(500), 0),
        ]);
        store.insert(Investigation::new("INV-1", "How many events?")).await;

        let finished = router.drive("INV-1", &ctx).await.unwrap();
        assert_eq!(finished.status, Status::Error);
        assert_eq!(finished.errors.len(), 1);
        assert_eq!(finished.progress_messages.last(), finished.errors.first());
    }
}
