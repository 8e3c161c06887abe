use futures::future::join_all;
use std::future::Future;
use tokio::time::{timeout_at, Instant};

use super::Stage;
use crate::error::{StageError, StageResult};
use crate::state::ReasoningStep;

/// Result of one fan-out branch: its record plus the steps it produced.
#[derive(Debug)]
pub struct Branch<T> {
    /// The branch's record.
    pub record: T,
    /// Reasoning steps in call order.
    pub steps: Vec<ReasoningStep>,
    /// Conversation the agent answered on.
    pub conversation_id: Option<String>,
}

/// First conversation id among successful branches, in input order.
pub fn first_conversation<T>(results: &[StageResult<Branch<T>>]) -> Option<&str> {
    results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .find_map(|b| b.conversation_id.as_deref())
}

/// Await every branch concurrently, bounded by `deadline`.
///
/// Output order matches input order regardless of completion order. A branch
/// still running at the deadline is dropped (aborting its in-flight call) and
/// reported as [`StageError::TimedOut`].
pub async fn join_within<T, Fut>(
    stage: Stage,
    deadline: Instant,
    branches: impl IntoIterator<Item = Fut>,
) -> Vec<StageResult<Branch<T>>>
where
    Fut: Future<Output = StageResult<Branch<T>>>,
{
    join_all(branches.into_iter().map(|branch| async move {
        match timeout_at(deadline, branch).await {
            Ok(result) => result,
            Err(_) => Err(StageError::TimedOut {
                stage: stage.to_string(),
            }),
        }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn delayed(value: u32, delay_ms: u64) -> StageResult<Branch<u32>> {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(Branch {
            record: value,
            steps: Vec::new(),
            conversation_id: (value % 2 == 0).then(|| format!("conv-{}", value)),
        })
    }

    #[tokio::test]
    async fn test_preserves_input_order() {
        let deadline = Instant::now() + Duration::from_secs(5);
        let results = join_within(
            Stage::Investigate,
            deadline,
            vec![delayed(1, 60), delayed(2, 5), delayed(3, 30)],
        )
        .await;

        assert_eq!(first_conversation(&results), Some("conv-2"));
        let values: Vec<u32> = results.into_iter().map(|r| r.unwrap().record).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_deadline_degrades_only_slow_branches() {
        let deadline = Instant::now() + Duration::from_millis(50);
        let results = join_within(
            Stage::Report,
            deadline,
            vec![delayed(1, 5), delayed(2, 5_000)],
        )
        .await;

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(StageError::TimedOut { .. })));
    }
}
