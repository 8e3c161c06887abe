use indexmap::IndexMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{Delta, Investigation, InvestigationSummary, ReportListing, SignalListing};
use crate::error::{AppError, AppResult};

/// Process-wide investigation registry.
///
/// Entries are kept in insertion order so eviction can pick the oldest
/// terminal investigation. Running investigations are never evicted; the
/// bound is exceeded instead.
pub struct StateStore {
    investigations: RwLock<IndexMap<String, Investigation>>,
    capacity: usize,
}

impl StateStore {
    /// Registry holding at most `capacity` finished investigations.
    pub fn new(capacity: usize) -> Self {
        Self {
            investigations: RwLock::new(IndexMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a new investigation, evicting the oldest finished one if full.
    pub async fn insert(&self, investigation: Investigation) {
        let mut map = self.investigations.write().await;

        if map.len() >= self.capacity {
            let oldest_terminal = map
                .iter()
                .find(|(_, inv)| inv.status.is_terminal())
                .map(|(id, _)| id.clone());

            match oldest_terminal {
                Some(id) => {
                    map.shift_remove(&id);
                    info!(investigation_id = %id, "Evicted oldest finished investigation");
                }
                None => warn!(
                    capacity = self.capacity,
                    "Registry full of running investigations, exceeding bound"
                ),
            }
        }

        debug!(investigation_id = %investigation.id, "Registered investigation");
        map.insert(investigation.id.clone(), investigation);
    }

    /// Snapshot of one investigation.
    pub async fn get(&self, id: &str) -> Option<Investigation> {
        self.investigations.read().await.get(id).cloned()
    }

    /// Run `f` against an investigation while holding the read lock.
    pub async fn with_investigation<R>(
        &self,
        id: &str,
        f: impl FnOnce(&Investigation) -> R,
    ) -> Option<R> {
        let map = self.investigations.read().await;
        map.get(id).map(f)
    }

    /// Merge `delta`, then run `after` on the merged record under the same
    /// write lock. `after` is skipped when the delta was dropped.
    pub async fn apply_with<R>(
        &self,
        id: &str,
        delta: Delta,
        after: impl FnOnce(&Investigation) -> R,
    ) -> AppResult<Option<R>> {
        let mut map = self.investigations.write().await;
        let investigation = map.get_mut(id).ok_or_else(|| AppError::NotFound {
            investigation_id: id.to_string(),
        })?;

        if investigation.merge(delta) {
            Ok(Some(after(investigation)))
        } else {
            Ok(None)
        }
    }

    /// Merge `delta` and return the updated snapshot.
    pub async fn apply(&self, id: &str, delta: Delta) -> AppResult<Investigation> {
        let mut map = self.investigations.write().await;
        let investigation = map.get_mut(id).ok_or_else(|| AppError::NotFound {
            investigation_id: id.to_string(),
        })?;
        investigation.merge(delta);
        Ok(investigation.clone())
    }

    /// Summaries of every known investigation, oldest first.
    pub async fn list(&self) -> Vec<InvestigationSummary> {
        self.investigations
            .read()
            .await
            .values()
            .map(Investigation::summary)
            .collect()
    }

    /// Every flagged signal, grouped by investigation, oldest first.
    pub async fn signals(&self) -> Vec<SignalListing> {
        self.investigations
            .read()
            .await
            .values()
            .flat_map(Investigation::signal_listings)
            .collect()
    }

    /// Metadata for every generated report, grouped by investigation.
    pub async fn reports(&self) -> Vec<ReportListing> {
        self.investigations
            .read()
            .await
            .values()
            .flat_map(Investigation::report_listings)
            .collect()
    }

    /// Number of investigations not yet terminal.
    pub async fn running(&self) -> usize {
        self.investigations
            .read()
            .await
            .values()
            .filter(|inv| !inv.status.is_terminal())
            .count()
    }

    /// The last `n` submitted queries excluding `exclude_id`, oldest first.
    pub async fn recent_queries(&self, n: usize, exclude_id: &str) -> Vec<String> {
        let map = self.investigations.read().await;
        let mut queries: Vec<String> = map
            .values()
            .rev()
            .filter(|inv| inv.id != exclude_id)
            .take(n)
            .map(|inv| inv.query.clone())
            .collect();
        queries.reverse();
        queries
    }

    /// Number of registered investigations.
    pub async fn len(&self) -> usize {
        self.investigations.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
