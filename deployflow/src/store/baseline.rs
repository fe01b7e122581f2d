//! Stable baseline revisions per environment pair.

use dashmap::DashMap;
use tracing::info;

use crate::core::Revision;

/// The last successfully deployed revision of each pair.
///
/// The next execution against the pair treats it as its rollback target.
#[derive(Debug, Default)]
pub struct BaselineStore {
    baselines: DashMap<String, Revision>,
}

impl BaselineStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `revision` as the stable baseline of `pair`.
    pub fn record(&self, pair: &str, revision: Revision) {
        info!(pair, revision = %revision, "Recorded stable baseline");
        self.baselines.insert(pair.to_string(), revision);
    }

    /// Returns the stable baseline of `pair`.
    #[must_use]
    pub fn get(&self, pair: &str) -> Option<Revision> {
        self.baselines.get(pair).map(|entry| entry.value().clone())
    }
}
