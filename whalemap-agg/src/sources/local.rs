//! Local-storage adapter
//!
//! Serves locally-entered observations. No network I/O; the store is re-read
//! every cycle so new entries appear on the next refresh.

use super::store::LocalObservationStore;
use crate::types::{AdapterError, FetchRequest, Observation, RefetchPolicy, SourceAdapter};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct LocalAdapter {
    store: Arc<LocalObservationStore>,
}

impl LocalAdapter {
    pub fn new(store: Arc<LocalObservationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SourceAdapter for LocalAdapter {
    fn name(&self) -> &'static str {
        "local"
    }

    fn refetch_policy(&self) -> RefetchPolicy {
        RefetchPolicy::EVERY_CYCLE
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Observation>, AdapterError> {
        let observations = self.store.load()?;
        debug!(
            generation = request.generation,
            count = observations.len(),
            "Local observations fetched"
        );
        Ok(observations)
    }
}
