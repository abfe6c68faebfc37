use crate::errors::{Error, Result};
use crate::metrics::READINGS_PURGED_TOTAL;
use crate::model::RangeFilter;
use crate::store::ReadingStore;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct PurgeService {
    store: Arc<dyn ReadingStore>,
}

impl PurgeService {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// Deletes every reading inside `filter`. An unbounded filter is refused
    /// so a missing parameter can never wipe the collection.
    pub async fn delete_by_range(&self, filter: RangeFilter) -> Result<u64> {
        if filter.is_unbounded() {
            return Err(Error::EmptyFilter);
        }

        let deleted = self.store.delete_many(&filter).await?;
        READINGS_PURGED_TOTAL.inc_by(deleted as f64);
        info!(
            "Purged {} readings (start={:?}, end={:?})",
            deleted, filter.start, filter.end
        );
        Ok(deleted)
    }
}
