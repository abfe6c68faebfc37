use crate::errors::{Error, Result};
use crate::model::{RangeFilter, Reading, ReadingPage, StatsSummary};
use crate::store::ReadingStore;
use std::sync::Arc;
use uuid::Uuid;

/// Read side: paginated listing, lookups and aggregate statistics.
///
/// Nothing here is a transactional snapshot. `total` and `data` come from two
/// separate store calls and may disagree under concurrent writes.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn ReadingStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// Newest-first page of readings inside `filter`.
    ///
    /// `page` is 1-based; callers validate `page >= 1` and `per_page` in `[1, 100]`.
    pub async fn list(&self, page: u32, per_page: u32, filter: RangeFilter) -> Result<ReadingPage> {
        let skip = u64::from(page.saturating_sub(1)) * u64::from(per_page);

        let total = self.store.count(&filter).await?;
        let data = self.store.find(&filter, skip, u64::from(per_page)).await?;

        Ok(ReadingPage {
            total,
            page,
            per_page,
            data,
        })
    }

    pub async fn latest(&self) -> Result<Reading> {
        self.store
            .latest()
            .await?
            .ok_or_else(|| Error::NotFound("No temperature readings available".to_string()))
    }

    pub async fn get_by_id(&self, raw_id: &str) -> Result<Reading> {
        let id = Uuid::parse_str(raw_id.trim())
            .map_err(|_| Error::InvalidId(raw_id.to_string()))?;

        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Reading {} not found", id)))
    }

    /// Aggregates over `filter`. `last_reading` is the newest reading in the
    /// whole collection and ignores `filter`.
    pub async fn stats(&self, filter: RangeFilter) -> Result<StatsSummary> {
        let aggregate = self.store.aggregate(&filter).await?;
        let last_reading = self.store.latest().await?;

        let (avg, min, max) = if aggregate.count == 0 {
            (None, None, None)
        } else {
            (
                aggregate.avg.map(round2),
                aggregate.min.map(round2),
                aggregate.max.map(round2),
            )
        };

        Ok(StatsSummary {
            count: aggregate.count,
            avg_temperature: avg,
            min_temperature: min,
            max_temperature: max,
            last_reading,
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
