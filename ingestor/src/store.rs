//! Persistence seam for readings.
//!
//! Services only ever see [`ReadingStore`]; the PostgreSQL implementation
//! lives in [`crate::db`]. Single-document operations are atomic. The
//! store assigns identifiers, never the caller.

use crate::errors::Result;
use crate::model::{RangeFilter, Reading, StampedReading, TemperatureAggregate};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist one reading, returning the identifier assigned to it.
    async fn insert_one(&self, reading: StampedReading) -> Result<Uuid>;

    /// Persist a batch in input order. Either every reading is stored or none is.
    async fn insert_many(&self, readings: &[StampedReading]) -> Result<u64>;

    /// Readings matching `filter`, newest first, after skipping `skip` and
    /// returning at most `limit`. Equal timestamps fall back to insertion order,
    /// newest first, so that pages never overlap.
    async fn find(&self, filter: &RangeFilter, skip: u64, limit: u64) -> Result<Vec<Reading>>;

    async fn count(&self, filter: &RangeFilter) -> Result<u64>;

    /// Most recent reading across the whole collection.
    async fn latest(&self) -> Result<Option<Reading>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Reading>>;

    async fn aggregate(&self, filter: &RangeFilter) -> Result<TemperatureAggregate>;

    async fn delete_many(&self, filter: &RangeFilter) -> Result<u64>;

    /// Cheap round trip used by the health endpoint.
    async fn ping(&self) -> Result<()>;
}
