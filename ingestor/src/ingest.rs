use crate::errors::Result;
use crate::metrics::{BULK_BATCH_SIZE, INGEST_LATENCY_SECONDS, READINGS_INGESTED_TOTAL};
use crate::model::{NewReading, StampedReading};
use crate::store::ReadingStore;
use crate::validate::{validate, validate_batch};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Validates incoming readings, stamps them with the server clock and persists them.
///
/// The device clock is never consulted: ordering downstream is server receipt order.
#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn ReadingStore>,
    max_batch: usize,
    clock: Arc<StampClock>,
}

impl IngestionService {
    pub fn new(store: Arc<dyn ReadingStore>, max_batch: usize) -> Self {
        Self {
            store,
            max_batch,
            clock: Arc::new(StampClock::default()),
        }
    }

    pub async fn create_one(&self, candidate: NewReading) -> Result<Uuid> {
        validate(&candidate)?;

        let start = Instant::now();
        let reading = stamp(&candidate, self.clock.next(Utc::now()));
        let id = self.store.insert_one(reading).await?;

        INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        READINGS_INGESTED_TOTAL.inc();
        debug!("Stored reading {}", id);
        Ok(id)
    }

    /// All-or-nothing: a single invalid candidate rejects the batch before
    /// anything is written.
    pub async fn create_batch(&self, candidates: Vec<NewReading>) -> Result<u64> {
        validate_batch(&candidates, self.max_batch)?;
        BULK_BATCH_SIZE.observe(candidates.len() as f64);

        let start = Instant::now();
        let readings = stamp_batch(&candidates, &self.clock, Utc::now);
        let inserted = self.store.insert_many(&readings).await?;

        let elapsed = start.elapsed().as_secs_f64();
        INGEST_LATENCY_SECONDS.observe(elapsed);
        READINGS_INGESTED_TOTAL.inc_by(inserted as f64);
        info!("Stored batch of {} readings in {:.3}s", inserted, elapsed);
        Ok(inserted)
    }
}

/// Hands out strictly increasing microsecond stamps for the whole process.
///
/// A stamp is the wall clock rounded up to the store's precision, or one
/// microsecond past the previous stamp if the clock has not moved on. Single
/// and batch ingestion draw from the same sequence, so a request stamped later
/// always sorts after every reading stamped before it.
#[derive(Debug, Default)]
struct StampClock {
    last_micros: AtomicI64,
}

impl StampClock {
    fn next(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = ceil_to_micros(now);
        let now_micros = now.timestamp_micros();
        let advance = |last: i64| now_micros.max(last.saturating_add(1));

        let previous = self
            .last_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(advance(last)))
            .unwrap_or_else(|last| last);

        DateTime::from_timestamp_micros(advance(previous)).unwrap_or(now)
    }
}

fn stamp(candidate: &NewReading, timestamp: DateTime<Utc>) -> StampedReading {
    StampedReading {
        // range checked by validate
        adc_value: candidate.adc_value as i16,
        voltage: candidate.voltage,
        temperature_c: candidate.temperature_c,
        timestamp,
    }
}

/// Stamps each reading individually, in input order, from the shared clock.
fn stamp_batch(
    candidates: &[NewReading],
    clock: &StampClock,
    mut now: impl FnMut() -> DateTime<Utc>,
) -> Vec<StampedReading> {
    candidates
        .iter()
        .map(|candidate| stamp(candidate, clock.next(now())))
        .collect()
}

fn ceil_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let rem = ts.timestamp_subsec_nanos() % 1_000;
    if rem == 0 {
        ts
    } else {
        ts + Duration::nanoseconds(i64::from(1_000 - rem))
    }
}
