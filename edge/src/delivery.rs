//! The edge delivery loop: read, send, buffer on failure, retry as a batch.
//!
//! Buffer states:
//!
//! - EMPTY: the new reading goes out alone through `send_one`. On failure it
//!   is buffered and the loop moves to ACCUMULATING.
//! - ACCUMULATING: the new reading is appended and the whole buffer goes out
//!   through `send_batch`. Success acknowledges the snapshot (back to EMPTY),
//!   failure keeps it (bounded by eviction).
//!
//! A payload the ingestor refuses outright (400, 413, 422) is never retried:
//! the single reading or the whole snapshot is discarded with an error log,
//! since resending it unchanged cannot succeed.
//!
//! Delivery is at-least-once. If a batch is persisted but the response is
//! lost, the same readings are sent again on the next tick and the server
//! stores them twice. There is no deduplication key.

use crate::buffer::DeliveryBuffer;
use crate::client::DeliveryClient;
use crate::reading::{Reading, ReadingSource, SourceError};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2);

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Fast path: the reading was acknowledged on its own.
    Sent,
    /// `send_one` failed and the reading was buffered.
    Buffered { pending: usize, evicted: usize },
    /// The buffered batch was acknowledged and removed.
    Flushed { delivered: usize },
    /// `send_batch` failed; the buffer is kept for the next tick.
    Retained { pending: usize, evicted: usize },
    /// The ingestor refused the payload; `count` readings were dropped.
    Discarded { count: usize },
    /// The sensor read failed recoverably; nothing else happened.
    Skipped,
}

/// Owns the reading source and closes it exactly once, on whichever path
/// the loop exits by (including unwinding).
struct SourceHandle<S: ReadingSource> {
    inner: S,
    released: bool,
}

impl<S: ReadingSource> SourceHandle<S> {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.close();
        }
    }
}

impl<S: ReadingSource> Drop for SourceHandle<S> {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct DeliveryLoop<S: ReadingSource, C> {
    source: SourceHandle<S>,
    client: C,
    buffer: DeliveryBuffer<Reading>,
    period: Duration,
}

impl<S: ReadingSource, C: DeliveryClient> DeliveryLoop<S, C> {
    pub fn new(source: S, client: C, capacity: usize, period: Duration) -> Self {
        Self {
            source: SourceHandle {
                inner: source,
                released: false,
            },
            client,
            buffer: DeliveryBuffer::new(capacity),
            period,
        }
    }

    pub fn buffer(&self) -> &DeliveryBuffer<Reading> {
        &self.buffer
    }

    /// Runs one iteration. Only a fatal source error is returned as `Err`;
    /// delivery failures are absorbed into the buffer or, for refused
    /// payloads, discarded.
    pub async fn tick(&mut self) -> Result<TickOutcome, SourceError> {
        let reading = match self.source.inner.read() {
            Ok(reading) => reading,
            Err(SourceError::Recoverable(msg)) => {
                warn!("Sensor read failed, skipping tick: {}", msg);
                return Ok(TickOutcome::Skipped);
            }
            Err(fatal) => return Err(fatal),
        };
        debug!("Reading: {:?}", reading);

        if self.buffer.is_empty() {
            return Ok(match self.client.send_one(&reading).await {
                Ok(_) => TickOutcome::Sent,
                Err(e) if !e.is_retryable() => {
                    error!("Ingestor refused reading {:?}, discarding it: {}", reading, e);
                    TickOutcome::Discarded { count: 1 }
                }
                Err(e) => {
                    warn!("Send failed, buffering reading: {}", e);
                    let evicted = self.buffer.append(reading);
                    TickOutcome::Buffered {
                        pending: self.buffer.len(),
                        evicted,
                    }
                }
            });
        }

        let evicted = self.buffer.append(reading);
        if evicted > 0 {
            warn!(
                "Delivery buffer full, dropped {} oldest reading(s) ({} lost so far)",
                evicted,
                self.buffer.evicted()
            );
        }

        let snapshot = self.buffer.snapshot();
        match self.client.send_batch(snapshot.items()).await {
            Ok(_) => Ok(TickOutcome::Flushed {
                delivered: self.buffer.acknowledge(&snapshot),
            }),
            Err(e) if !e.is_retryable() => {
                let count = self.buffer.acknowledge(&snapshot);
                error!("Ingestor refused a batch of {}, discarding it: {}", count, e);
                Ok(TickOutcome::Discarded { count })
            }
            Err(e) => {
                warn!("Batch of {} failed, keeping buffer: {}", snapshot.len(), e);
                Ok(TickOutcome::Retained {
                    pending: self.buffer.len(),
                    evicted,
                })
            }
        }
    }

    /// Ticks every `period` until `cancel` fires or the source fails fatally.
    /// The source is released before this returns.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SourceError> {
        let result = self.drive(&cancel).await;
        self.source.release();

        if !self.buffer.is_empty() {
            warn!(
                "Stopping with {} unacknowledged reading(s) in the buffer",
                self.buffer.len()
            );
        }
        result
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<(), SourceError> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Delivery loop started: period {:?}, buffer capacity {}",
            self.period,
            self.buffer.capacity()
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Delivery loop cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Delivery loop cancelled mid-tick, in-flight send abandoned");
                    return Ok(());
                }
                outcome = self.tick() => outcome,
            };

            match outcome {
                Ok(TickOutcome::Sent) => debug!("Reading delivered"),
                Ok(TickOutcome::Flushed { delivered }) => {
                    info!("Delivered {} buffered reading(s)", delivered)
                }
                Ok(TickOutcome::Buffered { pending, .. } | TickOutcome::Retained { pending, .. }) => {
                    info!("Ingestor unreachable, {} reading(s) pending", pending)
                }
                Ok(TickOutcome::Skipped | TickOutcome::Discarded { .. }) => {}
                Err(e) => {
                    error!("Stopping delivery loop: {}", e);
                    return Err(e);
                }
            }
        }
    }
}
