//! Edge side of the thermistor pipeline.
//!
//! Reads the sensor on a fixed period and pushes readings to the ingestor
//! over HTTP. Readings that cannot be delivered wait in a bounded buffer and
//! go out together as one bulk request on the next tick.
//!
//! - [`sensor`]: thermistor conversion and the simulated ADC
//! - [`buffer`]: bounded, oldest-first retry buffer
//! - [`client`]: single and bulk HTTP delivery
//! - [`delivery`]: the periodic read/send/buffer loop

pub mod buffer;
pub mod client;
pub mod delivery;
pub mod reading;
pub mod sensor;

pub use buffer::DeliveryBuffer;
pub use client::{DeliveryClient, DeliveryFailure, HttpDeliveryClient};
pub use delivery::{DeliveryLoop, TickOutcome};
pub use reading::{Reading, ReadingSource, SourceError};
