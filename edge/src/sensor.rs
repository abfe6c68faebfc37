use crate::reading::{Reading, ReadingSource, SourceError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

const SUPPLY_VOLTAGE: f64 = 3.3;
const ADC_FULL_SCALE: f64 = 255.0;
/// Series and nominal thermistor resistance, kΩ.
const R_REF_KOHM: f64 = 10.0;
const T_NOMINAL_K: f64 = 273.15 + 25.0;
const BETA: f64 = 3950.0;

/// Converts a raw 8-bit ADC sample from the NTC divider into a reading.
///
/// The model diverges at both rails (0 and 255), so those samples are
/// rejected instead of producing infinite temperatures.
pub fn thermistor_reading(adc_value: u8) -> Result<Reading, SourceError> {
    let voltage = f64::from(adc_value) / ADC_FULL_SCALE * SUPPLY_VOLTAGE;
    let resistance = R_REF_KOHM * voltage / (SUPPLY_VOLTAGE - voltage);
    let temp_k = 1.0 / (1.0 / T_NOMINAL_K + (resistance / R_REF_KOHM).ln() / BETA);
    let temperature_c = temp_k - 273.15;

    if !resistance.is_finite() || resistance <= 0.0 || !temperature_c.is_finite() {
        return Err(SourceError::Recoverable(format!(
            "adc value {} is outside the thermistor model",
            adc_value
        )));
    }

    Ok(Reading {
        adc_value,
        voltage: round2(voltage),
        temperature_c: round2(temperature_c),
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Stand-in for the I2C converter: a bounded random walk around `center`
/// that occasionally fails a read.
pub struct SimulatedAdc {
    rng: StdRng,
    level: f64,
    center: f64,
    failure_rate: f64,
    closed: bool,
}

impl SimulatedAdc {
    pub fn new(center: u8, failure_rate: f64) -> Self {
        Self::with_rng(StdRng::from_entropy(), center, failure_rate)
    }

    pub fn with_rng(rng: StdRng, center: u8, failure_rate: f64) -> Self {
        Self {
            rng,
            level: f64::from(center),
            center: f64::from(center),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            closed: false,
        }
    }
}

impl ReadingSource for SimulatedAdc {
    fn read(&mut self) -> Result<Reading, SourceError> {
        if self.closed {
            return Err(SourceError::Fatal("ADC handle already closed".to_string()));
        }

        if self.rng.gen_bool(self.failure_rate) {
            return Err(SourceError::Recoverable("I2C read timed out".to_string()));
        }

        // Drift, pulled gently back towards the centre.
        let step = self.rng.gen_range(-2.0..2.0) + (self.center - self.level) * 0.05;
        self.level = (self.level + step).clamp(1.0, 254.0);

        thermistor_reading(self.level.round() as u8)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            info!("ADC handle released");
        }
    }
}
