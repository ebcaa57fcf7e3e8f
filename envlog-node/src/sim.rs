//! Simulated environmental sensor.

use crate::settings::SensorSettings;
use envlog_core::{FieldMask, Reading, Sensor, SensorError};
use std::f32::consts::TAU;

/// Deterministic sensor producing a daily cycle.
///
/// Temperature peaks mid-period, humidity moves opposite to it and pressure
/// drifts on a slower cycle.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    settings: SensorSettings,
    reads: u64,
}

impl SimulatedSensor {
    pub fn new(settings: SensorSettings) -> Self {
        Self { settings, reads: 0 }
    }

    /// Number of read attempts so far.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    fn phase(&self, periods: f32) -> f32 {
        let period = self.settings.period_samples.max(1) as f32 * periods;
        (self.reads % period as u64) as f32 / period * TAU
    }
}

impl Sensor for SimulatedSensor {
    fn read(&mut self, _fields: FieldMask) -> Result<Reading, SensorError> {
        self.reads += 1;
        let fail_every = self.settings.fail_every as u64;
        if fail_every > 0 && self.reads % fail_every == 0 {
            return Err(SensorError::NotReady);
        }

        let s = &self.settings;
        let day = self.phase(1.0).sin();
        let drift = self.phase(7.0).cos();
        Ok(Reading::new(
            s.base_temperature_c + s.temperature_swing_c * day,
            (s.base_humidity_rh - s.humidity_swing_rh * day).clamp(0.0, 100.0),
            s.base_pressure_pa + s.pressure_swing_pa * drift,
        ))
    }
}
