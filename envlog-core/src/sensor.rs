//! Sensor collaborator.

use crate::config::{Field, FieldMask};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a sensor source.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor not ready")]
    NotReady,

    #[error("{0} reading unavailable")]
    Unavailable(Field),

    #[error("bus error: {0}")]
    Bus(String),
}

/// One set of readings, without a timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature_c: Option<f32>,
    pub humidity_rh: Option<f32>,
    pub pressure_pa: Option<f32>,
}

impl Reading {
    pub fn new(temperature_c: f32, humidity_rh: f32, pressure_pa: f32) -> Self {
        Self {
            temperature_c: Some(temperature_c),
            humidity_rh: Some(humidity_rh),
            pressure_pa: Some(pressure_pa),
        }
    }

    pub fn get(&self, field: Field) -> Option<f32> {
        match field {
            Field::Temperature => self.temperature_c,
            Field::Humidity => self.humidity_rh,
            Field::Pressure => self.pressure_pa,
        }
    }
}

/// Source of environmental readings.
///
/// `fields` tells the sensor which readings the log will keep; it may return
/// more, never fewer.
pub trait Sensor {
    fn read(&mut self, fields: FieldMask) -> Result<Reading, SensorError>;
}

impl<F> Sensor for F
where
    F: FnMut(FieldMask) -> Result<Reading, SensorError>,
{
    fn read(&mut self, fields: FieldMask) -> Result<Reading, SensorError> {
        self(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_sensor() {
        let mut calls = 0;
        let mut sensor = |_fields: FieldMask| {
            calls += 1;
            Ok::<_, SensorError>(Reading::new(21.5, 40.0, 101_325.0))
        };
        let reading = Sensor::read(&mut sensor, FieldMask::ALL).unwrap();
        assert_eq!(reading.get(Field::Pressure), Some(101_325.0));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_error_display() {
        let err = SensorError::Unavailable(Field::Humidity);
        assert_eq!(err.to_string(), "humidity reading unavailable");
    }
}
