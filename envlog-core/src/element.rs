//! Logged elements.

use crate::config::{Field, FieldMask};
use crate::sensor::Reading;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// A single timestamped sample.
///
/// A reading is present exactly when its field is selected by the mask of the
/// record that holds the element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub timestamp_s: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_rh: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure_pa: Option<f32>,
}

impl Element {
    /// Creates an element with no readings.
    pub fn new(timestamp_s: u32) -> Self {
        Self {
            timestamp_s,
            temperature_c: None,
            humidity_rh: None,
            pressure_pa: None,
        }
    }

    pub fn with_temperature(mut self, value: f32) -> Self {
        self.temperature_c = Some(value);
        self
    }

    pub fn with_humidity(mut self, value: f32) -> Self {
        self.humidity_rh = Some(value);
        self
    }

    pub fn with_pressure(mut self, value: f32) -> Self {
        self.pressure_pa = Some(value);
        self
    }

    /// Stamps `reading` with `timestamp_s`, keeping only the fields in `mask`.
    ///
    /// Returns the first selected field the reading lacks.
    pub fn from_reading(timestamp_s: u32, reading: &Reading, mask: FieldMask) -> Result<Self, Field> {
        let mut element = Element::new(timestamp_s);
        for field in mask.fields() {
            let value = reading.get(field).ok_or(field)?;
            element.set(field, value);
        }
        Ok(element)
    }

    pub fn get(&self, field: Field) -> Option<f32> {
        match field {
            Field::Temperature => self.temperature_c,
            Field::Humidity => self.humidity_rh,
            Field::Pressure => self.pressure_pa,
        }
    }

    fn set(&mut self, field: Field, value: f32) {
        match field {
            Field::Temperature => self.temperature_c = Some(value),
            Field::Humidity => self.humidity_rh = Some(value),
            Field::Pressure => self.pressure_pa = Some(value),
        }
    }

    /// Mask of the readings this element carries.
    pub fn fields(&self) -> FieldMask {
        Field::ALL
            .into_iter()
            .filter(|f| self.get(*f).is_some())
            .fold(FieldMask::EMPTY, |mask, f| mask.with(f))
    }

    /// Capture time in milliseconds.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_s as u64 * 1000
    }

    /// Writes the timestamp and the readings selected by `mask`.
    ///
    /// Readings are stored as raw `f32` bits so they round-trip exactly.
    pub(crate) fn encode(&self, mask: FieldMask, buf: &mut impl BufMut) {
        buf.put_u32(self.timestamp_s);
        for field in mask.fields() {
            let value = self.get(field).unwrap_or(f32::NAN);
            buf.put_u32(value.to_bits());
        }
    }

    /// Reads an element laid out for `mask`. The caller checks the length.
    pub(crate) fn decode(buf: &mut impl Buf, mask: FieldMask) -> Self {
        let mut element = Element::new(buf.get_u32());
        for field in mask.fields() {
            element.set(field, f32::from_bits(buf.get_u32()));
        }
        element
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_from_reading_projects_mask() {
        let reading = Reading::new(22.25, 41.5, 100_800.0);
        let element =
            Element::from_reading(60, &reading, FieldMask::TEMPERATURE | FieldMask::PRESSURE)
                .unwrap();

        assert_eq!(element.temperature_c, Some(22.25));
        assert_eq!(element.humidity_rh, None);
        assert_eq!(element.pressure_pa, Some(100_800.0));
        assert_eq!(element.fields(), FieldMask::TEMPERATURE | FieldMask::PRESSURE);
    }

    #[test]
    fn test_from_reading_missing_field() {
        let reading = Reading {
            temperature_c: Some(20.0),
            ..Reading::default()
        };
        let result = Element::from_reading(0, &reading, FieldMask::ALL);
        assert_eq!(result, Err(Field::Humidity));
    }

    #[test]
    fn test_encode_layout() {
        let element = Element::new(0x0102_0304).with_humidity(1.0);
        let mut buf = BytesMut::new();
        element.encode(FieldMask::HUMIDITY, &mut buf);

        assert_eq!(buf.len(), FieldMask::HUMIDITY.element_size());
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        assert_eq!(&buf[4..], &1.0f32.to_bits().to_be_bytes());

        let decoded = Element::decode(&mut &buf[..], FieldMask::HUMIDITY);
        assert_eq!(decoded, element);
    }

    #[test]
    fn test_timestamp_ms() {
        assert_eq!(Element::new(42).timestamp_ms(), 42_000);
    }
}
