//! Log configuration.
//!
//! A [`LogConfig`] is snapshotted into every record header when the record is
//! opened, so changing the live configuration never alters how existing
//! records decode.

use crate::error::LogError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Default sampling interval (5 minutes).
pub const DEFAULT_INTERVAL_S: u32 = 300;

/// A single loggable sensor field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Temperature,
    Humidity,
    Pressure,
}

impl Field {
    /// All fields in on-disk order.
    pub const ALL: [Field; 3] = [Field::Temperature, Field::Humidity, Field::Pressure];

    pub fn name(self) -> &'static str {
        match self {
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
            Field::Pressure => "pressure",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Field::Temperature => 1 << 0,
            Field::Humidity => 1 << 1,
            Field::Pressure => 1 << 2,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of fields selected for logging.
///
/// Serialized as a list of field names.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Field>", into = "Vec<Field>")]
pub struct FieldMask(u8);

impl FieldMask {
    pub const EMPTY: FieldMask = FieldMask(0);
    pub const TEMPERATURE: FieldMask = FieldMask(1 << 0);
    pub const HUMIDITY: FieldMask = FieldMask(1 << 1);
    pub const PRESSURE: FieldMask = FieldMask(1 << 2);
    pub const ALL: FieldMask = FieldMask(0b111);

    /// Builds a mask from raw bits, dropping bits this version does not know.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        FieldMask(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: FieldMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn has(self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn with(self, field: Field) -> Self {
        FieldMask(self.0 | field.bit())
    }

    /// Number of selected fields.
    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Selected fields in on-disk order.
    pub fn fields(self) -> impl Iterator<Item = Field> {
        Field::ALL.into_iter().filter(move |f| self.has(*f))
    }

    /// Encoded size of one element carrying these fields.
    pub fn element_size(self) -> usize {
        4 + 4 * self.count()
    }
}

impl BitOr for FieldMask {
    type Output = FieldMask;

    fn bitor(self, rhs: FieldMask) -> FieldMask {
        FieldMask(self.0 | rhs.0)
    }
}

impl From<Field> for FieldMask {
    fn from(field: Field) -> Self {
        FieldMask(field.bit())
    }
}

impl From<Vec<Field>> for FieldMask {
    fn from(fields: Vec<Field>) -> Self {
        fields
            .into_iter()
            .fold(FieldMask::EMPTY, |mask, f| mask.with(f))
    }
}

impl From<FieldMask> for Vec<Field> {
    fn from(mask: FieldMask) -> Self {
        mask.fields().collect()
    }
}

impl fmt::Debug for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.fields()).finish()
    }
}

impl fmt::Display for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.fields().map(Field::name).collect();
        f.write_str(&names.join(","))
    }
}

/// Behavior when every page holds a committed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OverflowPolicy {
    /// Reclaim the oldest page.
    #[default]
    Wrap = 0,
    /// Refuse new records until the log is purged.
    Stop = 1,
}

impl TryFrom<u8> for OverflowPolicy {
    type Error = LogError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OverflowPolicy::Wrap),
            1 => Ok(OverflowPolicy::Stop),
            _ => Err(LogError::InvalidConfig {
                reason: format!("unknown overflow policy: {}", value),
            }),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Wrap => f.write_str("wrap"),
            OverflowPolicy::Stop => f.write_str("stop"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Fields to log.
    pub fields: FieldMask,
    /// Interval to log at, in seconds.
    pub interval_s: u32,
    /// What to do when storage is full.
    pub overflow: OverflowPolicy,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            fields: FieldMask::ALL,
            interval_s: DEFAULT_INTERVAL_S,
            overflow: OverflowPolicy::Wrap,
        }
    }
}

impl LogConfig {
    pub fn new(fields: FieldMask, interval_s: u32, overflow: OverflowPolicy) -> Self {
        Self {
            fields,
            interval_s,
            overflow,
        }
    }

    pub fn with_fields(mut self, fields: FieldMask) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_interval(mut self, interval_s: u32) -> Self {
        self.interval_s = interval_s;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Rejects a zero interval or an empty field set.
    pub fn validate(&self) -> Result<(), LogError> {
        if self.interval_s == 0 {
            return Err(LogError::InvalidConfig {
                reason: "interval_s must be greater than zero".to_string(),
            });
        }
        if self.fields.is_empty() {
            return Err(LogError::InvalidConfig {
                reason: "at least one field must be selected".to_string(),
            });
        }
        Ok(())
    }
}
