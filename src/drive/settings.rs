//! Live drive settings
//!
//! The operator can change speeds and intervals while the platform is being
//! driven. Settings sit in a [`tokio::sync::watch`] channel: the console owns
//! the sender, pipeline components keep a receiver and `borrow()` it every
//! time they mix or publish, so a change applies to the very next tick.

use crate::drive::mixer::{MotorCommand, SpeedRange};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

pub const DEFAULT_MIN_SPEED: i32 = 0;
pub const DEFAULT_MAX_SPEED: i32 = 100;
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 30;
pub const DEFAULT_TEST_INTERVAL_MS: u64 = 200;
pub const DEFAULT_TEST_SPEED: i32 = 0;

pub type SettingsReceiver = watch::Receiver<DriveSettings>;
pub type SettingsSender = watch::Sender<DriveSettings>;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct DriveSettings {
    /// Speed floor for any non-zero joystick motion
    pub min_speed: i32,
    /// Speed at full deflection
    pub max_speed: i32,
    /// Cadence of the joystick sampling loop
    pub sample_interval_ms: u64,
    /// Cadence of the periodic test emitter
    pub test_interval_ms: u64,
    /// Raw left wheel value sent by the test emitter
    pub test_left: i32,
    /// Raw right wheel value sent by the test emitter
    pub test_right: i32,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            min_speed: DEFAULT_MIN_SPEED,
            max_speed: DEFAULT_MAX_SPEED,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            test_interval_ms: DEFAULT_TEST_INTERVAL_MS,
            test_left: DEFAULT_TEST_SPEED,
            test_right: DEFAULT_TEST_SPEED,
        }
    }
}

impl DriveSettings {
    pub fn speed_range(&self) -> SpeedRange {
        SpeedRange::new(self.min_speed, self.max_speed)
    }

    pub fn sample_interval(&self) -> Duration {
        non_zero_interval(self.sample_interval_ms, DEFAULT_SAMPLE_INTERVAL_MS)
    }

    pub fn test_interval(&self) -> Duration {
        non_zero_interval(self.test_interval_ms, DEFAULT_TEST_INTERVAL_MS)
    }

    /// The command the periodic test emitter sends, bypassing the mixer.
    pub fn test_command(&self) -> MotorCommand {
        MotorCommand::new(self.test_left, self.test_right)
    }

    /// Applies an operator-entered value to one field.
    ///
    /// Non-numeric input does not fail the operation: the field falls back to
    /// its documented default and a warning is logged. See [`parse_field`].
    pub fn apply(&mut self, field: SettingField, raw: &str) {
        match field {
            SettingField::MinSpeed => {
                self.min_speed = parse_field(field, raw, DEFAULT_MIN_SPEED)
            }
            SettingField::MaxSpeed => {
                self.max_speed = parse_field(field, raw, DEFAULT_MAX_SPEED)
            }
            SettingField::SampleInterval => {
                self.sample_interval_ms = parse_field(field, raw, DEFAULT_SAMPLE_INTERVAL_MS)
            }
            SettingField::TestInterval => {
                self.test_interval_ms = parse_field(field, raw, DEFAULT_TEST_INTERVAL_MS)
            }
            SettingField::TestLeft => {
                self.test_left = parse_field(field, raw, DEFAULT_TEST_SPEED)
            }
            SettingField::TestRight => {
                self.test_right = parse_field(field, raw, DEFAULT_TEST_SPEED)
            }
        }
        debug!("Drive settings after update of {}: {:?}", field, self);
    }
}

fn non_zero_interval(ms: u64, default_ms: u64) -> Duration {
    if ms == 0 {
        warn!("Interval of 0 ms is not usable, falling back to {} ms", default_ms);
        Duration::from_millis(default_ms)
    } else {
        Duration::from_millis(ms)
    }
}

/// Parses an operator-entered number, falling back to `default` on garbage.
///
/// Only the leading integer counts, so `"12.5"` reads as 12 and `"30 ms"` as
/// 30. Zero is treated like a missing value and also yields `default`.
pub fn parse_field<T>(field: impl fmt::Display, raw: &str, default: T) -> T
where
    T: FromStr + fmt::Display + Default + PartialEq + Copy,
{
    let raw = raw.trim();
    match leading_integer(raw).parse::<T>() {
        Ok(value) if value != T::default() => value,
        Ok(_) => {
            debug!("Value '{}' for {} is zero, using default {}", raw, field, default);
            default
        }
        Err(_) => {
            warn!(
                "Value '{}' for {} is not a valid number, using default {}",
                raw, field, default
            );
            default
        }
    }
}

// Optional sign followed by ASCII digits
fn leading_integer(raw: &str) -> &str {
    let sign = usize::from(raw.starts_with(['+', '-']));
    let digits = raw[sign..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    &raw[..sign + digits]
}

/// Operator-adjustable settings fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingField {
    MinSpeed,
    MaxSpeed,
    SampleInterval,
    TestInterval,
    TestLeft,
    TestRight,
}

impl SettingField {
    pub const ALL: [SettingField; 6] = [
        SettingField::MinSpeed,
        SettingField::MaxSpeed,
        SettingField::SampleInterval,
        SettingField::TestInterval,
        SettingField::TestLeft,
        SettingField::TestRight,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SettingField::MinSpeed => "min",
            SettingField::MaxSpeed => "max",
            SettingField::SampleInterval => "sample",
            SettingField::TestInterval => "interval",
            SettingField::TestLeft => "left",
            SettingField::TestRight => "right",
        }
    }
}

impl fmt::Display for SettingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown setting '{0}'")]
pub struct UnknownSetting(pub String);

impl FromStr for SettingField {
    type Err = UnknownSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|field| field.name() == wanted)
            .ok_or(UnknownSetting(wanted))
    }
}
