//! Differential-drive mixing
//!
//! Turns a joystick vector into per-wheel speeds. Forward and backward come
//! from the y axis, turning from the x axis:
//!
//! ```text
//! left  = (y - x) / 2 * factor
//! right = (y + x) / 2 * factor
//! ```
//!
//! Each side is then scaled into the configured [`SpeedRange`]. The minimum
//! speed acts as a floor for any non-zero motion so the platform overcomes
//! static friction, but a side that should stand still gets exactly zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Latest joystick sample
///
/// `x` and `y` give the direction, `magnitude` the deflection. Samples are
/// replaced wholesale on every input event and never merged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputVector {
    pub x: f32,
    pub y: f32,
    pub magnitude: f32,
}

impl InputVector {
    /// Builds a sample, clamping the axes to [-1, 1] and the magnitude to [0, 1].
    pub fn new(x: f32, y: f32, magnitude: f32) -> Self {
        Self {
            x: clamp_unit(x, -1.0),
            y: clamp_unit(y, -1.0),
            magnitude: clamp_unit(magnitude, 0.0),
        }
    }

    /// Builds a sample from the input source's raw contract.
    ///
    /// `magnitude = min(distance / max_distance, 1.0)`. Diagonal overshoot of
    /// the pointer beyond the pad radius therefore never exceeds full speed.
    pub fn from_distance(x: f32, y: f32, distance: f32, max_distance: f32) -> Self {
        let magnitude = if max_distance > 0.0 {
            distance / max_distance
        } else {
            0.0
        };
        Self::new(x, y, magnitude)
    }
}

// NaN collapses to zero; everything else is pinned into [lower, 1].
fn clamp_unit(value: f32, lower: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(lower, 1.0)
    }
}

/// Wheel speed range applied to non-zero motion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedRange {
    min: i32,
    max: i32,
}

impl SpeedRange {
    /// Creates a range with `0 <= min <= max`.
    ///
    /// A negative minimum is raised to zero, a maximum below the minimum is
    /// raised to the minimum. Both corrections are logged.
    pub fn new(min: i32, max: i32) -> Self {
        let normalized_min = if min < 0 {
            warn!("Minimum speed {} is negative, using 0", min);
            0
        } else {
            min
        };
        let normalized_max = if max < normalized_min {
            warn!(
                "Maximum speed {} is below minimum {}, using {}",
                max, normalized_min, normalized_min
            );
            normalized_min
        } else {
            max
        };

        Self {
            min: normalized_min,
            max: normalized_max,
        }
    }

    pub fn min(&self) -> i32 {
        self.min
    }

    pub fn max(&self) -> i32 {
        self.max
    }

    // sign(norm) * (min + (max - min) * |norm|), ties rounded towards +inf
    fn scale(&self, norm: f64) -> i32 {
        if norm == 0.0 || norm.is_nan() {
            return 0;
        }
        let span = f64::from(self.max - self.min);
        let speed = norm.signum() * (f64::from(self.min) + span * norm.abs());
        (speed + 0.5).floor() as i32
    }
}

impl Default for SpeedRange {
    fn default() -> Self {
        Self { min: 0, max: 100 }
    }
}

/// Wheel speed directive, the JSON payload of the motor command topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MotorCommand {
    pub left: i32,
    pub right: i32,
}

impl MotorCommand {
    /// Both wheels at rest.
    pub const STOP: MotorCommand = MotorCommand { left: 0, right: 0 };

    pub fn new(left: i32, right: i32) -> Self {
        Self { left, right }
    }
}

impl fmt::Display for MotorCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "L:{} R:{}", self.left, self.right)
    }
}

/// Mixes a joystick sample into a wheel command.
///
/// Pure: the result depends only on the arguments, nothing is remembered
/// between calls.
pub fn mix(vector: &InputVector, range: SpeedRange) -> MotorCommand {
    let factor = f64::from(clamp_unit(vector.magnitude, 0.0));
    let x = f64::from(vector.x);
    let y = f64::from(vector.y);

    let left_norm = (y - x) / 2.0 * factor;
    let right_norm = (y + x) / 2.0 * factor;

    MotorCommand {
        left: range.scale(left_norm),
        right: range.scale(right_norm),
    }
}
