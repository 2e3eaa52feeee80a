//! Drive command conversion and motor state snapshots.
//!
//! The motor controller is a small I2C device with one speed register per
//! channel, starting at [`MOTOR_SPEED_REGISTER_BASE`]. Speeds travel through
//! the system as normalized values in [-1.0, 1.0] and are converted to signed
//! percent device units (-100..=100) immediately before the bus write. The
//! register byte is the two's-complement wrap of that percentage.
//!
//! Everything here is pure conversion logic; the bus write itself lives in
//! `crawler-server`.

use crate::error::ActuationError;
use serde::{Deserialize, Serialize};

/// First speed register; channel `n` maps to `0x33 + n`.
pub const MOTOR_SPEED_REGISTER_BASE: u8 = 0x33;

/// Default I2C address of the motor controller.
pub const DEFAULT_CONTROLLER_ADDRESS: u16 = 0x34;

/// Default maximum speed in device units (signed percent).
pub const DEFAULT_MAX_SPEED: i8 = 100;

/// A normalized drive intent for both channels.
///
/// Ephemeral: superseded by the next command, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DriveCommand {
    pub left_speed: f64,
    pub right_speed: f64,
    /// Milliseconds since an epoch chosen by the caller (the server uses
    /// process start). Only ordering and age matter.
    #[serde(default)]
    pub issued_at_ms: u64,
}

impl DriveCommand {
    pub fn new(left_speed: f64, right_speed: f64, issued_at_ms: u64) -> Self {
        DriveCommand {
            left_speed,
            right_speed,
            issued_at_ms,
        }
    }

    /// Both speeds clamped into the drivable range.
    ///
    /// Marginally out-of-range values are clamped rather than rejected so a
    /// noisy operator input cannot destabilize the control loop; only a
    /// non-finite value is an error.
    pub fn clamped(&self) -> Result<DriveCommand, ActuationError> {
        Ok(DriveCommand {
            left_speed: clamp_speed(self.left_speed)?,
            right_speed: clamp_speed(self.right_speed)?,
            issued_at_ms: self.issued_at_ms,
        })
    }
}

/// Clamp a normalized speed into [-1.0, 1.0].
pub fn clamp_speed(value: f64) -> Result<f64, ActuationError> {
    if value.is_nan() {
        return Err(ActuationError::OutOfRange(value));
    }
    Ok(value.clamp(-1.0, 1.0))
}

/// Convert a clamped normalized speed to signed percent device units.
pub fn to_device_units(value: f64, max_speed: i8) -> i8 {
    let max = max_speed as f64;
    (value * max).round().clamp(-max, max) as i8
}

/// The byte actually written to a speed register: two's-complement wrap of
/// the signed percentage.
pub fn register_byte(units: i8) -> u8 {
    units as u8
}

/// Map a channel number onto its speed register.
///
/// A channel that would push the register out of the 8-bit space falls back
/// to the base register, matching the controller's behavior for
/// misconfigured channels.
pub fn speed_register(channel: u8) -> u8 {
    MOTOR_SPEED_REGISTER_BASE
        .checked_add(channel)
        .unwrap_or(MOTOR_SPEED_REGISTER_BASE)
}

/// Channel assignment and speed limit for the two motors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MotorSettings {
    pub i2c_address: u16,
    pub left_channel: u8,
    pub right_channel: u8,
    pub max_speed: i8,
}

impl Default for MotorSettings {
    fn default() -> Self {
        MotorSettings {
            i2c_address: DEFAULT_CONTROLLER_ADDRESS,
            left_channel: 0,
            right_channel: 1,
            max_speed: DEFAULT_MAX_SPEED,
        }
    }
}

impl MotorSettings {
    pub fn left_register(&self) -> u8 {
        speed_register(self.left_channel)
    }

    pub fn right_register(&self) -> u8 {
        speed_register(self.right_channel)
    }
}

/// Read-only snapshot of the motor driver's state.
///
/// Owned and mutated exclusively by the motor driver; everyone else sees
/// copies of this.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MotorState {
    /// Last value written to the left channel, in device units.
    pub current_left: i8,
    /// Last value written to the right channel, in device units.
    pub current_right: i8,
    /// Age of the most recent drive command, `None` before the first one.
    pub last_command_age_ms: Option<u64>,
    /// True once the watchdog has forced both channels to zero; cleared only
    /// by a fresh drive command.
    pub safety_stopped: bool,
    /// True after bounded bus retries were exhausted; the vehicle is unsafe
    /// to drive until a write succeeds again.
    pub hardware_fault: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_accepts_out_of_range() {
        assert_eq!(clamp_speed(1.5).unwrap(), 1.0);
        assert_eq!(clamp_speed(-7.0).unwrap(), -1.0);
        assert_eq!(clamp_speed(0.25).unwrap(), 0.25);
        assert_eq!(clamp_speed(f64::INFINITY).unwrap(), 1.0);
    }

    #[test]
    fn clamp_rejects_nan() {
        assert!(matches!(
            clamp_speed(f64::NAN),
            Err(ActuationError::OutOfRange(_))
        ));
    }

    #[test]
    fn device_unit_conversion() {
        assert_eq!(to_device_units(1.0, 100), 100);
        assert_eq!(to_device_units(-1.0, 100), -100);
        assert_eq!(to_device_units(0.5, 100), 50);
        assert_eq!(to_device_units(0.0, 100), 0);
        assert_eq!(to_device_units(0.333, 100), 33);
        // Reduced speed limit scales the whole range.
        assert_eq!(to_device_units(1.0, 60), 60);
        assert_eq!(to_device_units(-0.5, 60), -30);
    }

    #[test]
    fn register_byte_wraps_negative_speeds() {
        assert_eq!(register_byte(100), 100);
        assert_eq!(register_byte(-100), 0x9C);
        assert_eq!(register_byte(0), 0);
        assert_eq!(register_byte(-1), 0xFF);
    }

    #[test]
    fn channel_register_mapping() {
        assert_eq!(speed_register(0), 0x33);
        assert_eq!(speed_register(1), 0x34);
        // Out-of-range channel falls back to the base register.
        assert_eq!(speed_register(0xFF), MOTOR_SPEED_REGISTER_BASE);
    }

    #[test]
    fn default_settings_match_controller() {
        let settings = MotorSettings::default();
        assert_eq!(settings.i2c_address, 0x34);
        assert_eq!(settings.left_register(), 0x33);
        assert_eq!(settings.right_register(), 0x34);
    }

    #[test]
    fn clamped_command_keeps_timestamp() {
        let cmd = DriveCommand::new(2.0, -0.5, 1234).clamped().unwrap();
        assert_eq!(cmd.left_speed, 1.0);
        assert_eq!(cmd.right_speed, -0.5);
        assert_eq!(cmd.issued_at_ms, 1234);
    }
}
