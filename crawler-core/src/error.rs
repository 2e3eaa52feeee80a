//! Error taxonomies for the three hardware-facing subsystems.
//!
//! These are the machine-readable error kinds the command gateway passes
//! through verbatim to callers. Each error exposes a stable `kind()` string
//! for the web API so clients can match on it without parsing messages.

use thiserror::Error;

/// Errors raised by the motor driver interface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuationError {
    /// The bus write failed (I/O error, controller rejected the transfer).
    #[error("Motor bus write failed: {0}")]
    Bus(String),

    /// The motor controller did not respond at its address.
    #[error("Motor controller absent from bus")]
    DeviceAbsent,

    /// A speed value that cannot be clamped into the drivable range (NaN).
    #[error("Speed value {0} cannot be clamped into [-1.0, 1.0]")]
    OutOfRange(f64),

    /// Bounded retries were exhausted; the vehicle is unsafe to drive until
    /// a bus write succeeds again.
    #[error("Motor hardware fault after {attempts} failed writes: {last}")]
    HardwareFault { attempts: u32, last: String },
}

impl ActuationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ActuationError::Bus(_) => "bus",
            ActuationError::DeviceAbsent => "deviceAbsent",
            ActuationError::OutOfRange(_) => "outOfRange",
            ActuationError::HardwareFault { .. } => "hardwareFault",
        }
    }
}

/// Errors raised by a camera capture pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// The camera device node does not exist or disappeared.
    #[error("Camera device '{0}' absent")]
    DeviceAbsent(String),

    /// The device exists but cannot be opened by this process.
    #[error("Permission denied opening camera device '{0}'")]
    PermissionDenied(String),

    /// The device delivered data that could not be decoded as a frame.
    #[error("Frame decode failed: {0}")]
    Decode(String),

    /// A read from the device failed.
    #[error("Camera read failed: {0}")]
    Io(String),

    /// The pipeline is already running.
    #[error("Capture already running")]
    AlreadyRunning,
}

impl CaptureError {
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::DeviceAbsent(_) => "deviceAbsent",
            CaptureError::PermissionDenied(_) => "permissionDenied",
            CaptureError::Decode(_) => "decode",
            CaptureError::Io(_) => "io",
            CaptureError::AlreadyRunning => "alreadyRunning",
        }
    }
}

/// Errors raised by the network mode coordinator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    /// Another transition is in flight; the radio is never reconfigured in
    /// parallel.
    #[error("A network transition is already in progress")]
    Busy,

    /// The network rejected the supplied credentials.
    #[error("Authentication rejected")]
    AuthRejected,

    /// The transition did not complete within its bounded window.
    #[error("Network transition timed out")]
    Timeout,

    /// The wireless device is busy (held by another operation).
    #[error("Wireless device busy")]
    DeviceBusy,

    /// The OS network manager reported a failure; the transition failed
    /// cleanly and the mode was restored to Disabled.
    #[error("Network manager failure: {0}")]
    UnderlyingManagerError(String),

    /// No managed Wi-Fi device is available on this host.
    #[error("No Wi-Fi device available")]
    NoWifiDevice,

    /// The request itself is invalid (empty SSID, short passphrase, ...).
    #[error("Invalid network configuration: {0}")]
    InvalidConfig(String),
}

impl NetworkError {
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkError::Busy => "busy",
            NetworkError::AuthRejected => "authRejected",
            NetworkError::Timeout => "timeout",
            NetworkError::DeviceBusy => "deviceBusy",
            NetworkError::UnderlyingManagerError(_) => "underlyingManagerError",
            NetworkError::NoWifiDevice => "noWifiDevice",
            NetworkError::InvalidConfig(_) => "invalidConfig",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(NetworkError::Busy.kind(), "busy");
        assert_eq!(
            NetworkError::UnderlyingManagerError("x".into()).kind(),
            "underlyingManagerError"
        );
        assert_eq!(ActuationError::DeviceAbsent.kind(), "deviceAbsent");
        assert_eq!(CaptureError::Decode("bad jpeg".into()).kind(), "decode");
    }

    #[test]
    fn messages_carry_context() {
        let e = ActuationError::HardwareFault {
            attempts: 3,
            last: "EIO".into(),
        };
        assert!(e.to_string().contains("3"));
        assert!(e.to_string().contains("EIO"));
    }
}
