//! # Crawler Core
//!
//! Platform-independent control logic for the crawler rover.
//!
//! This crate contains pure state machines, conversions, and protocol
//! formatting with **zero I/O dependencies**. Every clock the logic needs is
//! injected as a millisecond timestamp; every external process or bus write
//! happens in `crawler-server`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  crawler-core (platform-independent, no tokio/async deps)   │
//! │  ├── drive      (speed clamping & device-unit conversion)   │
//! │  ├── frame      (camera ids, frame metadata)                │
//! │  ├── capture    (quality profiles, reopen backoff)          │
//! │  ├── mode       (serialized network-mode state machine)     │
//! │  ├── wifi       (station/hotspot config & validation)       │
//! │  └── wifi::nmcli (terse-output parsing, argument vectors)   │
//! └─────────────────────────────────────────────────────────────┘
//!                             ▲
//!                 ┌───────────┴───────────┐
//!                 │  crawler-server       │
//!                 │  (tokio, axum, nmcli) │
//!                 └───────────────────────┘
//! ```
//!
//! ## Example: drive conversion
//!
//! ```rust
//! use crawler_core::drive::{clamp_speed, to_device_units, register_byte};
//!
//! let speed = clamp_speed(1.5).unwrap(); // clamped, not rejected
//! assert_eq!(speed, 1.0);
//! assert_eq!(to_device_units(speed, 100), 100);
//! assert_eq!(register_byte(-100), 0x9C);
//! ```
//!
//! ## Example: serialized network transitions
//!
//! ```rust
//! use crawler_core::mode::NetworkModeMachine;
//! use crawler_core::error::NetworkError;
//!
//! let mut machine = NetworkModeMachine::new();
//! machine.begin(1).unwrap();
//! // A concurrent request is rejected, never interleaved.
//! assert_eq!(machine.begin(2), Err(NetworkError::Busy));
//! ```

pub mod capture;
pub mod drive;
pub mod error;
pub mod frame;
pub mod mode;
pub mod wifi;

// Re-export commonly used types
pub use capture::{CameraSettings, CaptureBackoff, CaptureHealth, QualityProfile};
pub use drive::{DriveCommand, MotorSettings, MotorState};
pub use error::{ActuationError, CaptureError, NetworkError};
pub use frame::{CameraId, Frame};
pub use mode::{NetworkModeMachine, TransitionRequest, TransitionTarget};
pub use wifi::{
    Band, HotspotConfig, HotspotStatus, NetworkMode, StationAuth, StationConfig, StationState,
    WifiNetwork,
};
