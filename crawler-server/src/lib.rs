//! # Crawler Server
//!
//! Remote control server for the crawler rover: dual camera streaming,
//! motor control with a fail-safe watchdog, and Wi-Fi management.
//!
//! ## Architecture
//!
//! The server is built on top of [`crawler_core`] for the platform-
//! independent control logic, with [`tokio`] providing the async runtime.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   crawler-server                        │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │ REST API    │  │ WS /control  │  │ MJPEG streams  │  │
//! │  │ (axum)      │  │ (drive+tele) │  │ (/video_feed)  │  │
//! │  └──────┬──────┘  └──────┬───────┘  └───────┬────────┘  │
//! │         └────────────────┼──────────────────┘           │
//! │                          ▼                              │
//! │  ┌─────────────────────────────────────────────────────┐│
//! │  │                 Command Gateway                     ││
//! │  └───────┬──────────────────┬──────────────────┬───────┘│
//! │          ▼                  ▼                  ▼        │
//! │  ┌──────────────┐  ┌────────────────┐  ┌──────────────┐ │
//! │  │ MotorDriver  │  │ CapturePipeline│  │ NetworkCoord │ │
//! │  │ + watchdog   │  │ ×2 (watch slot)│  │ (nmcli)      │ │
//! │  └──────────────┘  └────────────────┘  └──────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Feature Flags
//!
//! - `emulator` (default) - synthetic camera frames and a motor bus recorder
//! - `i2c` - real motor controller via `/dev/i2c-*`
//! - `v4l` - real cameras via V4L2 (MJPG)
//! - `hardware` - both of the above
//!
//! ## Example: Starting the Server
//!
//! ```rust,no_run
//! use clap::Parser;
//! use crawler_server::Cli;
//! use std::time::Duration;
//! use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
//!
//! async fn heartbeat(subsys: SubsystemHandle) -> Result<(), std::convert::Infallible> {
//!     subsys.on_shutdown_requested().await;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let args = Cli::parse_from(["crawler-server", "-p", "5000"]);
//!     let _ = args.port;
//!
//!     Toplevel::new(|s| async move {
//!         // Build the gateway and start the real subsystems here.
//!         s.start(SubsystemBuilder::new("Heartbeat", heartbeat));
//!     })
//!     .catch_signals()
//!     .handle_shutdown_requests(Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! }
//! ```

use clap::Parser;
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub mod bus;
pub mod camera;
pub mod config;
pub mod gateway;
pub mod motor;
pub mod web;
pub mod wifi;

use crawler_core::capture::CameraSettings;
use crawler_core::drive::MotorSettings;
use crawler_core::error::ActuationError;
use crawler_core::frame::CameraId;

use bus::MotorBus;
use camera::{BoxedFrameSource, SourceFactory};

#[cfg(not(any(feature = "emulator", feature = "i2c")))]
compile_error!("crawler-server needs a motor bus backend: enable the 'emulator' or 'i2c' feature");

#[cfg(not(any(feature = "emulator", feature = "v4l")))]
compile_error!("crawler-server needs a camera backend: enable the 'emulator' or 'v4l' feature");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds since process start; the timestamp base for everything in
/// `crawler_core` that wants an injected clock.
pub fn monotonic_ms() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}

#[derive(Parser, Clone, Debug)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Port for webserver
    #[arg(short, long, default_value_t = 5000)]
    pub port: u16,

    /// Path to the JSON config file (defaults to the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// I2C bus device holding the motor controller
    #[arg(long, default_value = "/dev/i2c-1")]
    pub i2c_bus: PathBuf,

    /// Use emulated motor and camera backends even when hardware backends
    /// are compiled in
    #[arg(long, default_value_t = false)]
    pub emulate: bool,
}

/// Select the motor bus backend for this build and invocation.
pub fn build_motor_bus(
    args: &Cli,
    settings: &MotorSettings,
) -> Result<Box<dyn MotorBus>, ActuationError> {
    let _ = settings;
    let emulated = cfg!(feature = "emulator") && (args.emulate || !cfg!(feature = "i2c"));

    #[cfg(feature = "emulator")]
    if emulated {
        log::info!("Using emulated motor bus");
        return Ok(Box::new(bus::EmulatedMotorBus::new()));
    }

    #[cfg(feature = "i2c")]
    {
        let _ = emulated;
        log::info!(
            "Opening motor controller on {} at 0x{:02X}",
            args.i2c_bus.display(),
            settings.i2c_address
        );
        return Ok(Box::new(bus::LinuxI2cBus::new(
            &args.i2c_bus,
            settings.i2c_address,
        )?));
    }

    #[cfg(not(feature = "i2c"))]
    unreachable!("no motor bus backend compiled in")
}

/// Build the per-camera frame source factory for this build and invocation.
pub fn frame_source_factory(args: &Cli, camera: CameraId, device_index: usize) -> SourceFactory {
    let emulate = args.emulate;
    let _ = (camera, device_index);
    Arc::new(move |settings: CameraSettings| -> BoxedFrameSource {
        let emulated = cfg!(feature = "emulator") && (emulate || !cfg!(feature = "v4l"));

        #[cfg(feature = "emulator")]
        if emulated {
            let _ = settings;
            return Box::new(camera::EmulatedFrameSource::new(camera));
        }

        #[cfg(feature = "v4l")]
        {
            let _ = emulated;
            return Box::new(camera::V4lFrameSource::new(device_index, settings));
        }

        #[cfg(not(feature = "v4l"))]
        unreachable!("no camera backend compiled in")
    })
}
