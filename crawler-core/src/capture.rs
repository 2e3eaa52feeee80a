//! Capture settings, quality profiles, and the device-reopen backoff.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::frame::CameraId;

/// Per-camera capture parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub jpeg_quality: u8,
}

impl CameraSettings {
    pub const fn new(width: u32, height: u32, fps: u32, jpeg_quality: u8) -> Self {
        CameraSettings {
            width,
            height,
            fps,
            jpeg_quality,
        }
    }

    /// Target delay between frames in milliseconds.
    pub fn frame_interval_ms(&self) -> u64 {
        1000 / self.fps.max(1) as u64
    }

    /// Defaults for a camera position before any profile is applied.
    pub fn default_for(camera: CameraId) -> Self {
        match camera {
            CameraId::Front => CameraSettings::new(1280, 720, 30, 85),
            CameraId::Rear => CameraSettings::new(640, 480, 15, 75),
        }
    }
}

/// Named trade-off between latency and image quality, applied to both
/// cameras at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityProfile {
    Low,
    Balanced,
    High,
}

impl QualityProfile {
    pub const ALL: [QualityProfile; 3] = [
        QualityProfile::Low,
        QualityProfile::Balanced,
        QualityProfile::High,
    ];

    pub fn settings_for(&self, camera: CameraId) -> CameraSettings {
        match (self, camera) {
            (QualityProfile::Low, CameraId::Front) => CameraSettings::new(640, 360, 24, 68),
            (QualityProfile::Low, CameraId::Rear) => CameraSettings::new(320, 180, 18, 60),
            (QualityProfile::Balanced, CameraId::Front) => CameraSettings::new(768, 432, 24, 78),
            (QualityProfile::Balanced, CameraId::Rear) => CameraSettings::new(320, 240, 20, 70),
            (QualityProfile::High, CameraId::Front) => CameraSettings::new(960, 540, 30, 85),
            (QualityProfile::High, CameraId::Rear) => CameraSettings::new(480, 360, 24, 78),
        }
    }
}

impl fmt::Display for QualityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityProfile::Low => write!(f, "low"),
            QualityProfile::Balanced => write!(f, "balanced"),
            QualityProfile::High => write!(f, "high"),
        }
    }
}

impl FromStr for QualityProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(QualityProfile::Low),
            "balanced" => Ok(QualityProfile::Balanced),
            "high" => Ok(QualityProfile::High),
            other => Err(format!("unknown quality profile '{}'", other)),
        }
    }
}

/// Health of a capture pipeline as reported in combined status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum CaptureHealth {
    /// Not started, or stopped.
    Stopped,
    /// Delivering frames.
    Running { last_sequence: u64 },
    /// Device lost; reopen attempts running on backoff.
    Degraded { reopen_attempts: u32 },
}

impl CaptureHealth {
    pub fn is_running(&self) -> bool {
        matches!(self, CaptureHealth::Running { .. })
    }
}

/// Exponential reopen backoff for a lost camera device.
///
/// Doubles from 1 s per consecutive failure, capped at 30 s.
#[derive(Debug, Clone, Default)]
pub struct CaptureBackoff {
    failures: u32,
}

impl CaptureBackoff {
    pub const BASE_MS: u64 = 1_000;
    pub const MAX_MS: u64 = 30_000;

    pub fn new() -> Self {
        Self::default()
    }

    /// Delay to wait before the next reopen attempt.
    pub fn delay_ms(&self) -> u64 {
        let delay = Self::BASE_MS * (1u64 << self.failures.min(5));
        delay.min(Self::MAX_MS)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
