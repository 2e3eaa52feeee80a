//! Command gateway: the single entry point fanning operator intents out to
//! the motor driver, the capture pipelines, and the network coordinator.
//!
//! The gateway applies no business logic of its own. It routes, aggregates
//! combined status for observers, and surfaces component errors verbatim
//! with their kind preserved.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crawler_core::capture::{CameraSettings, CaptureHealth, QualityProfile};
use crawler_core::drive::{DriveCommand, MotorState};
use crawler_core::error::{ActuationError, CaptureError, NetworkError};
use crawler_core::frame::CameraId;
use crawler_core::mode::TransitionTarget;
use crawler_core::wifi::{HotspotConfig, HotspotStatus, NetworkMode, StationConfig};

use crate::camera::{CapturePipeline, FrameSubscription};
use crate::monotonic_ms;
use crate::motor::MotorDriver;
use crate::wifi::{NetworkCoordinator, ScanResult};

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The intent itself was malformed before reaching any component.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Actuation(#[from] ActuationError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl GatewayError {
    /// Stable machine-readable kind, preserved from the owning component.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalidRequest",
            GatewayError::Actuation(e) => e.kind(),
            GatewayError::Capture(e) => e.kind(),
            GatewayError::Network(e) => e.kind(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Network(NetworkError::InvalidConfig(_)) => StatusCode::BAD_REQUEST,
            GatewayError::Network(NetworkError::AuthRejected) => StatusCode::BAD_REQUEST,
            GatewayError::Network(NetworkError::Busy) => StatusCode::CONFLICT,
            GatewayError::Network(NetworkError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Actuation(ActuationError::HardwareFault { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Tell axum how to convert `GatewayError` into a response.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

/// One camera's slice of the combined status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStatus {
    pub health: CaptureHealth,
    #[serde(flatten)]
    pub settings: CameraSettings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CamerasStatus {
    pub front: CameraStatus,
    pub rear: CameraStatus,
}

/// Combined status for observers: motor state, per-camera capture health,
/// and the live network mode.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub generated_at: DateTime<Utc>,
    pub motor: MotorState,
    pub cameras: CamerasStatus,
    pub network: NetworkMode,
}

pub struct Gateway {
    motor: MotorDriver,
    front: CapturePipeline,
    rear: CapturePipeline,
    wifi: NetworkCoordinator,
}

impl Gateway {
    pub fn new(
        motor: MotorDriver,
        front: CapturePipeline,
        rear: CapturePipeline,
        wifi: NetworkCoordinator,
    ) -> Self {
        Gateway {
            motor,
            front,
            rear,
            wifi,
        }
    }

    pub fn motor(&self) -> &MotorDriver {
        &self.motor
    }

    pub fn camera(&self, camera: CameraId) -> &CapturePipeline {
        match camera {
            CameraId::Front => &self.front,
            CameraId::Rear => &self.rear,
        }
    }

    pub fn wifi(&self) -> &NetworkCoordinator {
        &self.wifi
    }

    pub async fn start_cameras(&self) {
        for camera in CameraId::ALL {
            if let Err(e) = self.camera(camera).start().await {
                log::warn!("Failed to start {} camera: {}", camera, e);
            }
        }
    }

    pub async fn stop_cameras(&self) {
        for camera in CameraId::ALL {
            self.camera(camera).stop().await;
        }
    }

    // --- drive ------------------------------------------------------------

    pub fn drive(&self, left: f64, right: f64) -> Result<MotorState, GatewayError> {
        self.motor
            .set_drive(DriveCommand::new(left, right, monotonic_ms()))?;
        Ok(self.motor.snapshot())
    }

    pub fn emergency_stop(&self) -> Result<MotorState, GatewayError> {
        self.motor.stop()?;
        Ok(self.motor.snapshot())
    }

    // --- streams ----------------------------------------------------------

    pub fn subscribe(&self, camera: CameraId) -> FrameSubscription {
        self.camera(camera).subscribe()
    }

    pub async fn apply_quality_profile(
        &self,
        profile: QualityProfile,
    ) -> Result<(), GatewayError> {
        for camera in CameraId::ALL {
            self.camera(camera)
                .apply_settings(profile.settings_for(camera))
                .await?;
        }
        Ok(())
    }

    // --- network ----------------------------------------------------------

    pub async fn scan_networks(&self) -> Result<ScanResult, GatewayError> {
        Ok(self.wifi.list_available_networks().await?)
    }

    pub async fn connect_station(
        &self,
        config: StationConfig,
    ) -> Result<NetworkMode, GatewayError> {
        Ok(self
            .wifi
            .request_transition(TransitionTarget::Station(config))
            .await?)
    }

    pub async fn start_hotspot(
        &self,
        config: HotspotConfig,
    ) -> Result<NetworkMode, GatewayError> {
        Ok(self
            .wifi
            .request_transition(TransitionTarget::Hotspot(config))
            .await?)
    }

    pub async fn disable_network(&self) -> Result<NetworkMode, GatewayError> {
        Ok(self
            .wifi
            .request_transition(TransitionTarget::Disabled)
            .await?)
    }

    pub async fn hotspot_status(&self) -> Result<HotspotStatus, GatewayError> {
        Ok(self.wifi.hotspot_status().await?)
    }

    // --- status -----------------------------------------------------------

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            generated_at: Utc::now(),
            motor: self.motor.snapshot(),
            cameras: CamerasStatus {
                front: self.camera_status(CameraId::Front),
                rear: self.camera_status(CameraId::Rear),
            },
            network: self.wifi.current_mode(),
        }
    }

    fn camera_status(&self, camera: CameraId) -> CameraStatus {
        let pipeline = self.camera(camera);
        CameraStatus {
            health: pipeline.health(),
            settings: pipeline.settings(),
        }
    }
}
