//! Frame metadata shared between capture pipelines and stream subscribers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two fixed camera positions on the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraId {
    Front,
    Rear,
}

impl CameraId {
    pub const ALL: [CameraId; 2] = [CameraId::Front, CameraId::Rear];

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraId::Front => "front",
            CameraId::Rear => "rear",
        }
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "front" => Ok(CameraId::Front),
            "rear" => Ok(CameraId::Rear),
            other => Err(format!("unknown camera '{}'", other)),
        }
    }
}

/// One captured frame. Only the newest frame per camera is ever retained;
/// older frames are replaced, never queued.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub camera: CameraId,
    /// Strictly increasing per camera across the pipeline's lifetime,
    /// including device reopens.
    pub sequence: u64,
    /// Milliseconds since the capture pipeline's epoch.
    pub captured_at_ms: u64,
    /// Encoded image bytes (JPEG).
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_id_round_trip() {
        for id in CameraId::ALL {
            assert_eq!(id.as_str().parse::<CameraId>().unwrap(), id);
        }
        assert!("top".parse::<CameraId>().is_err());
    }

    #[test]
    fn camera_id_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CameraId::Front).unwrap(),
            "\"front\""
        );
    }
}
