//! Serialized network-mode state machine.
//!
//! The radio cannot hold two roles, and must never be reconfigured by two
//! transitions at once. This machine is the single owner of the live
//! [`NetworkMode`]: a transition must be `begin`-ed (rejected with
//! [`NetworkError::Busy`] while another is in flight) and the mode only ever
//! changes through `complete` or `fail`. Failure always restores `Disabled`
//! rather than leaving an in-between state.
//!
//! Pure state; timestamps are injected in milliseconds so the machine stays
//! free of clocks and I/O.

use serde::{Deserialize, Serialize};

use crate::error::NetworkError;
use crate::wifi::{HotspotConfig, NetworkMode, StationConfig};

/// What a transition request wants the radio to become.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "target")]
pub enum TransitionTarget {
    Disabled,
    Station(StationConfig),
    Hotspot(HotspotConfig),
}

/// A queued request against the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub target: TransitionTarget,
    pub request_id: u64,
}

/// The serialized owner of the live network mode.
#[derive(Debug, Clone)]
pub struct NetworkModeMachine {
    mode: NetworkMode,
    in_flight: Option<u64>,
    last_change_ms: u64,
}

impl Default for NetworkModeMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkModeMachine {
    pub fn new() -> Self {
        NetworkModeMachine {
            mode: NetworkMode::Disabled,
            in_flight: None,
            last_change_ms: 0,
        }
    }

    /// The live mode. Unchanged while a transition is in flight.
    pub fn current(&self) -> &NetworkMode {
        &self.mode
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn time_in_mode_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_change_ms)
    }

    /// Claim the transition slot for `request_id`.
    pub fn begin(&mut self, request_id: u64) -> Result<(), NetworkError> {
        if self.in_flight.is_some() {
            return Err(NetworkError::Busy);
        }
        self.in_flight = Some(request_id);
        Ok(())
    }

    /// Finish the in-flight transition, installing the resulting mode.
    ///
    /// A stale `request_id` is ignored and the live mode is left alone.
    pub fn complete(&mut self, request_id: u64, mode: NetworkMode, now_ms: u64) -> bool {
        if self.in_flight != Some(request_id) {
            return false;
        }
        self.in_flight = None;
        if self.mode != mode {
            self.mode = mode;
            self.last_change_ms = now_ms;
        }
        true
    }

    /// Abort the in-flight transition. The mode is restored to `Disabled`;
    /// after a failed reconfiguration the radio's true state is unknown.
    pub fn fail(&mut self, request_id: u64, now_ms: u64) -> bool {
        if self.in_flight != Some(request_id) {
            return false;
        }
        self.in_flight = None;
        if self.mode != NetworkMode::Disabled {
            self.mode = NetworkMode::Disabled;
            self.last_change_ms = now_ms;
        }
        true
    }
}
