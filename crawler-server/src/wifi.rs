//! Network mode coordinator.
//!
//! Sole owner of the wireless radio. All reconfiguration funnels through
//! [`NetworkCoordinator::request_transition`], which holds the single
//! transition slot for its whole duration: a concurrent request gets
//! [`NetworkError::Busy`] instead of interleaving with an in-flight radio
//! change. Station↔Hotspot is always tear-down-then-stand-up; a failed
//! transition tears down whatever it half-raised and restores `Disabled`.
//!
//! NetworkManager is driven through `nmcli --terse --colors no`; argument
//! formatting and output parsing live in `crawler_core::wifi::nmcli`.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::timeout;

use crawler_core::error::NetworkError;
use crawler_core::mode::{NetworkModeMachine, TransitionRequest, TransitionTarget};
use crawler_core::wifi::{
    nmcli, HotspotStatus, NetworkMode, StationAuth, StationState, WifiNetwork,
    HOTSPOT_CONNECTION_NAME,
};

use crate::monotonic_ms;

/// Bound on a whole transition (tear-down + stand-up).
pub const TRANSITION_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on a single nmcli invocation.
const NMCLI_CALL_TIMEOUT: Duration = Duration::from_secs(20);

/// The narrow interface to the OS network manager.
#[async_trait]
pub trait NmcliRunner: Send + Sync {
    /// Run `nmcli --terse --colors no <args>` and return stdout.
    async fn run(&self, args: &[String]) -> Result<String, NetworkError>;
}

/// Real runner spawning the `nmcli` binary.
pub struct SystemNmcli {
    call_timeout: Duration,
}

impl Default for SystemNmcli {
    fn default() -> Self {
        SystemNmcli {
            call_timeout: NMCLI_CALL_TIMEOUT,
        }
    }
}

#[async_trait]
impl NmcliRunner for SystemNmcli {
    async fn run(&self, args: &[String]) -> Result<String, NetworkError> {
        debug!("nmcli {}", args.join(" "));
        let output = timeout(
            self.call_timeout,
            tokio::process::Command::new("nmcli")
                .args(["--terse", "--colors", "no"])
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| NetworkError::Timeout)?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NetworkError::UnderlyingManagerError("nmcli command not available".into())
            } else {
                NetworkError::UnderlyingManagerError(e.to_string())
            }
        })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if !stderr.trim().is_empty() {
                stderr.trim()
            } else if !stdout.trim().is_empty() {
                stdout.trim()
            } else {
                "nmcli command failed"
            };
            Err(nmcli::classify_failure(message))
        }
    }
}

/// Scan outcome: all visible networks plus the currently active one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub networks: Vec<WifiNetwork>,
    pub active: Option<WifiNetwork>,
}

struct CoordinatorInner {
    runner: Box<dyn NmcliRunner>,
    machine: RwLock<NetworkModeMachine>,
    transition_gate: tokio::sync::Mutex<()>,
    next_request_id: AtomicU64,
    transition_timeout: Duration,
    cert_dir: PathBuf,
}

/// Owner of the network-mode state machine. Cheap to clone.
#[derive(Clone)]
pub struct NetworkCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl NetworkCoordinator {
    pub fn new(runner: Box<dyn NmcliRunner>, cert_dir: PathBuf) -> Self {
        Self::with_transition_timeout(runner, cert_dir, TRANSITION_TIMEOUT)
    }

    pub fn with_transition_timeout(
        runner: Box<dyn NmcliRunner>,
        cert_dir: PathBuf,
        transition_timeout: Duration,
    ) -> Self {
        NetworkCoordinator {
            inner: Arc::new(CoordinatorInner {
                runner,
                machine: RwLock::new(NetworkModeMachine::new()),
                transition_gate: tokio::sync::Mutex::new(()),
                next_request_id: AtomicU64::new(0),
                transition_timeout,
                cert_dir,
            }),
        }
    }

    pub fn current_mode(&self) -> NetworkMode {
        self.inner.machine.read().unwrap().current().clone()
    }

    pub fn is_transition_in_flight(&self) -> bool {
        self.inner.machine.read().unwrap().is_in_flight()
    }

    /// Rescan and list nearby networks, strongest signal first.
    pub async fn list_available_networks(&self) -> Result<ScanResult, NetworkError> {
        // nmcli needs an occasional rescan; failures are not interesting.
        self.run_allow_fail(&nmcli::rescan_args()).await;
        let output = self.inner.runner.run(&nmcli::wifi_list_args()).await?;
        let networks = nmcli::parse_wifi_list(&output);
        let active = networks.iter().find(|n| n.active).cloned();
        Ok(ScanResult { networks, active })
    }

    /// Execute one serialized mode transition.
    ///
    /// Rejects with [`NetworkError::Busy`] while another transition holds the
    /// slot. On any failure the target is torn back down and the mode is
    /// restored to `Disabled`.
    pub async fn request_transition(
        &self,
        target: TransitionTarget,
    ) -> Result<NetworkMode, NetworkError> {
        let _gate = self
            .inner
            .transition_gate
            .try_lock()
            .map_err(|_| NetworkError::Busy)?;
        let request = TransitionRequest {
            request_id: self.inner.next_request_id.fetch_add(1, Ordering::Relaxed) + 1,
            target,
        };
        self.inner.machine.write().unwrap().begin(request.request_id)?;

        let result = match timeout(self.inner.transition_timeout, self.execute(&request.target))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout),
        };

        match result {
            Ok(mode) => {
                info!("Network transition complete: {}", mode);
                self.inner
                    .machine
                    .write()
                    .unwrap()
                    .complete(request.request_id, mode.clone(), monotonic_ms());
                Ok(mode)
            }
            Err(e) => {
                warn!("Network transition failed ({}), restoring Disabled", e);
                self.cleanup_after_failure(&request.target).await;
                self.inner
                    .machine
                    .write()
                    .unwrap()
                    .fail(request.request_id, monotonic_ms());
                Err(e)
            }
        }
    }

    /// Whether the hotspot profile exists versus is currently up.
    pub async fn hotspot_status(&self) -> Result<HotspotStatus, NetworkError> {
        let names = self
            .inner
            .runner
            .run(&nmcli::connection_names_args(false))
            .await?;
        let exists = nmcli::parse_names(&names)
            .iter()
            .any(|n| n == HOTSPOT_CONNECTION_NAME);

        let active = if exists {
            let active_names = self
                .inner
                .runner
                .run(&nmcli::connection_names_args(true))
                .await?;
            nmcli::parse_names(&active_names)
                .iter()
                .any(|n| n == HOTSPOT_CONNECTION_NAME)
        } else {
            false
        };

        let ssid = if exists {
            self.inner
                .runner
                .run(&nmcli::connection_value_args(
                    HOTSPOT_CONNECTION_NAME,
                    "802-11-wireless.ssid",
                ))
                .await
                .ok()
                .and_then(|output| nmcli::first_value(&output))
        } else {
            None
        };

        Ok(HotspotStatus {
            connection_name: HOTSPOT_CONNECTION_NAME.to_string(),
            exists,
            active,
            ssid,
        })
    }

    async fn execute(&self, target: &TransitionTarget) -> Result<NetworkMode, NetworkError> {
        match target {
            TransitionTarget::Disabled => {
                self.teardown_current().await;
                Ok(NetworkMode::Disabled)
            }
            TransitionTarget::Hotspot(config) => {
                config.validate()?;
                let device = self.find_wifi_device().await?;

                // Single radio: an active station link comes down first.
                // Documented behavior, not an error; the caller re-requests
                // Station mode later to restore infrastructure connectivity.
                if let NetworkMode::Station { ssid, .. } = self.current_mode() {
                    info!("Tearing down station connection '{}' for hotspot", ssid);
                    self.run_allow_fail(&nmcli::connection_down_args(&ssid)).await;
                }

                let names = self
                    .inner
                    .runner
                    .run(&nmcli::connection_names_args(false))
                    .await?;
                if !nmcli::parse_names(&names)
                    .iter()
                    .any(|n| n == HOTSPOT_CONNECTION_NAME)
                {
                    self.inner
                        .runner
                        .run(&nmcli::hotspot_add_args(
                            &device,
                            HOTSPOT_CONNECTION_NAME,
                            &config.ssid,
                        ))
                        .await?;
                }
                self.inner
                    .runner
                    .run(&nmcli::hotspot_modify_args(config, HOTSPOT_CONNECTION_NAME))
                    .await?;
                self.inner
                    .runner
                    .run(&nmcli::connection_up_args(
                        HOTSPOT_CONNECTION_NAME,
                        Some(&device),
                    ))
                    .await?;

                Ok(NetworkMode::Hotspot {
                    ssid: config.ssid.clone(),
                    band: config.band,
                    channel: config.channel,
                    active: true,
                })
            }
            TransitionTarget::Station(config) => {
                config.validate()?;
                let device = self.find_wifi_device().await?;

                if self.current_mode().is_hotspot() {
                    info!("Tearing down hotspot for station connection");
                    self.run_allow_fail(&nmcli::connection_down_args(HOTSPOT_CONNECTION_NAME))
                        .await;
                }

                match &config.auth {
                    StationAuth::Enterprise(auth) => {
                        // A stale profile under the same name conflicts with
                        // connection add.
                        self.run_allow_fail(&nmcli::connection_delete_args(&config.ssid))
                            .await;
                        let cert_path = match &auth.ca_cert_pem {
                            Some(pem) => Some(self.store_ca_certificate(pem)?),
                            None => None,
                        };
                        let add = nmcli::enterprise_add_args(
                            config,
                            &device,
                            cert_path.as_ref().and_then(|p| p.to_str()),
                        )?;
                        self.inner.runner.run(&add).await?;
                        self.inner
                            .runner
                            .run(&nmcli::autoconnect_args(&config.ssid))
                            .await?;
                        self.inner
                            .runner
                            .run(&nmcli::connection_up_args(&config.ssid, None))
                            .await?;
                    }
                    _ => {
                        self.inner
                            .runner
                            .run(&nmcli::station_connect_args(config, &device))
                            .await?;
                    }
                }

                Ok(NetworkMode::Station {
                    ssid: config.ssid.clone(),
                    state: StationState::Connected,
                })
            }
        }
    }

    async fn teardown_current(&self) {
        // The hotspot profile may be up even when the machine thinks
        // Disabled (previous process instance); bringing it down is
        // idempotent.
        self.run_allow_fail(&nmcli::connection_down_args(HOTSPOT_CONNECTION_NAME))
            .await;
        if let NetworkMode::Station { ssid, .. } = self.current_mode() {
            self.run_allow_fail(&nmcli::connection_down_args(&ssid)).await;
        }
    }

    async fn cleanup_after_failure(&self, target: &TransitionTarget) {
        match target {
            TransitionTarget::Hotspot(_) => {
                self.run_allow_fail(&nmcli::connection_down_args(HOTSPOT_CONNECTION_NAME))
                    .await;
            }
            TransitionTarget::Station(config) => {
                self.run_allow_fail(&nmcli::connection_down_args(&config.ssid))
                    .await;
            }
            TransitionTarget::Disabled => {}
        }
    }

    async fn find_wifi_device(&self) -> Result<String, NetworkError> {
        let output = self
            .inner
            .runner
            .run(&nmcli::device_status_args())
            .await?;
        nmcli::parse_wifi_device(&output).ok_or(NetworkError::NoWifiDevice)
    }

    async fn run_allow_fail(&self, args: &[String]) {
        if let Err(e) = self.inner.runner.run(args).await {
            debug!("nmcli command failed but ignored: {:?} ({})", args, e);
        }
    }

    /// Persist a custom CA certificate, keyed by content digest so repeats
    /// reuse the same file.
    fn store_ca_certificate(&self, pem: &str) -> Result<PathBuf, NetworkError> {
        let trimmed = pem.trim();
        if trimmed.is_empty() {
            return Err(NetworkError::InvalidConfig(
                "CA certificate content is empty".into(),
            ));
        }
        if !trimmed.contains("BEGIN CERTIFICATE") {
            return Err(NetworkError::InvalidConfig(
                "CA certificate must be in PEM format".into(),
            ));
        }
        let mut normalized = trimmed.to_string();
        normalized.push('\n');

        let digest = Sha1::digest(normalized.as_bytes());
        let mut name = String::with_capacity(digest.as_slice().len() * 2 + 4);
        for byte in digest.as_slice() {
            let _ = write!(name, "{:02x}", byte);
        }
        name.push_str(".pem");

        std::fs::create_dir_all(&self.inner.cert_dir).map_err(|e| {
            NetworkError::UnderlyingManagerError(format!(
                "unable to prepare certificate storage: {}",
                e
            ))
        })?;
        let path = self.inner.cert_dir.join(name);
        let current = std::fs::read_to_string(&path).ok();
        if current.as_deref() != Some(normalized.as_str()) {
            std::fs::write(&path, &normalized).map_err(|e| {
                NetworkError::UnderlyingManagerError(format!(
                    "failed to store CA certificate: {}",
                    e
                ))
            })?;
        }
        Ok(path)
    }
}
