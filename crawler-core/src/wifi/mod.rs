//! Wireless data model: scanned networks, station/hotspot configuration, and
//! the radio mode variants.
//!
//! Validation lives here so both the coordinator and the web layer enforce
//! the same rules; everything that touches `nmcli` itself is in [`nmcli`].

pub mod nmcli;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::NetworkError;

/// Default SSID for the fallback access point.
pub const DEFAULT_HOTSPOT_SSID: &str = "crawler";
/// Default WPA-PSK passphrase for the fallback access point.
pub const DEFAULT_HOTSPOT_PASSPHRASE: &str = "crawler1234";
/// NetworkManager connection profile name used for the hotspot.
pub const HOTSPOT_CONNECTION_NAME: &str = "crawler-hotspot";
/// WPA2-PSK minimum passphrase length.
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Radio band for the hotspot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Band {
    /// 5 GHz.
    #[serde(rename = "a")]
    A,
    /// 2.4 GHz.
    #[serde(rename = "bg")]
    Bg,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::A => "a",
            Band::Bg => "bg",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Band {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a" => Ok(Band::A),
            "bg" => Ok(Band::Bg),
            other => Err(NetworkError::InvalidConfig(format!(
                "band must be 'a' (5GHz) or 'bg' (2.4GHz), got '{}'",
                other
            ))),
        }
    }
}

/// One network from a scan, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiNetwork {
    /// Hidden networks scan with an empty SSID.
    pub ssid: Option<String>,
    /// Raw security string from the scan, `"OPEN"` when unsecured.
    pub security: String,
    /// Signal strength 0-100 if reported.
    pub signal: Option<u8>,
    /// Whether this is the currently active connection.
    pub active: bool,
    pub bssid: Option<String>,
    pub requires_passphrase: bool,
    pub supports_enterprise: bool,
}

/// EAP outer method for enterprise networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EapMethod {
    Peap,
    Ttls,
}

impl EapMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EapMethod::Peap => "peap",
            EapMethod::Ttls => "ttls",
        }
    }

    pub fn parse(s: &str) -> Result<Self, NetworkError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "peap" => Ok(EapMethod::Peap),
            "ttls" => Ok(EapMethod::Ttls),
            other => Err(NetworkError::InvalidConfig(format!(
                "unsupported enterprise EAP method '{}'",
                other
            ))),
        }
    }
}

/// Inner (phase 2) authentication for enterprise networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase2Auth {
    Mschapv2,
    Pap,
    Gtc,
}

impl Phase2Auth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase2Auth::Mschapv2 => "mschapv2",
            Phase2Auth::Pap => "pap",
            Phase2Auth::Gtc => "gtc",
        }
    }

    pub fn parse(s: &str) -> Result<Self, NetworkError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mschapv2" => Ok(Phase2Auth::Mschapv2),
            "pap" => Ok(Phase2Auth::Pap),
            "gtc" => Ok(Phase2Auth::Gtc),
            other => Err(NetworkError::InvalidConfig(format!(
                "unsupported enterprise inner authentication method '{}'",
                other
            ))),
        }
    }

    /// PEAP pairs with MSCHAPv2 by default, TTLS with PAP.
    pub fn default_for(eap: EapMethod) -> Self {
        match eap {
            EapMethod::Peap => Phase2Auth::Mschapv2,
            EapMethod::Ttls => Phase2Auth::Pap,
        }
    }
}

/// 802.1X credentials and trust settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterpriseAuth {
    pub username: String,
    pub password: String,
    pub eap: EapMethod,
    /// Defaults per [`Phase2Auth::default_for`] when omitted.
    pub phase2: Option<Phase2Auth>,
    pub anonymous_identity: Option<String>,
    pub domain_suffix_match: Option<String>,
    /// Whether to trust the system CA store; `None` leaves the manager's
    /// default in place.
    pub system_ca_certs: Option<bool>,
    /// PEM content of a custom CA certificate, persisted by the coordinator.
    pub ca_cert_pem: Option<String>,
}

impl EnterpriseAuth {
    pub fn phase2(&self) -> Phase2Auth {
        self.phase2.unwrap_or_else(|| Phase2Auth::default_for(self.eap))
    }
}

/// Credentials for joining an existing network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "auth")]
pub enum StationAuth {
    Open,
    WpaPsk { psk: String },
    Enterprise(EnterpriseAuth),
}

/// A request to join an existing wireless network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationConfig {
    pub ssid: String,
    pub bssid: Option<String>,
    pub auth: StationAuth,
}

impl StationConfig {
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.ssid.trim().is_empty() {
            return Err(NetworkError::InvalidConfig("SSID is required".into()));
        }
        if let StationAuth::Enterprise(auth) = &self.auth {
            if auth.username.trim().is_empty() {
                return Err(NetworkError::InvalidConfig(
                    "username is required for enterprise Wi-Fi".into(),
                ));
            }
            if auth.password.is_empty() {
                return Err(NetworkError::InvalidConfig(
                    "password is required for enterprise Wi-Fi".into(),
                ));
            }
            if let Some(pem) = &auth.ca_cert_pem {
                if !pem.contains("BEGIN CERTIFICATE") {
                    return Err(NetworkError::InvalidConfig(
                        "CA certificate must be in PEM format".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Parameters for hosting the fallback access point. All fields default to
/// the documented values when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HotspotConfig {
    pub ssid: String,
    pub passphrase: String,
    pub band: Band,
    pub channel: Option<u8>,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        HotspotConfig {
            ssid: DEFAULT_HOTSPOT_SSID.to_string(),
            passphrase: DEFAULT_HOTSPOT_PASSPHRASE.to_string(),
            band: Band::Bg,
            channel: None,
        }
    }
}

impl HotspotConfig {
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.ssid.trim().is_empty() {
            return Err(NetworkError::InvalidConfig(
                "hotspot SSID cannot be empty".into(),
            ));
        }
        if self.passphrase.len() < MIN_PASSPHRASE_LEN {
            return Err(NetworkError::InvalidConfig(format!(
                "hotspot passphrase must be at least {} characters",
                MIN_PASSPHRASE_LEN
            )));
        }
        Ok(())
    }
}

/// Connection progress of a station-mode link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StationState {
    Connecting,
    Connected,
}

/// The radio's current role. Exactly one mode is live at any time and only
/// the network mode coordinator mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum NetworkMode {
    Disabled,
    Station {
        ssid: String,
        state: StationState,
    },
    Hotspot {
        ssid: String,
        band: Band,
        channel: Option<u8>,
        active: bool,
    },
}

impl NetworkMode {
    pub fn is_disabled(&self) -> bool {
        matches!(self, NetworkMode::Disabled)
    }

    pub fn is_station(&self) -> bool {
        matches!(self, NetworkMode::Station { .. })
    }

    pub fn is_hotspot(&self) -> bool {
        matches!(self, NetworkMode::Hotspot { .. })
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Disabled => write!(f, "disabled"),
            NetworkMode::Station { ssid, .. } => write!(f, "station({})", ssid),
            NetworkMode::Hotspot { ssid, active, .. } => {
                write!(f, "hotspot({}, active={})", ssid, active)
            }
        }
    }
}

/// Whether the hotspot profile exists versus is currently broadcasting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotspotStatus {
    pub connection_name: String,
    pub exists: bool,
    pub active: bool,
    pub ssid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hotspot_defaults_are_documented_values() {
        let config = HotspotConfig::default();
        assert_eq!(config.ssid, "crawler");
        assert_eq!(config.passphrase, "crawler1234");
        assert_eq!(config.band, Band::Bg);
        assert_eq!(config.channel, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn hotspot_passphrase_minimum_enforced() {
        let config = HotspotConfig {
            passphrase: "short".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(NetworkError::InvalidConfig(_))
        ));
    }

    #[test]
    fn hotspot_empty_ssid_rejected() {
        let config = HotspotConfig {
            ssid: "  ".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn station_requires_ssid() {
        let config = StationConfig {
            ssid: "".into(),
            bssid: None,
            auth: StationAuth::Open,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn enterprise_requires_credentials() {
        let config = StationConfig {
            ssid: "corp".into(),
            bssid: None,
            auth: StationAuth::Enterprise(EnterpriseAuth {
                username: "user".into(),
                password: "".into(),
                eap: EapMethod::Peap,
                phase2: None,
                anonymous_identity: None,
                domain_suffix_match: None,
                system_ca_certs: None,
                ca_cert_pem: None,
            }),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn enterprise_phase2_defaults() {
        assert_eq!(
            Phase2Auth::default_for(EapMethod::Peap),
            Phase2Auth::Mschapv2
        );
        assert_eq!(Phase2Auth::default_for(EapMethod::Ttls), Phase2Auth::Pap);
        assert!(EapMethod::parse("tls").is_err());
        assert!(Phase2Auth::parse("chap").is_err());
    }

    #[test]
    fn band_parsing() {
        assert_eq!("bg".parse::<Band>().unwrap(), Band::Bg);
        assert_eq!("a".parse::<Band>().unwrap(), Band::A);
        assert!("n".parse::<Band>().is_err());
    }

    #[test]
    fn mode_serializes_tagged() {
        let mode = NetworkMode::Hotspot {
            ssid: "crawler".into(),
            band: Band::Bg,
            channel: Some(6),
            active: true,
        };
        let json = serde_json::to_value(&mode).unwrap();
        assert_eq!(json["mode"], "hotspot");
        assert_eq!(json["active"], true);
        assert_eq!(json["channel"], 6);
    }
}
