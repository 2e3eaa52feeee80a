//! `nmcli` wire protocol: terse-output parsing and argument formatting.
//!
//! The coordinator drives NetworkManager exclusively through
//! `nmcli --terse --colors no`. This module is the pure half of that
//! conversation: it formats argument vectors (the runner prepends the
//! `--terse --colors no` base) and parses the escaped colon-separated output
//! nmcli produces in terse mode. No process is ever spawned here.

use crate::error::NetworkError;
use crate::wifi::{HotspotConfig, StationAuth, StationConfig, WifiNetwork};

/// Fields requested for a wifi scan listing.
pub const WIFI_LIST_FIELDS: &str = "ACTIVE,SSID,SECURITY,SIGNAL,BSSID";
/// Fields requested for a device status listing.
pub const DEVICE_STATUS_FIELDS: &str = "DEVICE,TYPE,STATE";

// ---------------------------------------------------------------------------
// Terse output parsing
// ---------------------------------------------------------------------------

/// Split one terse output line on unescaped colons.
///
/// nmcli escapes literal `:` and `\` inside field values with a backslash.
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut buffer = String::new();
    let mut escape = false;

    for ch in line.chars() {
        if escape {
            buffer.push(ch);
            escape = false;
            continue;
        }
        match ch {
            '\\' => escape = true,
            ':' => fields.push(std::mem::take(&mut buffer)),
            _ => buffer.push(ch),
        }
    }
    fields.push(buffer);
    fields
}

/// Remove nmcli's escaping from a whole-line value.
pub fn unescape(value: &str) -> String {
    value.replace("\\:", ":").replace("\\\\", "\\")
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "y" | "1" | "true" | "*"
    )
}

/// Classify a raw SECURITY field into passphrase / enterprise requirements.
pub fn security_flags(security: &str) -> (bool, bool) {
    let upper = security.to_ascii_uppercase();
    let simplified = upper.replace(' ', "");
    let requires_passphrase = !matches!(simplified.as_str(), "" | "NONE" | "OPEN" | "--");
    let supports_enterprise = upper.contains("EAP") || upper.contains("802.1X");
    (requires_passphrase, supports_enterprise)
}

/// Parse the output of `device wifi list` into descriptors, strongest signal
/// first.
pub fn parse_wifi_list(output: &str) -> Vec<WifiNetwork> {
    let mut networks: Vec<WifiNetwork> = output
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut parts = split_fields(line);
            // ACTIVE, SSID, SECURITY, SIGNAL, BSSID
            while parts.len() < 5 {
                parts.push(String::new());
            }

            let active = truthy(&parts[0]);
            let ssid = {
                let s = parts[1].trim();
                if s.is_empty() { None } else { Some(s.to_string()) }
            };
            let security_raw = parts[2].trim();
            let security = if security_raw.is_empty() {
                "OPEN".to_string()
            } else {
                security_raw.to_string()
            };
            let signal = parts[3].trim().parse::<u8>().ok();
            let bssid = {
                let s = parts[4].trim();
                if s.is_empty() { None } else { Some(s.to_string()) }
            };
            let (requires_passphrase, supports_enterprise) = security_flags(&security);

            WifiNetwork {
                ssid,
                security,
                signal,
                active,
                bssid,
                requires_passphrase,
                supports_enterprise,
            }
        })
        .collect();

    networks.sort_by(|a, b| b.signal.unwrap_or(0).cmp(&a.signal.unwrap_or(0)));
    networks
}

/// Find the first managed wifi device in `device status` output.
pub fn parse_wifi_device(output: &str) -> Option<String> {
    for line in output.lines() {
        let parts = split_fields(line);
        if parts.len() < 3 {
            continue;
        }
        let device = parts[0].trim();
        let dev_type = parts[1].trim().to_ascii_lowercase();
        let state = parts[2].trim().to_ascii_lowercase();
        if dev_type == "wifi" && state != "unavailable" && state != "unmanaged" {
            return Some(device.to_string());
        }
    }
    None
}

/// Parse a one-name-per-line connection listing.
pub fn parse_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| unescape(line).trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// First non-empty value from a `--get-values` query.
pub fn first_value(output: &str) -> Option<String> {
    let value = unescape(output.trim());
    if value.is_empty() { None } else { Some(value) }
}

/// Map an nmcli failure message onto the coordinator's error taxonomy.
pub fn classify_failure(message: &str) -> NetworkError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("secrets were required")
        || lower.contains("no secrets")
        || lower.contains("802-1x")
        || lower.contains("password")
    {
        NetworkError::AuthRejected
    } else if lower.contains("timeout") || lower.contains("timed out") {
        NetworkError::Timeout
    } else if lower.contains("busy") {
        NetworkError::DeviceBusy
    } else {
        NetworkError::UnderlyingManagerError(message.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Command formatting
// ---------------------------------------------------------------------------

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn rescan_args() -> Vec<String> {
    args(&["device", "wifi", "rescan"])
}

pub fn wifi_list_args() -> Vec<String> {
    args(&["--fields", WIFI_LIST_FIELDS, "device", "wifi", "list"])
}

pub fn device_status_args() -> Vec<String> {
    args(&["--fields", DEVICE_STATUS_FIELDS, "device", "status"])
}

pub fn connection_names_args(active_only: bool) -> Vec<String> {
    let mut v = args(&["--fields", "NAME", "connection", "show"]);
    if active_only {
        v.push("--active".to_string());
    }
    v
}

pub fn connection_value_args(name: &str, field: &str) -> Vec<String> {
    args(&["--get-values", field, "connection", "show", name])
}

pub fn connection_up_args(name: &str, device: Option<&str>) -> Vec<String> {
    let mut v = args(&["connection", "up", name]);
    if let Some(device) = device {
        v.push("ifname".to_string());
        v.push(device.to_string());
    }
    v
}

pub fn connection_down_args(name: &str) -> Vec<String> {
    args(&["connection", "down", name])
}

pub fn connection_delete_args(name: &str) -> Vec<String> {
    args(&["connection", "delete", "id", name])
}

pub fn autoconnect_args(name: &str) -> Vec<String> {
    args(&["connection", "modify", name, "connection.autoconnect", "yes"])
}

/// `device wifi connect` for open and WPA-PSK networks.
///
/// Enterprise networks go through [`enterprise_add_args`] instead.
pub fn station_connect_args(config: &StationConfig, device: &str) -> Vec<String> {
    let mut v = args(&["device", "wifi", "connect"]);
    v.push(config.ssid.clone());
    v.push("ifname".to_string());
    v.push(device.to_string());
    if let Some(bssid) = &config.bssid {
        v.push("bssid".to_string());
        v.push(bssid.clone());
    }
    if let StationAuth::WpaPsk { psk } = &config.auth {
        v.push("password".to_string());
        v.push(psk.clone());
    }
    v
}

/// `connection add` for an 802.1X network. The connection is named after the
/// SSID; any stale profile with the same name should be deleted first.
///
/// `ca_cert_path` is the filesystem path the coordinator persisted the PEM
/// content to, if a custom CA was supplied.
pub fn enterprise_add_args(
    config: &StationConfig,
    device: &str,
    ca_cert_path: Option<&str>,
) -> Result<Vec<String>, NetworkError> {
    let auth = match &config.auth {
        StationAuth::Enterprise(auth) => auth,
        _ => {
            return Err(NetworkError::InvalidConfig(
                "not an enterprise configuration".into(),
            ))
        }
    };

    let mut v = args(&["connection", "add", "type", "wifi", "ifname"]);
    v.push(device.to_string());
    v.extend(args(&["con-name"]));
    v.push(config.ssid.clone());
    v.push("ssid".to_string());
    v.push(config.ssid.clone());
    v.extend(args(&["wifi-sec.key-mgmt", "wpa-eap", "802-1x.eap"]));
    v.push(auth.eap.as_str().to_string());
    v.push("802-1x.phase2-auth".to_string());
    v.push(auth.phase2().as_str().to_string());
    v.push("802-1x.identity".to_string());
    v.push(auth.username.clone());
    v.push("802-1x.password".to_string());
    v.push(auth.password.clone());

    if let Some(anonymous) = &auth.anonymous_identity {
        v.push("802-1x.anonymous-identity".to_string());
        v.push(anonymous.trim().to_string());
    }
    if let Some(suffix) = &auth.domain_suffix_match {
        v.push("802-1x.domain-suffix-match".to_string());
        v.push(suffix.trim().to_string());
    }
    if let Some(system_ca) = auth.system_ca_certs {
        v.push("802-1x.system-ca-certs".to_string());
        v.push(if system_ca { "yes" } else { "no" }.to_string());
    }
    if let Some(path) = ca_cert_path {
        v.push("802-1x.ca-cert".to_string());
        v.push(path.to_string());
    }
    if let Some(bssid) = &config.bssid {
        v.push("wifi.bssid".to_string());
        v.push(bssid.clone());
    }
    Ok(v)
}

/// Create the hotspot connection profile (without AP parameters; those are
/// applied by [`hotspot_modify_args`]).
pub fn hotspot_add_args(device: &str, connection_name: &str, ssid: &str) -> Vec<String> {
    let mut v = args(&["connection", "add", "type", "wifi", "ifname"]);
    v.push(device.to_string());
    v.push("con-name".to_string());
    v.push(connection_name.to_string());
    v.extend(args(&["autoconnect", "no", "ssid"]));
    v.push(ssid.to_string());
    v
}

/// Reconfigure the hotspot profile for AP mode with the requested
/// SSID/band/channel/passphrase. An omitted channel clears any previously
/// pinned channel so the manager picks one.
pub fn hotspot_modify_args(config: &HotspotConfig, connection_name: &str) -> Vec<String> {
    let mut v = args(&["connection", "modify"]);
    v.push(connection_name.to_string());
    v.extend(args(&["802-11-wireless.mode", "ap", "802-11-wireless.band"]));
    v.push(config.band.as_str().to_string());
    v.push("802-11-wireless.ssid".to_string());
    v.push(config.ssid.clone());
    v.extend(args(&[
        "ipv4.method",
        "shared",
        "ipv6.method",
        "shared",
        "wifi-sec.key-mgmt",
        "wpa-psk",
        "wifi-sec.psk",
    ]));
    v.push(config.passphrase.clone());
    v.extend(args(&["connection.autoconnect", "no"]));
    v.push("802-11-wireless.channel".to_string());
    v.push(match config.channel {
        Some(channel) => channel.to_string(),
        None => String::new(),
    });
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wifi::{Band, EapMethod, EnterpriseAuth};

    #[test]
    fn split_fields_handles_escapes() {
        assert_eq!(split_fields("a:b:c"), vec!["a", "b", "c"]);
        assert_eq!(split_fields("a\\:b:c"), vec!["a:b", "c"]);
        assert_eq!(split_fields("a\\\\:b"), vec!["a\\", "b"]);
        assert_eq!(split_fields(""), vec![""]);
    }

    #[test]
    fn unescape_reverses_nmcli_escaping() {
        assert_eq!(unescape("AA\\:BB\\:CC"), "AA:BB:CC");
        assert_eq!(unescape("back\\\\slash"), "back\\slash");
    }

    #[test]
    fn parse_wifi_list_sorts_by_signal() {
        let output = "no:HomeNet:WPA2:55:AA\\:BB\\:CC\\:DD\\:EE\\:FF\n\
                      yes:Office:WPA2 802.1X:80:11\\:22\\:33\\:44\\:55\\:66\n\
                      no::--:30:\n";
        let networks = parse_wifi_list(output);
        assert_eq!(networks.len(), 3);
        assert_eq!(networks[0].ssid.as_deref(), Some("Office"));
        assert!(networks[0].active);
        assert!(networks[0].supports_enterprise);
        assert!(networks[0].requires_passphrase);
        assert_eq!(networks[0].bssid.as_deref(), Some("11:22:33:44:55:66"));
        assert_eq!(networks[1].ssid.as_deref(), Some("HomeNet"));
        assert!(!networks[1].supports_enterprise);
        // Hidden open network: no ssid, OPEN security, no passphrase.
        assert_eq!(networks[2].ssid, None);
        assert!(!networks[2].requires_passphrase);
    }

    #[test]
    fn short_lines_are_padded() {
        let networks = parse_wifi_list("no:Bare\n");
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].ssid.as_deref(), Some("Bare"));
        assert_eq!(networks[0].security, "OPEN");
        assert_eq!(networks[0].signal, None);
    }

    #[test]
    fn security_classification() {
        assert_eq!(security_flags("OPEN"), (false, false));
        assert_eq!(security_flags("--"), (false, false));
        assert_eq!(security_flags(""), (false, false));
        assert_eq!(security_flags("WPA2"), (true, false));
        assert_eq!(security_flags("WPA2 802.1X"), (true, true));
        assert_eq!(security_flags("WPA-EAP"), (true, true));
    }

    #[test]
    fn wifi_device_detection() {
        let output = "lo:loopback:unmanaged\n\
                      eth0:ethernet:connected\n\
                      wlan0:wifi:disconnected\n";
        assert_eq!(parse_wifi_device(output).as_deref(), Some("wlan0"));

        let unavailable = "wlan0:wifi:unavailable\n";
        assert_eq!(parse_wifi_device(unavailable), None);
    }

    #[test]
    fn station_connect_formatting() {
        let config = StationConfig {
            ssid: "HomeNet".into(),
            bssid: Some("AA:BB:CC:DD:EE:FF".into()),
            auth: StationAuth::WpaPsk {
                psk: "hunter22".into(),
            },
        };
        assert_eq!(
            station_connect_args(&config, "wlan0"),
            vec![
                "device",
                "wifi",
                "connect",
                "HomeNet",
                "ifname",
                "wlan0",
                "bssid",
                "AA:BB:CC:DD:EE:FF",
                "password",
                "hunter22",
            ]
        );
    }

    #[test]
    fn open_connect_has_no_password() {
        let config = StationConfig {
            ssid: "Cafe".into(),
            bssid: None,
            auth: StationAuth::Open,
        };
        let v = station_connect_args(&config, "wlan0");
        assert!(!v.contains(&"password".to_string()));
    }

    #[test]
    fn enterprise_add_formatting() {
        let config = StationConfig {
            ssid: "corp".into(),
            bssid: None,
            auth: StationAuth::Enterprise(EnterpriseAuth {
                username: "alice".into(),
                password: "secret".into(),
                eap: EapMethod::Peap,
                phase2: None,
                anonymous_identity: Some("anon@corp".into()),
                domain_suffix_match: Some("corp.example".into()),
                system_ca_certs: Some(true),
                ca_cert_pem: None,
            }),
        };
        let v = enterprise_add_args(&config, "wlan0", Some("/tmp/ca.pem")).unwrap();
        let joined = v.join(" ");
        assert!(joined.starts_with("connection add type wifi ifname wlan0 con-name corp ssid corp"));
        assert!(joined.contains("wifi-sec.key-mgmt wpa-eap"));
        assert!(joined.contains("802-1x.eap peap"));
        assert!(joined.contains("802-1x.phase2-auth mschapv2"));
        assert!(joined.contains("802-1x.identity alice"));
        assert!(joined.contains("802-1x.system-ca-certs yes"));
        assert!(joined.contains("802-1x.ca-cert /tmp/ca.pem"));
        assert!(joined.contains("802-1x.anonymous-identity anon@corp"));
        assert!(joined.contains("802-1x.domain-suffix-match corp.example"));
    }

    #[test]
    fn enterprise_add_rejects_wrong_auth() {
        let config = StationConfig {
            ssid: "x".into(),
            bssid: None,
            auth: StationAuth::Open,
        };
        assert!(enterprise_add_args(&config, "wlan0", None).is_err());
    }

    #[test]
    fn hotspot_formatting() {
        let config = HotspotConfig {
            ssid: "crawler".into(),
            passphrase: "crawler1234".into(),
            band: Band::Bg,
            channel: Some(6),
        };
        let v = hotspot_modify_args(&config, "crawler-hotspot");
        let joined = v.join(" ");
        assert!(joined.contains("802-11-wireless.mode ap"));
        assert!(joined.contains("802-11-wireless.band bg"));
        assert!(joined.contains("802-11-wireless.ssid crawler"));
        assert!(joined.contains("ipv4.method shared"));
        assert!(joined.contains("wifi-sec.psk crawler1234"));
        assert!(joined.ends_with("802-11-wireless.channel 6"));

        // Omitted channel clears the property.
        let config = HotspotConfig {
            channel: None,
            ..config
        };
        let v = hotspot_modify_args(&config, "crawler-hotspot");
        assert_eq!(v.last().unwrap(), "");
    }

    #[test]
    fn failure_classification() {
        assert_eq!(
            classify_failure("Error: Secrets were required, but not provided."),
            NetworkError::AuthRejected
        );
        assert_eq!(
            classify_failure("Error: Timeout expired."),
            NetworkError::Timeout
        );
        assert_eq!(
            classify_failure("Error: device is busy"),
            NetworkError::DeviceBusy
        );
        assert!(matches!(
            classify_failure("Error: unknown device."),
            NetworkError::UnderlyingManagerError(_)
        ));
    }

    #[test]
    fn names_parsing() {
        let output = "crawler-hotspot\nHomeNet\n\n";
        assert_eq!(parse_names(output), vec!["crawler-hotspot", "HomeNet"]);
        assert_eq!(first_value("crawler\n"), Some("crawler".to_string()));
        assert_eq!(first_value("  \n"), None);
    }
}
