//! HTTP/WebSocket boundary in front of the command gateway.
//!
//! - `GET  /api/status`            combined status
//! - `WS   /api/control`           drive channel + telemetry pushes
//! - `GET  /video_feed/{camera}`   MJPEG stream (front | rear)
//! - `GET  /api/wifi/networks`     scan nearby networks
//! - `POST /api/wifi/connect`      join a network (open / PSK / enterprise)
//! - `POST /api/wifi/hotspot/start`, `POST /api/wifi/hotspot/stop`
//! - `GET  /api/wifi/hotspot`      hotspot profile status
//! - `GET  /api/wifi/mode`         live network mode
//! - `POST /api/camera/quality`    apply a quality profile

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::{net::TcpListener, sync::broadcast};
use tokio_graceful_shutdown::SubsystemHandle;

use crawler_core::capture::QualityProfile;
use crawler_core::frame::{CameraId, Frame};
use crawler_core::wifi::{
    Band, EapMethod, EnterpriseAuth, HotspotConfig, HotspotStatus, NetworkMode, Phase2Auth,
    StationAuth, StationConfig,
};

use crate::gateway::{Gateway, GatewayError, SystemStatus};
use crate::wifi::ScanResult;

const STATUS_URI: &str = "/api/status";
const CONTROL_URI: &str = "/api/control";
const VIDEO_FEED_URI: &str = "/video_feed/{camera}";
const WIFI_NETWORKS_URI: &str = "/api/wifi/networks";
const WIFI_CONNECT_URI: &str = "/api/wifi/connect";
const WIFI_MODE_URI: &str = "/api/wifi/mode";
const HOTSPOT_URI: &str = "/api/wifi/hotspot";
const HOTSPOT_START_URI: &str = "/api/wifi/hotspot/start";
const HOTSPOT_STOP_URI: &str = "/api/wifi/hotspot/stop";
const CAMERA_QUALITY_URI: &str = "/api/camera/quality";

/// How often the control channel pushes telemetry.
const TELEMETRY_PERIOD: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum WebError {
    #[error("Socket operation failed")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct Web {
    gateway: Arc<Gateway>,
    port: u16,
    shutdown_tx: broadcast::Sender<()>,
}

impl Web {
    pub fn new(gateway: Arc<Gateway>, port: u16) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Web {
            gateway,
            port,
            shutdown_tx,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(STATUS_URI, get(get_status))
            .route(CONTROL_URI, get(control_handler))
            .route(VIDEO_FEED_URI, get(video_feed))
            .route(WIFI_NETWORKS_URI, get(get_wifi_networks))
            .route(WIFI_CONNECT_URI, post(post_wifi_connect))
            .route(WIFI_MODE_URI, get(get_wifi_mode))
            .route(HOTSPOT_URI, get(get_hotspot_status))
            .route(HOTSPOT_START_URI, post(post_hotspot_start))
            .route(HOTSPOT_STOP_URI, post(post_hotspot_stop))
            .route(CAMERA_QUALITY_URI, post(post_camera_quality))
            .with_state(self.clone())
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), WebError> {
        let listener = TcpListener::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            self.port,
        ))
        .await?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone();
        let app = self.router();

        log::info!("Starting HTTP web server on port {}", self.port);

        tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => {
                let _ = shutdown_tx.send(());
            },
            r = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        _ = shutdown_rx.recv().await;
                    }) => {
                return r.map_err(WebError::Io);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

async fn get_status(State(state): State<Web>) -> Json<SystemStatus> {
    Json(state.gateway.status())
}

// ---------------------------------------------------------------------------
// Drive control channel
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
enum ControlRequest {
    Drive { left: f64, right: f64 },
    Stop,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
enum ControlReply {
    Connected { message: String },
    MotorAck { left: i8, right: i8 },
    Telemetry { status: SystemStatus },
    Error { kind: String, message: String },
}

async fn control_handler(State(state): State<Web>, ws: WebSocketUpgrade) -> Response {
    debug!("control channel request");
    let shutdown_rx = state.shutdown_tx.subscribe();
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| control_stream(socket, gateway, shutdown_rx))
}

/// Actual websocket statemachine (one will be spawned per connection)
async fn control_stream(
    mut socket: WebSocket,
    gateway: Arc<Gateway>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if send_reply(
        &mut socket,
        &ControlReply::Connected {
            message: "Connected to crawler".into(),
        },
    )
    .await
    .is_err()
    {
        return;
    }

    let mut telemetry = tokio::time::interval(TELEMETRY_PERIOD);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Shutdown of control websocket");
                break;
            },
            _ = telemetry.tick() => {
                let reply = ControlReply::Telemetry { status: gateway.status() };
                if send_reply(&mut socket, &reply).await.is_err() {
                    break;
                }
            },
            r = socket.recv() => {
                match r {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_control_message(&gateway, &text);
                        if send_reply(&mut socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Control websocket closed");
                        break;
                    }
                    Some(Ok(other)) => {
                        debug!("Dropping unexpected message {:?}", other);
                    }
                    Some(Err(e)) => {
                        warn!("Control websocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

fn handle_control_message(gateway: &Gateway, text: &str) -> ControlReply {
    match serde_json::from_str::<ControlRequest>(text) {
        Ok(ControlRequest::Drive { left, right }) => match gateway.drive(left, right) {
            Ok(state) => ControlReply::MotorAck {
                left: state.current_left,
                right: state.current_right,
            },
            Err(e) => ControlReply::Error {
                kind: e.kind().into(),
                message: e.to_string(),
            },
        },
        Ok(ControlRequest::Stop) => match gateway.emergency_stop() {
            Ok(state) => ControlReply::MotorAck {
                left: state.current_left,
                right: state.current_right,
            },
            Err(e) => ControlReply::Error {
                kind: e.kind().into(),
                message: e.to_string(),
            },
        },
        Err(e) => ControlReply::Error {
            kind: "invalidRequest".into(),
            message: format!("unknown control message: {}", e),
        },
    }
}

async fn send_reply(socket: &mut WebSocket, reply: &ControlReply) -> Result<(), axum::Error> {
    let text = serde_json::to_string(reply).expect("reply serializes");
    socket.send(Message::Text(text.into())).await
}

// ---------------------------------------------------------------------------
// Video feeds
// ---------------------------------------------------------------------------

fn mjpeg_chunk(frame: &Frame) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(frame.payload.len() + 96);
    chunk.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: ");
    chunk.extend_from_slice(frame.payload.len().to_string().as_bytes());
    chunk.extend_from_slice(b"\r\n\r\n");
    chunk.extend_from_slice(&frame.payload);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

async fn video_feed(State(state): State<Web>, Path(camera): Path<String>) -> Response {
    let camera: CameraId = match camera.parse() {
        Ok(camera) => camera,
        Err(e) => return GatewayError::InvalidRequest(e).into_response(),
    };
    debug!("video feed request for {}", camera);

    // Capture starts on demand; an already-running pipeline is left alone.
    if let Err(e) = state.gateway.camera(camera).start().await {
        return GatewayError::from(e).into_response();
    }

    let subscription = state.gateway.subscribe(camera);
    let stream = futures_util::stream::unfold(subscription, |mut subscription| async move {
        let frame = subscription.next_frame().await?;
        Some((
            Ok::<_, std::convert::Infallible>(mjpeg_chunk(&frame)),
            subscription,
        ))
    });

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .body(Body::from_stream(stream))
        .expect("static headers are valid")
}

// ---------------------------------------------------------------------------
// Wi-Fi management
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ScanResponse {
    success: bool,
    #[serde(flatten)]
    scan: ScanResult,
}

async fn get_wifi_networks(State(state): State<Web>) -> Result<Json<ScanResponse>, GatewayError> {
    let scan = state.gateway.scan_networks().await?;
    Ok(Json(ScanResponse {
        success: true,
        scan,
    }))
}

async fn get_wifi_mode(State(state): State<Web>) -> Json<NetworkMode> {
    Json(state.gateway.wifi().current_mode())
}

async fn get_hotspot_status(State(state): State<Web>) -> Result<Json<HotspotStatus>, GatewayError> {
    Ok(Json(state.gateway.hotspot_status().await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModeResponse {
    success: bool,
    mode: NetworkMode,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConnectRequest {
    ssid: String,
    psk: Option<String>,
    username: Option<String>,
    password: Option<String>,
    bssid: Option<String>,
    eap_method: Option<String>,
    phase2_auth: Option<String>,
    anonymous_identity: Option<String>,
    domain_suffix_match: Option<String>,
    system_ca_certs: Option<bool>,
    ca_cert_pem: Option<String>,
}

impl ConnectRequest {
    fn into_station_config(self) -> Result<StationConfig, GatewayError> {
        let ssid = self.ssid.trim().to_string();
        if ssid.is_empty() {
            return Err(GatewayError::InvalidRequest("SSID is required".into()));
        }
        let bssid = self.bssid.filter(|b| !b.trim().is_empty());

        let auth = match self.username.filter(|u| !u.trim().is_empty()) {
            Some(username) => {
                let password = self
                    .password
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        GatewayError::InvalidRequest(
                            "password is required for enterprise Wi-Fi".into(),
                        )
                    })?;
                let eap = match self.eap_method.as_deref() {
                    Some(s) if !s.trim().is_empty() => EapMethod::parse(s)?,
                    _ => EapMethod::Peap,
                };
                let phase2 = match self.phase2_auth.as_deref() {
                    Some(s) if !s.trim().is_empty() => Some(Phase2Auth::parse(s)?),
                    _ => None,
                };
                StationAuth::Enterprise(EnterpriseAuth {
                    username,
                    password,
                    eap,
                    phase2,
                    anonymous_identity: self
                        .anonymous_identity
                        .filter(|v| !v.trim().is_empty()),
                    domain_suffix_match: self
                        .domain_suffix_match
                        .filter(|v| !v.trim().is_empty()),
                    system_ca_certs: self.system_ca_certs,
                    ca_cert_pem: self.ca_cert_pem.filter(|v| !v.trim().is_empty()),
                })
            }
            None => match self.psk.filter(|p| !p.is_empty()) {
                Some(psk) => StationAuth::WpaPsk { psk },
                None => StationAuth::Open,
            },
        };

        Ok(StationConfig { ssid, bssid, auth })
    }
}

async fn post_wifi_connect(
    State(state): State<Web>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<ModeResponse>, GatewayError> {
    let config = request.into_station_config()?;
    let mode = state.gateway.connect_station(config).await?;
    Ok(Json(ModeResponse {
        success: true,
        mode,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HotspotRequest {
    ssid: Option<String>,
    password: Option<String>,
    band: Option<String>,
    channel: Option<u8>,
}

impl HotspotRequest {
    fn into_hotspot_config(self) -> Result<HotspotConfig, GatewayError> {
        let mut config = HotspotConfig::default();
        if let Some(ssid) = self.ssid.filter(|s| !s.trim().is_empty()) {
            config.ssid = ssid.trim().to_string();
        }
        if let Some(password) = self.password.filter(|p| !p.is_empty()) {
            config.passphrase = password;
        }
        if let Some(band) = self.band.filter(|b| !b.trim().is_empty()) {
            config.band = band.parse::<Band>()?;
        }
        config.channel = self.channel;
        Ok(config)
    }
}

async fn post_hotspot_start(
    State(state): State<Web>,
    Json(request): Json<HotspotRequest>,
) -> Result<Json<ModeResponse>, GatewayError> {
    let config = request.into_hotspot_config()?;
    let mode = state.gateway.start_hotspot(config).await?;
    Ok(Json(ModeResponse {
        success: true,
        mode,
    }))
}

async fn post_hotspot_stop(State(state): State<Web>) -> Result<Json<ModeResponse>, GatewayError> {
    let mode = state.gateway.disable_network().await?;
    Ok(Json(ModeResponse {
        success: true,
        mode,
    }))
}

// ---------------------------------------------------------------------------
// Camera quality
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QualityRequest {
    profile: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QualityResponse {
    success: bool,
    profile: QualityProfile,
}

async fn post_camera_quality(
    State(state): State<Web>,
    Json(request): Json<QualityRequest>,
) -> Result<Json<QualityResponse>, GatewayError> {
    let profile: QualityProfile = request
        .profile
        .parse()
        .map_err(GatewayError::InvalidRequest)?;
    state.gateway.apply_quality_profile(profile).await?;
    Ok(Json(QualityResponse {
        success: true,
        profile,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::emulated_gateway;
    use axum::body::to_bytes;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_web() -> Web {
        Web::new(Arc::new(emulated_gateway()), 0)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_endpoint_reports_all_components() {
        let web = test_web();
        let response = web
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["network"]["mode"], "disabled");
        assert_eq!(json["motor"]["safetyStopped"], false);
        assert!(json["cameras"]["front"]["health"].is_object());
    }

    #[tokio::test]
    async fn wifi_mode_endpoint() {
        let web = test_web();
        let response = web
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/wifi/mode")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["mode"], "disabled");
    }

    #[tokio::test]
    async fn hotspot_start_with_defaults() {
        let web = test_web();
        let response = web
            .router()
            .oneshot(json_request("/api/wifi/hotspot/start", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["mode"]["mode"], "hotspot");
        assert_eq!(json["mode"]["ssid"], "crawler");
        assert_eq!(json["mode"]["active"], true);
    }

    #[tokio::test]
    async fn hotspot_short_password_is_rejected() {
        let web = test_web();
        let response = web
            .router()
            .oneshot(json_request(
                "/api/wifi/hotspot/start",
                r#"{"password":"short"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["kind"], "invalidConfig");
    }

    #[tokio::test]
    async fn connect_requires_ssid() {
        let web = test_web();
        let response = web
            .router()
            .oneshot(json_request("/api/wifi/connect", r#"{"ssid":"  "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["kind"], "invalidRequest");
    }

    #[tokio::test]
    async fn connect_enterprise_requires_password() {
        let web = test_web();
        let response = web
            .router()
            .oneshot(json_request(
                "/api/wifi/connect",
                r#"{"ssid":"corp","username":"alice"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn connect_psk_succeeds() {
        let web = test_web();
        let response = web
            .router()
            .oneshot(json_request(
                "/api/wifi/connect",
                r#"{"ssid":"HomeNet","psk":"hunter22"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["mode"]["mode"], "station");
        assert_eq!(json["mode"]["ssid"], "HomeNet");
    }

    #[tokio::test]
    async fn quality_profile_validation() {
        let web = test_web();
        let response = web
            .router()
            .oneshot(json_request("/api/camera/quality", r#"{"profile":"ultra"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = web
            .router()
            .oneshot(json_request("/api/camera/quality", r#"{"profile":"low"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["profile"], "low");
    }

    #[tokio::test]
    async fn unknown_camera_feed_is_rejected() {
        let web = test_web();
        let response = web
            .router()
            .oneshot(
                Request::builder()
                    .uri("/video_feed/top")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wifi_networks_lists_scan() {
        let web = test_web();
        let response = web
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/wifi/networks")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["networks"][0]["ssid"], "HomeNet");
        assert_eq!(json["active"]["ssid"], "HomeNet");
    }
}
