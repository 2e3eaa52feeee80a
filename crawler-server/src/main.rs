use clap::Parser;
use miette::{miette, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use crawler_core::frame::CameraId;
use crawler_server::camera::CapturePipeline;
use crawler_server::config::{self, Config};
use crawler_server::gateway::Gateway;
use crawler_server::motor::MotorDriver;
use crawler_server::web::Web;
use crawler_server::wifi::{NetworkCoordinator, SystemNmcli};
use crawler_server::{build_motor_bus, frame_source_factory, Cli, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    log::info!("Starting crawler control server {}", VERSION);

    let config_path = args.config.clone().or_else(config::default_config_path);
    let config = match &config_path {
        Some(path) => Config::load(path),
        None => Config::default(),
    };

    let bus = build_motor_bus(&args, &config.motors).map_err(|e| miette!("{}", e))?;
    let motor = MotorDriver::new(bus, config.motors.clone());

    let front_entry = config.cameras.front;
    let rear_entry = config.cameras.rear;
    let front = CapturePipeline::new(
        CameraId::Front,
        front_entry.settings,
        frame_source_factory(&args, CameraId::Front, front_entry.device_index),
    );
    let rear = CapturePipeline::new(
        CameraId::Rear,
        rear_entry.settings,
        frame_source_factory(&args, CameraId::Rear, rear_entry.device_index),
    );

    let cert_dir = config::get_project_dirs()
        .map(|dirs| dirs.cache_dir().join("wifi_certs"))
        .unwrap_or_else(|| std::env::temp_dir().join("crawler-wifi-certs"));
    let wifi = NetworkCoordinator::new(Box::new(SystemNmcli::default()), cert_dir);

    let gateway = Arc::new(Gateway::new(motor.clone(), front, rear, wifi));
    let web = Web::new(gateway.clone(), args.port);

    Toplevel::new(move |s| async move {
        gateway.start_cameras().await;

        s.start(SubsystemBuilder::new("Watchdog", {
            let motor = motor.clone();
            move |subsys| motor.run_watchdog(subsys)
        }));
        s.start(SubsystemBuilder::new("Web", move |subsys| web.run(subsys)));
        s.start(SubsystemBuilder::new("Cameras", {
            let gateway = gateway.clone();
            move |subsys| async move {
                subsys.on_shutdown_requested().await;
                gateway.stop_cameras().await;
                Ok::<(), std::convert::Infallible>(())
            }
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .map_err(|e| miette!("{}", e))
}
