//! Motor driver interface and its watchdog.
//!
//! Owns the motor bus exclusively. Drive commands are clamped, converted to
//! device units, and written to both channel registers; a periodic watchdog
//! forces both channels to zero whenever fresh commands stop arriving. The
//! stop write is idempotent and always safe to issue, so the watchdog never
//! has to reason about an in-flight `set_drive`.

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio_graceful_shutdown::SubsystemHandle;

use crawler_core::drive::{register_byte, to_device_units, DriveCommand, MotorSettings, MotorState};
use crawler_core::error::ActuationError;

use crate::bus::MotorBus;

/// How often the watchdog checks for staleness.
pub const WATCHDOG_PERIOD: Duration = Duration::from_millis(250);
/// How long without a fresh command before the watchdog stops the vehicle.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_millis(500);
/// Bus writes are retried this many times before escalating.
const BUS_WRITE_RETRIES: u32 = 3;

struct MotorShared {
    current_left: i8,
    current_right: i8,
    last_command: Option<Instant>,
    safety_stopped: bool,
    hardware_fault: bool,
}

struct MotorInner {
    settings: MotorSettings,
    watchdog_timeout: Duration,
    bus: Mutex<Box<dyn MotorBus>>,
    state: RwLock<MotorShared>,
}

/// The single owner of the motor bus. Cheap to clone; all clones share the
/// same bus and state.
#[derive(Clone)]
pub struct MotorDriver {
    inner: Arc<MotorInner>,
}

impl MotorDriver {
    pub fn new(bus: Box<dyn MotorBus>, settings: MotorSettings) -> Self {
        Self::with_watchdog_timeout(bus, settings, WATCHDOG_TIMEOUT)
    }

    /// Used by tests to shrink the staleness window.
    pub fn with_watchdog_timeout(
        bus: Box<dyn MotorBus>,
        settings: MotorSettings,
        watchdog_timeout: Duration,
    ) -> Self {
        info!(
            "Motor controller channels: left={} -> 0x{:02X}, right={} -> 0x{:02X}",
            settings.left_channel,
            settings.left_register(),
            settings.right_channel,
            settings.right_register()
        );
        MotorDriver {
            inner: Arc::new(MotorInner {
                settings,
                watchdog_timeout,
                bus: Mutex::new(bus),
                state: RwLock::new(MotorShared {
                    current_left: 0,
                    current_right: 0,
                    last_command: None,
                    safety_stopped: false,
                    hardware_fault: false,
                }),
            }),
        }
    }

    /// Apply a drive command to both channels.
    ///
    /// Speeds are clamped, not rejected; only a non-finite value errors. A
    /// successful write clears both the safety stop and any hardware fault.
    pub fn set_drive(&self, command: DriveCommand) -> Result<(), ActuationError> {
        let command = command.clamped()?;
        let max = self.inner.settings.max_speed;
        let left = to_device_units(command.left_speed, max);
        let right = to_device_units(command.right_speed, max);

        self.write_channels(left, right)?;

        let mut state = self.inner.state.write().unwrap();
        state.current_left = left;
        state.current_right = right;
        state.last_command = Some(Instant::now());
        state.safety_stopped = false;
        state.hardware_fault = false;
        debug!("Drive applied: left={} right={}", left, right);
        Ok(())
    }

    /// Force both channels to zero. Idempotent; also used as the emergency
    /// stop. Does not count as a fresh drive command.
    pub fn stop(&self) -> Result<(), ActuationError> {
        self.write_channels(0, 0)?;
        let mut state = self.inner.state.write().unwrap();
        state.current_left = 0;
        state.current_right = 0;
        state.safety_stopped = true;
        state.hardware_fault = false;
        Ok(())
    }

    /// Read-only snapshot of the driver's state.
    pub fn snapshot(&self) -> MotorState {
        let state = self.inner.state.read().unwrap();
        MotorState {
            current_left: state.current_left,
            current_right: state.current_right,
            last_command_age_ms: state
                .last_command
                .map(|t| t.elapsed().as_millis() as u64),
            safety_stopped: state.safety_stopped,
            hardware_fault: state.hardware_fault,
        }
    }

    /// One watchdog evaluation: stop the vehicle if commands went stale.
    ///
    /// Public so the periodic task stays a trivial wrapper around it.
    pub fn watchdog_tick(&self) {
        let stale = {
            let state = self.inner.state.read().unwrap();
            if state.safety_stopped {
                // Channels are already zero; nothing to re-issue.
                false
            } else {
                match state.last_command {
                    None => true,
                    Some(t) => t.elapsed() >= self.inner.watchdog_timeout,
                }
            }
        };
        if stale {
            warn!("Watchdog: no drive command within timeout, stopping motors");
            if let Err(e) = self.stop() {
                // Motors may still be moving; the fault is visible in the
                // snapshot and the next tick retries.
                error!("Watchdog stop failed: {}", e);
            }
        }
    }

    /// Periodic watchdog task.
    pub async fn run_watchdog(self, subsys: SubsystemHandle) -> Result<(), ActuationError> {
        let mut interval = tokio::time::interval(WATCHDOG_PERIOD);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    debug!("Watchdog shutting down, stopping motors");
                    let _ = self.stop();
                    break;
                }
                _ = interval.tick() => self.watchdog_tick(),
            }
        }
        Ok(())
    }

    fn write_channels(&self, left: i8, right: i8) -> Result<(), ActuationError> {
        let left_register = self.inner.settings.left_register();
        let right_register = self.inner.settings.right_register();
        let mut bus = self.inner.bus.lock().unwrap();

        let mut last = String::new();
        for attempt in 1..=BUS_WRITE_RETRIES {
            let result = bus
                .write_register(left_register, register_byte(left))
                .and_then(|_| bus.write_register(right_register, register_byte(right)));
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Motor bus write failed (attempt {}): {}", attempt, e);
                    last = e.to_string();
                }
            }
        }

        self.inner.state.write().unwrap().hardware_fault = true;
        Err(ActuationError::HardwareFault {
            attempts: BUS_WRITE_RETRIES,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EmulatedMotorBus;

    fn driver_with_timeout(timeout: Duration) -> (MotorDriver, EmulatedMotorBus) {
        let bus = EmulatedMotorBus::new();
        let driver = MotorDriver::with_watchdog_timeout(
            Box::new(bus.clone()),
            MotorSettings::default(),
            timeout,
        );
        (driver, bus)
    }

    #[test]
    fn drive_writes_device_units() {
        let (driver, bus) = driver_with_timeout(WATCHDOG_TIMEOUT);
        driver
            .set_drive(DriveCommand::new(0.5, 0.5, 0))
            .unwrap();

        let snapshot = driver.snapshot();
        assert!(!snapshot.safety_stopped);
        assert_eq!(snapshot.current_left, 50);
        assert_eq!(snapshot.current_right, 50);
        assert_eq!(bus.last_write(0x33), Some(50));
        assert_eq!(bus.last_write(0x34), Some(50));
    }

    #[test]
    fn out_of_range_is_clamped_not_rejected() {
        let (driver, bus) = driver_with_timeout(WATCHDOG_TIMEOUT);
        driver
            .set_drive(DriveCommand::new(1.5, -2.0, 0))
            .unwrap();
        assert_eq!(driver.snapshot().current_left, 100);
        assert_eq!(driver.snapshot().current_right, -100);
        // Reverse speeds land as two's-complement register bytes.
        assert_eq!(bus.last_write(0x34), Some(0x9C));
    }

    #[test]
    fn nan_is_rejected() {
        let (driver, _) = driver_with_timeout(WATCHDOG_TIMEOUT);
        assert!(matches!(
            driver.set_drive(DriveCommand::new(f64::NAN, 0.0, 0)),
            Err(ActuationError::OutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn watchdog_stops_after_silence() {
        let timeout = Duration::from_millis(30);
        let (driver, bus) = driver_with_timeout(timeout);
        driver.set_drive(DriveCommand::new(0.5, 0.5, 0)).unwrap();

        // Fresh command: the watchdog leaves it alone.
        driver.watchdog_tick();
        assert!(!driver.snapshot().safety_stopped);

        tokio::time::sleep(timeout * 2).await;
        driver.watchdog_tick();

        let snapshot = driver.snapshot();
        assert!(snapshot.safety_stopped);
        assert_eq!(snapshot.current_left, 0);
        assert_eq!(snapshot.current_right, 0);
        assert_eq!(bus.last_write(0x33), Some(0));
        assert_eq!(bus.last_write(0x34), Some(0));
    }

    #[test]
    fn watchdog_engages_before_any_command() {
        let (driver, _) = driver_with_timeout(WATCHDOG_TIMEOUT);
        driver.watchdog_tick();
        assert!(driver.snapshot().safety_stopped);
    }

    #[tokio::test]
    async fn fresh_command_clears_safety_stop() {
        let timeout = Duration::from_millis(20);
        let (driver, _) = driver_with_timeout(timeout);
        driver.set_drive(DriveCommand::new(0.2, 0.2, 0)).unwrap();
        tokio::time::sleep(timeout * 2).await;
        driver.watchdog_tick();
        assert!(driver.snapshot().safety_stopped);

        driver.set_drive(DriveCommand::new(0.3, 0.3, 1)).unwrap();
        let snapshot = driver.snapshot();
        assert!(!snapshot.safety_stopped);
        assert_eq!(snapshot.current_left, 30);
    }

    #[test]
    fn exhausted_retries_escalate_to_hardware_fault() {
        let (driver, bus) = driver_with_timeout(WATCHDOG_TIMEOUT);
        bus.fail_next(10);
        let err = driver.set_drive(DriveCommand::new(0.5, 0.5, 0));
        assert!(matches!(
            err,
            Err(ActuationError::HardwareFault { attempts: 3, .. })
        ));
        assert!(driver.snapshot().hardware_fault);

        // A later successful write re-verifies hardware access.
        driver.set_drive(DriveCommand::new(0.1, 0.1, 1)).unwrap();
        assert!(!driver.snapshot().hardware_fault);
    }

    #[test]
    fn transient_bus_failure_is_retried_locally() {
        let (driver, bus) = driver_with_timeout(WATCHDOG_TIMEOUT);
        bus.fail_next(1);
        driver.set_drive(DriveCommand::new(0.4, 0.4, 0)).unwrap();
        assert_eq!(driver.snapshot().current_left, 40);
        assert!(!driver.snapshot().hardware_fault);
    }

    #[test]
    fn stop_is_idempotent() {
        let (driver, bus) = driver_with_timeout(WATCHDOG_TIMEOUT);
        driver.set_drive(DriveCommand::new(1.0, 1.0, 0)).unwrap();
        driver.stop().unwrap();
        driver.stop().unwrap();
        let snapshot = driver.snapshot();
        assert!(snapshot.safety_stopped);
        assert_eq!(snapshot.current_left, 0);
        assert_eq!(bus.last_write(0x33), Some(0));
    }
}
