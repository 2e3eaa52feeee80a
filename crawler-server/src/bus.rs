//! Motor bus abstraction.
//!
//! The motor controller is the only device on its bus and this trait is the
//! only way the rest of the server touches it. `LinuxI2cBus` talks to the
//! real controller; `EmulatedMotorBus` records writes for development and
//! tests.

use crawler_core::error::ActuationError;

/// A register-write capable bus holding exactly one motor controller.
pub trait MotorBus: Send {
    /// Write one byte to `register`. Bounded by device I/O; the caller owns
    /// retry policy.
    fn write_register(&mut self, register: u8, value: u8) -> Result<(), ActuationError>;
}

#[cfg(feature = "i2c")]
pub use self::i2c::LinuxI2cBus;

#[cfg(feature = "i2c")]
mod i2c {
    use super::MotorBus;
    use crawler_core::error::ActuationError;
    use i2cdev::core::I2CDevice;
    use i2cdev::linux::LinuxI2CDevice;
    use std::path::Path;

    /// The real controller on `/dev/i2c-*`.
    pub struct LinuxI2cBus {
        device: LinuxI2CDevice,
    }

    impl LinuxI2cBus {
        pub fn new<P: AsRef<Path>>(path: P, address: u16) -> Result<Self, ActuationError> {
            let device = LinuxI2CDevice::new(&path, address)
                .map_err(|e| ActuationError::Bus(e.to_string()))?;
            Ok(LinuxI2cBus { device })
        }
    }

    impl MotorBus for LinuxI2cBus {
        fn write_register(&mut self, register: u8, value: u8) -> Result<(), ActuationError> {
            self.device
                .smbus_write_byte_data(register, value)
                .map_err(|e| ActuationError::Bus(e.to_string()))
        }
    }
}

#[cfg(any(feature = "emulator", test))]
pub use self::emulator::EmulatedMotorBus;

#[cfg(any(feature = "emulator", test))]
mod emulator {
    use super::MotorBus;
    use crawler_core::error::ActuationError;
    use std::sync::{Arc, Mutex};

    /// Records every register write; can be told to fail upcoming writes.
    #[derive(Clone, Default)]
    pub struct EmulatedMotorBus {
        inner: Arc<Mutex<EmulatedState>>,
    }

    #[derive(Default)]
    struct EmulatedState {
        writes: Vec<(u8, u8)>,
        fail_remaining: u32,
    }

    impl EmulatedMotorBus {
        pub fn new() -> Self {
            Self::default()
        }

        /// All `(register, value)` writes in order.
        pub fn writes(&self) -> Vec<(u8, u8)> {
            self.inner.lock().unwrap().writes.clone()
        }

        /// The most recent value written to `register`, if any.
        pub fn last_write(&self, register: u8) -> Option<u8> {
            self.inner
                .lock()
                .unwrap()
                .writes
                .iter()
                .rev()
                .find(|(r, _)| *r == register)
                .map(|(_, v)| *v)
        }

        /// Make the next `count` writes fail with a bus error.
        pub fn fail_next(&self, count: u32) {
            self.inner.lock().unwrap().fail_remaining = count;
        }
    }

    impl MotorBus for EmulatedMotorBus {
        fn write_register(&mut self, register: u8, value: u8) -> Result<(), ActuationError> {
            let mut state = self.inner.lock().unwrap();
            if state.fail_remaining > 0 {
                state.fail_remaining -= 1;
                return Err(ActuationError::Bus("emulated bus failure".into()));
            }
            state.writes.push((register, value));
            Ok(())
        }
    }
}
