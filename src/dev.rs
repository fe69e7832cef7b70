//! The device switch: character device drivers, indexed by major number.
//!
//! A device inode carries a major and minor number instead of content.
//! Reads and writes on it dispatch through this table; the inode's long
//! lock is released for the duration of the driver call, since a driver
//! (a console, say) may block indefinitely waiting for input.

use std::sync::{Arc, Mutex};

use array_macro::array;

use crate::error::{Error, Result};
use crate::param::NDEV;

/// Major number conventionally taken by the console driver.
pub const CONSOLE: u16 = 1;

/// A character device driver.
pub trait Device: Send + Sync {
    fn read(&self, dst: &mut [u8]) -> Result<usize>;

    fn write(&self, src: &[u8]) -> Result<usize>;
}

pub struct DevSw {
    devices: Mutex<[Option<Arc<dyn Device>>; NDEV]>,
}

impl DevSw {
    pub(crate) fn new() -> Self {
        Self {
            devices: Mutex::new(array![_ => None; NDEV]),
        }
    }

    /// Install a driver under `major`, replacing any previous one.
    pub fn set(&self, major: u16, device: Arc<dyn Device>) {
        assert!((major as usize) < NDEV, "devsw: major number out of range");
        self.devices.lock().unwrap()[major as usize] = Some(device);
    }

    /// The driver registered under `major`, if any.
    pub fn get(&self, major: u16) -> Result<Arc<dyn Device>> {
        self.devices
            .lock()
            .unwrap()
            .get(major as usize)
            .and_then(|d| d.clone())
            .ok_or(Error::NoDevice(major))
    }
}
