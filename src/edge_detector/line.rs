//! Digital input line backends

use std::io;
use std::path::PathBuf;

/// Default sysfs GPIO root
const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Samples digital input lines.
///
/// `read` returns `true` for logical high. Lines idle high (pull-up) and are
/// pulled low when triggered.
pub trait LineReader: Send + Sync {
    fn read(&self, pin: u32) -> io::Result<bool>;

    /// False for the no-op backend
    fn is_available(&self) -> bool {
        true
    }
}

/// Linux sysfs GPIO (`/sys/class/gpio/gpioN/value`)
///
/// Pull-up configuration is not exposed through sysfs; it is expected to be
/// set in the device tree or by external resistors.
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    /// Export and configure `pins` as inputs under the default sysfs root
    pub fn open(pins: &[u32]) -> io::Result<Self> {
        Self::open_at(PathBuf::from(SYSFS_GPIO_ROOT), pins)
    }

    pub fn open_at(root: PathBuf, pins: &[u32]) -> io::Result<Self> {
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("GPIO sysfs root not found: {}", root.display()),
            ));
        }

        let gpio = Self { root };
        for &pin in pins {
            gpio.export(pin)?;
            tracing::info!(pin = pin, "GPIO pin configured as input");
        }

        Ok(gpio)
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    fn export(&self, pin: u32) -> io::Result<()> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            std::fs::write(self.root.join("export"), pin.to_string())?;
        }
        std::fs::write(dir.join("direction"), "in")
    }
}

impl LineReader for SysfsGpio {
    fn read(&self, pin: u32) -> io::Result<bool> {
        let raw = std::fs::read_to_string(self.pin_dir(pin).join("value"))?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected GPIO value {:?} on pin {}", other, pin),
            )),
        }
    }
}

/// Backend for devices without line access. Always reads high.
pub struct NoopLine;

impl LineReader for NoopLine {
    fn read(&self, _pin: u32) -> io::Result<bool> {
        Ok(true)
    }

    fn is_available(&self) -> bool {
        false
    }
}
