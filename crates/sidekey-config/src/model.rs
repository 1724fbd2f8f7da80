//! Configuration data model

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    pub global: GlobalConfig,
    pub mouse: DeviceMatch,
    pub keyboard: DeviceMatch,
    pub pointer: PointerConfig,
    pub queue: QueueConfig,
    pub recovery: RecoveryConfig,
}

impl Config {
    /// Built-in mouse default: Logitech G502 Hero.
    pub const DEFAULT_MOUSE: DeviceMatch = DeviceMatch {
        vendor: 0x046d,
        product: 0xc332,
    };

    /// Built-in keyboard default.
    pub const DEFAULT_KEYBOARD: DeviceMatch = DeviceMatch {
        vendor: 0x17f6,
        product: 0x0862,
    };
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            mouse: Self::DEFAULT_MOUSE,
            keyboard: Self::DEFAULT_KEYBOARD,
            pointer: PointerConfig::default(),
            queue: QueueConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

/// Global settings
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by tracing's `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level \"{}\" (expected trace, debug, info, warn, or error)",
                s
            )),
        }
    }
}

/// USB vendor/product pair identifying one physical device.
///
/// Parsed from the `"vendor:product"` hex string convention used in the
/// config file (e.g., "046d:c332").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMatch {
    pub vendor: u16,
    pub product: u16,
}

impl DeviceMatch {
    pub fn new(vendor: u16, product: u16) -> Self {
        Self { vendor, product }
    }
}

impl fmt::Display for DeviceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.product)
    }
}

impl FromStr for DeviceMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vendor, product) = s
            .split_once(':')
            .ok_or_else(|| format!("expected \"vendor:product\", got \"{}\"", s))?;
        let vendor = u16::from_str_radix(vendor, 16)
            .map_err(|_| format!("invalid vendor id \"{}\" in \"{}\"", vendor, s))?;
        let product = u16::from_str_radix(product, 16)
            .map_err(|_| format!("invalid product id \"{}\" in \"{}\"", product, s))?;
        Ok(Self { vendor, product })
    }
}

/// Pointer output settings
#[derive(Debug, Clone)]
pub struct PointerConfig {
    /// Scale applied to REL_X/REL_Y deltas before forwarding.
    pub dpi_scale: f32,
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self { dpi_scale: 0.5 }
    }
}

/// Keyboard event queue settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Slot count; rounded up to a power of two at construction.
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            overflow: OverflowPolicy::Drop,
        }
    }
}

/// What to do when a producer outruns the keyboard output worker.
///
/// `Drop` trades event loss for availability; `Abort` terminates the
/// process immediately so an undersized queue cannot hide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    #[default]
    Drop,
    Abort,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "abort" => Ok(Self::Abort),
            _ => Err(format!(
                "unknown overflow policy \"{}\" (expected \"drop\" or \"abort\")",
                s
            )),
        }
    }
}

/// Device reconnect timing
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Pause between closing a faulted device and re-locating it.
    pub settle_ms: u64,
    /// Pause between failed reopen attempts.
    pub backoff_ms: u64,
}

impl RecoveryConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            settle_ms: 1000,
            backoff_ms: 5000,
        }
    }
}
