use thiserror::Error;

/// Host-level failures of the NIC emulation.
///
/// Errors the guest is supposed to see (overflow, collisions, CRC errors...)
/// are reported through chip status bits and never show up here.
#[derive(Debug, Error)]
pub enum NicError {
    #[error("the DeviceType value \"{0}\" is unsupported")]
    UnsupportedDeviceType(String),

    #[error("unknown configuration key \"{0}\"")]
    UnknownConfigKey(String),

    #[error("invalid value \"{value}\" for configuration key \"{key}\"")]
    InvalidConfigValue { key: &'static str, value: String },

    #[error("configuration key \"MAC\" is required")]
    MissingMac,

    #[error("link up delay of {0} ms is out of range")]
    InvalidLinkUpDelay(u32),

    #[error("unsupported I/O access size {size} at port {port:#06x}")]
    UnsupportedAccessSize { port: u16, size: usize },

    #[error("I/O port {0:#06x} is not decoded by this device")]
    UnmappedPort(u16),

    #[error("device has no shared memory window")]
    NoSharedMemory,

    #[error("address {0:#x} is outside the shared memory window")]
    UnmappedMemory(u32),

    #[error("no such LUN #{0}")]
    LunNotFound(u32),

    #[error("interrupted while waiting for receive buffer space")]
    Interrupted,

    #[error("failed to arm the link restore timer")]
    TimerFailed,
}

pub type Result<T> = std::result::Result<T, NicError>;
