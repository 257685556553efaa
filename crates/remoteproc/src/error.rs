//! Error types for the remoteproc framework

/// Errors surfaced by the framework
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("No remote processor registered as '{name}'")]
    NotFound { name: String },

    #[error("Remote processor '{name}' is already registered")]
    Exists { name: String },

    #[error("Remote processor is busy: {reason}")]
    Busy { reason: String },

    #[error("Invalid remote processor name '{name}'")]
    InvalidName { name: String },

    #[error("No firmware configured for '{name}'")]
    MissingFirmware { name: String },

    #[error("Firmware image too small: {len} bytes")]
    TooSmall { len: usize },

    #[error("Bad firmware magic: {found:02x?}")]
    BadMagic { found: [u8; 4] },

    #[error("Truncated firmware image: need {needed} bytes, {remaining} remain")]
    Truncated { needed: usize, remaining: usize },

    #[error("No mapping for device address {da:#x}")]
    InvalidAddress { da: u64 },

    #[error("Address map entries overlap at device address {da:#x}")]
    OverlappingMap { da: u64 },

    #[error("Failed to map physical memory at {pa:#x}: {source}")]
    MappingFailed {
        pa: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Too many trace buffers: limit is {limit}")]
    TooManyTraces { limit: usize },

    #[error("Firmware fetch failed: {source}")]
    FetchFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("Backend {op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Release without a matching acquire")]
    AsymmetricRelease,

    #[error("Wait for load completion was interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, Error>;
