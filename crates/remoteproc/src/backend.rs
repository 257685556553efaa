//! Platform backend contract
//!
//! The framework never touches clocks, resets, or power domains itself; a
//! platform backend implements [`RprocOps`] and is called exclusively by the
//! lifecycle manager under the processor's lock.

use async_trait::async_trait;

/// Operations a platform backend provides for one remote processor
#[async_trait]
pub trait RprocOps: Send + Sync {
    /// Power the core up and begin executing from `boot_addr`
    ///
    /// A `boot_addr` of 0 selects the platform default entry point. May
    /// return before user code is actually running on the core.
    async fn start(&self, boot_addr: u64) -> anyhow::Result<()>;

    /// Synchronously halt the core and release host-programmable resources
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Keeps the module that supplied a backend loaded while the core is in use
///
/// The first acquire pins the module; the last release (or a failed load)
/// unpins it. `try_pin` returning false means the module is on its way out
/// and the acquire fails with `Busy`.
pub trait BackendModule: Send + Sync {
    fn try_pin(&self) -> bool;
    fn unpin(&self);
}
