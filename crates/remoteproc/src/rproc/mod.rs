//! Remote processor lifecycle management
//!
//! One [`Rproc`] record exists per registered processor. The first `get`
//! boots it: a spawned task fetches the firmware, runs the load pipeline,
//! and asks the backend to start the core. Further `get`s share the running
//! core; the last `put` stops it and tears host resources down. All mutable
//! record state lives behind one `tokio::sync::Mutex`, and `put` waits for
//! the one-shot load-completion signal so it can never race the loader.

mod registry;
pub mod types;


pub use registry::Registry;
pub use types::{RprocConfig, RprocEvent, RprocState, RprocStatus, TraceInfo};

use crate::addrmap::AddressMap;
use crate::backend::{BackendModule, RprocOps};
use crate::error::{Error, Result};
use crate::fetch::FirmwareFetcher;
use crate::firmware::image::FirmwareImage;
use crate::firmware::loader::{load_sections, LoadContext};
use crate::memory::PhysMemory;
use crate::trace::TraceBinding;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

/// One registered remote processor
pub(crate) struct Rproc {
    name: String,
    firmware: Option<String>,
    maps: Option<AddressMap>,
    ops: Arc<dyn RprocOps>,
    owner: Option<Arc<dyn BackendModule>>,
    memory: Arc<dyn PhysMemory>,
    fetcher: Arc<dyn FirmwareFetcher>,
    event_tx: broadcast::Sender<RprocEvent>,
    inner: Mutex<Inner>,
}

/// Mutable record state, guarded by the record lock
#[derive(Default)]
struct Inner {
    state: RprocState,
    refcount: u32,
    traces: Vec<TraceBinding>,
    load_done: Option<watch::Receiver<bool>>,
    last_error: Option<String>,
    /// Set by unregister so racing lookups stop handing the record out
    detached: bool,
}

impl Rproc {
    fn new(
        config: RprocConfig,
        ops: Arc<dyn RprocOps>,
        owner: Option<Arc<dyn BackendModule>>,
        memory: Arc<dyn PhysMemory>,
        fetcher: Arc<dyn FirmwareFetcher>,
        event_tx: broadcast::Sender<RprocEvent>,
    ) -> Self {
        Self {
            name: config.name,
            firmware: config.firmware,
            maps: config.maps,
            ops,
            owner,
            memory,
            fetcher,
            event_tx,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, event: RprocEvent) {
        // Send returns Err if no receivers, which is fine
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, inner: &mut Inner, state: RprocState) {
        inner.state = state;
        self.emit(RprocEvent::StateChanged {
            name: self.name.clone(),
            state,
            timestamp: Utc::now(),
        });
    }

    /// Acquire contract: refcount++, and on the first user kick off the
    /// asynchronous firmware load
    async fn acquire(self: &Arc<Self>) -> Result<RprocHandle> {
        let mut inner = self.inner.lock().await;
        if inner.detached {
            return Err(Error::NotFound {
                name: self.name.clone(),
            });
        }

        if inner.refcount > 0 {
            inner.refcount += 1;
            debug!(
                "Sharing already-booted '{}', refcount now {}",
                self.name, inner.refcount
            );
            return Ok(RprocHandle {
                proc: Some(Arc::clone(self)),
            });
        }

        let firmware = self
            .firmware
            .clone()
            .ok_or_else(|| Error::MissingFirmware {
                name: self.name.clone(),
            })?;
        if let Some(owner) = &self.owner {
            if !owner.try_pin() {
                return Err(Error::Busy {
                    reason: format!("backend module for '{}' is unloading", self.name),
                });
            }
        }

        inner.refcount = 1;
        inner.last_error = None;
        let (done_tx, done_rx) = watch::channel(false);
        inner.load_done = Some(done_rx);
        self.set_state(&mut inner, RprocState::Loading);
        info!("First user of '{}', loading firmware '{}'", self.name, firmware);

        let proc = Arc::clone(self);
        tokio::spawn(async move { proc.run_load(firmware, done_tx).await });

        Ok(RprocHandle {
            proc: Some(Arc::clone(self)),
        })
    }

    /// Load-pipeline driver; runs on its own task, signals completion on
    /// every path
    #[tracing::instrument(skip_all, fields(name = %self.name))]
    async fn run_load(self: Arc<Self>, firmware: String, done_tx: watch::Sender<bool>) {
        if let Err(e) = self.load_and_start(&firmware).await {
            error!("Firmware load for '{}' failed: {e}", self.name);
            let mut inner = self.inner.lock().await;
            inner.traces.clear();
            inner.refcount = 0;
            inner.last_error = Some(e.to_string());
            self.set_state(&mut inner, RprocState::Offline);
            drop(inner);
            if let Some(owner) = &self.owner {
                owner.unpin();
            }
            self.emit(RprocEvent::LoadFailed {
                name: self.name.clone(),
                error: e.to_string(),
                timestamp: Utc::now(),
            });
        }
        let _ = done_tx.send(true);
    }

    async fn load_and_start(&self, firmware: &str) -> Result<()> {
        let bytes = self
            .fetcher
            .fetch(firmware)
            .await
            .map_err(|source| Error::FetchFailed { source })?;
        let image = FirmwareImage::parse(&bytes)?;
        debug!(
            "Parsed firmware '{}': version {}, {} bytes, header '{}'",
            firmware,
            image.version(),
            bytes.len(),
            image.header_text()
        );

        let mut inner = self.inner.lock().await;
        let boot_addr = {
            let mut ctx = LoadContext {
                maps: self.maps.as_ref(),
                memory: self.memory.as_ref(),
                traces: &mut inner.traces,
                boot_addr: None,
            };
            load_sections(image.sections(), &mut ctx)?
        };

        info!("Firmware for '{}' loaded, starting core at {boot_addr:#x}", self.name);
        self.ops
            .start(boot_addr)
            .await
            .map_err(|source| Error::Backend { op: "start", source })?;
        self.set_state(&mut inner, RprocState::Running);
        Ok(())
    }

    /// Release contract: wait out any in-flight load, refcount--, and on
    /// the last user stop the core and tear down host resources
    async fn release(&self) -> Result<()> {
        let done = {
            let inner = self.inner.lock().await;
            if inner.refcount == 0 {
                return Err(Error::AsymmetricRelease);
            }
            inner.load_done.clone()
        };
        if let Some(mut done) = done {
            done.wait_for(|v| *v)
                .await
                .map_err(|_| Error::Interrupted)?;
        }

        let mut inner = self.inner.lock().await;
        if inner.refcount == 0 {
            // the load we waited for failed and rewound the count
            return Err(Error::AsymmetricRelease);
        }
        inner.refcount -= 1;
        if inner.refcount > 0 {
            debug!(
                "Released shared handle on '{}', refcount now {}",
                self.name, inner.refcount
            );
            return Ok(());
        }

        inner.traces.clear();
        inner.load_done = None;
        if inner.state == RprocState::Running {
            if let Err(e) = self.ops.stop().await {
                warn!("Backend stop for '{}' failed, forcing offline: {e}", self.name);
            }
        }
        self.set_state(&mut inner, RprocState::Offline);
        drop(inner);
        if let Some(owner) = &self.owner {
            owner.unpin();
        }
        info!("Last user of '{}' released, processor offline", self.name);
        Ok(())
    }

    async fn report_crash(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != RprocState::Running {
            return Err(Error::Busy {
                reason: format!("'{}' is {}, not running", self.name, inner.state),
            });
        }
        error!("Remote processor '{}' crashed", self.name);
        self.set_state(&mut inner, RprocState::Crashed);
        Ok(())
    }

    async fn status(&self) -> RprocStatus {
        let inner = self.inner.lock().await;
        RprocStatus {
            name: self.name.clone(),
            state: inner.state,
            refcount: inner.refcount,
            firmware: self.firmware.clone(),
            traces: inner
                .traces
                .iter()
                .map(|t| TraceInfo {
                    name: t.name().to_string(),
                    len: t.len(),
                })
                .collect(),
            error: inner.last_error.clone(),
        }
    }

    async fn read_trace(&self, index: usize) -> Result<String> {
        let inner = self.inner.lock().await;
        let binding = inner.traces.get(index).ok_or_else(|| Error::NotFound {
            name: format!("{}/trace{index}", self.name),
        })?;
        binding
            .read_text()
            .map_err(|source| Error::MappingFailed {
                pa: binding.pa(),
                source,
            })
    }
}

/// Reference-counted capability for one live acquisition of a processor
///
/// Obtained from [`Registry::get`]; must be released with [`Self::put`].
/// Dropping a handle without `put` leaks the reference (and logs a warning)
/// because teardown needs to await the backend.
pub struct RprocHandle {
    proc: Option<Arc<Rproc>>,
}

impl RprocHandle {
    fn proc(&self) -> &Arc<Rproc> {
        self.proc.as_ref().expect("handle already released")
    }

    pub fn name(&self) -> &str {
        self.proc().name()
    }

    /// Status snapshot of the underlying processor
    pub async fn status(&self) -> RprocStatus {
        self.proc().status().await
    }

    pub async fn read_trace(&self, index: usize) -> Result<String> {
        self.proc().read_trace(index).await
    }

    /// Release this acquisition
    ///
    /// Waits for any in-flight firmware load to settle first. The last
    /// release stops the core and takes it offline.
    pub async fn put(mut self) -> Result<()> {
        let proc = self.proc.take().expect("handle already released");
        proc.release().await
    }
}

impl std::fmt::Debug for RprocHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RprocHandle")
            .field("name", &self.proc.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl Drop for RprocHandle {
    fn drop(&mut self) {
        if let Some(proc) = &self.proc {
            warn!(
                "Handle for '{}' dropped without put(), reference leaked",
                proc.name()
            );
        }
    }
}
