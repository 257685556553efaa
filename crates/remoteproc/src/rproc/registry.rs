//! Process-wide registry of remote processors
//!
//! A flat list under one lock; the expected population is a handful of
//! cores, so lookups are linear. The registry lock is always released
//! before a record's own lock is taken.

use super::types::{RprocConfig, RprocEvent, RprocStatus, MAX_NAME_LEN};
use super::{Rproc, RprocHandle};
use crate::backend::{BackendModule, RprocOps};
use crate::error::{Error, Result};
use crate::fetch::FirmwareFetcher;
use crate::memory::PhysMemory;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::info;

const MAX_EVENT_SUBSCRIBERS: usize = 100;

/// Registry of remote processors and entry point to the framework
///
/// Cheap to clone; clones share the same underlying set.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

struct Shared {
    procs: Mutex<Vec<Arc<Rproc>>>,
    memory: Arc<dyn PhysMemory>,
    fetcher: Arc<dyn FirmwareFetcher>,
    event_tx: broadcast::Sender<RprocEvent>,
}

impl Registry {
    pub fn new(fetcher: Arc<dyn FirmwareFetcher>, memory: Arc<dyn PhysMemory>) -> Self {
        let (event_tx, _) = broadcast::channel(MAX_EVENT_SUBSCRIBERS);
        Self {
            shared: Arc::new(Shared {
                procs: Mutex::new(Vec::new()),
                memory,
                fetcher,
                event_tx,
            }),
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<RprocEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Register a remote processor under a unique name
    ///
    /// The record starts OFFLINE with no users. `owner`, when given, is
    /// pinned while the processor is in use so the providing module cannot
    /// unload underneath it.
    #[tracing::instrument(skip_all, fields(name = %config.name))]
    pub async fn register(
        &self,
        config: RprocConfig,
        ops: Arc<dyn RprocOps>,
        owner: Option<Arc<dyn BackendModule>>,
    ) -> Result<()> {
        validate_name(&config.name)?;
        let name = config.name.clone();

        let mut procs = self.shared.procs.lock().await;
        if procs.iter().any(|p| p.name() == name) {
            return Err(Error::Exists { name });
        }
        procs.push(Arc::new(Rproc::new(
            config,
            ops,
            owner,
            Arc::clone(&self.shared.memory),
            Arc::clone(&self.shared.fetcher),
            self.shared.event_tx.clone(),
        )));
        drop(procs);

        info!("Registered remote processor '{name}'");
        let _ = self.shared.event_tx.send(RprocEvent::Registered {
            name,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Withdraw a registration
    ///
    /// Fails with `Busy` while anyone holds the processor, including an
    /// acquisition whose load is still in flight.
    #[tracing::instrument(skip(self))]
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let proc = self.lookup(name).await?;
        {
            let mut inner = proc.inner.lock().await;
            if inner.refcount > 0 {
                return Err(Error::Busy {
                    reason: format!("'{name}' has {} active users", inner.refcount),
                });
            }
            inner.detached = true;
        }

        let mut procs = self.shared.procs.lock().await;
        procs.retain(|p| p.name() != name);
        drop(procs);

        info!("Unregistered remote processor '{name}'");
        let _ = self.shared.event_tx.send(RprocEvent::Unregistered {
            name: name.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Acquire a handle, booting the processor if this is the first user
    ///
    /// Returns without waiting for the firmware: the load runs on its own
    /// task, and callers observe the outcome through the status snapshot or
    /// the event stream.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, name: &str) -> Result<RprocHandle> {
        let proc = self.lookup(name).await?;
        proc.acquire().await
    }

    /// Release a handle; counterpart of [`Self::get`]
    pub async fn put(&self, handle: RprocHandle) -> Result<()> {
        handle.put().await
    }

    /// Status snapshot of one processor
    pub async fn status(&self, name: &str) -> Result<RprocStatus> {
        Ok(self.lookup(name).await?.status().await)
    }

    /// Status snapshots of every registered processor
    pub async fn statuses(&self) -> Vec<RprocStatus> {
        let procs: Vec<_> = self.shared.procs.lock().await.clone();
        let mut out = Vec::with_capacity(procs.len());
        for proc in procs {
            out.push(proc.status().await);
        }
        out
    }

    /// Read a trace buffer as NUL-terminated text
    pub async fn read_trace(&self, name: &str, index: usize) -> Result<String> {
        self.lookup(name).await?.read_trace(index).await
    }

    /// Report that a running processor has crashed
    ///
    /// Called by the backend or an external monitor. The record moves to
    /// CRASHED; users release it as usual.
    pub async fn report_crash(&self, name: &str) -> Result<()> {
        self.lookup(name).await?.report_crash().await
    }

    async fn lookup(&self, name: &str) -> Result<Arc<Rproc>> {
        self.shared
            .procs
            .lock()
            .await
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }
}

fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| !c.is_control());
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidName {
            name: name.to_string(),
        })
    }
}
