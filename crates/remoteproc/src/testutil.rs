//! Shared test doubles
//!
//! Firmware image builder, RAM standing in for host physical memory, a
//! backend that records calls, a fetcher with a controllable gate, and a
//! module owner that counts pins.

use crate::backend::{BackendModule, RprocOps};
use crate::fetch::FirmwareFetcher;
use crate::firmware::image::{SectionHeader, SectionKind, MAGIC};
use crate::firmware::RESOURCE_ENTRY_SIZE;
use crate::memory::{MappedRegion, PhysMemory};
use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Builds RPRC container images for tests
pub(crate) struct ImageBuilder {
    bytes: Vec<u8>,
}

impl ImageBuilder {
    pub fn new(version: u32, header: &[u8]) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, version);
        bytes.extend_from_slice(&word);
        LittleEndian::write_u32(&mut word, header.len() as u32);
        bytes.extend_from_slice(&word);
        bytes.extend_from_slice(header);
        Self { bytes }
    }

    pub fn section(mut self, kind: u32, da: u64, content: &[u8]) -> Self {
        let header = SectionHeader {
            kind: SectionKind::from_raw(kind),
            da,
            len: content.len() as u32,
        };
        self.bytes.extend_from_slice(&header.encode());
        self.bytes.extend_from_slice(content);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Encode one 80-byte resource entry
pub(crate) fn resource_entry(
    kind: u32,
    da: u64,
    pa: u64,
    len: u32,
    flags: u32,
    name: &str,
) -> [u8; RESOURCE_ENTRY_SIZE] {
    assert!(name.len() < 48, "resource name too long for the wire format");
    let mut out = [0u8; RESOURCE_ENTRY_SIZE];
    LittleEndian::write_u32(&mut out[0..4], kind);
    LittleEndian::write_u64(&mut out[8..16], da);
    LittleEndian::write_u64(&mut out[16..24], pa);
    LittleEndian::write_u32(&mut out[24..28], len);
    LittleEndian::write_u32(&mut out[28..32], flags);
    out[32..32 + name.len()].copy_from_slice(name.as_bytes());
    out
}

/// Flat RAM standing in for host physical memory
#[derive(Clone)]
pub(crate) struct TestRam {
    cells: Arc<Mutex<Vec<u8>>>,
    base: u64,
}

impl TestRam {
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            cells: Arc::new(Mutex::new(vec![0u8; size])),
            base,
        }
    }

    pub fn snapshot(&self, pa: u64, len: usize) -> Vec<u8> {
        let offset = (pa - self.base) as usize;
        self.cells.lock().unwrap()[offset..offset + len].to_vec()
    }

    pub fn poke(&self, pa: u64, data: &[u8]) {
        let offset = (pa - self.base) as usize;
        self.cells.lock().unwrap()[offset..offset + data.len()].copy_from_slice(data);
    }
}

impl PhysMemory for TestRam {
    fn map(&self, pa: u64, len: usize) -> io::Result<Box<dyn MappedRegion>> {
        let size = self.cells.lock().unwrap().len() as u64;
        let in_range = pa >= self.base && pa + len as u64 <= self.base + size;
        if !in_range {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no RAM at {pa:#x}+{len:#x}"),
            ));
        }
        Ok(Box::new(TestRegion {
            cells: Arc::clone(&self.cells),
            offset: (pa - self.base) as usize,
            len,
        }))
    }
}

struct TestRegion {
    cells: Arc<Mutex<Vec<u8>>>,
    offset: usize,
    len: usize,
}

impl MappedRegion for TestRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        if offset + buf.len() > self.len {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "out of bounds"));
        }
        let cells = self.cells.lock().unwrap();
        buf.copy_from_slice(&cells[self.offset + offset..self.offset + offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> io::Result<()> {
        if offset + data.len() > self.len {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "out of bounds"));
        }
        let mut cells = self.cells.lock().unwrap();
        cells[self.offset + offset..self.offset + offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Backend recording every start/stop call
#[derive(Default)]
pub(crate) struct RecordingBackend {
    pub starts: Mutex<Vec<u64>>,
    pub stops: AtomicUsize,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn start_addrs(&self) -> Vec<u64> {
        self.starts.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RprocOps for RecordingBackend {
    async fn start(&self, boot_addr: u64) -> anyhow::Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("injected start failure");
        }
        self.starts.lock().unwrap().push(boot_addr);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            anyhow::bail!("injected stop failure");
        }
        Ok(())
    }
}

/// Fetcher serving images from a map, optionally gated to hold a load open
#[derive(Default)]
pub(crate) struct MapFetcher {
    images: Mutex<HashMap<String, Vec<u8>>>,
    gate: Mutex<Option<watch::Receiver<bool>>>,
}

impl MapFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.images.lock().unwrap().insert(name.to_string(), bytes);
    }

    /// Block subsequent fetches until the returned sender publishes `true`
    pub fn gate(&self) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }
}

#[async_trait]
impl FirmwareFetcher for MapFetcher {
    async fn fetch(&self, name: &str) -> io::Result<Vec<u8>> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(mut rx) = gate {
            let _ = rx.wait_for(|open| *open).await;
        }
        self.images
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no firmware '{name}'")))
    }
}

/// Module owner counting pins, able to simulate an unload in progress
#[derive(Default)]
pub(crate) struct TestModule {
    pins: AtomicIsize,
    pub unloading: AtomicBool,
}

impl TestModule {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pin_count(&self) -> isize {
        self.pins.load(Ordering::SeqCst)
    }
}

impl BackendModule for TestModule {
    fn try_pin(&self) -> bool {
        if self.unloading.load(Ordering::SeqCst) {
            return false;
        }
        self.pins.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn unpin(&self) {
        self.pins.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
