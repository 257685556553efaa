//! Types for remote processor configuration, status, and events

use crate::addrmap::AddressMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest accepted processor name, in bytes
pub const MAX_NAME_LEN: usize = 100;

/// Remote processor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RprocState {
    /// Powered down, no users
    #[default]
    Offline,
    /// Suspended (reserved; never entered in this revision)
    Suspended,
    /// Powered and executing firmware
    Running,
    /// Firmware fetch and load in flight
    Loading,
    /// Reported crashed; waiting for the last user to release
    Crashed,
}

impl RprocState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RprocState::Offline => "offline",
            RprocState::Suspended => "suspended",
            RprocState::Running => "running",
            RprocState::Loading => "loading",
            RprocState::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for RprocState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration-time configuration for one remote processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RprocConfig {
    /// Unique printable name, at most [`MAX_NAME_LEN`] bytes
    pub name: String,

    /// Firmware image identifier resolved by the fetcher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,

    /// Device-to-host address map; identity translation when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maps: Option<AddressMap>,
}

impl RprocConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            firmware: None,
            maps: None,
        }
    }

    pub fn firmware(mut self, firmware: impl Into<String>) -> Self {
        self.firmware = Some(firmware.into());
        self
    }

    pub fn maps(mut self, maps: AddressMap) -> Self {
        self.maps = Some(maps);
        self
    }
}

/// Attached trace buffer metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceInfo {
    pub name: String,
    pub len: usize,
}

/// Read-only status snapshot of one remote processor
#[derive(Debug, Clone, Serialize)]
pub struct RprocStatus {
    pub name: String,
    pub state: RprocState,
    pub refcount: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    pub traces: Vec<TraceInfo>,
    /// Message of the most recent failed load, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Event broadcast to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RprocEvent {
    Registered {
        name: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    Unregistered {
        name: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        name: String,
        state: RprocState,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    LoadFailed {
        name: String,
        error: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
}
