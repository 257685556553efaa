//! Firmware blob retrieval
//!
//! The lifecycle manager fetches firmware asynchronously, off the acquiring
//! task. [`FsFetcher`] resolves image names under a root directory; other
//! transports (network, flash partitions) implement [`FirmwareFetcher`].

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Source of firmware images, keyed by the name a processor was registered with
#[async_trait]
pub trait FirmwareFetcher: Send + Sync {
    async fn fetch(&self, name: &str) -> io::Result<Vec<u8>>;
}

/// Fetcher reading firmware images from a directory tree
#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FirmwareFetcher for FsFetcher {
    async fn fetch(&self, name: &str) -> io::Result<Vec<u8>> {
        let relative = Path::new(name);
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir));
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("firmware name '{name}' escapes the firmware root"),
            ));
        }
        tokio::fs::read(self.root.join(relative)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("core0.bin"), b"RPRC").unwrap();

        let fetcher = FsFetcher::new(dir.path());
        assert_eq!(fetcher.fetch("core0.bin").await.unwrap(), b"RPRC");
    }

    #[tokio::test]
    async fn test_fetch_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FsFetcher::new(dir.path());

        let err = fetcher.fetch("nope.bin").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_fetch_rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FsFetcher::new(dir.path());

        for name in ["../secret.bin", "/etc/passwd", "sub/../../x"] {
            let err = fetcher.fetch(name).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{name}");
        }
    }

    #[tokio::test]
    async fn test_fetch_allows_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("dsp")).unwrap();
        std::fs::write(dir.path().join("dsp/fw.bin"), b"x").unwrap();

        let fetcher = FsFetcher::new(dir.path());
        assert_eq!(fetcher.fetch("dsp/fw.bin").await.unwrap(), b"x");
    }
}
