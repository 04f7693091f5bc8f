//! Common test utilities for `PeerLink` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use peerlink_core::catalog::{CatalogEntry, MemoryCatalog};
use peerlink_core::config::ServerConfig;
use peerlink_core::hash::sha256_hex;
use peerlink_core::server::PeerListener;
use peerlink_core::PeerAddress;

/// Connect timeout used by tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// A listener on an ephemeral loopback port, serving `shared`.
pub struct TestPeer {
    pub listener: PeerListener,
    pub catalog: Arc<MemoryCatalog>,
    pub shared: PathBuf,
    pub root: tempfile::TempDir,
}

impl TestPeer {
    /// Start a listener with an empty shared folder and catalog.
    pub async fn start() -> Self {
        Self::start_with_workers(4).await
    }

    /// Start a listener with a specific worker pool size.
    pub async fn start_with_workers(worker_pool_size: usize) -> Self {
        let root = create_temp_dir();
        let shared = root.path().join("shared_files");
        let catalog = Arc::new(MemoryCatalog::new());

        let config = ServerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_port: 0,
            shared_dir: shared.clone(),
            worker_pool_size,
            shutdown_grace: Duration::from_secs(1),
            idle_timeout: None,
        };

        let listener = PeerListener::start(config, catalog.clone())
            .await
            .expect("start listener");

        Self {
            listener,
            catalog,
            shared,
            root,
        }
    }

    /// Address clients use to reach this peer.
    pub fn address(&self) -> PeerAddress {
        PeerAddress::new("127.0.0.1", self.listener.port())
    }

    /// Write a file into the shared folder and catalog it. Returns its entry.
    pub fn share(&self, name: &str, content: &[u8]) -> CatalogEntry {
        let path = create_test_file(&self.shared, name, content);
        let entry = CatalogEntry::new(name, path, content.len() as u64, sha256_hex(content));
        self.catalog.insert(entry.clone()).expect("catalog insert");
        entry
    }

    /// A fresh directory for downloads.
    pub fn download_dir(&self) -> PathBuf {
        let dir = self.root.path().join("downloads");
        std::fs::create_dir_all(&dir).expect("create download dir");
        dir
    }
}
