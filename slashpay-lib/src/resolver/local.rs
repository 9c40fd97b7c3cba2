//! Directory-backed discovery for single-host deployments.
//!
//! Layout under the root directory:
//!
//! ```text
//! logs/<hex key>.json    JSON array of log entries
//! peers/<hex key>.addr   socket address a peer listens on
//! ```
//!
//! Opening a log snapshots the file; [`ReplicatedLog::update`] re-reads it.
//! Joining a topic settles immediately since every replica shares the disk.

use super::{DiscoveryNetwork, DiscoveryTopic, JoinMode, ReplicatedLog};
use crate::{PeerAddress, PublicKey, Result, SlashpayError};
use async_trait::async_trait;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Discovery through a shared directory.
#[derive(Clone, Debug)]
pub struct LocalDiscovery {
    root: PathBuf,
}

impl LocalDiscovery {
    /// Use `root` as the shared directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn log_path(&self, key: &PublicKey) -> PathBuf {
        self.root.join("logs").join(format!("{}.json", key.to_hex()))
    }

    fn peer_path(&self, peer: &PeerAddress) -> PathBuf {
        self.root
            .join("peers")
            .join(format!("{}.addr", peer.public_key().to_hex()))
    }

    /// Record the socket address `peer` accepts connections on.
    pub async fn announce_peer(&self, peer: &PeerAddress, addr: SocketAddr) -> Result<()> {
        let path = self.peer_path(peer);
        write_file(&path, addr.to_string()).await
    }

    /// Socket address announced for `peer`.
    pub async fn lookup_peer(&self, peer: &PeerAddress) -> Result<SocketAddr> {
        let path = self.peer_path(peer);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SlashpayError::Transport(format!("peer {} not reachable: {}", peer, e)))?;
        text.trim()
            .parse()
            .map_err(|_| SlashpayError::InvalidPeerAddress(text.trim().to_string()))
    }
}

#[async_trait]
impl DiscoveryNetwork for LocalDiscovery {
    async fn open_log(&self, key: &PublicKey) -> Result<Arc<dyn ReplicatedLog>> {
        let log = FileLog {
            path: self.log_path(key),
            entries: Mutex::new(Vec::new()),
        };
        log.update().await?;
        Ok(Arc::new(log))
    }

    async fn join(&self, topic: &DiscoveryTopic, mode: JoinMode) -> Result<()> {
        tokio::fs::create_dir_all(self.root.join("logs"))
            .await
            .map_err(|e| SlashpayError::Transport(e.to_string()))?;
        debug!(?mode, "Joined topic {}", topic.to_hex());
        Ok(())
    }
}

struct FileLog {
    path: PathBuf,
    entries: Mutex<Vec<Value>>,
}

#[async_trait]
impl ReplicatedLog for FileLog {
    async fn len(&self) -> Result<u64> {
        Ok(self.entries.lock().await.len() as u64)
    }

    async fn latest(&self) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.last().cloned())
    }

    async fn append(&self, entry: Value) -> Result<()> {
        let mut entries = self.entries.lock().await;
        *entries = read_entries(&self.path).await?;
        entries.push(entry);
        let json = serde_json::to_string_pretty(&*entries)?;
        write_file(&self.path, json).await
    }

    async fn update(&self) -> Result<()> {
        let fresh = read_entries(&self.path).await?;
        *self.entries.lock().await = fresh;
        Ok(())
    }
}

async fn read_entries(path: &Path) -> Result<Vec<Value>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(SlashpayError::Transport(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn write_file(path: &Path, contents: String) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SlashpayError::Transport(e.to_string()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| SlashpayError::Transport(format!("cannot write {}: {}", path.display(), e)))
}
