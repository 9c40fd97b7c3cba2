//! Append-only receipt persistence.
//!
//! Receipts live in a single JSON array file, `<dir>/receipts.json`. Each
//! append reads the file, pushes the receipt and rewrites the file. A missing,
//! blank or corrupt file reads as an empty list.
//!
//! Persistence is bookkeeping: failures are logged and swallowed so they never
//! abort a negotiation. Appends through one store are serialized; two
//! processes pointed at the same file can still lose an update.

use crate::{Receipt, Result, SlashpayError};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// File name of the receipt list inside the store directory.
pub const RECEIPTS_FILE: &str = "receipts.json";

/// JSON-file receipt store.
#[derive(Debug)]
pub struct ReceiptStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ReceiptStore {
    /// Store receipts under `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(RECEIPTS_FILE),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a receipt. Errors are logged, never returned.
    pub async fn append(&self, receipt: &Receipt) {
        if let Err(e) = self.try_append(receipt).await {
            warn!("Failed to save receipt {}: {}", receipt.order_id, e);
        }
    }

    /// Append a receipt, reporting failures as [`SlashpayError::Storage`].
    pub async fn try_append(&self, receipt: &Receipt) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut receipts = self.read_all().await;
        receipts.push(receipt.clone());

        let json = serde_json::to_string_pretty(&receipts)
            .map_err(|e| SlashpayError::Storage(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SlashpayError::Storage(e.to_string()))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| SlashpayError::Storage(e.to_string()))?;

        debug!("Saved receipt {} ({} total)", receipt.order_id, receipts.len());
        Ok(())
    }

    /// All stored receipts, oldest first. Read problems yield an empty list.
    pub async fn list(&self) -> Vec<Receipt> {
        self.read_all().await
    }

    async fn read_all(&self) -> Vec<Receipt> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        if contents.trim().is_empty() {
            return Vec::new();
        }
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!("Ignoring corrupt receipt file {}: {}", self.path.display(), e);
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_to_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path());

        let receipt = Receipt::settled("inv1", 500, "coffee");
        store.append(&receipt).await;

        assert_eq!(store.list().await, vec![receipt]);
    }

    #[tokio::test]
    async fn test_whitespace_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RECEIPTS_FILE), "  \n\t").unwrap();
        let store = ReceiptStore::new(dir.path());

        store.append(&Receipt::settled("inv1", 1, "")).await;
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RECEIPTS_FILE), "{not json").unwrap();
        let store = ReceiptStore::new(dir.path());
        assert!(store.list().await.is_empty());

        let receipt = Receipt::settled("inv1", 7, "tea");
        store.append(&receipt).await;
        assert_eq!(store.list().await, vec![receipt]);
    }

    #[tokio::test]
    async fn test_appends_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path());

        let first = Receipt::settled("a", 1, "");
        let second = Receipt::settled("b", 2, "");
        store.append(&first).await;
        store.append(&second).await;

        let stored = store.list().await;
        assert_eq!(stored, vec![first, second]);
    }

    #[tokio::test]
    async fn test_failed_write_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes every write fail.
        std::fs::create_dir(dir.path().join(RECEIPTS_FILE)).unwrap();
        let store = ReceiptStore::new(dir.path());

        let receipt = Receipt::settled("a", 1, "");
        store.append(&receipt).await;
        assert!(matches!(
            store.try_append(&receipt).await,
            Err(SlashpayError::Storage(_))
        ));
    }
}
