//! # Rollup Block Store
//!
//! Content-addressed persistence for rollup block records plus the
//! append-only pin history and every derived challenge artifact.
//!
//! All writes go through write-then-rename, so concurrent readers may see
//! a stale listing but never a torn record. Multi-process writing is NOT
//! serialized here: the store assumes a single writer per root directory.

use crate::block::{BlockId, RollupBlock};
use crate::errors::VigilError;
use crate::ipfs::ContentStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

pub const PROOF_SUFFIX: &str = "_proof.json";
pub const TREE_SUFFIX: &str = "_tree.json";
pub const CHALLENGE_PSBT_SUFFIX: &str = "_challenge.psbt";
pub const SIGNED_PSBT_SUFFIX: &str = "_signed.psbt";
pub const FINAL_TX_SUFFIX: &str = "_final.tx";
pub const LOG_SUFFIX: &str = "_log.json";

const HISTORY_FILE: &str = "ipfs_commit_history.json";

/// One entry of the append-only pin history, recorded whenever the
/// external content store accepts a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitLogEntry {
    pub ipfs_hash: String,
    pub timestamp: f64,
}

/// The content-addressed block store.
pub struct Database {
    root: PathBuf,
    content_store: Option<Arc<dyn ContentStore>>,
}

impl Database {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, VigilError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            content_store: None,
        })
    }

    /// Attaches the external pinning collaborator. Without one, `put` is
    /// local-only.
    pub fn with_content_store(mut self, content_store: Arc<dyn ContentStore>) -> Self {
        self.content_store = Some(content_store);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, id: &BlockId) -> PathBuf {
        self.root.join(format!("rollup_block_{}.json", id))
    }

    fn artifact_path(&self, id: &BlockId, suffix: &str) -> PathBuf {
        self.root.join(format!("rollup_block_{}{}", id, suffix))
    }

    fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<(), VigilError> {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Persists a block, deriving its content id unless one is supplied.
    ///
    /// Idempotent: identical content yields the same id and overwrites in
    /// place. When a content store is attached the encoded block is also
    /// added and pinned there, best-effort: local persistence always
    /// happens first and a pin failure is only logged.
    pub async fn put(
        &self,
        block: &RollupBlock,
        id: Option<BlockId>,
    ) -> Result<BlockId, VigilError> {
        block.validate()?;

        let id = match id {
            Some(id) => id,
            None => block.content_id()?,
        };
        let pretty = serde_json::to_vec_pretty(block)?;
        self.atomic_write(&self.block_path(&id), &pretty)?;
        tracing::debug!(block = %id, "stored rollup block");

        if let Some(content_store) = &self.content_store {
            if let Err(e) = self.pin_and_record(content_store.as_ref(), block).await {
                tracing::warn!(block = %id, error = %e, "external pin failed; block is persisted locally");
            }
        }

        Ok(id)
    }

    async fn pin_and_record(
        &self,
        content_store: &dyn ContentStore,
        block: &RollupBlock,
    ) -> Result<(), VigilError> {
        let handle = content_store.add(&block.canonical_json()?).await?;
        let accepted = content_store.pin(&handle).await?;
        if !accepted {
            return Err(VigilError::PinFailed(format!(
                "cluster did not accept pin for {}",
                handle
            )));
        }
        tracing::info!(handle = %handle, "content pinned externally");
        self.append_history(&handle)
    }

    pub fn get(&self, id: &BlockId) -> Result<RollupBlock, VigilError> {
        let bytes = match std::fs::read(self.block_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VigilError::BlockNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let block: RollupBlock = serde_json::from_slice(&bytes)
            .map_err(|e| VigilError::MalformedBlock(e.to_string()))?;
        block.validate()?;

        Ok(block)
    }

    /// Lexicographically sorted block ids. Safe to call while a write is
    /// in progress; in-flight temp files and artifact files are skipped.
    pub fn list(&self) -> Result<Vec<BlockId>, VigilError> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = name
                .strip_prefix("rollup_block_")
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            // Derived artifacts share the prefix; a bare block id is 16
            // hex chars.
            if id.len() == 16 && id.chars().all(|c| c.is_ascii_hexdigit()) {
                ids.push(BlockId::new(id));
            }
        }
        ids.sort();

        Ok(ids)
    }

    /// Fetches a block from the content-store collaborator and persists it
    /// under its recomputed content id. A hash mismatch against the
    /// requested handle is logged and the content kept anyway.
    pub async fn import_remote(&self, handle: &str) -> Result<(BlockId, RollupBlock), VigilError> {
        let content_store = self.content_store.as_ref().ok_or_else(|| {
            VigilError::ConfigError("no content store collaborator attached".to_string())
        })?;

        let bytes = content_store.fetch(handle).await?;
        let block: RollupBlock = serde_json::from_slice(&bytes)
            .map_err(|e| VigilError::MalformedBlock(e.to_string()))?;

        let actual = block.content_id()?;
        let expected = handle.get(..16).unwrap_or(handle);
        if expected != actual.as_str() {
            let mismatch = VigilError::CommitmentMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            };
            tracing::warn!(handle = %handle, error = %mismatch, "keeping fetched content despite hash mismatch");
        } else {
            tracing::info!(handle = %handle, "fetched content matches its handle");
        }

        let id = self.put(&block, Some(actual)).await?;
        Ok((id, block))
    }

    pub fn write_artifact<T: Serialize>(
        &self,
        id: &BlockId,
        suffix: &str,
        value: &T,
    ) -> Result<(), VigilError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.atomic_write(&self.artifact_path(id, suffix), &bytes)
    }

    pub fn read_artifact<T: DeserializeOwned>(
        &self,
        id: &BlockId,
        suffix: &str,
    ) -> Result<T, VigilError> {
        let bytes = std::fs::read(self.artifact_path(id, suffix))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Raw transaction hex, the only non-JSON artifact.
    pub fn write_final_tx(&self, id: &BlockId, tx_hex: &str) -> Result<(), VigilError> {
        self.atomic_write(&self.artifact_path(id, FINAL_TX_SUFFIX), tx_hex.as_bytes())
    }

    /// Artifact not addressed by a block id (punishment records etc.).
    pub fn write_named_artifact<T: Serialize>(
        &self,
        file_name: &str,
        value: &T,
    ) -> Result<(), VigilError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.atomic_write(&self.root.join(file_name), &bytes)
    }

    pub fn artifact_exists(&self, id: &BlockId, suffix: &str) -> bool {
        self.artifact_path(id, suffix).exists()
    }

    fn append_history(&self, handle: &str) -> Result<(), VigilError> {
        let mut history = self.load_history()?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        history.push(CommitLogEntry {
            ipfs_hash: handle.to_string(),
            timestamp,
        });
        let bytes = serde_json::to_vec_pretty(&history)?;
        self.atomic_write(&self.root.join(HISTORY_FILE), &bytes)
    }

    /// The append-only pin history, in insertion order.
    pub fn load_history(&self) -> Result<Vec<CommitLogEntry>, VigilError> {
        let path = self.root.join(HISTORY_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::HashChain;
    use crate::ipfs::testing::MemoryContentStore;
    use tempfile::TempDir;

    fn sample_block() -> RollupBlock {
        RollupBlock {
            step_chain: HashChain::build(b"rollup_state", 2).to_hex_steps(),
            outputs: vec![],
            challenged: true,
            proof_generated: false,
            proof_verified: false,
            ipfs_hash: None,
            ipfs_hashes: None,
            extra: serde_json::Map::new(),
        }
    }

    fn test_db(dir: &TempDir) -> Database {
        Database::new(dir.path()).expect("store root creatable")
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);

        let block = sample_block();
        let id = db.put(&block, None).await.expect("stores");
        assert_eq!(db.get(&id).expect("readable"), block);
    }

    #[tokio::test]
    async fn put_is_idempotent_on_identical_content() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);

        let block = sample_block();
        let first = db.put(&block, None).await.expect("stores");
        let second = db.put(&block, None).await.expect("stores");
        assert_eq!(first, second);
        assert_eq!(db.list().expect("listable"), vec![first]);
    }

    #[tokio::test]
    async fn list_is_sorted_and_skips_artifacts() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);

        let mut block = sample_block();
        let a = db.put(&block, None).await.expect("stores");
        block.proof_generated = true;
        let b = db.put(&block, None).await.expect("stores");

        db.write_artifact(&a, PROOF_SUFFIX, &serde_json::json!({"verified": true}))
            .expect("artifact writes");

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(db.list().expect("listable"), expected);
    }

    #[tokio::test]
    async fn missing_block_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);
        assert!(matches!(
            db.get(&BlockId::new("0000000000000000")),
            Err(VigilError::BlockNotFound(_))
        ));
    }

    #[tokio::test]
    async fn pinning_records_history() {
        let dir = TempDir::new().expect("tempdir");
        let content_store = Arc::new(MemoryContentStore::default());
        let db = test_db(&dir).with_content_store(content_store.clone());

        db.put(&sample_block(), None).await.expect("stores");

        let history = db.load_history().expect("history readable");
        assert_eq!(history.len(), 1);
        assert_eq!(
            content_store.pins.lock().expect("lock").as_slice(),
            &[history[0].ipfs_hash.clone()]
        );
    }

    #[tokio::test]
    async fn pin_failure_never_blocks_local_persistence() {
        let dir = TempDir::new().expect("tempdir");
        let content_store = Arc::new(MemoryContentStore {
            reject_pins: true,
            ..Default::default()
        });
        let db = test_db(&dir).with_content_store(content_store);

        let id = db.put(&sample_block(), None).await.expect("stores locally");
        assert!(db.get(&id).is_ok());
        assert!(db.load_history().expect("history readable").is_empty());
    }

    #[tokio::test]
    async fn import_remote_keeps_mismatched_content() {
        let dir = TempDir::new().expect("tempdir");
        let content_store = Arc::new(MemoryContentStore::default());
        let db = test_db(&dir).with_content_store(content_store.clone());

        // Hand-planted handle that cannot match the canonical encoding.
        let block = sample_block();
        let pretty = serde_json::to_vec_pretty(&block).expect("encodable");
        content_store
            .objects
            .lock()
            .expect("lock")
            .insert("bogus-handle".to_string(), pretty);

        let (id, imported) = db.import_remote("bogus-handle").await.expect("imports");
        assert_eq!(imported, block);
        assert_eq!(id, block.content_id().expect("encodable"));
        assert!(db.get(&id).is_ok());
    }

    #[tokio::test]
    async fn malformed_records_are_rejected_at_the_boundary() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);

        let mut block = sample_block();
        block.step_chain[0] = "not hex".to_string();
        assert!(matches!(
            db.put(&block, None).await,
            Err(VigilError::MalformedBlock(_))
        ));
    }
}
