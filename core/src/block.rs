//! # Rollup Block Records
//!
//! Typed form of the records the store persists. Rollup-defined fields the
//! protocol does not interpret ride along in `extra`; the protocol fields
//! are explicit so malformed records are rejected at the store boundary
//! instead of failing deep inside the challenge pipeline.

use crate::errors::VigilError;
use crate::hashes::short_content_id;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content-derived identity of a block: the first 16 hex chars of the
/// SHA256 of its canonical JSON encoding. Assigned at creation, never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One output tracked by a rollup block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockOutput {
    pub address: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A rollup block record.
///
/// `step_chain` holds the committed hash chain hex-encoded in committal
/// order (seed first). The two proof flags are the only fields ever
/// mutated after creation, and only by the watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupBlock {
    #[serde(default)]
    pub step_chain: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<BlockOutput>,
    #[serde(default)]
    pub challenged: bool,
    #[serde(default)]
    pub proof_generated: bool,
    #[serde(default)]
    pub proof_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipfs_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipfs_hashes: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RollupBlock {
    /// Canonical encoding the content id is derived from: compact JSON.
    pub fn canonical_json(&self) -> Result<Vec<u8>, VigilError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn content_id(&self) -> Result<BlockId, VigilError> {
        Ok(BlockId::new(short_content_id(&self.canonical_json()?)))
    }

    /// External content-store handles attached to this block, preferring
    /// the plural field when it is non-empty.
    pub fn pin_handles(&self) -> Vec<String> {
        let mut handles = match &self.ipfs_hashes {
            Some(hashes) if !hashes.is_empty() => hashes.clone(),
            _ => self.ipfs_hash.iter().cloned().collect(),
        };
        handles.retain(|h| !h.is_empty());
        handles
    }

    /// Boundary validation run on every `put`/`get`.
    pub fn validate(&self) -> Result<(), VigilError> {
        for (i, step) in self.step_chain.iter().enumerate() {
            if hex::decode(step).is_err() {
                return Err(VigilError::MalformedBlock(format!(
                    "step_chain[{}] is not hex-encoded",
                    i
                )));
            }
        }
        for (i, output) in self.outputs.iter().enumerate() {
            if output.address.is_empty() {
                return Err(VigilError::MalformedBlock(format!(
                    "outputs[{}] has an empty address",
                    i
                )));
            }
        }
        Ok(())
    }
}
