//! # Content Store Collaborator
//!
//! Contract for the external content-addressed storage daemon and its
//! cluster pinning service. The daemon plumbing itself lives outside this
//! crate; the store only relies on these three calls.

use crate::errors::VigilError;
use async_trait::async_trait;

/// External content-addressed storage.
///
/// Implementations are expected to block on their own I/O; callers never
/// hold a lock across these calls and treat every failure as recoverable.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Retrieves the content behind a handle. Callers re-verify the
    /// content hash themselves; a mismatch is logged, not fatal.
    async fn fetch(&self, handle: &str) -> Result<Vec<u8>, VigilError>;

    /// Adds content and returns its handle.
    async fn add(&self, content: &[u8]) -> Result<String, VigilError>;

    /// Requests a cluster pin for a handle. Returns whether the request
    /// was accepted. Best-effort: rejections surface as `PinFailed` and
    /// never block local persistence.
    async fn pin(&self, handle: &str) -> Result<bool, VigilError>;
}
