//! Database models mapping to the part cache schema.

use partcache_core::PartKey;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Secondary indexes on `upload_parts`, identical for both backends.
pub(crate) const UPLOAD_PART_INDEXES: &[(&str, &str)] = &[
    (
        "idx_upload_parts_hash_size",
        "CREATE INDEX IF NOT EXISTS idx_upload_parts_hash_size ON upload_parts(file_hash, file_size)",
    ),
    (
        "idx_upload_parts_cid",
        "CREATE INDEX IF NOT EXISTS idx_upload_parts_cid ON upload_parts(cid)",
    ),
    (
        "idx_upload_parts_expire_time",
        "CREATE INDEX IF NOT EXISTS idx_upload_parts_expire_time ON upload_parts(expire_time)",
    ),
];

/// A cached upload part.
///
/// Every field except `expire_time` is immutable after insert.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct UploadPartRow {
    pub id: i64,
    /// Creation time, unix seconds.
    pub created_at: i64,
    pub file_hash: String,
    pub file_size: i64,
    /// Chunk id assigned by the remote service.
    pub cid: i64,
    pub filename: String,
    /// Expiry, unix seconds. The row is reusable while `expire_time > now`.
    pub expire_time: i64,
}

impl UploadPartRow {
    pub fn key(&self) -> PartKey {
        PartKey::new(self.file_hash.clone(), self.file_size)
    }

    /// Whether the row may still be reused at `now`.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.expire_time > now
    }
}
