//! Upload part identity and validation.
//!
//! A part is identified by the caller-computed content fingerprint together
//! with its byte length. The hash alone is never used as a key, so a
//! truncated or colliding fingerprint cannot alias a part of another size.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dedup key of an uploaded part: `(content hash, content size)`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartKey {
    /// Content fingerprint supplied by the uploader.
    pub hash: String,
    /// Byte length of the part.
    pub size: i64,
}

impl PartKey {
    /// Create a new part key.
    pub fn new(hash: impl Into<String>, size: i64) -> Self {
        Self {
            hash: hash.into(),
            size,
        }
    }

    /// Check the key fields.
    pub fn validate(&self) -> Result<()> {
        validate_hash(&self.hash)?;
        validate_size(self.size)
    }
}

impl fmt::Debug for PartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartKey({}:{})", self.hash, self.size)
    }
}

impl fmt::Display for PartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.size)
    }
}

/// A part that was just uploaded and should be registered or refreshed.
///
/// The expiry is assigned by the cache, not the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartCandidate {
    pub hash: String,
    pub size: i64,
    /// Chunk id assigned by the remote service.
    pub cid: i64,
    /// Filename the remote service returned for this chunk.
    pub filename: String,
}

impl PartCandidate {
    pub fn new(hash: impl Into<String>, size: i64, cid: i64, filename: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            size,
            cid,
            filename: filename.into(),
        }
    }

    /// The dedup key of this candidate.
    pub fn key(&self) -> PartKey {
        PartKey::new(self.hash.clone(), self.size)
    }

    /// Check every field before the candidate reaches storage.
    pub fn validate(&self) -> Result<()> {
        validate_hash(&self.hash)?;
        validate_size(self.size)?;
        validate_filename(&self.filename)
    }

    /// Attach an absolute expiry, producing an insertable record.
    pub fn with_expiry(self, expire_time: i64) -> NewPart {
        NewPart {
            hash: self.hash,
            size: self.size,
            cid: self.cid,
            filename: self.filename,
            expire_time,
        }
    }
}

/// A fully specified record for direct insertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPart {
    pub hash: String,
    pub size: i64,
    pub cid: i64,
    pub filename: String,
    /// Absolute expiry, unix seconds.
    pub expire_time: i64,
}

impl NewPart {
    /// Check every field, including that the expiry lies after `now`.
    pub fn validate(&self, now: i64) -> Result<()> {
        validate_hash(&self.hash)?;
        validate_size(self.size)?;
        validate_filename(&self.filename)?;
        if self.expire_time <= now {
            return Err(Error::Validation(format!(
                "expire_time {} must be later than now ({})",
                self.expire_time, now
            )));
        }
        Ok(())
    }

    pub fn key(&self) -> PartKey {
        PartKey::new(self.hash.clone(), self.size)
    }
}

fn validate_hash(hash: &str) -> Result<()> {
    if hash.trim().is_empty() {
        return Err(Error::Validation("file hash must not be empty".to_string()));
    }
    Ok(())
}

fn validate_size(size: i64) -> Result<()> {
    if size < 0 {
        return Err(Error::Validation(format!(
            "file size must be non-negative, got {size}"
        )));
    }
    Ok(())
}

fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(Error::Validation("filename must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_validation_accepts_zero_size() {
        let candidate = PartCandidate::new("abc", 0, 1, "a.mp4");
        assert!(candidate.validate().is_ok());
    }

    #[test]
    fn test_candidate_validation_rejects_bad_fields() {
        assert!(matches!(
            PartCandidate::new("", 10, 1, "a.mp4").validate(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            PartCandidate::new("   ", 10, 1, "a.mp4").validate(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            PartCandidate::new("abc", -1, 1, "a.mp4").validate(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            PartCandidate::new("abc", 10, 1, "").validate(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_new_part_requires_future_expiry() {
        let part = PartCandidate::new("abc", 100, 1, "a.mp4").with_expiry(1_000);
        assert!(part.validate(999).is_ok());

        let err = part.validate(1_000).unwrap_err();
        assert!(err.to_string().contains("must be later than now"));
        assert!(part.validate(1_001).is_err());
    }

    #[test]
    fn test_part_key_display() {
        let key = PartCandidate::new("abc", 100, 7, "a.mp4").key();
        assert_eq!(key, PartKey::new("abc", 100));
        assert_eq!(key.to_string(), "abc:100");
        assert_eq!(format!("{key:?}"), "PartKey(abc:100)");
    }
}
