use partcache_core::{NewPart, PartCandidate};
use sha2::{Digest, Sha256};

/// Fixed test epoch (2023-11-14T22:13:20Z), unix seconds.
#[allow(dead_code)]
pub const START: i64 = 1_700_000_000;

/// Default part TTL in seconds.
#[allow(dead_code)]
pub const TTL: i64 = partcache_core::DEFAULT_PART_TTL_SECS as i64;

/// Compute SHA-256 hash of data as hex string
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Deterministic fingerprint for a test part.
#[allow(dead_code)]
pub fn part_hash(seed: &str) -> String {
    sha256_hash(seed.as_bytes())
}

#[allow(dead_code)]
pub fn candidate(hash: &str, size: i64, cid: i64) -> PartCandidate {
    PartCandidate::new(hash, size, cid, format!("n{cid}.mp4"))
}

#[allow(dead_code)]
pub fn new_part(hash: &str, size: i64, cid: i64, expire_time: i64) -> NewPart {
    candidate(hash, size, cid).with_expiry(expire_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash() {
        let data = b"hello world";
        let hash = sha256_hash(data);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
