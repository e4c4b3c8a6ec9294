//! 64-bit key hashing shared by the blob cache and the download catalog.

use sha2::Digest;

/// Truncated SHA-256 digest of a key, used as a compact lookup hash.
///
/// Lookups that use it must still verify the full key, since two keys may
/// share a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyHash(u64);

impl KeyHash {
    pub fn from_bytes(key: &[u8]) -> Self {
        let digest = sha2::Sha256::digest(key);
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest[..8]);
        Self(u64::from_le_bytes(out))
    }

    pub fn from_key_str(key: &str) -> Self {
        Self::from_bytes(key.as_bytes())
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Bit-preserving conversion for SQLite's signed INTEGER columns.
    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Fixed-width lowercase hex, suitable as a store key.
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }
}
