//! Driver pipeline cache disk persistence.
//!
//! File layout: a 4-byte magic, a 4-byte version, an 8-byte xxhash64 of the
//! payload, 4 reserved bytes, then the raw driver pipeline cache blob
//! (`vkGetPipelineCacheData` output). Loading an incompatible or corrupt file
//! is not an error — the caller starts with an empty driver cache instead.

use std::io::Write as _;
use std::path::Path;

/// Magic bytes identifying a pipeline cache file (`'PLCH'`).
pub const MAGIC: [u8; 4] = *b"PLCH";

/// Bumped whenever the on-disk layout or the driver cache UUID format this
/// core targets changes; readers reject any other version.
pub const CACHE_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 8 + 4;

/// Read `path` and return the driver cache payload if the header is valid
/// and the payload's xxhash64 matches. Any failure (missing file, bad magic,
/// version mismatch, hash mismatch) returns `None` rather than an error: per
/// A missing, corrupt, or version-mismatched blob falls back to an empty cache.
#[must_use]
pub fn load(path: &Path) -> Option<Vec<u8>> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.len() < HEADER_LEN {
        log::warn!("pipeline cache: {path:?} is shorter than a header, ignoring");
        return None;
    }

    let magic = &bytes[0..4];
    if magic != MAGIC {
        log::warn!("pipeline cache: {path:?} has bad magic, ignoring");
        return None;
    }

    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != CACHE_VERSION {
        log::info!("pipeline cache: {path:?} is version {version}, expected {CACHE_VERSION}, ignoring");
        return None;
    }

    let stored_hash = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let payload = &bytes[HEADER_LEN..];
    let actual_hash = xxhash_rust::xxh3::xxh3_64(payload);
    if actual_hash != stored_hash {
        log::warn!("pipeline cache: {path:?} failed its xxhash check, ignoring");
        return None;
    }

    Some(payload.to_vec())
}

/// Write `payload` (the raw driver cache bytes) to `path` with a fresh header.
///
/// # Errors
/// Returns an IO error if the parent directory cannot be created or the file
/// cannot be written.
pub fn store(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let hash = xxhash_rust::xxh3::xxh3_64(payload);
    let mut file = std::fs::File::create(path)?;
    file.write_all(&MAGIC)?;
    file.write_all(&CACHE_VERSION.to_le_bytes())?;
    file.write_all(&hash.to_le_bytes())?;
    file.write_all(&[0u8; 4])?;
    file.write_all(payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_payload() {
        let dir = std::env::temp_dir().join(format!("vk-render-core-pipeline-cache-test-{}", std::process::id()));
        let path = dir.join("vulkan.bin");
        let payload = b"pretend driver cache bytes".to_vec();

        store(&path, &payload).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, payload);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_corrupted_payload() {
        let dir = std::env::temp_dir().join(format!("vk-render-core-pipeline-cache-test-corrupt-{}", std::process::id()));
        let path = dir.join("vulkan.bin");
        store(&path, b"original").unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        *bytes.last_mut().unwrap() ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(load(&path).is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_wrong_version() {
        let dir = std::env::temp_dir().join(format!("vk-render-core-pipeline-cache-test-version-{}", std::process::id()));
        let path = dir.join("vulkan.bin");
        store(&path, b"payload").unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4..8].copy_from_slice(&(CACHE_VERSION + 1).to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        assert!(load(&path).is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
