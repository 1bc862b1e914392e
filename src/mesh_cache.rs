//! Mesh cache disk persistence.
//!
//! Parsing a guest mesh file (vertex/index decoding, submesh table
//! extraction) is a collaborator concern — this module only persists the
//! already-decoded result so a second load of the same source file skips
//! back to raw arrays instead of re-parsing. Layout mirrors the pipeline
//! cache's header shape (magic/version/hash) from [`crate::caches::pipeline::file`].

use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Magic bytes identifying a single-mesh cache file (`'MODL'`).
pub const MAGIC: [u8; 4] = *b"MODL";
/// Magic bytes identifying a multi-mesh cache file (`'MMSH'`).
pub const MULTI_MAGIC: [u8; 4] = *b"MMSH";

/// Bumped whenever the on-disk layout changes; readers reject any other version.
pub const CACHE_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 8 + 4 + 4; // magic, version, file_hash, submesh_count, padding
const COUNTS_LEN: usize = 4 + 4 + 4 + 8 + 8; // vertex/index/only-vertex counts, vertex/index byte lengths
const SUBMESH_LEN: usize = 4 * 4; // offset, count, topology, material

/// One drawable range within a cached mesh's index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubMesh {
    /// First index (or vertex, for non-indexed submeshes) of this range.
    pub offset: u32,
    /// Number of indices (or vertices) in this range.
    pub count: u32,
    /// Primitive topology, encoded as the guest format's own enum ordinal.
    pub topology: u32,
    /// Material index this range should be drawn with.
    pub material: u32,
}

/// A decoded mesh's vertex/index arrays plus its submesh table, keyed on disk
/// by the xxhash64 of the source file it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMesh {
    /// xxhash64 of the source file this mesh was decoded from.
    pub file_hash: u64,
    /// Number of vertices in `vertices`.
    pub vertex_count: u32,
    /// Number of indices in `indices`.
    pub index_count: u32,
    /// Number of vertices that carry no index (drawn with `vkCmdDraw`).
    pub only_vertex_count: u32,
    /// Raw vertex attribute bytes, in the layout the façade's vertex_attrs describe.
    pub vertices: Vec<u8>,
    /// Raw index bytes (`u16` or `u32` elements, caller-interpreted).
    pub indices: Vec<u8>,
    /// Drawable ranges within `indices` (or `vertices`, for non-indexed draws).
    pub submeshes: Vec<SubMesh>,
}

/// Path a single-mesh cache file for `file_xxhash64` would live at under `base_dir`.
#[must_use]
pub fn cache_path(base_dir: &Path, file_xxhash64: u64) -> PathBuf {
    base_dir.join("cache/mesh").join(format!("{file_xxhash64:016x}.mesh"))
}

/// Path a multi-mesh cache file for `file_xxhash64` would live at under `base_dir`.
#[must_use]
pub fn multi_cache_path(base_dir: &Path, file_xxhash64: u64) -> PathBuf {
    base_dir.join("cache/mesh").join(format!("{file_xxhash64:016x}.meshes"))
}

fn encode_mesh(mesh: &CachedMesh) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + COUNTS_LEN + mesh.vertices.len() + mesh.indices.len() + mesh.submeshes.len() * SUBMESH_LEN);
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&CACHE_VERSION.to_le_bytes());
    bytes.extend_from_slice(&mesh.file_hash.to_le_bytes());
    bytes.extend_from_slice(&(mesh.submeshes.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&[0u8; 4]);

    bytes.extend_from_slice(&mesh.vertex_count.to_le_bytes());
    bytes.extend_from_slice(&mesh.index_count.to_le_bytes());
    bytes.extend_from_slice(&mesh.only_vertex_count.to_le_bytes());
    bytes.extend_from_slice(&(mesh.vertices.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&(mesh.indices.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&mesh.vertices);
    bytes.extend_from_slice(&mesh.indices);
    for submesh in &mesh.submeshes {
        bytes.extend_from_slice(&submesh.offset.to_le_bytes());
        bytes.extend_from_slice(&submesh.count.to_le_bytes());
        bytes.extend_from_slice(&submesh.topology.to_le_bytes());
        bytes.extend_from_slice(&submesh.material.to_le_bytes());
    }
    bytes
}

/// Decode one mesh body (header onward) from `bytes`, returning the mesh and
/// the number of bytes consumed. `None` on any malformed field.
fn decode_mesh(bytes: &[u8]) -> Option<(CachedMesh, usize)> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    if &bytes[0..4] != MAGIC {
        return None;
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != CACHE_VERSION {
        return None;
    }
    let file_hash = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let submesh_count = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;

    let mut cursor = HEADER_LEN;
    if bytes.len() < cursor + COUNTS_LEN {
        return None;
    }
    let vertex_count = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
    cursor += 4;
    let index_count = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
    cursor += 4;
    let only_vertex_count = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
    cursor += 4;
    let vertex_bytes_len = u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap()) as usize;
    cursor += 8;
    let index_bytes_len = u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap()) as usize;
    cursor += 8;

    if bytes.len() < cursor + vertex_bytes_len + index_bytes_len + submesh_count * SUBMESH_LEN {
        return None;
    }
    let vertices = bytes[cursor..cursor + vertex_bytes_len].to_vec();
    cursor += vertex_bytes_len;
    let indices = bytes[cursor..cursor + index_bytes_len].to_vec();
    cursor += index_bytes_len;

    let mut submeshes = Vec::with_capacity(submesh_count);
    for _ in 0..submesh_count {
        let offset = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
        let count = u32::from_le_bytes(bytes[cursor + 4..cursor + 8].try_into().unwrap());
        let topology = u32::from_le_bytes(bytes[cursor + 8..cursor + 12].try_into().unwrap());
        let material = u32::from_le_bytes(bytes[cursor + 12..cursor + 16].try_into().unwrap());
        submeshes.push(SubMesh { offset, count, topology, material });
        cursor += SUBMESH_LEN;
    }

    Some((
        CachedMesh {
            file_hash,
            vertex_count,
            index_count,
            only_vertex_count,
            vertices,
            indices,
            submeshes,
        },
        cursor,
    ))
}

/// Load a single-mesh cache file. Any malformed field (bad magic, wrong
/// version, truncated body) returns `None` rather than an error — a cache
/// miss just means re-decoding the source file.
#[must_use]
pub fn load(path: &Path) -> Option<CachedMesh> {
    let bytes = std::fs::read(path).ok()?;
    decode_mesh(&bytes).map(|(mesh, _)| mesh)
}

/// Write a single-mesh cache file.
///
/// # Errors
/// Returns an IO error if the parent directory cannot be created or the file
/// cannot be written.
pub fn store(path: &Path, mesh: &CachedMesh) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(&encode_mesh(mesh))?;
    Ok(())
}

/// Load a multi-mesh cache file, each entry encoded as a single-mesh body in
/// sequence. Returns `None` if the outer header is malformed or any entry
/// fails to decode.
#[must_use]
pub fn load_multi(path: &Path) -> Option<Vec<CachedMesh>> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.len() < 8 || &bytes[0..4] != MULTI_MAGIC {
        return None;
    }
    let mesh_count = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let mut cursor = 8;
    let mut meshes = Vec::with_capacity(mesh_count);
    for _ in 0..mesh_count {
        let (mesh, consumed) = decode_mesh(&bytes[cursor..])?;
        cursor += consumed;
        meshes.push(mesh);
    }
    Some(meshes)
}

/// Write a multi-mesh cache file.
///
/// # Errors
/// Returns an IO error if the parent directory cannot be created or the file
/// cannot be written.
pub fn store_multi(path: &Path, meshes: &[CachedMesh]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(&MULTI_MAGIC)?;
    file.write_all(&(meshes.len() as u32).to_le_bytes())?;
    for mesh in meshes {
        file.write_all(&encode_mesh(mesh))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mesh(file_hash: u64) -> CachedMesh {
        CachedMesh {
            file_hash,
            vertex_count: 4,
            index_count: 6,
            only_vertex_count: 0,
            vertices: vec![0u8; 4 * 32],
            indices: vec![0, 1, 2, 0, 2, 3],
            submeshes: vec![SubMesh { offset: 0, count: 6, topology: 3, material: 0 }],
        }
    }

    #[test]
    fn round_trip_preserves_mesh() {
        let dir = std::env::temp_dir().join(format!("vk-render-core-mesh-cache-test-{}", std::process::id()));
        let path = dir.join("deadbeef.mesh");
        let mesh = sample_mesh(0xdead_beef);

        store(&path, &mesh).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, mesh);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_corrupted_magic() {
        let dir = std::env::temp_dir().join(format!("vk-render-core-mesh-cache-test-corrupt-{}", std::process::id()));
        let path = dir.join("deadbeef.mesh");
        store(&path, &sample_mesh(1)).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&path, bytes).unwrap();

        assert!(load(&path).is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn multi_mesh_round_trip() {
        let dir = std::env::temp_dir().join(format!("vk-render-core-mesh-cache-test-multi-{}", std::process::id()));
        let path = dir.join("deadbeef.meshes");
        let meshes = vec![sample_mesh(1), sample_mesh(2)];

        store_multi(&path, &meshes).unwrap();
        let loaded = load_multi(&path).unwrap();
        assert_eq!(loaded, meshes);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn cache_path_uses_hex_hash() {
        let path = cache_path(Path::new("data"), 0x00ff);
        assert_eq!(path, Path::new("data/cache/mesh/00000000000000ff.mesh"));
    }
}
