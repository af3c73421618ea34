//! Content hashing used to key remote failure strikes.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Chunk size the input is split into before hashing.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Hashes file contents as the sorted, de-duplicated set of per-chunk
/// SHA-256 hex digests, concatenated.
///
/// Only stable for a fixed [`HASH_CHUNK_SIZE`]; reordering chunks does not
/// change the result.
pub fn content_hash(data: &[u8]) -> String {
    let digests: BTreeSet<String> = data
        .chunks(HASH_CHUNK_SIZE)
        .map(|chunk| format!("{:x}", Sha256::digest(chunk)))
        .collect();
    digests.into_iter().collect::<Vec<_>>().concat()
}
