use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::core::models::Digest;
use crate::error::{Error, Result};

/// Chunk size for streaming reads; memory use stays bounded for large media.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Hash a file's content using BLAKE3, streaming in fixed-size chunks.
///
/// The digest serves only as a content identity for deduplication and copy
/// verification; nothing relies on its cryptographic strength.
///
/// The digest depends on the bytes only, never on the name, location or
/// timestamps. A read failure midway (ejected volume, permission change)
/// surfaces as [`Error::Io`].
pub fn digest_file(path: &Path) -> Result<Digest> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = blake3::Hasher::new();

    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer).map_err(|e| Error::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().into())
}
