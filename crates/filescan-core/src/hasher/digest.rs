use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hex BLAKE3 digest of the file's full content, streamed.
pub fn hash_file(file: &Path) -> io::Result<String> {
    let f = File::open(file)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, f);
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn hash_data(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Like [`hash_file`], but a file that cannot be read right now yields `None`
/// instead of an error. Callers store that as a null content reference.
pub fn digest_file(file: &Path) -> Option<String> {
    match hash_file(file) {
        Ok(digest) => Some(digest),
        Err(e) => {
            tracing::warn!("Unable to hash '{}': {}", file.display(), e);
            None
        }
    }
}
