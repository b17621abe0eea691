//! File and compression helpers used to persist process state outside a run.

use std::path::Path;

use thiserror::Error;

/// zstd level used by [compress].
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Compression error, detail: {detail}, source: {source}")]
    CompressionError {
        detail: String,
        #[source]
        source: std::io::Error,
    },
}

/// Write `data` to `path`, creating missing parent directories.
pub async fn save_to_file(data: &[u8], path: &Path) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}

pub async fn load_from_file(path: &Path) -> Result<Vec<u8>, PersistenceError> {
    Ok(tokio::fs::read(path).await?)
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>, PersistenceError> {
    zstd::encode_all(data, COMPRESSION_LEVEL).map_err(|source| {
        PersistenceError::CompressionError {
            detail: "failed to compress data".to_owned(),
            source,
        }
    })
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, PersistenceError> {
    zstd::decode_all(data).map_err(|source| PersistenceError::CompressionError {
        detail: "failed to decompress data".to_owned(),
        source,
    })
}
