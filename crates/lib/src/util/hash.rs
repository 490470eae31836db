//! Content hashing for produced executables.
//!
//! - `hash_file()`: streaming SHA-256 of a file
//! - `hash_bytes()`: SHA-256 of an in-memory buffer

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to hash {path}: {source}")]
pub struct HashError {
  pub path: PathBuf,
  #[source]
  pub source: io::Error,
}

/// Stream a file through SHA-256.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let hash_err = |source| HashError {
    path: path.to_path_buf(),
    source,
  };
  let mut file = File::open(path).map_err(hash_err)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(hash_err)?;
  Ok(ContentHash(hex::encode(hasher.finalize())))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}
