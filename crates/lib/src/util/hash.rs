//! Hashing utilities for content-derived names and artifact digests.
//!
//! This module provides:
//! - `ObjectHash`: a truncated 20-character hash used inside logical names
//! - `ContentHash`: a full 64-character hash for artifact verification
//! - `logical_name()`: deterministic template logical names
//! - `hash_file()` / `hash_bytes()`: artifact digests

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A content-derived hash identifying a unique definition.
///
/// The hash is a 20-character truncated SHA-256 of the JSON-serialized value,
/// lowercase hexadecimal, e.g. `"a1b2c3d4e5f6789012ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let full = hex::encode(hasher.finalize());
    Ok(ObjectHash(full[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// Build a template logical name from a readable prefix and content parts.
///
/// Logical names may only contain ASCII alphanumerics, so the prefix is
/// sanitized and the parts are folded into a truncated digest. The same
/// prefix and parts always produce the same name, which keeps re-provisioned
/// resources stable across builds.
pub fn logical_name(prefix: &str, parts: &[&str]) -> String {
  let sanitized: String = prefix.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
  let mut hasher = Sha256::new();
  for part in parts {
    hasher.update(part.as_bytes());
    hasher.update([0u8]);
  }
  let full = hex::encode(hasher.finalize());
  format!("{}{}", sanitized, &full[..OBJ_HASH_PREFIX_LEN])
}

/// A full 64-character SHA256 hash for content verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
  let mut file = fs::File::open(path)?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn logical_name_is_deterministic() {
    let a = logical_name("IAMRole", &["svc", "{\"x\":1}"]);
    let b = logical_name("IAMRole", &["svc", "{\"x\":1}"]);
    assert_eq!(a, b);
    assert!(a.starts_with("IAMRole"));
    assert_eq!(a.len(), "IAMRole".len() + OBJ_HASH_PREFIX_LEN);
  }

  #[test]
  fn logical_name_strips_invalid_characters() {
    let name = logical_name("my-func_01", &["svc"]);
    assert!(name.starts_with("myfunc01"));
    assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
  }

  #[test]
  fn logical_name_part_boundaries_matter() {
    assert_ne!(logical_name("R", &["ab", "c"]), logical_name("R", &["a", "bc"]));
  }

  #[derive(Serialize)]
  struct Sample {
    value: &'static str,
  }

  impl Hashable for Sample {}

  #[test]
  fn compute_hash_changes_with_content() {
    let one = Sample { value: "a" }.compute_hash().unwrap();
    let two = Sample { value: "b" }.compute_hash().unwrap();
    assert_ne!(one, two);
    assert_eq!(one.0.len(), OBJ_HASH_PREFIX_LEN);
  }

  #[test]
  fn hash_file_matches_hash_bytes() {
    let temp = tempdir().unwrap();
    let file_path = temp.path().join("test.txt");
    std::fs::write(&file_path, "hello world").unwrap();

    let hash = hash_file(&file_path).unwrap();
    assert_eq!(hash.0.len(), 64);
    assert_eq!(hash, hash_bytes(b"hello world"));
  }
}
