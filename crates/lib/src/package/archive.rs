//! ZIP archive writer for deployable artifacts.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::util::hash::{ContentHash, hash_file};

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("failed to create archive {path}: {source}")]
  Create {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write archive entry {entry}: {source}")]
  Write {
    entry: String,
    #[source]
    source: io::Error,
  },

  #[error("zip error on {entry}: {source}")]
  Zip {
    entry: String,
    #[source]
    source: zip::result::ZipError,
  },

  #[error("duplicate archive entry: {0}")]
  DuplicateEntry(String),

  #[error("directory does not exist: {0}")]
  MissingDirectory(PathBuf),
}

/// File mode recorded for an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPermission {
  Regular,
  Executable,
}

impl EntryPermission {
  pub fn mode(&self) -> u32 {
    match self {
      EntryPermission::Regular => 0o644,
      EntryPermission::Executable => 0o755,
    }
  }
}

/// An archive being written to disk.
///
/// Entry modes are always set explicitly, so an executable added with
/// [`EntryPermission::Executable`] is executable regardless of the host
/// file system. Timestamps are fixed so identical inputs produce identical
/// archives.
pub struct CodeArchive {
  path: PathBuf,
  writer: ZipWriter<BufWriter<File>>,
  entries: Vec<String>,
}

impl std::fmt::Debug for CodeArchive {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CodeArchive")
      .field("path", &self.path)
      .field("entries", &self.entries)
      .finish()
  }
}

impl CodeArchive {
  /// Create (or truncate) the archive at `path`.
  pub fn create(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
    let path = path.into();
    let file = File::create(&path).map_err(|source| ArchiveError::Create {
      path: path.clone(),
      source,
    })?;
    debug!(path = %path.display(), "opened archive");
    Ok(Self {
      path,
      writer: ZipWriter::new(BufWriter::new(file)),
      entries: Vec::new(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Names of the entries written so far, in order.
  pub fn entries(&self) -> &[String] {
    &self.entries
  }

  fn options(permission: EntryPermission) -> SimpleFileOptions {
    SimpleFileOptions::default()
      .compression_method(CompressionMethod::Deflated)
      .last_modified_time(zip::DateTime::default())
      .unix_permissions(permission.mode())
  }

  /// Add a file entry with the given content and mode.
  pub fn add_entry(&mut self, name: &str, content: &[u8], permission: EntryPermission) -> Result<(), ArchiveError> {
    let name = name.trim_start_matches('/').replace('\\', "/");
    if self.entries.iter().any(|existing| *existing == name) {
      return Err(ArchiveError::DuplicateEntry(name));
    }
    self
      .writer
      .start_file(name.as_str(), Self::options(permission))
      .map_err(|source| ArchiveError::Zip {
        entry: name.clone(),
        source,
      })?;
    self.writer.write_all(content).map_err(|source| ArchiveError::Write {
      entry: name.clone(),
      source,
    })?;
    self.entries.push(name);
    Ok(())
  }

  /// Add a file from disk, forcing the executable mode.
  pub fn add_executable(&mut self, name: &str, source: &Path) -> Result<(), ArchiveError> {
    let content = std::fs::read(source).map_err(|e| ArchiveError::Read {
      path: source.to_path_buf(),
      source: e,
    })?;
    self.add_entry(name, &content, EntryPermission::Executable)
  }

  /// Add every file under `root`, named relative to `root` and placed
  /// under `prefix` (which may be empty).
  pub fn add_directory_tree(&mut self, root: &Path, prefix: &str) -> Result<usize, ArchiveError> {
    if !root.is_dir() {
      return Err(ArchiveError::MissingDirectory(root.to_path_buf()));
    }
    let mut added = 0;
    for entry in WalkDir::new(root).sort_by_file_name() {
      let entry = entry.map_err(|e| ArchiveError::Read {
        path: root.to_path_buf(),
        source: e.into(),
      })?;
      if !entry.file_type().is_file() {
        continue;
      }
      let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
      let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
      let name = if prefix.is_empty() {
        relative
      } else {
        format!("{}/{}", prefix.trim_end_matches('/'), relative)
      };
      let content = std::fs::read(entry.path()).map_err(|e| ArchiveError::Read {
        path: entry.path().to_path_buf(),
        source: e,
      })?;
      self.add_entry(&name, &content, EntryPermission::Regular)?;
      added += 1;
    }
    Ok(added)
  }

  /// Close the archive and return its path and digest.
  pub fn finish(self) -> Result<(PathBuf, ContentHash), ArchiveError> {
    let path = self.path;
    let mut inner = self.writer.finish().map_err(|source| ArchiveError::Zip {
      entry: path.display().to_string(),
      source,
    })?;
    inner.flush().map_err(|source| ArchiveError::Write {
      entry: path.display().to_string(),
      source,
    })?;
    drop(inner);

    let digest = hash_file(&path).map_err(|source| ArchiveError::Read {
      path: path.clone(),
      source,
    })?;
    info!(path = %path.display(), entries = self.entries.len(), sha256 = %digest, "archive written");
    Ok((path, digest))
  }
}
