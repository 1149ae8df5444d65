//! The portable timeline file: `{ "snapshots": [...], "assets": {...} }`.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::TimelineBundle;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("invalid timeline file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TimelineBundle {
    /// Parse an exported timeline. Missing fields default to empty and
    /// `null` assets are dropped; anything else malformed is an error.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ImportError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn read_from_path(path: &Path) -> Result<Self, ImportError> {
        let bytes = std::fs::read(path).map_err(|source| ImportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_slice(&bytes)
    }

    /// Write the bundle atomically: a temp file in the target directory is
    /// persisted over `path` once fully written.
    pub fn write_to_path(&self, path: &Path) -> anyhow::Result<()> {
        write_atomic(path, &self.to_json_vec()?)
    }
}

/// Write `contents` to `path` via a temp file in the same directory.
pub fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(contents)?;
    tmp.as_file_mut().flush()?;
    let file: File = tmp.persist(path)?;
    file.sync_all()?;
    Ok(())
}
