//! Copy and move primitives used to preserve conflicting files.
//!
//! Both operations create the destination's parent directories and treat a
//! missing source as nothing to preserve.

use crate::utils::errors::{io_err, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What happened to the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preserved {
    Copied,
    Moved,
    Missing,
}

/// Copy `from` to `to`, keeping permissions and modification time.
pub fn copy_file(from: &Path, to: &Path) -> Result<Preserved> {
    if !from.is_file() {
        return Ok(Preserved::Missing);
    }
    ensure_parent(to)?;
    fs::copy(from, to).map_err(|e| io_err(to, e))?;

    let modified = fs::metadata(from)
        .and_then(|m| m.modified())
        .map_err(|e| io_err(from, e))?;
    let dest = fs::OpenOptions::new()
        .write(true)
        .open(to)
        .map_err(|e| io_err(to, e))?;
    dest.set_modified(modified).map_err(|e| io_err(to, e))?;

    Ok(Preserved::Copied)
}

/// Move `from` to `to`. Falls back to copy + remove across filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<Preserved> {
    if !from.is_file() {
        return Ok(Preserved::Missing);
    }
    ensure_parent(to)?;

    if fs::rename(from, to).is_err() {
        copy_file(from, to)?;
        fs::remove_file(from).map_err(|e| io_err(from, e))?;
    }
    Ok(Preserved::Moved)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    Ok(())
}
