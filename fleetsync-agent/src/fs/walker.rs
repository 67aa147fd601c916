//! Directory traversal for manifest collection.
//!
//! Only regular files are reported. Directories are descended into, symlinks
//! are neither followed nor reported.

use crate::fs::exclude::ExcludeSet;
use crate::utils::errors::{io_err, AgentError, Result};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::{DirEntry, WalkDir};

/// Information about a regular file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Root-relative path, `/`-separated
    pub relative_path: String,

    /// File size in bytes
    pub size: u64,

    /// Last modification time (seconds since Unix epoch)
    pub mtime: f64,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> Result<Self> {
        let path = entry.path().to_path_buf();
        let relative_path = relative_posix(&path, root)?;
        let metadata = entry.metadata()?;

        let mtime = metadata
            .modified()
            .map_err(|e| io_err(&path, e))?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Ok(Self {
            path,
            relative_path,
            size: metadata.len(),
            mtime,
        })
    }
}

/// Walk `root` and collect every regular file not matched by `excludes`.
///
/// Entries come back sorted by relative path. Any error while reading the tree
/// aborts the walk: a partial listing would look like deleted files to the
/// caller.
///
/// # Example
/// ```no_run
/// use fleetsync_agent::fs::exclude::ExcludeSet;
/// use fleetsync_agent::fs::walker::walk_files;
/// use std::path::Path;
///
/// let excludes = ExcludeSet::new(&["**/.env"]).unwrap();
/// let files = walk_files(Path::new("/srv/data"), &excludes).unwrap();
/// println!("Found {} files", files.len());
/// ```
pub fn walk_files(root: &Path, excludes: &ExcludeSet) -> Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry?;

        if !entry.file_type().is_file() {
            continue;
        }

        let info = FileInfo::from_entry(&entry, root)?;
        if excludes.is_excluded(&info.relative_path) {
            tracing::trace!(path = %info.relative_path, "excluded");
            continue;
        }
        files.push(info);
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

fn relative_posix(path: &Path, root: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| AgentError::NonUtf8Path(path.to_path_buf()))?;

    let mut parts = Vec::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            let part = part
                .to_str()
                .ok_or_else(|| AgentError::NonUtf8Path(path.to_path_buf()))?;
            parts.push(part);
        }
    }
    Ok(parts.join("/"))
}
