//! Content-addressed manifests of a directory tree.
//!
//! A manifest maps every retained regular file under a root to its size,
//! modification time and SHA-256 fingerprint. Only the fingerprint decides
//! whether two versions of a file are equal.

use crate::fs::exclude::ExcludeSet;
use crate::fs::walker::walk_files;
use crate::utils::errors::{io_err, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Files are hashed in chunks of this size so memory stays flat.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Metadata and fingerprint of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
    /// Seconds since the Unix epoch. Informational only.
    pub mtime: f64,
    #[serde(alias = "sha256")]
    pub fingerprint: String,
}

/// Manifest keyed by root-relative path.
pub type Manifest = BTreeMap<String, FileRecord>;

/// What `fleetsync-agent manifest` prints on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestReport {
    pub root: String,
    pub exists: bool,
    pub files: Vec<FileRecord>,
}

impl ManifestReport {
    pub fn into_manifest(self) -> Manifest {
        self.files
            .into_iter()
            .map(|record| (record.path.clone(), record))
            .collect()
    }
}

/// SHA-256 of the file at `path`, as lowercase hex.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).map_err(|e| io_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Build the manifest report for `root`.
///
/// A missing root yields an empty report with `exists: false`. Any failure to
/// read a retained file fails the whole call.
pub fn build_report(root: &Path, excludes: &ExcludeSet) -> Result<ManifestReport> {
    let root_display = root.to_string_lossy().to_string();

    if !root.exists() {
        tracing::debug!(root = %root_display, "root does not exist");
        return Ok(ManifestReport {
            root: root_display,
            exists: false,
            files: Vec::new(),
        });
    }

    let files = walk_files(root, excludes)?;
    let mut records = Vec::with_capacity(files.len());
    for file in files {
        let fingerprint = fingerprint_file(&file.path)?;
        records.push(FileRecord {
            path: file.relative_path,
            size: file.size,
            mtime: file.mtime,
            fingerprint,
        });
    }

    tracing::debug!(root = %root_display, files = records.len(), "manifest built");
    Ok(ManifestReport {
        root: root_display,
        exists: true,
        files: records,
    })
}
