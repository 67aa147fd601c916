//! Parser for `rsync --itemize-changes` output.

use super::error::{Result, SyncError};
use super::types::{ChangeEntry, ChangeType};

const TAG_LEN: usize = 11;

const CHATTER: &[&str] = &[
    "sending incremental file list",
    "receiving incremental file list",
    "receiving file list",
    "building file list",
    "sent ",
    "total size is ",
    "created directory ",
];

/// File-level changes reported by rsync, in output order.
///
/// Directory, symlink and attribute-only items are dropped. A line that is
/// neither an item nor known chatter is an error.
pub fn parse_itemized(output: &str) -> Result<Vec<ChangeEntry>> {
    let mut changes = Vec::new();

    for raw in output.lines() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || CHATTER.iter().any(|c| line.starts_with(c)) {
            continue;
        }

        if let Some(rest) = line
            .strip_prefix("*deleting")
            .or_else(|| line.strip_prefix("deleting "))
        {
            let path = rest.trim_start();
            if path.is_empty() {
                return Err(unexpected(line));
            }
            if !path.ends_with('/') {
                changes.push(ChangeEntry::new(ChangeType::Delete, path));
            }
            continue;
        }

        let (tag, path) = split_item(line).ok_or_else(|| unexpected(line))?;
        let bytes = tag.as_bytes();
        if bytes[1] != b'f' || !matches!(bytes[0], b'<' | b'>' | b'c') {
            continue;
        }
        let kind = if tag[2..].starts_with('+') {
            ChangeType::Add
        } else {
            ChangeType::Update
        };
        changes.push(ChangeEntry::new(kind, path));
    }

    Ok(changes)
}

/// Split `YXcstpoguax path` into tag and path.
fn split_item(line: &str) -> Option<(&str, &str)> {
    if !line.is_char_boundary(TAG_LEN) || line.len() <= TAG_LEN + 1 {
        return None;
    }
    let (tag, rest) = line.split_at(TAG_LEN);
    let path = rest.strip_prefix(' ')?;
    let bytes = tag.as_bytes();
    let valid = tag.is_ascii()
        && b"<>ch.*".contains(&bytes[0])
        && b"fdLDSp".contains(&bytes[1])
        && !path.is_empty();
    valid.then_some((tag, path))
}

fn unexpected(line: &str) -> SyncError {
    SyncError::parse("rsync itemized output", format!("unexpected line: {line:?}"))
}
