//! Manifest comparison.

use super::types::{ChangeEntry, ChangeSummary, ChangeType};
use fleetsync_agent::Manifest;

/// Changes that make `target` match `source`, sorted by path.
///
/// Only fingerprints are compared. Paths missing from `source` become deletes
/// when `allow_delete` is set and are ignored otherwise.
pub fn diff(source: &Manifest, target: &Manifest, allow_delete: bool) -> Vec<ChangeEntry> {
    let mut changes = Vec::new();

    for (path, record) in source {
        match target.get(path) {
            None => changes.push(ChangeEntry::new(ChangeType::Add, path.as_str())),
            Some(existing) if existing.fingerprint != record.fingerprint => {
                changes.push(ChangeEntry::new(ChangeType::Update, path.as_str()))
            }
            Some(_) => {}
        }
    }

    if allow_delete {
        changes.extend(
            target
                .keys()
                .filter(|path| !source.contains_key(*path))
                .map(|path| ChangeEntry::new(ChangeType::Delete, path.as_str())),
        );
    }

    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

pub fn summarize(changes: &[ChangeEntry]) -> ChangeSummary {
    changes
        .iter()
        .fold(ChangeSummary::default(), |mut summary, change| {
            match change.kind {
                ChangeType::Add => summary.add += 1,
                ChangeType::Update => summary.update += 1,
                ChangeType::Delete => summary.delete += 1,
            }
            summary
        })
}
