use crate::exec::Host;
use chrono::{DateTime, Utc};
use fleetsync_agent::fs::ops::Preserved;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    #[serde(rename = "type")]
    pub kind: ChangeType,
    pub path: String,
}

impl ChangeEntry {
    pub fn new(kind: ChangeType, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Add or update, i.e. the path's content is written at the destination.
    pub fn writes(&self) -> bool {
        matches!(self.kind, ChangeType::Add | ChangeType::Update)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub add: usize,
    pub update: usize,
    pub delete: usize,
}

/// Planned changes for one root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RootPlan {
    Bidirectional {
        a_to_b: Vec<ChangeEntry>,
        b_to_a: Vec<ChangeEntry>,
        a_to_b_summary: ChangeSummary,
        b_to_a_summary: ChangeSummary,
    },
    OneWay {
        changes: Vec<ChangeEntry>,
        summary: ChangeSummary,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[serde(alias = "one_way")]
    AToB,
    BToA,
    Bidirectional,
}

impl SyncMode {
    /// Directions an execution of this mode runs, in order.
    pub fn directions(self) -> &'static [Direction] {
        match self {
            SyncMode::AToB => &[Direction::AToB],
            SyncMode::BToA => &[Direction::BToA],
            SyncMode::Bidirectional => &[Direction::AToB, Direction::BToA],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::AToB => "a_to_b",
            SyncMode::BToA => "b_to_a",
            SyncMode::Bidirectional => "bidirectional",
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a_to_b" | "one_way" => Ok(SyncMode::AToB),
            "b_to_a" => Ok(SyncMode::BToA),
            "bidirectional" => Ok(SyncMode::Bidirectional),
            other => Err(format!(
                "unsupported mode {other:?} (expected a_to_b, b_to_a or bidirectional)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    AToB,
    BToA,
}

impl Direction {
    /// Label of the side receiving the changes.
    pub fn destination_label(self) -> &'static str {
        match self {
            Direction::AToB => "b",
            Direction::BToA => "a",
        }
    }

    /// The choice that keeps the destination's version.
    pub fn keeps_destination(self) -> ConflictChoice {
        match self {
            Direction::AToB => ConflictChoice::KeepTarget,
            Direction::BToA => ConflictChoice::KeepSource,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    KeepSource,
    KeepTarget,
    KeepBoth,
}

impl ConflictChoice {
    pub const ALL: [ConflictChoice; 3] = [
        ConflictChoice::KeepSource,
        ConflictChoice::KeepTarget,
        ConflictChoice::KeepBoth,
    ];

    /// Parse an operator decision. `keep_a`/`keep_b` are accepted for
    /// compatibility; anything else is no decision.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "keep_source" | "keep_a" => Some(ConflictChoice::KeepSource),
            "keep_target" | "keep_b" => Some(ConflictChoice::KeepTarget),
            "keep_both" => Some(ConflictChoice::KeepBoth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub root: String,
    pub path: String,
    pub choices: Vec<ConflictChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub mode: SyncMode,
    pub source_host: String,
    pub target_host: String,
    pub source_server: String,
    pub target_server: String,
    pub source_port: u16,
    pub target_port: u16,
    pub roots: Vec<String>,
    pub excludes: Vec<String>,
    pub allow_delete: bool,
    pub created_at: DateTime<Utc>,
    pub by_root: BTreeMap<String, RootPlan>,
    pub conflicts: Vec<Conflict>,
}

impl Plan {
    /// Side A.
    pub fn source(&self) -> Host {
        Host {
            name: self.source_server.clone(),
            ssh_host: self.source_host.clone(),
            ssh_port: self.source_port,
        }
    }

    /// Side B.
    pub fn target(&self) -> Host {
        Host {
            name: self.target_server.clone(),
            ssh_host: self.target_host.clone(),
            ssh_port: self.target_port,
        }
    }

    /// Origin and destination hosts of a direction.
    pub fn endpoints(&self, direction: Direction) -> (Host, Host) {
        match direction {
            Direction::AToB => (self.source(), self.target()),
            Direction::BToA => (self.target(), self.source()),
        }
    }
}

/// An operator's decision for one conflicting path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub root: String,
    pub path: String,
    pub decision: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub command: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub changes: Vec<ChangeEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Pull,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Destination file copied aside, path skipped in the transfer.
    Backup,
    /// Destination file moved aside, incoming version lands in place.
    Rename,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedResolution {
    pub path: String,
    pub decision: ConflictChoice,
    pub action: ResolutionAction,
    pub host: String,
    pub from: String,
    pub to: String,
    pub result: Preserved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegResult {
    pub direction: Direction,
    pub root: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub resolutions: Vec<AppliedResolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull: Option<TransferOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<TransferOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub ok: bool,
    pub operations: Vec<LegResult>,
}
