//! Registry of the background maintenance ("data doctor") task kinds.
//!
//! Every other component keys its state by [`TaskKind`]. Ids are stable and
//! shared with the per-disk task runners, so they must never be renumbered.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Task lookup failures.
#[derive(Debug, Error, PartialEq)]
pub enum TaskError {
    /// No task has this label.
    #[error("Unknown task: {0}")]
    UnknownTask(String),
    /// No task has this id.
    #[error("Unknown task id: {0}")]
    UnknownTaskId(u32),
}

/// A background maintenance task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Removes duplicate fragments.
    RemoveDupFrags = 0,
    /// Removes leftover temporary fragments.
    RemoveTempFrags = 1,
    /// Populates the system cache.
    PopulateSysCache = 2,
    /// Populates the external cache.
    PopulateExtCache = 3,
    /// Recovers lost fragments.
    RecoverLostFrags = 4,
    /// Scans fragments for damage.
    ScanFrags = 5,
    /// Rebalances data across disks.
    Slosh = 6,
    /// Aggregator spanning the other tasks.
    Super = 7,
}

impl TaskKind {
    /// All task kinds, ordered by id.
    pub const ALL: [TaskKind; 8] = [
        TaskKind::RemoveDupFrags,
        TaskKind::RemoveTempFrags,
        TaskKind::PopulateSysCache,
        TaskKind::PopulateExtCache,
        TaskKind::RecoverLostFrags,
        TaskKind::ScanFrags,
        TaskKind::Slosh,
        TaskKind::Super,
    ];

    /// The aggregator kind whose cycle boundaries feed the query integrity watermark.
    pub const AGGREGATOR: TaskKind = TaskKind::Super;

    /// The lost-fragment recovery kind that confirms a finished expansion.
    pub const RECOVERY: TaskKind = TaskKind::RecoverLostFrags;

    /// The cache-population kind targeted by the sys-cache reset override.
    pub const SYS_CACHE: TaskKind = TaskKind::PopulateSysCache;

    /// Stable numeric id shared with the task runners.
    pub fn id(&self) -> u32 {
        *self as u32
    }

    /// Kebab-case label.
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::RemoveDupFrags => "remove-dup-frags",
            TaskKind::RemoveTempFrags => "remove-temp-frags",
            TaskKind::PopulateSysCache => "populate-sys-cache",
            TaskKind::PopulateExtCache => "populate-ext-cache",
            TaskKind::RecoverLostFrags => "recover-lost-frags",
            TaskKind::ScanFrags => "scan-frags",
            TaskKind::Slosh => "slosh",
            TaskKind::Super => "super",
        }
    }

    /// Looks up a kind by id.
    pub fn from_id(id: u32) -> Result<Self, TaskError> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.id() == id)
            .ok_or(TaskError::UnknownTaskId(id))
    }

    /// Whether this is the aggregator kind.
    pub fn is_aggregator(&self) -> bool {
        *self == Self::AGGREGATOR
    }

    /// Number of registered kinds.
    pub fn count() -> usize {
        Self::ALL.len()
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Accepts either the label or the numeric id.
impl FromStr for TaskKind {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(id) = trimmed.parse::<u32>() {
            return Self::from_id(id);
        }
        let normalized = trimmed.to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.label() == normalized)
            .ok_or_else(|| TaskError::UnknownTask(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_dense_and_ordered() {
        for (i, kind) in TaskKind::ALL.iter().enumerate() {
            assert_eq!(kind.id() as usize, i);
        }
        let mut sorted = TaskKind::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, TaskKind::ALL.to_vec());
    }

    #[test]
    fn test_from_id_round_trips() {
        for kind in TaskKind::ALL {
            assert_eq!(TaskKind::from_id(kind.id()).unwrap(), kind);
        }
    }

    #[test]
    fn test_from_id_rejects_unknown() {
        assert_eq!(TaskKind::from_id(42), Err(TaskError::UnknownTaskId(42)));
    }

    #[test]
    fn test_parse_accepts_label_and_id() {
        assert_eq!("scan-frags".parse::<TaskKind>().unwrap(), TaskKind::ScanFrags);
        assert_eq!("4".parse::<TaskKind>().unwrap(), TaskKind::RecoverLostFrags);
        assert_eq!(
            "POPULATE_SYS_CACHE".parse::<TaskKind>().unwrap(),
            TaskKind::PopulateSysCache
        );
    }

    #[test]
    fn test_parse_rejects_unknown_label() {
        assert!(matches!(
            "defrag".parse::<TaskKind>(),
            Err(TaskError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_exactly_one_aggregator() {
        let aggregators: Vec<_> = TaskKind::ALL.iter().filter(|k| k.is_aggregator()).collect();
        assert_eq!(aggregators, vec![&TaskKind::Super]);
    }

    #[test]
    fn test_serde_uses_labels() {
        let json = serde_json::to_string(&TaskKind::RecoverLostFrags).unwrap();
        assert_eq!(json, "\"recover-lost-frags\"");
        let kind: TaskKind = serde_json::from_str("\"slosh\"").unwrap();
        assert_eq!(kind, TaskKind::Slosh);
    }

    #[test]
    fn test_display_matches_label() {
        assert_eq!(TaskKind::Super.to_string(), "super");
    }
}
