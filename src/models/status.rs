//! Per-quality and per-job transcode status.
//!
//! The overall job status is never stored; it is recomputed from the
//! per-quality states on every read via [`derive_overall`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::models::quality::Quality;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QualityStatus {
    Pending,
    Running,
    Ok,
    Error,
    Skipped,
    /// Halted by a stop request; resumable from the last committed segment.
    Interrupted,
}

impl QualityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityStatus::Pending => "pending",
            QualityStatus::Running => "running",
            QualityStatus::Ok => "ok",
            QualityStatus::Error => "error",
            QualityStatus::Skipped => "skipped",
            QualityStatus::Interrupted => "interrupted",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, QualityStatus::Pending | QualityStatus::Running)
    }
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QualityStatus::Pending),
            "running" => Ok(QualityStatus::Running),
            "ok" => Ok(QualityStatus::Ok),
            "error" => Ok(QualityStatus::Error),
            "skipped" => Ok(QualityStatus::Skipped),
            "interrupted" => Ok(QualityStatus::Interrupted),
            other => Err(AppError::Internal(format!("unknown quality status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Pending,
    Running,
    Stopped,
    Ok,
    Error,
}

impl OverallStatus {
    /// `ok` and `error` end a job; `stopped` waits for an explicit resume.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OverallStatus::Ok | OverallStatus::Error)
    }
}

/// Aggregate status of a job from its qualities.
pub fn derive_overall<I>(statuses: I) -> OverallStatus
where
    I: IntoIterator<Item = QualityStatus>,
{
    let (mut error, mut running, mut pending, mut interrupted, mut any) =
        (false, false, false, false, false);
    for status in statuses {
        any = true;
        match status {
            QualityStatus::Error => error = true,
            QualityStatus::Running => running = true,
            QualityStatus::Pending => pending = true,
            QualityStatus::Interrupted => interrupted = true,
            QualityStatus::Ok | QualityStatus::Skipped => {}
        }
    }

    if !any {
        OverallStatus::Pending
    } else if error {
        OverallStatus::Error
    } else if running {
        OverallStatus::Running
    } else if pending {
        OverallStatus::Pending
    } else if interrupted {
        OverallStatus::Stopped
    } else {
        OverallStatus::Ok
    }
}

/// Mutable state of one quality inside a job.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityState {
    pub status: QualityStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub segments_done: u32,
    pub segments_total: u32,
    pub segment_ms: u64,
    pub duration_ms: u64,
}

impl QualityState {
    pub fn pending() -> Self {
        Self::with_status(QualityStatus::Pending)
    }

    pub fn skipped() -> Self {
        Self::with_status(QualityStatus::Skipped)
    }

    pub fn original() -> Self {
        Self {
            progress: 100,
            ..Self::with_status(QualityStatus::Ok)
        }
    }

    fn with_status(status: QualityStatus) -> Self {
        Self {
            status,
            progress: 0,
            message: None,
            segments_done: 0,
            segments_total: 0,
            segment_ms: 0,
            duration_ms: 0,
        }
    }

    /// Progress from committed segments. Never reaches 100 before `ok`.
    pub fn segment_progress(&self) -> u8 {
        if self.segments_total == 0 {
            return 0;
        }
        let pct = (self.segments_done as u64 * 100) / self.segments_total as u64;
        pct.min(99) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QualitySnapshot {
    pub status: QualityStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&QualityState> for QualitySnapshot {
    fn from(state: &QualityState) -> Self {
        Self {
            status: state.status,
            progress: state.progress,
            message: if state.status == QualityStatus::Error {
                state.message.clone()
            } else {
                None
            },
        }
    }
}

/// Point-in-time view of one job, as published to pollers and subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobSnapshot {
    pub asset_hash: String,
    pub overall: OverallStatus,
    pub qualities: BTreeMap<String, QualitySnapshot>,
}

impl JobSnapshot {
    /// What a caller sees when no job has ever run for the hash.
    pub fn empty(asset_hash: &str) -> Self {
        Self {
            asset_hash: asset_hash.to_string(),
            overall: OverallStatus::Pending,
            qualities: BTreeMap::new(),
        }
    }

    pub fn from_states(asset_hash: &str, states: &BTreeMap<Quality, QualityState>) -> Self {
        Self {
            asset_hash: asset_hash.to_string(),
            overall: derive_overall(states.values().map(|s| s.status)),
            qualities: states
                .iter()
                .map(|(q, s)| (q.label().to_string(), QualitySnapshot::from(s)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use QualityStatus::*;

    #[test]
    fn overall_is_derived_from_qualities() {
        assert_eq!(derive_overall(Vec::new()), OverallStatus::Pending);
        assert_eq!(derive_overall([Ok, Skipped]), OverallStatus::Ok);
        assert_eq!(derive_overall([Ok, Running, Pending]), OverallStatus::Running);
        assert_eq!(derive_overall([Pending, Pending]), OverallStatus::Pending);
        assert_eq!(derive_overall([Ok, Interrupted]), OverallStatus::Stopped);
        assert_eq!(derive_overall([Error, Running]), OverallStatus::Error);
        assert_eq!(derive_overall([Error, Interrupted]), OverallStatus::Error);
    }

    #[test]
    fn message_only_surfaces_on_error() {
        let mut state = QualityState::pending();
        state.message = Some("stale".to_string());
        assert_eq!(QualitySnapshot::from(&state).message, None);

        state.status = Error;
        assert_eq!(QualitySnapshot::from(&state).message.as_deref(), Some("stale"));
    }

    #[test]
    fn segment_progress_caps_below_done() {
        let mut state = QualityState::pending();
        assert_eq!(state.segment_progress(), 0);
        state.segments_total = 3;
        state.segments_done = 1;
        assert_eq!(state.segment_progress(), 33);
        state.segments_done = 3;
        assert_eq!(state.segment_progress(), 99);
    }

    #[test]
    fn status_strings_roundtrip() {
        for s in [Pending, Running, Ok, Error, Skipped, Interrupted] {
            assert_eq!(s.as_str().parse::<QualityStatus>().unwrap(), s);
        }
    }

    #[test]
    fn snapshot_serializes_lowercase() {
        let mut states = BTreeMap::new();
        states.insert(Quality::P360, QualityState::original());
        let snapshot = JobSnapshot::from_states("abc", &states);
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["overall"], "ok");
        assert_eq!(value["qualities"]["360p"]["status"], "ok");
        assert!(value["qualities"]["360p"].get("message").is_none());
    }
}
