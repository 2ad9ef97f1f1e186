//! Photo analysis: status state machine, scoring, category reconciliation
//! and the batch dispatcher that drives the inference backends.

pub mod category;
pub mod dispatcher;
pub mod score;
pub mod service;
pub mod stall;

use serde::{Deserialize, Serialize};

pub use category::{normalize, Category};
pub use dispatcher::Dispatcher;
pub use score::composite;
pub use service::AnalysisActions;
pub use stall::{PollState, RecoveryAction, StallDetector};

/// Lifecycle of a photo's analysis.
///
/// Transitions are `PENDING | FAILED -> QUEUED -> DONE | FAILED`. `FAILED`
/// is terminal for a run but can be dispatched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisStatus {
    Pending,
    Queued,
    Done,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "PENDING",
            AnalysisStatus::Queued => "QUEUED",
            AnalysisStatus::Done => "DONE",
            AnalysisStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(AnalysisStatus::Pending),
            "QUEUED" => Some(AnalysisStatus::Queued),
            "DONE" => Some(AnalysisStatus::Done),
            "FAILED" => Some(AnalysisStatus::Failed),
            _ => None,
        }
    }
}

/// The minimum the dispatcher needs to know about a photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRef {
    pub id: i64,
    pub object_key: String,
    pub thumbnail_key: Option<String>,
}

impl PhotoRef {
    /// Thumbnails are small enough for every backend; originals are the fallback.
    pub fn analysis_key(&self) -> &str {
        self.thumbnail_key.as_deref().unwrap_or(&self.object_key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Emotion {
    pub label: Option<String>,
    pub valence: f64,
}

/// Narrative fields, present only when the narrative backend ran.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeFields {
    pub model: String,
    pub score: f64,
    pub summary: String,
    pub discard_reason: Option<String>,
    pub best_in_group: bool,
    pub composition: Option<String>,
    pub pose_quality: Option<String>,
    pub background_quality: Option<String>,
    pub highlights: Vec<String>,
    pub issues: Vec<String>,
    pub category: Category,
    pub tags: Vec<String>,
    /// Tokens the provider reported for the whole batch request.
    pub tokens_used: Option<u32>,
}

/// Everything persisted when a photo transitions to `DONE`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoAnalysis {
    pub blur: f64,
    pub technical_quality: f64,
    pub aesthetic: f64,
    pub emotion: Option<Emotion>,
    pub composite: f64,
    pub narrative: Option<NarrativeFields>,
}

/// Photo counts per status for one project; the polling contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub queued: u64,
    pub done: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.queued + self.done + self.failed
    }

    /// Photos that reached a terminal state in their latest run.
    pub fn analyzed(&self) -> u64 {
        self.done + self.failed
    }

    /// No work in flight.
    pub fn complete(&self) -> bool {
        self.queued == 0
    }

    pub fn add(&mut self, status: AnalysisStatus, count: u64) {
        match status {
            AnalysisStatus::Pending => self.pending += count,
            AnalysisStatus::Queued => self.queued += count,
            AnalysisStatus::Done => self.done += count,
            AnalysisStatus::Failed => self.failed += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            AnalysisStatus::Pending,
            AnalysisStatus::Queued,
            AnalysisStatus::Done,
            AnalysisStatus::Failed,
        ] {
            assert_eq!(AnalysisStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(AnalysisStatus::from_str("done"), None);
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        assert!(counts.complete());
        counts.add(AnalysisStatus::Queued, 3);
        counts.add(AnalysisStatus::Done, 4);
        counts.add(AnalysisStatus::Failed, 1);
        assert_eq!(counts.total(), 8);
        assert_eq!(counts.analyzed(), 5);
        assert!(!counts.complete());
    }

    #[test]
    fn test_analysis_key_prefers_thumbnail() {
        let mut photo = PhotoRef {
            id: 1,
            object_key: "orig/a.jpg".into(),
            thumbnail_key: Some("thumb/a.webp".into()),
        };
        assert_eq!(photo.analysis_key(), "thumb/a.webp");
        photo.thumbnail_key = None;
        assert_eq!(photo.analysis_key(), "orig/a.jpg");
    }
}
