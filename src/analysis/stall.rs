//! Progress watching for a running analysis.
//!
//! The dispatcher runs detached, so a run that died mid-way leaves photos
//! `QUEUED` forever. The detector infers that from the polled counts alone.

use super::StatusCounts;

/// What the poller should show after one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Work in flight and progressing (or not yet stalled).
    Running,
    /// Work in flight but nothing finished for the configured number of polls.
    Stalled,
    /// Nothing in flight; some photos failed and can be retried.
    Drained { failed: u64 },
    /// Nothing in flight and nothing failed.
    Complete,
}

/// Recovery the UI offers for a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Release `QUEUED` photos and dispatch everything unfinished again.
    Restart,
    /// Dispatch the `FAILED` photos only.
    Retry,
}

impl PollState {
    pub fn offered_action(&self) -> Option<RecoveryAction> {
        match self {
            PollState::Stalled => Some(RecoveryAction::Restart),
            PollState::Drained { .. } => Some(RecoveryAction::Retry),
            PollState::Running | PollState::Complete => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StallDetector {
    threshold: u32,
    last_analyzed: Option<u64>,
    idle_polls: u32,
}

impl StallDetector {
    /// `threshold` consecutive polls without progress mark a stall.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            last_analyzed: None,
            idle_polls: 0,
        }
    }

    pub fn observe(&mut self, counts: &StatusCounts) -> PollState {
        let analyzed = counts.analyzed();
        match self.last_analyzed {
            Some(last) if analyzed <= last => self.idle_polls = self.idle_polls.saturating_add(1),
            _ => self.idle_polls = 0,
        }
        self.last_analyzed = Some(analyzed);

        if counts.queued > 0 {
            if self.idle_polls >= self.threshold {
                PollState::Stalled
            } else {
                PollState::Running
            }
        } else {
            self.idle_polls = 0;
            if counts.failed > 0 {
                PollState::Drained { failed: counts.failed }
            } else {
                PollState::Complete
            }
        }
    }

    /// Forget history, e.g. after the user restarted the run.
    pub fn reset(&mut self) {
        self.last_analyzed = None;
        self.idle_polls = 0;
    }
}
