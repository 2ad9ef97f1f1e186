//! User-facing analysis actions.
//!
//! Actions only move photos to `QUEUED` and enqueue a job; the worker runs
//! the dispatcher. Each returns how many photos it queued.

use anyhow::{bail, Context, Result};

use super::{AnalysisStatus, StatusCounts};
use crate::db::{Database, JobKind, NewPhoto};

pub struct AnalysisActions<'a> {
    db: &'a Database,
}

impl<'a> AnalysisActions<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Record confirmed uploads and queue them for analysis.
    pub fn register_uploads(&self, project_id: i64, uploads: &[NewPhoto]) -> Result<Vec<i64>> {
        let ids = self
            .db
            .insert_photos(project_id, uploads)
            .context("Failed to record uploads")?;
        self.queue(project_id, JobKind::Analyze, &ids)?;
        Ok(ids)
    }

    /// Queue every `PENDING` or `FAILED` photo of the project.
    pub fn analyze_pending(&self, project_id: i64) -> Result<usize> {
        let photos = self
            .db
            .photos_with_status(project_id, &[AnalysisStatus::Pending, AnalysisStatus::Failed])?;
        let ids: Vec<i64> = photos.iter().map(|p| p.id).collect();
        self.queue(project_id, JobKind::Analyze, &ids)
    }

    /// Recover a stalled run: release every `QUEUED` photo to `FAILED`, then
    /// queue everything unfinished again.
    pub fn restart_stalled(&self, project_id: i64) -> Result<usize> {
        let released = self.db.reset_queued(project_id)?;
        tracing::info!(project_id, released, "Released stalled photos");

        let photos = self
            .db
            .photos_with_status(project_id, &[AnalysisStatus::Pending, AnalysisStatus::Failed])?;
        let ids: Vec<i64> = photos.iter().map(|p| p.id).collect();
        self.queue(project_id, JobKind::Restart, &ids)
    }

    /// Queue the `FAILED` photos of a drained run.
    pub fn retry_failed(&self, project_id: i64) -> Result<usize> {
        let counts = self.db.status_counts(project_id)?;
        if counts.queued > 0 {
            bail!(
                "Project {} still has {} photos in flight; restart instead of retrying",
                project_id,
                counts.queued
            );
        }
        let photos = self
            .db
            .photos_with_status(project_id, &[AnalysisStatus::Failed])?;
        let ids: Vec<i64> = photos.iter().map(|p| p.id).collect();
        self.queue(project_id, JobKind::Retry, &ids)
    }

    pub fn status(&self, project_id: i64) -> Result<StatusCounts> {
        self.db.status_counts(project_id)
    }

    fn queue(&self, project_id: i64, kind: JobKind, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let queued = self.db.mark_queued(ids)?;
        let job_id = self.db.enqueue_job(project_id, kind, ids)?;
        tracing::info!(project_id, job_id, kind = kind.as_str(), queued, "Analysis job enqueued");
        Ok(queued)
    }
}
