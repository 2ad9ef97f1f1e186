//! Queue of detached analysis work.
//!
//! Delivery is at-least-once: a job whose worker died keeps its `running`
//! status until its lease expires, then it is handed out again.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now_timestamp, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// Analyze every pending or failed photo.
    Analyze,
    /// Re-dispatch the failures left by a drained run.
    Retry,
    /// Recover a stalled run.
    Restart,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Analyze => "analyze",
            JobKind::Retry => "retry",
            JobKind::Restart => "restart",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "analyze" => Some(JobKind::Analyze),
            "retry" => Some(JobKind::Retry),
            "restart" => Some(JobKind::Restart),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub id: i64,
    pub project_id: i64,
    pub kind: JobKind,
    pub photo_ids: Vec<i64>,
    pub status: JobStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
}

const JOB_COLUMNS: &str = "id, project_id, kind, photo_ids, status, attempts, error_message";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<AnalysisJob> {
    let kind: String = row.get(2)?;
    let photo_ids: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(AnalysisJob {
        id: row.get(0)?,
        project_id: row.get(1)?,
        kind: JobKind::from_str(&kind).unwrap_or(JobKind::Analyze),
        photo_ids: serde_json::from_str(&photo_ids).unwrap_or_default(),
        status: JobStatus::from_str(&status).unwrap_or(JobStatus::Failed),
        attempts: row.get::<_, i64>(5)?.max(0) as u32,
        error_message: row.get(6)?,
    })
}

impl Database {
    pub fn enqueue_job(&self, project_id: i64, kind: JobKind, photo_ids: &[i64]) -> Result<i64> {
        let ids_json = serde_json::to_string(photo_ids)?;
        self.conn.execute(
            r#"
            INSERT INTO analysis_jobs (project_id, kind, photo_ids, status, queued_at)
            VALUES (?, ?, ?, 'pending', ?)
            "#,
            params![project_id, kind.as_str(), ids_json, now_timestamp()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Atomically take the oldest pending job.
    pub fn claim_next_job(&self) -> Result<Option<AnalysisJob>> {
        let sql = format!(
            r#"
            UPDATE analysis_jobs
            SET status = 'running', started_at = ?, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM analysis_jobs WHERE status = 'pending' ORDER BY id ASC LIMIT 1
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let job = self
            .conn
            .query_row(&sql, [now_timestamp()], job_from_row)
            .optional()?;
        Ok(job)
    }

    /// Hand expired running jobs out again, or give up on them after
    /// `max_attempts`. Returns how many were requeued.
    pub fn requeue_expired_jobs(&self, lease: Duration, max_attempts: u32) -> Result<usize> {
        let cutoff = Utc::now() - lease;
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, attempts FROM analysis_jobs WHERE status = 'running'",
        )?;
        let running = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut requeued = 0;
        for (id, started_at, attempts) in running {
            let expired = match started_at.as_deref().map(DateTime::parse_from_rfc3339) {
                Some(Ok(started)) => started.with_timezone(&Utc) < cutoff,
                _ => true,
            };
            if !expired {
                continue;
            }
            if attempts >= i64::from(max_attempts) {
                self.finish_job(id, JobStatus::Failed, Some("lease expired too many times"))?;
                tracing::warn!(job_id = id, attempts, "Giving up on analysis job");
            } else {
                self.conn.execute(
                    "UPDATE analysis_jobs SET status = 'pending', started_at = NULL WHERE id = ?",
                    [id],
                )?;
                tracing::info!(job_id = id, attempts, "Requeued expired analysis job");
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    pub fn finish_job(&self, job_id: i64, status: JobStatus, error: Option<&str>) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE analysis_jobs
            SET status = ?, error_message = ?, completed_at = ?
            WHERE id = ?
            "#,
            params![status.as_str(), error, now_timestamp(), job_id],
        )?;
        Ok(())
    }

    /// Pending or running jobs for a project.
    pub fn open_jobs(&self, project_id: i64) -> Result<Vec<AnalysisJob>> {
        let sql = format!(
            r#"
            SELECT {} FROM analysis_jobs
            WHERE project_id = ? AND status IN ('pending', 'running')
            ORDER BY id ASC
            "#,
            JOB_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let jobs = stmt
            .query_map([project_id], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_claim_in_fifo_order() {
        let db = db();
        let first = db.enqueue_job(1, JobKind::Analyze, &[1, 2]).unwrap();
        let second = db.enqueue_job(1, JobKind::Retry, &[3]).unwrap();

        let job = db.claim_next_job().unwrap().unwrap();
        assert_eq!(job.id, first);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.photo_ids, vec![1, 2]);

        let job = db.claim_next_job().unwrap().unwrap();
        assert_eq!(job.id, second);
        assert_eq!(job.kind, JobKind::Retry);
        assert!(db.claim_next_job().unwrap().is_none());
    }

    #[test]
    fn test_expired_lease_is_redelivered() {
        let db = db();
        let id = db.enqueue_job(1, JobKind::Analyze, &[1]).unwrap();
        db.claim_next_job().unwrap().unwrap();

        // fresh lease stays running
        assert_eq!(db.requeue_expired_jobs(Duration::minutes(10), 3).unwrap(), 0);
        // zero lease expires immediately
        assert_eq!(db.requeue_expired_jobs(Duration::seconds(-1), 3).unwrap(), 1);

        let job = db.claim_next_job().unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let db = db();
        let id = db.enqueue_job(1, JobKind::Analyze, &[1]).unwrap();
        db.claim_next_job().unwrap().unwrap();
        assert_eq!(db.requeue_expired_jobs(Duration::seconds(-1), 1).unwrap(), 0);
        let status: String = db
            .conn
            .query_row("SELECT status FROM analysis_jobs WHERE id = ?", [id], |row| row.get(0))
            .unwrap();
        assert_eq!(status, JobStatus::Failed.as_str());
        assert!(db.open_jobs(1).unwrap().is_empty());
        assert!(db.claim_next_job().unwrap().is_none());
    }

    #[test]
    fn test_open_jobs_excludes_finished() {
        let db = db();
        let done = db.enqueue_job(1, JobKind::Analyze, &[1]).unwrap();
        db.enqueue_job(1, JobKind::Restart, &[2]).unwrap();
        db.enqueue_job(2, JobKind::Analyze, &[3]).unwrap();
        db.finish_job(done, JobStatus::Completed, None).unwrap();

        let open = db.open_jobs(1).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, JobKind::Restart);
    }
}
