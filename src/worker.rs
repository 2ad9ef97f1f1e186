//! Job execution shared by `proofsheet-worker` and the CLI's inline mode.

use anyhow::{Context, Result};
use chrono::Duration;

use crate::analysis::Dispatcher;
use crate::config::Config;
use crate::db::{AnalysisJob, Database, JobStatus};
use crate::llm::{NarrativeBackend, NarrativeClient};
use crate::storage::{SignedUrlResolver, UrlResolver};
use crate::vision::{HttpMetricsClient, MetricsBackend};

/// Inference clients, built once per process and lent to every dispatch.
pub struct Backends {
    pub resolver: Box<dyn UrlResolver>,
    pub metrics: Box<dyn MetricsBackend>,
    pub narrative: Option<Box<dyn NarrativeBackend>>,
    pub batch_size: usize,
}

impl Backends {
    pub fn from_config(config: &Config) -> Self {
        let narrative: Option<Box<dyn NarrativeBackend>> = if config.narrative.enabled {
            let client = NarrativeClient::from_config(&config.narrative);
            tracing::info!(
                provider = client.provider_name(),
                model = %config.narrative.model,
                "Narrative backend enabled"
            );
            Some(Box::new(client))
        } else {
            None
        };

        Self {
            resolver: Box::new(SignedUrlResolver::from_config(&config.storage)),
            metrics: Box::new(HttpMetricsClient::from_config(&config.metrics)),
            narrative,
            batch_size: config.dispatch_batch_size(),
        }
    }

    pub fn narrative(&self) -> Option<&dyn NarrativeBackend> {
        self.narrative.as_deref()
    }

    pub fn dispatcher<'a>(&'a self, db: &'a Database) -> Dispatcher<'a> {
        Dispatcher::new(db, self.resolver.as_ref(), self.metrics.as_ref())
            .with_narrative(self.narrative())
            .with_batch_size(self.batch_size)
    }
}

/// Dispatch the photos of one job that are not analyzed yet.
pub fn run_job(db: &Database, backends: &Backends, job: &AnalysisJob) -> Result<()> {
    let photos = db
        .unfinished_photo_refs(&job.photo_ids)
        .with_context(|| format!("Failed to load photos for job {}", job.id))?;
    tracing::info!(
        job_id = job.id,
        project_id = job.project_id,
        kind = job.kind.as_str(),
        attempt = job.attempts,
        photos = photos.len(),
        "Running analysis job"
    );
    backends.dispatcher(db).dispatch(&photos);
    Ok(())
}

/// Requeue expired leases, then drain the queue. Returns how many jobs ran.
pub fn run_pending(
    db: &Database,
    backends: &Backends,
    lease: Duration,
    max_attempts: u32,
) -> Result<usize> {
    let requeued = db.requeue_expired_jobs(lease, max_attempts)?;
    if requeued > 0 {
        tracing::warn!(requeued, "Requeued analysis jobs with expired leases");
    }

    let mut ran = 0;
    while let Some(job) = db.claim_next_job()? {
        match run_job(db, backends, &job) {
            Ok(()) => db.finish_job(job.id, JobStatus::Completed, None)?,
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "Analysis job failed");
                db.finish_job(job.id, JobStatus::Failed, Some(&format!("{:#}", e)))?;
            }
        }
        ran += 1;
    }
    Ok(ran)
}
