//! Batch dispatcher: queues photos, calls the inference backends in bounded
//! batches and persists every photo's outcome as it arrives.
//!
//! Nothing escapes [`Dispatcher::dispatch`]. Batch failures and item failures
//! both end as `FAILED` photos; the caller watches progress through the
//! persisted status counts.

use std::collections::HashMap;

use super::score::{composite, round1};
use super::{normalize, Emotion, NarrativeFields, PhotoAnalysis, PhotoRef};
use crate::db::Database;
use crate::error::InferenceError;
use crate::llm::{NarrativeBackend, PhotoJudgment, NARRATIVE_MAX_BATCH};
use crate::storage::UrlResolver;
use crate::vision::{ImageMetrics, ImageRef, MetricsBackend, METRICS_MAX_BATCH};

#[derive(Debug, thiserror::Error)]
enum BatchError {
    #[error("could not resolve image URL: {0:#}")]
    Resolve(anyhow::Error),

    #[error("{backend} backend failed: {source}")]
    Inference {
        backend: &'static str,
        #[source]
        source: InferenceError,
    },
}

impl BatchError {
    fn kind(&self) -> &'static str {
        match self {
            BatchError::Resolve(_) => "resolve",
            BatchError::Inference { source, .. } => source.kind(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    done: usize,
    failed: usize,
}

pub struct Dispatcher<'a> {
    db: &'a Database,
    resolver: &'a dyn UrlResolver,
    metrics: &'a dyn MetricsBackend,
    narrative: Option<&'a dyn NarrativeBackend>,
    batch_size: usize,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        db: &'a Database,
        resolver: &'a dyn UrlResolver,
        metrics: &'a dyn MetricsBackend,
    ) -> Self {
        Self {
            db,
            resolver,
            metrics,
            narrative: None,
            batch_size: METRICS_MAX_BATCH,
        }
    }

    pub fn with_narrative(mut self, narrative: Option<&'a dyn NarrativeBackend>) -> Self {
        self.narrative = narrative;
        self.batch_size = self.batch_size.min(self.max_batch());
        self
    }

    /// Requested batch size, clamped to what the enabled backends accept.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, self.max_batch());
        self
    }

    fn max_batch(&self) -> usize {
        match self.narrative {
            Some(_) => METRICS_MAX_BATCH.min(NARRATIVE_MAX_BATCH),
            None => METRICS_MAX_BATCH,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Analyze `photos`. Photos already `DONE` are skipped; the rest are
    /// queued in one statement before any backend is called.
    pub fn dispatch(&self, photos: &[PhotoRef]) {
        if photos.is_empty() {
            return;
        }

        let ids: Vec<i64> = photos.iter().map(|p| p.id).collect();
        let photos = match self.db.unfinished_photo_refs(&ids) {
            Ok(photos) => photos,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load photos for dispatch");
                return;
            }
        };
        if photos.is_empty() {
            tracing::debug!("Nothing to dispatch, every photo is already analyzed");
            return;
        }

        let queued_ids: Vec<i64> = photos.iter().map(|p| p.id).collect();
        if let Err(e) = self.db.mark_queued(&queued_ids) {
            tracing::error!(error = %e, "Failed to queue photos, dispatch aborted");
            return;
        }

        let batch_count = photos.len().div_ceil(self.batch_size);
        tracing::info!(
            photos = photos.len(),
            batches = batch_count,
            batch_size = self.batch_size,
            narrative = self.narrative.is_some(),
            "Dispatching analysis"
        );

        let mut total = Tally::default();
        for (index, batch) in photos.chunks(self.batch_size).enumerate() {
            let tally = match self.run_batch(batch) {
                Ok(tally) => tally,
                Err(e) => {
                    tracing::warn!(
                        batch = index,
                        kind = e.kind(),
                        error = %e,
                        "Analysis batch failed"
                    );
                    self.fail_photos(batch)
                }
            };
            tracing::debug!(batch = index, done = tally.done, failed = tally.failed, "Batch finished");
            total.done += tally.done;
            total.failed += tally.failed;
        }

        tracing::info!(done = total.done, failed = total.failed, "Analysis dispatch finished");
    }

    fn run_batch(&self, batch: &[PhotoRef]) -> Result<Tally, BatchError> {
        let images = batch
            .iter()
            .map(|photo| -> anyhow::Result<ImageRef> {
                Ok(ImageRef {
                    url: self.resolver.resolve(photo.analysis_key())?,
                    correlation_id: photo.id.to_string(),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(BatchError::Resolve)?;

        let metrics = self
            .metrics
            .analyze_batch(&images)
            .map_err(|source| BatchError::Inference {
                backend: self.metrics.backend_name(),
                source,
            })?;
        let metrics: HashMap<String, ImageMetrics> = metrics
            .into_iter()
            .filter_map(|m| m.image_id.clone().map(|id| (id, m)))
            .collect();

        let judgments = match self.narrative {
            Some(narrative) => {
                let judgments = narrative
                    .judge_batch(&images)
                    .map_err(|source| BatchError::Inference {
                        backend: "narrative",
                        source,
                    })?;
                let by_id: HashMap<String, PhotoJudgment> = judgments
                    .into_iter()
                    .map(|j| (j.photo_id.clone(), j))
                    .collect();
                Some((narrative.model_name(), by_id))
            }
            None => None,
        };

        let mut tally = Tally::default();
        for photo in batch {
            let key = photo.id.to_string();
            let assembled = assemble(
                metrics.get(&key),
                judgments
                    .as_ref()
                    .map(|(model, by_id)| (*model, by_id.get(&key))),
            );

            match assembled {
                Ok(analysis) => match self.db.save_analysis(photo.id, &analysis) {
                    Ok(true) => tally.done += 1,
                    Ok(false) => {
                        tracing::debug!(photo_id = photo.id, "Photo no longer queued, result dropped");
                    }
                    Err(e) => {
                        tracing::error!(photo_id = photo.id, error = %e, "Failed to save analysis");
                        tally.failed += self.fail_photos(std::slice::from_ref(photo)).failed;
                    }
                },
                Err(reason) => {
                    tracing::warn!(photo_id = photo.id, error = %reason, "Photo analysis failed");
                    tally.failed += self.fail_photos(std::slice::from_ref(photo)).failed;
                }
            }
        }
        Ok(tally)
    }

    fn fail_photos(&self, photos: &[PhotoRef]) -> Tally {
        let ids: Vec<i64> = photos.iter().map(|p| p.id).collect();
        match self.db.mark_failed(&ids) {
            Ok(failed) => Tally { done: 0, failed },
            Err(e) => {
                tracing::error!(photos = ?ids, error = %e, "Failed to mark photos as failed");
                Tally::default()
            }
        }
    }
}

/// Combine one photo's backend results into what is persisted on `DONE`.
///
/// `narrative` is `None` when no narrative backend is configured, and
/// `Some((model, None))` when it ran but returned nothing for this photo.
fn assemble(
    metrics: Option<&ImageMetrics>,
    narrative: Option<(&str, Option<&PhotoJudgment>)>,
) -> Result<PhotoAnalysis, String> {
    let metrics = metrics.ok_or("no metrics result for photo")?;
    if let Some(ref error) = metrics.error {
        return Err(format!("metrics backend: {}", error));
    }
    let blur = metrics
        .blur
        .as_ref()
        .ok_or("metrics result lacks blur")?
        .laplacian_variance;
    let technical_quality = metrics
        .quality
        .as_ref()
        .ok_or("metrics result lacks quality")?
        .brisque_score;
    let aesthetic = metrics
        .aesthetic
        .as_ref()
        .ok_or("metrics result lacks aesthetic")?
        .nima_aesthetic_score;

    let judgment = match narrative {
        Some((model, Some(judgment))) => Some((model, judgment)),
        Some((_, None)) => return Err("no narrative result for photo".to_string()),
        None => None,
    };

    let judged_emotion = judgment.and_then(|(_, j)| {
        let emotion = j.emotion.as_ref()?;
        Some(Emotion {
            label: emotion.label.clone(),
            valence: emotion.valence?.clamp(-1.0, 1.0),
        })
    });
    let emotion = judged_emotion.or_else(|| {
        let faces = metrics.emotion.as_ref()?;
        Some(Emotion {
            label: faces.dominant_label(),
            valence: faces.mean_valence()?,
        })
    });

    let narrative = match judgment {
        Some((model, j)) => Some(narrative_fields(model, j)?),
        None => None,
    };

    Ok(PhotoAnalysis {
        blur,
        technical_quality,
        aesthetic,
        composite: composite(blur, aesthetic, technical_quality, emotion.as_ref().map(|e| e.valence)),
        emotion,
        narrative,
    })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn narrative_fields(model: &str, judgment: &PhotoJudgment) -> Result<NarrativeFields, String> {
    let score = judgment
        .overall_score
        .filter(|s| s.is_finite())
        .ok_or("narrative result lacks overallScore")?;

    let mut tags: Vec<String> = Vec::with_capacity(judgment.tags.len());
    for tag in &judgment.tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    Ok(NarrativeFields {
        model: model.to_string(),
        score: round1(score.clamp(1.0, 10.0)),
        summary: judgment.summary.trim().to_string(),
        discard_reason: judgment.discard_reason().map(str::to_string),
        best_in_group: judgment.best_in_group,
        composition: non_empty(&judgment.composition),
        pose_quality: non_empty(&judgment.pose_quality),
        background_quality: non_empty(&judgment.background_quality),
        highlights: judgment.highlights.clone(),
        issues: judgment.issues.clone(),
        category: normalize(&judgment.category),
        tags,
        tokens_used: judgment.tokens_used,
    })
}
