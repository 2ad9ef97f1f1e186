//! Photo rows and the analysis state transitions.

use anyhow::Result;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::{now_timestamp, placeholders, Database};
use crate::analysis::{AnalysisStatus, Category, PhotoAnalysis, PhotoRef, StatusCounts};

/// A confirmed upload, as handed over by the upload path.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub object_key: String,
    pub thumbnail_key: Option<String>,
    pub original_filename: Option<String>,
}

/// The analysis fields curation and reordering read.
#[derive(Debug, Clone, Default)]
pub struct GalleryPhoto {
    pub id: i64,
    pub sort_order: i64,
    pub status: Option<AnalysisStatus>,
    pub composite_score: Option<f64>,
    pub llm_score: Option<f64>,
    pub discard_reason: Option<String>,
    pub best_in_group: bool,
    pub category: Option<Category>,
    pub tags: Vec<String>,
    pub emotion_valence: Option<f64>,
    pub selected: bool,
}

impl GalleryPhoto {
    pub fn is_discarded(&self) -> bool {
        self.discard_reason.is_some()
    }
}

fn json_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

fn gallery_photo_from_row(row: &Row<'_>) -> rusqlite::Result<GalleryPhoto> {
    let status: String = row.get(2)?;
    let category: Option<String> = row.get(7)?;
    Ok(GalleryPhoto {
        id: row.get(0)?,
        sort_order: row.get(1)?,
        status: AnalysisStatus::from_str(&status),
        composite_score: row.get(3)?,
        llm_score: row.get(4)?,
        discard_reason: row.get(5)?,
        best_in_group: row.get::<_, Option<bool>>(6)?.unwrap_or(false),
        category: category.as_deref().and_then(Category::from_key),
        tags: json_list(row.get(8)?),
        emotion_valence: row.get(9)?,
        selected: row.get(10)?,
    })
}

impl Database {
    /// Register confirmed uploads, appending them after the project's
    /// current last photo. Returns the new ids in input order.
    pub fn insert_photos(&self, project_id: i64, uploads: &[NewPhoto]) -> Result<Vec<i64>> {
        let tx = self.conn.unchecked_transaction()?;
        let last_order: Option<i64> = tx.query_row(
            "SELECT MAX(sort_order) FROM photos WHERE project_id = ?",
            [project_id],
            |row| row.get(0),
        )?;
        let start = last_order.map(|o| o + 1).unwrap_or(0);

        let mut ids = Vec::with_capacity(uploads.len());
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO photos (project_id, object_key, thumbnail_key, original_filename, sort_order)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )?;
            for (index, upload) in uploads.iter().enumerate() {
                stmt.execute(params![
                    project_id,
                    upload.object_key,
                    upload.thumbnail_key,
                    upload.original_filename,
                    start + index as i64,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Photos of a project in any of the given states, in manual order.
    pub fn photos_with_status(
        &self,
        project_id: i64,
        statuses: &[AnalysisStatus],
    ) -> Result<Vec<PhotoRef>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT id, object_key, thumbnail_key FROM photos
            WHERE project_id = ? AND ai_status IN ({})
            ORDER BY sort_order ASC, id ASC
            "#,
            placeholders(statuses.len())
        );
        let mut values: Vec<rusqlite::types::Value> = vec![project_id.into()];
        values.extend(statuses.iter().map(|s| s.as_str().to_string().into()));

        let mut stmt = self.conn.prepare(&sql)?;
        let photos = stmt
            .query_map(params_from_iter(values), |row| {
                Ok(PhotoRef {
                    id: row.get(0)?,
                    object_key: row.get(1)?,
                    thumbnail_key: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    /// References for the given ids that have not finished analysis yet.
    pub fn unfinished_photo_refs(&self, ids: &[i64]) -> Result<Vec<PhotoRef>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT id, object_key, thumbnail_key FROM photos
            WHERE id IN ({}) AND ai_status <> 'DONE'
            ORDER BY sort_order ASC, id ASC
            "#,
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let photos = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok(PhotoRef {
                    id: row.get(0)?,
                    object_key: row.get(1)?,
                    thumbnail_key: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    /// Move photos to `QUEUED` in a single statement. `DONE` photos are
    /// never requeued; already-queued ones stay queued.
    pub fn mark_queued(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            r#"
            UPDATE photos
            SET ai_status = 'QUEUED', composite_score = NULL
            WHERE id IN ({}) AND ai_status <> 'DONE'
            "#,
            placeholders(ids.len())
        );
        Ok(self.conn.execute(&sql, params_from_iter(ids.iter()))?)
    }

    /// `QUEUED -> FAILED` for the given photos.
    pub fn mark_failed(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            r#"
            UPDATE photos
            SET ai_status = 'FAILED', ai_processed_at = ?, composite_score = NULL
            WHERE id IN ({}) AND ai_status = 'QUEUED'
            "#,
            placeholders(ids.len())
        );
        let mut values: Vec<rusqlite::types::Value> = vec![now_timestamp().into()];
        values.extend(ids.iter().map(|id| (*id).into()));
        Ok(self.conn.execute(&sql, params_from_iter(values))?)
    }

    /// Release every queued photo of a project back to `FAILED`.
    pub fn reset_queued(&self, project_id: i64) -> Result<usize> {
        let changed = self.conn.execute(
            r#"
            UPDATE photos
            SET ai_status = 'FAILED', ai_processed_at = ?, composite_score = NULL
            WHERE project_id = ? AND ai_status = 'QUEUED'
            "#,
            params![now_timestamp(), project_id],
        )?;
        Ok(changed)
    }

    /// `QUEUED -> DONE` with the full analysis. Returns false when the photo
    /// was no longer queued (e.g. released by a restart) and nothing changed.
    pub fn save_analysis(&self, photo_id: i64, analysis: &PhotoAnalysis) -> Result<bool> {
        let now = now_timestamp();
        let emotion_label = analysis.emotion.as_ref().and_then(|e| e.label.clone());
        let emotion_valence = analysis.emotion.as_ref().map(|e| e.valence);
        let narrative = analysis.narrative.as_ref();

        let highlights = narrative.map(|n| serde_json::to_string(&n.highlights)).transpose()?;
        let issues = narrative.map(|n| serde_json::to_string(&n.issues)).transpose()?;
        let tags = narrative.map(|n| serde_json::to_string(&n.tags)).transpose()?;

        let changed = self.conn.execute(
            r#"
            UPDATE photos SET
                ai_status = 'DONE',
                ai_processed_at = ?1,
                ai_completed_at = ?1,
                blur_score = ?2,
                quality_score = ?3,
                aesthetic_score = ?4,
                emotion_label = ?5,
                emotion_valence = ?6,
                composite_score = ?7,
                llm_model = ?8,
                llm_score = ?9,
                llm_summary = ?10,
                llm_discard_reason = ?11,
                llm_best_in_group = ?12,
                llm_composition = ?13,
                llm_pose_quality = ?14,
                llm_background_quality = ?15,
                llm_highlights = ?16,
                llm_issues = ?17,
                llm_category = ?18,
                llm_tags = ?19,
                llm_tokens_used = ?20
            WHERE id = ?21 AND ai_status = 'QUEUED'
            "#,
            params![
                now,
                analysis.blur,
                analysis.technical_quality,
                analysis.aesthetic,
                emotion_label,
                emotion_valence,
                analysis.composite,
                narrative.map(|n| n.model.as_str()),
                narrative.map(|n| n.score),
                narrative.map(|n| n.summary.as_str()),
                narrative.and_then(|n| n.discard_reason.as_deref()),
                narrative.map(|n| n.best_in_group),
                narrative.and_then(|n| n.composition.as_deref()),
                narrative.and_then(|n| n.pose_quality.as_deref()),
                narrative.and_then(|n| n.background_quality.as_deref()),
                highlights,
                issues,
                narrative.map(|n| n.category.as_str()),
                tags,
                narrative.and_then(|n| n.tokens_used),
                photo_id,
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn photo_status(&self, photo_id: i64) -> Result<Option<AnalysisStatus>> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT ai_status FROM photos WHERE id = ?",
                [photo_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.as_deref().and_then(AnalysisStatus::from_str))
    }

    pub fn status_counts(&self, project_id: i64) -> Result<StatusCounts> {
        let mut stmt = self.conn.prepare(
            "SELECT ai_status, COUNT(*) FROM photos WHERE project_id = ? GROUP BY ai_status",
        )?;
        let rows = stmt
            .query_map([project_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            if let Some(status) = AnalysisStatus::from_str(&status) {
                counts.add(status, count.max(0) as u64);
            }
        }
        Ok(counts)
    }

    /// All photos of a project with the fields curation reads, in manual order.
    pub fn gallery_photos(&self, project_id: i64) -> Result<Vec<GalleryPhoto>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.id, p.sort_order, p.ai_status, p.composite_score, p.llm_score,
                   p.llm_discard_reason, p.llm_best_in_group, p.llm_category, p.llm_tags,
                   p.emotion_valence, s.id IS NOT NULL
            FROM photos p
            LEFT JOIN selections s ON s.photo_id = p.id
            WHERE p.project_id = ?
            ORDER BY p.sort_order ASC, p.id ASC
            "#,
        )?;
        let photos = stmt
            .query_map([project_id], gallery_photo_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    /// Persist a client-facing ranking; position in `ordered_ids` becomes the rank.
    pub fn set_client_order(&self, project_id: i64, ordered_ids: &[i64]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE photos SET client_order = NULL WHERE project_id = ?",
            [project_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "UPDATE photos SET client_order = ? WHERE id = ? AND project_id = ?",
            )?;
            for (rank, id) in ordered_ids.iter().enumerate() {
                stmt.execute(params![rank as i64, id, project_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn clear_client_order(&self, project_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE photos SET client_order = NULL WHERE project_id = ?",
            [project_id],
        )?;
        Ok(())
    }

    /// Photo ids in the order the client gallery shows them.
    pub fn client_order(&self, project_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id FROM photos
            WHERE project_id = ?
            ORDER BY client_order IS NULL, client_order ASC, sort_order ASC, id ASC
            "#,
        )?;
        let ids = stmt
            .query_map([project_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::{Emotion, NarrativeFields};

    pub(crate) fn seeded(project_id: i64, count: usize) -> (Database, Vec<i64>) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let ids = insert(&db, project_id, count);
        (db, ids)
    }

    pub(crate) fn insert(db: &Database, project_id: i64, count: usize) -> Vec<i64> {
        let uploads: Vec<NewPhoto> = (0..count)
            .map(|i| NewPhoto {
                object_key: format!("p{}/orig/{}.jpg", project_id, i),
                thumbnail_key: Some(format!("p{}/thumb/{}.webp", project_id, i)),
                original_filename: Some(format!("IMG_{:04}.jpg", i)),
            })
            .collect();
        db.insert_photos(project_id, &uploads).unwrap()
    }

    pub(crate) fn sample_analysis(composite: f64) -> PhotoAnalysis {
        PhotoAnalysis {
            blur: 120.0,
            technical_quality: 20.0,
            aesthetic: 7.0,
            emotion: Some(Emotion { label: Some("happy".into()), valence: 0.6 }),
            composite,
            narrative: Some(NarrativeFields {
                model: "test-model".into(),
                score: 7.4,
                summary: "Bride laughing".into(),
                discard_reason: None,
                best_in_group: true,
                composition: Some("rule of thirds".into()),
                pose_quality: None,
                background_quality: Some("soft bokeh".into()),
                highlights: vec!["smile".into()],
                issues: vec![],
                category: Category::Ceremony,
                tags: vec!["bride".into(), "rings".into()],
                tokens_used: Some(1800),
            }),
        }
    }

    #[test]
    fn test_insert_appends_sort_order() {
        let (db, first) = seeded(1, 2);
        let second = insert(&db, 1, 2);
        let photos = db.gallery_photos(1).unwrap();
        let orders: Vec<i64> = photos.iter().map(|p| p.sort_order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
        assert_eq!(photos[0].id, first[0]);
        assert_eq!(photos[3].id, second[1]);
    }

    #[test]
    fn test_state_transitions() {
        let (db, ids) = seeded(1, 3);
        assert_eq!(db.mark_queued(&ids).unwrap(), 3);
        assert_eq!(db.photo_status(ids[0]).unwrap(), Some(AnalysisStatus::Queued));

        assert!(db.save_analysis(ids[0], &sample_analysis(71.0)).unwrap());
        assert_eq!(db.mark_failed(&ids[1..2]).unwrap(), 1);

        // DONE is never requeued or failed
        assert_eq!(db.mark_queued(&ids[0..1]).unwrap(), 0);
        assert_eq!(db.mark_failed(&ids[0..1]).unwrap(), 0);
        // only queued photos can complete
        assert!(!db.save_analysis(ids[1], &sample_analysis(10.0)).unwrap());

        let counts = db.status_counts(1).unwrap();
        assert_eq!(counts.done, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.queued, 1);
    }

    #[test]
    fn test_composite_only_on_done() {
        let (db, ids) = seeded(1, 2);
        db.mark_queued(&ids).unwrap();
        db.save_analysis(ids[0], &sample_analysis(64.2)).unwrap();
        db.mark_failed(&ids[1..]).unwrap();

        for photo in db.gallery_photos(1).unwrap() {
            match photo.status {
                Some(AnalysisStatus::Done) => {
                    let score = photo.composite_score.unwrap();
                    assert!((0.0..=100.0).contains(&score));
                }
                _ => assert!(photo.composite_score.is_none()),
            }
        }
    }

    #[test]
    fn test_saved_narrative_fields_round_trip() {
        let (db, ids) = seeded(1, 1);
        db.mark_queued(&ids).unwrap();
        db.save_analysis(ids[0], &sample_analysis(80.0)).unwrap();

        let photo = &db.gallery_photos(1).unwrap()[0];
        assert_eq!(photo.category, Some(Category::Ceremony));
        assert_eq!(photo.tags, vec!["bride".to_string(), "rings".to_string()]);
        assert_eq!(photo.llm_score, Some(7.4));
        assert_eq!(photo.emotion_valence, Some(0.6));
        assert!(photo.best_in_group);
        assert!(!photo.is_discarded());

        let tokens: Option<i64> = db
            .conn
            .query_row("SELECT llm_tokens_used FROM photos WHERE id = ?", [ids[0]], |row| row.get(0))
            .unwrap();
        assert_eq!(tokens, Some(1800));
    }

    #[test]
    fn test_reset_queued_is_scoped_to_project() {
        let (db, ids) = seeded(1, 2);
        let other = insert(&db, 2, 2);
        db.mark_queued(&ids).unwrap();
        db.mark_queued(&other).unwrap();

        assert_eq!(db.reset_queued(1).unwrap(), 2);
        assert_eq!(db.status_counts(1).unwrap().failed, 2);
        assert_eq!(db.status_counts(2).unwrap().queued, 2);
    }

    #[test]
    fn test_photos_with_status_filters() {
        let (db, ids) = seeded(1, 3);
        db.mark_queued(&ids[..1]).unwrap();
        let dispatchable = db
            .photos_with_status(1, &[AnalysisStatus::Pending, AnalysisStatus::Failed])
            .unwrap();
        assert_eq!(dispatchable.len(), 2);
        assert_eq!(dispatchable[0].id, ids[1]);
        assert!(db.photos_with_status(1, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_client_order_falls_back_to_manual() {
        let (db, ids) = seeded(1, 3);
        assert_eq!(db.client_order(1).unwrap(), ids);

        db.set_client_order(1, &[ids[2], ids[0], ids[1]]).unwrap();
        assert_eq!(db.client_order(1).unwrap(), vec![ids[2], ids[0], ids[1]]);

        db.clear_client_order(1).unwrap();
        assert_eq!(db.client_order(1).unwrap(), ids);
    }
}
