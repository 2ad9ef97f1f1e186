//! Album suggestions: a compact best-of per category plus a cross-category
//! highlights album, regenerated as a whole on demand.

use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::analysis::Category;
use crate::db::{Database, GalleryPhoto};
use crate::llm::NarrativeBackend;

/// Share of a category's photos kept in its album.
const CURATED_PERCENT: usize = 30;
const MIN_PER_ALBUM: usize = 5;

/// Share of all curated photos promoted to highlights.
const HIGHLIGHTS_PERCENT: usize = 15;
const MIN_HIGHLIGHTS: usize = 10;
const MAX_HIGHLIGHTS: usize = 30;

const HIGHLIGHTS_KEY: &str = "_highlights";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlbumKey {
    Highlights,
    Category(Category),
}

impl AlbumKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlbumKey::Highlights => HIGHLIGHTS_KEY,
            AlbumKey::Category(category) => category.as_str(),
        }
    }

    /// Strict: only keys produced by [`as_str`](Self::as_str).
    pub fn from_key(key: &str) -> Option<Self> {
        if key == HIGHLIGHTS_KEY {
            Some(AlbumKey::Highlights)
        } else {
            Category::from_key(key).map(AlbumKey::Category)
        }
    }

    /// Label used when no generated name is available.
    pub fn fallback_name(&self) -> &'static str {
        match self {
            AlbumKey::Highlights => "Highlights",
            AlbumKey::Category(category) => category.display_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlbumSuggestion {
    /// `None` until persisted.
    pub id: Option<i64>,
    pub project_id: i64,
    pub key: AlbumKey,
    pub name: String,
    pub cover_photo_id: Option<i64>,
    pub photo_count: usize,
    /// Ranked members, best first.
    pub photo_ids: Vec<i64>,
}

/// `clamp(ceil(30% of n), 5, n)`: small categories are kept whole.
pub fn curated_count(n: usize) -> usize {
    let share = (n * CURATED_PERCENT).div_ceil(100);
    share.max(MIN_PER_ALBUM).min(n)
}

/// `clamp(ceil(15% of total_curated), 10, 30)`, never more than `available`.
pub fn highlight_count(total_curated: usize, available: usize) -> usize {
    let share = (total_curated * HIGHLIGHTS_PERCENT).div_ceil(100);
    share.clamp(MIN_HIGHLIGHTS, MAX_HIGHLIGHTS).min(available)
}

/// Descending with `None` last.
fn desc_none_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Best first: composite, then narrative score, then best-in-group, then
/// manual order.
fn rank(a: &GalleryPhoto, b: &GalleryPhoto) -> Ordering {
    desc_none_last(a.composite_score, b.composite_score)
        .then_with(|| desc_none_last(a.llm_score, b.llm_score))
        .then_with(|| b.best_in_group.cmp(&a.best_in_group))
        .then_with(|| a.sort_order.cmp(&b.sort_order))
        .then_with(|| a.id.cmp(&b.id))
}

fn suggestion(project_id: i64, key: AlbumKey, ranked: &[&GalleryPhoto], cover: Option<i64>) -> AlbumSuggestion {
    AlbumSuggestion {
        id: None,
        project_id,
        key,
        name: key.fallback_name().to_string(),
        cover_photo_id: cover,
        photo_count: ranked.len(),
        photo_ids: ranked.iter().map(|p| p.id).collect(),
    }
}

/// Compute the album set for a project's photos, with fallback names.
/// Highlights first, then categories in canonical order; empty categories
/// get no album.
pub fn plan_albums(project_id: i64, photos: &[GalleryPhoto]) -> Vec<AlbumSuggestion> {
    let mut groups: HashMap<Category, Vec<&GalleryPhoto>> = HashMap::new();
    for photo in photos.iter().filter(|p| !p.is_discarded()) {
        if let Some(category) = photo.category {
            groups.entry(category).or_default().push(photo);
        }
    }

    let mut category_albums = Vec::new();
    let mut curated: Vec<&GalleryPhoto> = Vec::new();
    for category in Category::ALL {
        let Some(mut members) = groups.remove(&category) else {
            continue;
        };
        members.sort_by(|a, b| rank(a, b));
        members.truncate(curated_count(members.len()));

        let cover = members.first().map(|p| p.id);
        category_albums.push(suggestion(project_id, AlbumKey::Category(category), &members, cover));
        curated.extend(members);
    }

    if curated.is_empty() {
        return Vec::new();
    }

    let total_curated = curated.len();
    curated.sort_by(|a, b| rank(a, b));
    curated.truncate(highlight_count(total_curated, total_curated));

    let highlights_cover = photos
        .iter()
        .filter(|p| !p.is_discarded() && p.composite_score.is_some())
        .min_by(|a, b| rank(a, b))
        .map(|p| p.id);

    let mut albums = Vec::with_capacity(category_albums.len() + 1);
    albums.push(suggestion(project_id, AlbumKey::Highlights, &curated, highlights_cover));
    albums.extend(category_albums);
    albums
}

pub struct AlbumCurator<'a> {
    db: &'a Database,
    narrative: Option<&'a dyn NarrativeBackend>,
}

impl<'a> AlbumCurator<'a> {
    pub fn new(db: &'a Database, narrative: Option<&'a dyn NarrativeBackend>) -> Self {
        Self { db, narrative }
    }

    /// Regenerate the project's suggestions, replacing any previous set.
    pub fn curate(&self, project_id: i64) -> Result<Vec<AlbumSuggestion>> {
        let photos = self
            .db
            .gallery_photos(project_id)
            .context("Failed to load photos for curation")?;
        let mut albums = plan_albums(project_id, &photos);

        if let (Some(narrative), false) = (self.narrative, albums.is_empty()) {
            let keys: Vec<AlbumKey> = albums.iter().map(|a| a.key).collect();
            match narrative.name_albums(&keys) {
                Ok(names) => {
                    for album in &mut albums {
                        if let Some(name) = names.get(&album.key) {
                            album.name = name.clone();
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(project_id, kind = e.kind(), error = %e, "Album naming failed, using default names");
                }
            }
        }

        let stored = self.db.replace_albums(project_id, &albums)?;
        tracing::info!(project_id, albums = stored.len(), "Album suggestions regenerated");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::photos::tests::{sample_analysis, seeded};
    use crate::error::InferenceError;
    use crate::vision::ImageRef;
    use crate::llm::PhotoJudgment;

    fn photo(id: i64, category: Option<Category>, composite: Option<f64>) -> GalleryPhoto {
        GalleryPhoto {
            id,
            sort_order: id,
            composite_score: composite,
            category,
            ..GalleryPhoto::default()
        }
    }

    #[test]
    fn test_curated_count() {
        assert_eq!(curated_count(0), 0);
        assert_eq!(curated_count(3), 3);
        assert_eq!(curated_count(10), 5);
        assert_eq!(curated_count(17), 6);
        assert_eq!(curated_count(100), 30);
    }

    #[test]
    fn test_highlight_count() {
        assert_eq!(highlight_count(20, 20), 10);
        assert_eq!(highlight_count(20, 4), 4);
        assert_eq!(highlight_count(100, 100), 15);
        assert_eq!(highlight_count(1000, 1000), 30);
    }

    #[test]
    fn test_ranking_ties() {
        let mut a = photo(1, None, Some(80.0));
        let mut b = photo(2, None, Some(80.0));
        a.llm_score = Some(7.0);
        b.llm_score = Some(8.0);
        assert_eq!(rank(&a, &b), Ordering::Greater);

        b.llm_score = Some(7.0);
        b.best_in_group = true;
        assert_eq!(rank(&a, &b), Ordering::Greater);

        b.best_in_group = false;
        assert_eq!(rank(&a, &b), Ordering::Less);

        assert_eq!(rank(&photo(3, None, None), &a), Ordering::Greater);
    }

    #[test]
    fn test_plan_groups_and_orders() {
        let mut photos: Vec<GalleryPhoto> = (0..10)
            .map(|i| photo(i, Some(Category::Party), Some(i as f64)))
            .collect();
        photos.push(photo(10, Some(Category::Ceremony), Some(50.0)));
        photos.push(photo(11, None, Some(99.0)));
        let mut discarded = photo(12, Some(Category::Ceremony), Some(100.0));
        discarded.discard_reason = Some("closed eyes".into());
        photos.push(discarded);

        let albums = plan_albums(7, &photos);
        let keys: Vec<AlbumKey> = albums.iter().map(|a| a.key).collect();
        assert_eq!(
            keys,
            vec![
                AlbumKey::Highlights,
                AlbumKey::Category(Category::Ceremony),
                AlbumKey::Category(Category::Party)
            ]
        );

        let party = &albums[2];
        assert_eq!(party.photo_ids, vec![9, 8, 7, 6, 5]);
        assert_eq!(party.cover_photo_id, Some(9));
        assert_eq!(party.name, "Party");

        let ceremony = &albums[1];
        assert_eq!(ceremony.photo_ids, vec![10]);

        // 6 curated photos, highlights capped by what exists
        let highlights = &albums[0];
        assert_eq!(highlights.photo_count, 6);
        assert_eq!(highlights.photo_ids[0], 10);
        // cover looks project-wide, uncategorized included
        assert_eq!(highlights.cover_photo_id, Some(11));
        assert!(albums.iter().all(|a| a.project_id == 7));
    }

    #[test]
    fn test_plan_without_categories_is_empty() {
        let photos = vec![photo(1, None, Some(50.0)), photo(2, None, None)];
        assert!(plan_albums(1, &photos).is_empty());
    }

    struct Namer {
        fail: bool,
    }

    impl NarrativeBackend for Namer {
        fn judge_batch(&self, _images: &[ImageRef]) -> Result<Vec<PhotoJudgment>, InferenceError> {
            Ok(Vec::new())
        }

        fn name_albums(&self, keys: &[AlbumKey]) -> Result<HashMap<AlbumKey, String>, InferenceError> {
            if self.fail {
                return Err(InferenceError::Timeout("slow".into()));
            }
            assert!(keys.contains(&AlbumKey::Highlights));
            Ok([(AlbumKey::Highlights, "The Best Of".to_string())].into_iter().collect())
        }

        fn model_name(&self) -> &str {
            "namer"
        }
    }

    fn analyzed_project() -> Database {
        let (db, ids) = seeded(1, 6);
        db.mark_queued(&ids).unwrap();
        for (i, id) in ids.iter().enumerate() {
            db.save_analysis(*id, &sample_analysis(40.0 + i as f64)).unwrap();
        }
        db
    }

    #[test]
    fn test_curate_uses_generated_names_with_fallback() {
        let db = analyzed_project();
        let namer = Namer { fail: false };
        let albums = AlbumCurator::new(&db, Some(&namer)).curate(1).unwrap();

        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].name, "The Best Of");
        assert_eq!(albums[1].name, Category::Ceremony.display_name());
        assert_eq!(albums[1].photo_count, 5);
        assert!(albums.iter().all(|a| a.id.is_some()));
        assert_eq!(db.albums(1).unwrap(), albums);
    }

    #[test]
    fn test_curate_survives_naming_failure() {
        let db = analyzed_project();
        let namer = Namer { fail: true };
        let albums = AlbumCurator::new(&db, Some(&namer)).curate(1).unwrap();
        assert_eq!(albums[0].name, "Highlights");
    }

    #[test]
    fn test_curate_clears_stale_albums() {
        let db = analyzed_project();
        AlbumCurator::new(&db, None).curate(1).unwrap();
        assert!(!db.albums(1).unwrap().is_empty());

        // same project, now nothing categorized
        db.conn.execute("UPDATE photos SET llm_category = NULL", []).unwrap();
        assert!(AlbumCurator::new(&db, None).curate(1).unwrap().is_empty());
        assert!(db.albums(1).unwrap().is_empty());
    }
}
