//! Taste-based reordering of the client gallery.
//!
//! Once a client has marked enough favorites, the photos they have not
//! picked yet are ranked by how closely they resemble the favorites.

use anyhow::Result;
use std::collections::HashMap;

use crate::analysis::Category;
use crate::db::{Database, GalleryPhoto};

/// Favorites needed before any reordering happens.
pub const MIN_FAVORITES: usize = 5;
/// After the first reorder, recompute every this many selections.
pub const RECOMPUTE_EVERY: usize = 3;

const TAG_WEIGHT: f64 = 2.0;
const CATEGORY_WEIGHT: f64 = 3.0;
const VALENCE_BONUS: f64 = 1.0;
const VALENCE_TOLERANCE: f64 = 0.3;
const COMPOSITE_WEIGHT: f64 = 0.1;
const DISCARD_PENALTY: f64 = 5.0;
const DEFAULT_COMPOSITE: f64 = 50.0;

/// Whether a selection count should trigger a fresh ranking.
pub fn should_recompute(selected: usize) -> bool {
    selected == MIN_FAVORITES
        || (selected > MIN_FAVORITES && (selected - MIN_FAVORITES) % RECOMPUTE_EVERY == 0)
}

/// Aggregate of the favorited photos. Frequencies are relative to the
/// number of favorites.
#[derive(Debug, Clone, Default)]
pub struct TasteProfile {
    pub tag_frequency: HashMap<String, f64>,
    pub category_frequency: HashMap<Category, f64>,
    /// Most frequent favorite category; ties go to the earlier canonical one.
    pub top_category: Option<Category>,
    pub mean_valence: Option<f64>,
    pub mean_composite: f64,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

impl TasteProfile {
    pub fn from_favorites(favorites: &[&GalleryPhoto]) -> Self {
        let total = favorites.len().max(1) as f64;

        let mut tag_frequency: HashMap<String, f64> = HashMap::new();
        let mut category_frequency: HashMap<Category, f64> = HashMap::new();
        for photo in favorites {
            for tag in &photo.tags {
                *tag_frequency.entry(tag.clone()).or_default() += 1.0;
            }
            if let Some(category) = photo.category {
                *category_frequency.entry(category).or_default() += 1.0;
            }
        }
        tag_frequency.values_mut().for_each(|v| *v /= total);
        category_frequency.values_mut().for_each(|v| *v /= total);

        let mut top_category: Option<(Category, f64)> = None;
        for category in Category::ALL {
            if let Some(&freq) = category_frequency.get(&category) {
                if top_category.map_or(true, |(_, best)| freq > best) {
                    top_category = Some((category, freq));
                }
            }
        }

        Self {
            tag_frequency,
            category_frequency,
            top_category: top_category.map(|(category, _)| category),
            mean_valence: mean(favorites.iter().filter_map(|p| p.emotion_valence)),
            mean_composite: mean(favorites.iter().filter_map(|p| p.composite_score))
                .unwrap_or(DEFAULT_COMPOSITE),
        }
    }

    pub fn affinity(&self, photo: &GalleryPhoto) -> f64 {
        let mut score = 0.0;

        for tag in &photo.tags {
            if let Some(freq) = self.tag_frequency.get(tag) {
                score += TAG_WEIGHT * freq;
            }
        }

        if let Some(top) = self.top_category.filter(|top| photo.category == Some(*top)) {
            if let Some(freq) = self.category_frequency.get(&top) {
                score += CATEGORY_WEIGHT * freq;
            }
        }

        if let (Some(mean), Some(valence)) = (self.mean_valence, photo.emotion_valence) {
            if (valence - mean).abs() <= VALENCE_TOLERANCE {
                score += VALENCE_BONUS;
            }
        }

        score += COMPOSITE_WEIGHT * photo.composite_score.unwrap_or(self.mean_composite);

        if photo.is_discarded() {
            score -= DISCARD_PENALTY;
        }
        score
    }
}

/// Gallery order for a project's photos, given in manual order.
///
/// Favorites keep their relative order and come first; the rest follow by
/// descending affinity, ties in manual order. With fewer than
/// [`MIN_FAVORITES`] favorites the manual order is returned unchanged.
pub fn compute_order(photos: &[GalleryPhoto]) -> Vec<i64> {
    let (favorites, others): (Vec<&GalleryPhoto>, Vec<&GalleryPhoto>) =
        photos.iter().partition(|p| p.selected);

    if favorites.len() < MIN_FAVORITES {
        return photos.iter().map(|p| p.id).collect();
    }

    let profile = TasteProfile::from_favorites(&favorites);
    let mut scored: Vec<(f64, i64)> = others
        .iter()
        .map(|p| (profile.affinity(p), p.id))
        .collect();
    // sort_by is stable, so equal scores keep manual order
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    favorites
        .iter()
        .map(|p| p.id)
        .chain(scored.into_iter().map(|(_, id)| id))
        .collect()
}

pub struct AffinityEngine<'a> {
    db: &'a Database,
}

impl<'a> AffinityEngine<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn compute_order(&self, project_id: i64) -> Result<Vec<i64>> {
        let photos = self.db.gallery_photos(project_id)?;
        Ok(compute_order(&photos))
    }

    /// Compute and persist the client order.
    pub fn refresh(&self, project_id: i64) -> Result<Vec<i64>> {
        let order = self.compute_order(project_id)?;
        self.db.set_client_order(project_id, &order)?;
        tracing::debug!(project_id, photos = order.len(), "Client order refreshed");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(id: i64, selected: bool) -> GalleryPhoto {
        GalleryPhoto {
            id,
            sort_order: id,
            selected,
            ..GalleryPhoto::default()
        }
    }

    fn tagged(id: i64, selected: bool, tags: &[&str], category: Option<Category>) -> GalleryPhoto {
        GalleryPhoto {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            category,
            ..photo(id, selected)
        }
    }

    #[test]
    fn test_recompute_trigger() {
        let triggers: Vec<usize> = (0..15).filter(|n| should_recompute(*n)).collect();
        assert_eq!(triggers, vec![5, 8, 11, 14]);
    }

    #[test]
    fn test_under_five_favorites_keeps_manual_order() {
        let photos: Vec<GalleryPhoto> = (1..=8).map(|i| photo(i, i % 2 == 0)).collect();
        assert_eq!(compute_order(&photos), (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_favorites_lead_in_relative_order() {
        let photos: Vec<GalleryPhoto> = (1..=10).map(|i| photo(i, i > 5)).collect();
        let order = compute_order(&photos);
        assert_eq!(&order[..5], &[6, 7, 8, 9, 10]);
        // all others tie, manual order survives
        assert_eq!(&order[5..], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_similar_photos_rank_higher() {
        let mut photos = vec![
            tagged(1, false, &["cake"], Some(Category::Food)),
            tagged(2, false, &["dance", "night"], Some(Category::Party)),
            tagged(3, false, &[], Some(Category::Party)),
        ];
        for id in 10..15 {
            photos.push(tagged(id, true, &["dance"], Some(Category::Party)));
        }
        let order = compute_order(&photos);
        assert_eq!(&order[5..], &[2, 3, 1]);
    }

    #[test]
    fn test_profile_is_relative() {
        let favorites = [
            tagged(1, true, &["dance"], Some(Category::Party)),
            tagged(2, true, &["dance"], None),
            tagged(3, true, &[], None),
            tagged(4, true, &[], None),
        ];
        let refs: Vec<&GalleryPhoto> = favorites.iter().collect();
        let profile = TasteProfile::from_favorites(&refs);
        assert_eq!(profile.tag_frequency["dance"], 0.5);
        assert_eq!(profile.category_frequency[&Category::Party], 0.25);
        assert_eq!(profile.top_category, Some(Category::Party));
        assert_eq!(profile.mean_valence, None);
        assert_eq!(profile.mean_composite, DEFAULT_COMPOSITE);
    }

    #[test]
    fn test_affinity_terms() {
        let profile = TasteProfile {
            tag_frequency: [("dance".to_string(), 0.5)].into_iter().collect(),
            category_frequency: [(Category::Party, 1.0)].into_iter().collect(),
            top_category: Some(Category::Party),
            mean_valence: Some(0.5),
            mean_composite: 60.0,
        };
        let mut candidate = tagged(1, false, &["dance"], Some(Category::Party));
        candidate.emotion_valence = Some(0.7);
        // 2*0.5 + 3*1.0 + 1 + 0.1*60
        assert!((profile.affinity(&candidate) - 11.0).abs() < 1e-9);

        candidate.discard_reason = Some("blurry".into());
        candidate.composite_score = Some(20.0);
        // 2*0.5 + 3*1.0 + 1 + 0.1*20 - 5
        assert!((profile.affinity(&candidate) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_only_top_category_earns_bonus() {
        let mut photos = vec![
            tagged(1, false, &[], None),
            tagged(2, false, &[], Some(Category::Food)),
        ];
        for id in 10..13 {
            photos.push(tagged(id, true, &[], Some(Category::Party)));
        }
        for id in 13..15 {
            photos.push(tagged(id, true, &[], Some(Category::Food)));
        }
        let order = compute_order(&photos);
        // food is a minority favorite category, so both candidates tie
        assert_eq!(&order[5..], &[1, 2]);
    }

    #[test]
    fn test_top_category_tie_uses_canonical_order() {
        let favorites = [
            tagged(1, true, &[], Some(Category::Party)),
            tagged(2, true, &[], Some(Category::Ceremony)),
        ];
        let refs: Vec<&GalleryPhoto> = favorites.iter().collect();
        let profile = TasteProfile::from_favorites(&refs);
        assert_eq!(profile.top_category, Some(Category::Ceremony));
    }

    #[test]
    fn test_refresh_persists_order() {
        let (db, ids) = crate::db::photos::tests::seeded(1, 7);
        for id in &ids[2..] {
            db.toggle_selection(1, *id).unwrap();
        }
        let order = AffinityEngine::new(&db).refresh(1).unwrap();
        assert_eq!(&order[..5], &ids[2..]);
        assert_eq!(db.client_order(1).unwrap(), order);
    }
}
