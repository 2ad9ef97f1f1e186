//! Narrative backend: a multimodal LLM that judges photos in small batches
//! and names albums.

pub mod client;
pub mod prompts;
pub mod provider;

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

use crate::curation::AlbumKey;
use crate::error::InferenceError;
use crate::vision::ImageRef;

pub use client::NarrativeClient;
pub use provider::{create_provider, Completion, CompletionRequest, LlmProvider, PromptPart};

/// Largest batch a single narrative request carries.
pub const NARRATIVE_MAX_BATCH: usize = 5;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct JudgedEmotion {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub valence: Option<f64>,
}

/// One entry of the narrative backend's JSON array.
///
/// Parsing is lenient: anything but the photo id may be missing, and the
/// dispatcher decides what a usable judgment is.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoJudgment {
    #[serde(deserialize_with = "id_as_string")]
    pub photo_id: String,
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub emotion: Option<JudgedEmotion>,
    #[serde(default)]
    pub composition: Option<String>,
    #[serde(default)]
    pub pose_quality: Option<String>,
    #[serde(default)]
    pub background_quality: Option<String>,
    #[serde(default)]
    pub discard_reason: Option<String>,
    #[serde(default)]
    pub best_in_group: bool,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Set by the client from the provider's usage report, never by the model.
    #[serde(skip)]
    pub tokens_used: Option<u32>,
}

/// Models echo the id back as either `"12"` or `12`.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s.trim().trim_start_matches("Photo ").trim().to_string(),
        RawId::Number(n) => n.to_string(),
    })
}

impl PhotoJudgment {
    /// Empty strings from the model mean "no discard reason".
    pub fn discard_reason(&self) -> Option<&str> {
        self.discard_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

/// Narrative backend seam.
pub trait NarrativeBackend: Send + Sync {
    /// Judge a batch of at most [`NARRATIVE_MAX_BATCH`] images. `Err` fails
    /// the whole batch; images missing from the result fail individually.
    fn judge_batch(&self, images: &[ImageRef]) -> Result<Vec<PhotoJudgment>, InferenceError>;

    /// Display names for a set of albums, in one call. Keys the model
    /// omits are simply absent from the map.
    fn name_albums(&self, keys: &[AlbumKey]) -> Result<HashMap<AlbumKey, String>, InferenceError>;

    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_judgment_with_numeric_id() {
        let json = r#"{
            "photoId": 17,
            "overallScore": 7.4,
            "emotion": {"label": "joy", "valence": 0.7},
            "composition": "rule of thirds",
            "backgroundQuality": "clean",
            "discardReason": "",
            "bestInGroup": true,
            "highlights": ["genuine smile"],
            "issues": [],
            "summary": "Warm candid moment",
            "category": "La Fiesta",
            "tags": ["dance", "night"]
        }"#;
        let judgment: PhotoJudgment = serde_json::from_str(json).unwrap();
        assert_eq!(judgment.photo_id, "17");
        assert_eq!(judgment.overall_score, Some(7.4));
        assert!(judgment.best_in_group);
        assert_eq!(judgment.discard_reason(), None);
        assert_eq!(judgment.pose_quality, None);
        assert_eq!(judgment.emotion.unwrap().valence, Some(0.7));
    }

    #[test]
    fn test_parse_minimal_judgment() {
        let judgment: PhotoJudgment =
            serde_json::from_str(r#"{"photoId": " 3 ", "discardReason": "eyes closed"}"#).unwrap();
        assert_eq!(judgment.photo_id, "3");
        assert_eq!(judgment.discard_reason(), Some("eyes closed"));
        assert!(judgment.tags.is_empty());
    }
}
