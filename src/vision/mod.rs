//! Metrics backend: a deterministic vision service that scores blur,
//! technical quality and aesthetics for image URLs.

pub mod client;

use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

pub use client::HttpMetricsClient;

/// Largest batch the vision service accepts.
pub const METRICS_MAX_BATCH: usize = 20;

/// An image handed to an inference backend, tagged with the photo id the
/// backend echoes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub url: String,
    pub correlation_id: String,
}

/// Which sub-analyses to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisFlags {
    pub run_blur: bool,
    pub run_quality: bool,
    pub run_emotion: bool,
    pub run_embedding: bool,
}

impl Default for AnalysisFlags {
    fn default() -> Self {
        Self {
            run_blur: true,
            run_quality: true,
            run_emotion: false,
            run_embedding: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BlurResult {
    pub laplacian_variance: f64,
    #[serde(default)]
    pub is_blurry: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QualityResult {
    pub brisque_score: f64,
    #[serde(default)]
    pub overall_quality: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AestheticResult {
    pub nima_aesthetic_score: f64,
    #[serde(default)]
    pub aesthetic_label: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FaceEmotion {
    pub dominant_emotion: String,
    #[serde(default)]
    pub face_confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EmotionResult {
    #[serde(default)]
    pub faces: Vec<FaceEmotion>,
}

/// Valence assigned to the vision service's dominant-emotion labels.
const EMOTION_VALENCE: &[(&str, f64)] = &[
    ("happy", 0.8),
    ("surprise", 0.3),
    ("neutral", 0.0),
    ("sad", -0.6),
    ("fear", -0.6),
    ("angry", -0.7),
    ("disgust", -0.7),
];

impl EmotionResult {
    /// Mean valence over faces with a known label; `None` without faces.
    pub fn mean_valence(&self) -> Option<f64> {
        let values: Vec<f64> = self
            .faces
            .iter()
            .filter_map(|face| {
                let label = face.dominant_emotion.to_lowercase();
                EMOTION_VALENCE
                    .iter()
                    .find(|(name, _)| *name == label)
                    .map(|(_, valence)| *valence)
            })
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    /// Most frequent dominant emotion across faces.
    pub fn dominant_label(&self) -> Option<String> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for face in &self.faces {
            let label = face.dominant_emotion.to_lowercase();
            match counts.iter_mut().find(|(l, _)| *l == label) {
                Some((_, n)) => *n += 1,
                None => counts.push((label, 1)),
            }
        }
        // first label wins ties
        let mut best: Option<(String, usize)> = None;
        for (label, n) in counts {
            if best.as_ref().map_or(true, |(_, b)| n > *b) {
                best = Some((label, n));
            }
        }
        best.map(|(label, _)| label)
    }
}

/// One per-image entry of a batch response.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ImageMetrics {
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub blur: Option<BlurResult>,
    #[serde(default)]
    pub quality: Option<QualityResult>,
    #[serde(default)]
    pub aesthetic: Option<AestheticResult>,
    #[serde(default)]
    pub emotion: Option<EmotionResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Metrics backend seam. Implementations must be shareable across the
/// worker's blocking threads.
pub trait MetricsBackend: Send + Sync {
    /// Analyze a batch. `Err` means the whole batch failed; per-image
    /// failures come back as entries with `error` set, or are missing.
    fn analyze_batch(&self, images: &[ImageRef]) -> Result<Vec<ImageMetrics>, InferenceError>;

    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn faces(labels: &[&str]) -> EmotionResult {
        EmotionResult {
            faces: labels
                .iter()
                .map(|l| FaceEmotion { dominant_emotion: l.to_string(), face_confidence: None })
                .collect(),
        }
    }

    #[test]
    fn test_mean_valence() {
        assert_eq!(faces(&[]).mean_valence(), None);
        assert_eq!(faces(&["unknown"]).mean_valence(), None);
        let v = faces(&["happy", "Neutral"]).mean_valence().unwrap();
        assert!((v - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_dominant_label() {
        assert_eq!(faces(&[]).dominant_label(), None);
        assert_eq!(faces(&["sad", "happy", "happy"]).dominant_label().as_deref(), Some("happy"));
        assert_eq!(faces(&["sad", "happy"]).dominant_label().as_deref(), Some("sad"));
    }

    #[test]
    fn test_parse_response_entry() {
        let json = r#"{
            "image_id": "42",
            "source_url": "https://cdn/x.webp",
            "blur": {"laplacian_variance": 88.5, "is_blurry": false, "blur_threshold": 100.0},
            "quality": {"brisque_score": 23.1, "nima_technical_score": 5.2, "overall_quality": "high"},
            "aesthetic": {"nima_aesthetic_score": 6.4, "aesthetic_label": "medium"},
            "emotion": null,
            "embedding": null,
            "processing_time_ms": 120,
            "error": null
        }"#;
        let entry: ImageMetrics = serde_json::from_str(json).unwrap();
        assert_eq!(entry.image_id.as_deref(), Some("42"));
        assert_eq!(entry.blur.unwrap().laplacian_variance, 88.5);
        assert_eq!(entry.quality.unwrap().brisque_score, 23.1);
        assert!(entry.emotion.is_none());
        assert!(entry.error.is_none());
    }
}
