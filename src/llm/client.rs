use std::collections::HashMap;
use std::sync::Arc;

use super::prompts::{album_names_prompt, batch_prompt, photo_label, PHOTO_JUDGE_SYSTEM};
use super::provider::{create_provider, extract_json, CompletionRequest, LlmProvider, PromptPart};
use super::{NarrativeBackend, PhotoJudgment};
use crate::config::NarrativeConfig;
use crate::curation::AlbumKey;
use crate::error::InferenceError;
use crate::vision::ImageRef;

/// Output budget per photo in a batch.
const TOKENS_PER_PHOTO: u32 = 600;
const JUDGE_TEMPERATURE: f32 = 0.1;
const NAMING_TEMPERATURE: f32 = 0.4;

/// Narrative client that wraps a provider implementation
#[derive(Clone)]
pub struct NarrativeClient {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl NarrativeClient {
    pub fn new(provider: Arc<dyn LlmProvider>, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
        }
    }

    /// Create a new NarrativeClient from configuration
    pub fn from_config(config: &NarrativeConfig) -> Self {
        Self::new(Arc::from(create_provider(config)), &config.model)
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }
}

/// Accepts a bare array, or an object wrapping one (some models insist).
fn parse_judgments(content: &str) -> Result<Vec<PhotoJudgment>, InferenceError> {
    let json = extract_json(content);
    let value: serde_json::Value = serde_json::from_str(&json)
        .map_err(|e| InferenceError::Malformed(format!("narrative output is not JSON: {}", e)))?;

    let array = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut map) => ["photos", "results", "analyses"]
            .iter()
            .find_map(|key| map.remove(*key).filter(|v| v.is_array()))
            .ok_or_else(|| InferenceError::Malformed("no judgment array in output".to_string()))?,
        _ => return Err(InferenceError::Malformed("unexpected narrative output".to_string())),
    };

    // A single malformed entry only fails its own photo
    let entries: Vec<serde_json::Value> = serde_json::from_value(array)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<PhotoJudgment>(entry) {
            Ok(judgment) => Some(judgment),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed narrative entry");
                None
            }
        })
        .collect())
}

fn parse_album_names(
    content: &str,
    keys: &[AlbumKey],
) -> Result<HashMap<AlbumKey, String>, InferenceError> {
    let json = extract_json(content);
    let raw: HashMap<String, serde_json::Value> = serde_json::from_str(&json)?;

    Ok(raw
        .into_iter()
        .filter_map(|(key, name)| {
            let key = AlbumKey::from_key(key.trim())?;
            let name = name.as_str()?.trim().to_string();
            (keys.contains(&key) && !name.is_empty()).then_some((key, name))
        })
        .collect())
}

impl NarrativeBackend for NarrativeClient {
    fn judge_batch(&self, images: &[ImageRef]) -> Result<Vec<PhotoJudgment>, InferenceError> {
        let ids: Vec<&str> = images.iter().map(|i| i.correlation_id.as_str()).collect();

        let mut parts = Vec::with_capacity(images.len() * 2 + 1);
        parts.push(PromptPart::Text(batch_prompt(&ids)));
        for image in images {
            parts.push(PromptPart::Text(photo_label(&image.correlation_id)));
            parts.push(PromptPart::ImageUrl(image.url.clone()));
        }

        let request = CompletionRequest {
            system: PHOTO_JUDGE_SYSTEM.to_string(),
            parts,
            max_tokens: TOKENS_PER_PHOTO * images.len().max(1) as u32,
            temperature: JUDGE_TEMPERATURE,
        };

        let completion = self.provider.complete(&request)?;
        let mut judgments = parse_judgments(&completion.text)?;
        for judgment in &mut judgments {
            judgment.tokens_used = completion.tokens_used;
        }
        tracing::debug!(
            judged = judgments.len(),
            requested = images.len(),
            tokens = ?completion.tokens_used,
            "Narrative batch judged"
        );
        Ok(judgments)
    }

    fn name_albums(&self, keys: &[AlbumKey]) -> Result<HashMap<AlbumKey, String>, InferenceError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let request = CompletionRequest {
            system: "You name photo albums for event photographers.".to_string(),
            parts: vec![PromptPart::Text(album_names_prompt(keys))],
            max_tokens: 40 * keys.len() as u32 + 100,
            temperature: NAMING_TEMPERATURE,
        };
        let completion = self.provider.complete(&request)?;
        parse_album_names(&completion.text, keys)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Category;
    use crate::llm::Completion;
    use std::sync::Mutex;

    /// Replays a canned answer and records the request it saw.
    struct ScriptedProvider {
        answer: String,
        seen: Mutex<Option<CompletionRequest>>,
    }

    impl LlmProvider for ScriptedProvider {
        fn complete(&self, request: &CompletionRequest) -> Result<Completion, InferenceError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            Ok(Completion {
                text: self.answer.clone(),
                tokens_used: Some(2400),
            })
        }

        fn provider_name(&self) -> &'static str {
            "scripted"
        }
    }

    fn client(answer: &str) -> (NarrativeClient, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider {
            answer: answer.to_string(),
            seen: Mutex::new(None),
        });
        (NarrativeClient::new(provider.clone(), "test-model"), provider)
    }

    fn images(ids: &[&str]) -> Vec<ImageRef> {
        ids.iter()
            .map(|id| ImageRef {
                url: format!("https://cdn/{}.webp", id),
                correlation_id: id.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_judge_batch_builds_labelled_request() {
        let (client, provider) = client(
            "```json\n[{\"photoId\": \"1\", \"overallScore\": 8.1}, {\"photoId\": 2}]\n```",
        );
        let judgments = client.judge_batch(&images(&["1", "2"])).unwrap();
        assert_eq!(judgments.len(), 2);
        assert_eq!(judgments[1].photo_id, "2");
        assert!(judgments.iter().all(|j| j.tokens_used == Some(2400)));

        let seen = provider.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.max_tokens, 1200);
        assert_eq!(seen.parts.len(), 5);
        assert_eq!(seen.parts[1], PromptPart::Text("Photo 1:".to_string()));
        assert_eq!(seen.parts[2], PromptPart::ImageUrl("https://cdn/1.webp".to_string()));
    }

    #[test]
    fn test_wrapped_array_and_bad_entries() {
        let judgments =
            parse_judgments(r#"{"photos": [{"photoId": "5"}, {"overallScore": 3}]}"#).unwrap();
        assert_eq!(judgments.len(), 1);
        assert_eq!(judgments[0].photo_id, "5");
    }

    #[test]
    fn test_non_json_is_batch_failure() {
        let (client, _) = client("Sorry, I cannot see images.");
        let err = client.judge_batch(&images(&["1"])).unwrap_err();
        assert!(matches!(err, InferenceError::Malformed(_)));
    }

    #[test]
    fn test_album_names_keep_requested_keys() {
        let keys = [AlbumKey::Highlights, AlbumKey::Category(Category::Party)];
        let names = parse_album_names(
            r#"{"_highlights": " Best Moments ", "party": "", "food": "Feast"}"#,
            &keys,
        )
        .unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[&AlbumKey::Highlights], "Best Moments");
    }
}
