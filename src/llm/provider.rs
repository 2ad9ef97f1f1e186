use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::time::Duration;

use crate::config::{LlmProviderType, NarrativeConfig};
use crate::error::InferenceError;

/// A piece of the user turn: instructions or an image reference.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    ImageUrl(String),
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub parts: Vec<PromptPart>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Answer text plus the token count the provider reported, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: Option<u32>,
}

/// Trait for LLM providers that can look at images
pub trait LlmProvider: Send + Sync {
    /// Run one completion and return the raw text of the answer
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, InferenceError>;

    /// Get the provider name for display
    fn provider_name(&self) -> &'static str;
}

/// Largest edge of images inlined into a request
const INLINE_MAX_DIMENSION: u32 = 1024;

/// Upper bound on a fetched image
const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

// ============================================================================
// OpenAI-compatible provider (works with LM Studio, OpenAI, and compatible APIs)
// ============================================================================

pub struct OpenAICompatibleProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: OpenAIContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OpenAIContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

impl OpenAICompatibleProvider {
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.map(|s| s.to_string()),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> OpenAIChatRequest {
        let parts = request
            .parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => OpenAIContentPart::Text { text: text.clone() },
                PromptPart::ImageUrl(url) => OpenAIContentPart::ImageUrl {
                    image_url: ImageUrl { url: url.clone() },
                },
            })
            .collect();

        OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system",
                    content: OpenAIContent::Text(request.system.clone()),
                },
                OpenAIMessage {
                    role: "user",
                    content: OpenAIContent::Parts(parts),
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

impl LlmProvider for OpenAICompatibleProvider {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, InferenceError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let mut req = self.agent.post(&url).set("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.set("Authorization", &format!("Bearer {}", api_key));
        }

        let response = req.send_json(&self.build_request(request))?;

        let chat_response: OpenAIChatResponse = response
            .into_json()
            .map_err(|e| InferenceError::Malformed(format!("chat response: {}", e)))?;

        let tokens_used = chat_response.usage.map(|u| u.total_tokens);
        let text = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InferenceError::Malformed("no choices in chat response".to_string()))?;
        Ok(Completion { text, tokens_used })
    }

    fn provider_name(&self) -> &'static str {
        "OpenAI-compatible"
    }
}

/// Fetch an image, resize if either dimension exceeds `max_dimension`, re-encode as JPEG,
/// and return the base64-encoded string along with the MIME type.
fn fetch_and_encode_image(
    agent: &ureq::Agent,
    url: &str,
    max_dimension: u32,
) -> Result<(String, &'static str), InferenceError> {
    let response = agent.get(url).call()?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_IMAGE_BYTES)
        .read_to_end(&mut bytes)?;
    encode_image_bytes(&bytes, max_dimension)
}

fn encode_image_bytes(
    bytes: &[u8],
    max_dimension: u32,
) -> Result<(String, &'static str), InferenceError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| InferenceError::Malformed(format!("failed to decode image: {}", e)))?;

    let (width, height) = img.dimensions();
    let img = if width > max_dimension || height > max_dimension {
        img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    };

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, 85);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| InferenceError::Malformed(format!("failed to encode image as JPEG: {}", e)))?;

    Ok((BASE64.encode(buf.into_inner()), "image/jpeg"))
}

/// Extract JSON from a string that might contain markdown code blocks
pub fn extract_json(content: &str) -> String {
    let trimmed = content.trim();

    // Check for markdown code block
    if trimmed.starts_with("```") {
        // Find the end of the code block
        if let Some(start) = trimmed.find('\n') {
            let after_first_line = &trimmed[start + 1..];
            if let Some(end) = after_first_line.rfind("```") {
                return after_first_line[..end].trim().to_string();
            }
        }
    }

    // Already plain JSON
    trimmed.to_string()
}

// ============================================================================
// Anthropic Claude provider
// ============================================================================

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum AnthropicContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: AnthropicImageSource },
}

#[derive(Debug, Serialize)]
struct AnthropicImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    url: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponseContent {
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: Option<&str>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.unwrap_or("claude-sonnet-4-20250514").to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> AnthropicRequest {
        let content = request
            .parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => AnthropicContent::Text { text: text.clone() },
                PromptPart::ImageUrl(url) => AnthropicContent::Image {
                    source: AnthropicImageSource {
                        source_type: "url",
                        url: url.clone(),
                    },
                },
            })
            .collect();

        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system.clone(),
            messages: vec![AnthropicMessage { role: "user", content }],
        }
    }
}

impl LlmProvider for AnthropicProvider {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, InferenceError> {
        let response = self
            .agent
            .post("https://api.anthropic.com/v1/messages")
            .set("Content-Type", "application/json")
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", "2023-06-01")
            .send_json(&self.build_request(request))?;

        let anthropic_response: AnthropicResponse = response
            .into_json()
            .map_err(|e| InferenceError::Malformed(format!("Anthropic response: {}", e)))?;

        let tokens_used = anthropic_response
            .usage
            .as_ref()
            .map(|u| u.input_tokens + u.output_tokens);
        let text: String = anthropic_response
            .content
            .into_iter()
            .filter_map(|c| c.text)
            .collect();
        if text.is_empty() {
            return Err(InferenceError::Malformed("no text in Anthropic response".to_string()));
        }
        Ok(Completion { text, tokens_used })
    }

    fn provider_name(&self) -> &'static str {
        "Anthropic Claude"
    }
}

// ============================================================================
// Ollama provider
// ============================================================================

pub struct OllamaProvider {
    endpoint: String,
    model: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    system: String,
    prompt: String,
    images: Vec<String>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl OllamaProvider {
    pub fn new(endpoint: Option<&str>, model: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint
                .unwrap_or("http://localhost:11434")
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl LlmProvider for OllamaProvider {
    /// Ollama cannot dereference URLs, so images are fetched and inlined.
    /// Their position in the prompt is kept as `[image N]` markers.
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, InferenceError> {
        let mut prompt = String::new();
        let mut images = Vec::new();
        for part in &request.parts {
            match part {
                PromptPart::Text(text) => {
                    prompt.push_str(text);
                    prompt.push('\n');
                }
                PromptPart::ImageUrl(url) => {
                    let (base64_image, _mime_type) =
                        fetch_and_encode_image(&self.agent, url, INLINE_MAX_DIMENSION)?;
                    images.push(base64_image);
                    prompt.push_str(&format!("[image {}]\n", images.len()));
                }
            }
        }

        let ollama_request = OllamaRequest {
            model: self.model.clone(),
            system: request.system.clone(),
            prompt,
            images,
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.endpoint);
        let response = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(&ollama_request)?;

        let ollama_response: OllamaResponse = response
            .into_json()
            .map_err(|e| InferenceError::Malformed(format!("Ollama response: {}", e)))?;

        let tokens_used = match (ollama_response.prompt_eval_count, ollama_response.eval_count) {
            (None, None) => None,
            (prompt, eval) => Some(prompt.unwrap_or(0) + eval.unwrap_or(0)),
        };
        Ok(Completion {
            text: ollama_response.response,
            tokens_used,
        })
    }

    fn provider_name(&self) -> &'static str {
        "Ollama"
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an LLM provider based on configuration
pub fn create_provider(config: &NarrativeConfig) -> Box<dyn LlmProvider> {
    let timeout = Duration::from_secs(config.timeout_secs);

    match config.provider {
        LlmProviderType::LmStudio => Box::new(OpenAICompatibleProvider::new(
            &config.endpoint,
            &config.model,
            config.api_key.as_deref(),
            timeout,
        )),
        LlmProviderType::OpenAI => Box::new(OpenAICompatibleProvider::new(
            "https://api.openai.com/v1",
            &config.model,
            config.api_key.as_deref(),
            timeout,
        )),
        LlmProviderType::Anthropic => {
            let api_key = config.api_key.as_deref().unwrap_or("");
            Box::new(AnthropicProvider::new(api_key, Some(&config.model), timeout))
        }
        LlmProviderType::Ollama => Box::new(OllamaProvider::new(
            Some(&config.endpoint),
            &config.model,
            timeout,
        )),
    }
}
