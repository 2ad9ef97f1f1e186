use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AnalysisFlags, ImageMetrics, ImageRef, MetricsBackend};
use crate::config::MetricsConfig;
use crate::error::InferenceError;

/// HTTP adapter for the vision service's batch endpoint.
pub struct HttpMetricsClient {
    base_url: String,
    api_key: Option<String>,
    flags: AnalysisFlags,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct BatchImage<'a> {
    url: &'a str,
    image_id: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    images: Vec<BatchImage<'a>>,
    run_blur: bool,
    run_quality: bool,
    run_emotion: bool,
    run_embedding: bool,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Vec<ImageMetrics>,
}

impl HttpMetricsClient {
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(str::to_string),
            flags: AnalysisFlags::default(),
            agent,
        }
    }

    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::new(
            &config.endpoint,
            config.api_key.as_deref(),
            Duration::from_secs(config.timeout_secs),
        )
        .with_flags(AnalysisFlags {
            run_emotion: config.run_emotion,
            run_embedding: config.run_embedding,
            ..AnalysisFlags::default()
        })
    }

    pub fn with_flags(mut self, flags: AnalysisFlags) -> Self {
        self.flags = flags;
        self
    }

    fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<ureq::Response, InferenceError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.agent.post(&url).set("Content-Type", "application/json");
        if let Some(ref api_key) = self.api_key {
            req = req.set("X-Api-Key", api_key);
        }
        Ok(req.send_json(body)?)
    }

    /// `GET /health`, true on a 2xx answer.
    pub fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        matches!(self.agent.get(&url).call(), Ok(resp) if resp.status() < 300)
    }
}

impl MetricsBackend for HttpMetricsClient {
    fn analyze_batch(&self, images: &[ImageRef]) -> Result<Vec<ImageMetrics>, InferenceError> {
        let request = BatchRequest {
            images: images
                .iter()
                .map(|img| BatchImage {
                    url: &img.url,
                    image_id: &img.correlation_id,
                })
                .collect(),
            run_blur: self.flags.run_blur,
            run_quality: self.flags.run_quality,
            run_emotion: self.flags.run_emotion,
            run_embedding: self.flags.run_embedding,
        };

        let response = self.post("/v1/analyze/batch", &request)?;
        let body: BatchResponse = response
            .into_json()
            .map_err(|e| InferenceError::Malformed(format!("batch response: {}", e)))?;
        Ok(body.results)
    }

    fn backend_name(&self) -> &'static str {
        "vision"
    }
}
