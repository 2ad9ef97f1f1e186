//! Failure classes reported by the inference adapters.

/// Batch-level failure of an inference backend call.
///
/// Every variant fails the whole batch; per-item errors travel inside the
/// backend response instead.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl InferenceError {
    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::Timeout(_) => "timeout",
            InferenceError::Transport(_) => "transport",
            InferenceError::Status { .. } => "status",
            InferenceError::Malformed(_) => "malformed",
        }
    }
}

impl From<ureq::Error> for InferenceError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let message = response
                    .into_string()
                    .ok()
                    .and_then(|body| {
                        serde_json::from_str::<serde_json::Value>(&body)
                            .ok()
                            .and_then(|v| {
                                v.get("message")
                                    .or_else(|| v.get("error"))
                                    .and_then(|m| m.as_str().map(str::to_string))
                            })
                            .or(Some(body))
                    })
                    .unwrap_or_default();
                InferenceError::Status { status, message }
            }
            ureq::Error::Transport(transport) => {
                let text = transport.to_string();
                if text.to_lowercase().contains("timed out") {
                    InferenceError::Timeout(text)
                } else {
                    InferenceError::Transport(text)
                }
            }
        }
    }
}

impl From<std::io::Error> for InferenceError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            InferenceError::Timeout(err.to_string())
        } else {
            InferenceError::Malformed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for InferenceError {
    fn from(err: serde_json::Error) -> Self {
        InferenceError::Malformed(err.to_string())
    }
}
