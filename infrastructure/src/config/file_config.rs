//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! They deserialize directly and convert into application-layer params.

use ragline_application::PipelineParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("top_k cannot be 0")]
    ZeroTopK,

    #[error("model name cannot be empty")]
    EmptyModelName,

    #[error("inference base_url cannot be empty")]
    EmptyBaseUrl,

    #[error("timeout_seconds cannot be 0")]
    InvalidTimeout,
}

/// Raw inference backend configuration from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileInferenceConfig {
    /// Base URL of the model service
    pub base_url: String,
    /// Model for answer generation and query reformulation
    pub generate_model: String,
    /// Model for guardrail classification prompts
    pub classifier_model: String,
    /// Model for embedding queries
    pub embedding_model: String,
    /// Transport timeout in seconds for non-streaming calls
    pub timeout_seconds: u64,
}

impl Default for FileInferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            generate_model: "llama3.1".to_string(),
            classifier_model: "llama3.1".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl FileInferenceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Raw retrieval configuration from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRetrievalConfig {
    /// Knowledge store base URL (None means in-memory store)
    pub store_url: Option<String>,
    /// Maximum number of chunks per query
    pub top_k: usize,
    /// Minimum relevance score for a chunk to be kept
    pub min_score: f32,
    /// Abort requests when the store is unreachable instead of answering
    /// without context
    pub abort_on_failure: bool,
}

impl Default for FileRetrievalConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            top_k: 4,
            min_score: 0.0,
            abort_on_failure: false,
        }
    }
}

/// Raw pipeline behavior configuration from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePipelineConfig {
    /// Recent turns embedded in reformulation and answer prompts
    pub history_window: usize,
    /// Timeout in seconds for one guardrail classification call
    pub classify_timeout_seconds: u64,
    /// Timeout in seconds for the reformulation call
    pub reformulate_timeout_seconds: u64,
    /// Timeout in seconds for one embedding call
    pub embed_timeout_seconds: u64,
    /// Timeout in seconds for one store search
    pub search_timeout_seconds: u64,
    /// Timeout in seconds for the whole streamed generation
    pub generate_timeout_seconds: u64,
    /// Keep guardrail-rejected user messages in session history
    pub store_rejected_turns: bool,
    /// User-facing refusal message
    pub refusal_message: Option<String>,
}

impl Default for FilePipelineConfig {
    fn default() -> Self {
        Self {
            history_window: 8,
            classify_timeout_seconds: 15,
            reformulate_timeout_seconds: 20,
            embed_timeout_seconds: 10,
            search_timeout_seconds: 5,
            generate_timeout_seconds: 120,
            store_rejected_turns: false,
            refusal_message: None,
        }
    }
}

/// Raw logging configuration from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    /// Write conversation events to a JSONL file
    pub conversation_log: Option<String>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            conversation_log: None,
        }
    }
}

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Inference backend settings
    pub inference: FileInferenceConfig,
    /// Retrieval settings
    pub retrieval: FileRetrievalConfig,
    /// Pipeline behavior settings
    pub pipeline: FilePipelineConfig,
    /// Logging settings
    pub logging: FileLoggingConfig,
}

impl FileConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.retrieval.top_k == 0 {
            return Err(ConfigValidationError::ZeroTopK);
        }

        if self.inference.base_url.trim().is_empty() {
            return Err(ConfigValidationError::EmptyBaseUrl);
        }

        for model in [
            &self.inference.generate_model,
            &self.inference.classifier_model,
            &self.inference.embedding_model,
        ] {
            if model.trim().is_empty() {
                return Err(ConfigValidationError::EmptyModelName);
            }
        }

        if self.pipeline.generate_timeout_seconds == 0
            || self.pipeline.classify_timeout_seconds == 0
        {
            return Err(ConfigValidationError::InvalidTimeout);
        }

        Ok(())
    }

    /// Convert the file representation into application pipeline params.
    pub fn pipeline_params(&self) -> PipelineParams {
        let mut params = PipelineParams::default()
            .with_top_k(self.retrieval.top_k)
            .with_min_score(self.retrieval.min_score)
            .with_history_window(self.pipeline.history_window)
            .with_abort_on_retrieval_failure(self.retrieval.abort_on_failure)
            .with_store_rejected_turns(self.pipeline.store_rejected_turns);

        params.classify_timeout = Duration::from_secs(self.pipeline.classify_timeout_seconds);
        params.reformulate_timeout =
            Duration::from_secs(self.pipeline.reformulate_timeout_seconds);
        params.embed_timeout = Duration::from_secs(self.pipeline.embed_timeout_seconds);
        params.search_timeout = Duration::from_secs(self.pipeline.search_timeout_seconds);
        params.generate_timeout = Duration::from_secs(self.pipeline.generate_timeout_seconds);

        if let Some(message) = &self.pipeline.refusal_message {
            params = params.with_refusal_message(message.clone());
        }

        params
    }
}
