//! HTTP inference client.
//!
//! Implements [`InferenceClient`] against an Ollama-style REST service:
//! `/api/generate` for prompt completions (non-streaming and NDJSON
//! streaming) and `/api/embeddings` for vectors. Classification and
//! generation may target different models — guardrail checks typically
//! run on a smaller helper model.

use futures::StreamExt;
use ragline_application::ports::inference::{
    CompletionEvent, CompletionStream, InferenceClient, InferenceError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Request body for `/api/generate`.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One response object from `/api/generate` — a full body when
/// non-streaming, one NDJSON line when streaming.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

/// [`InferenceClient`] adapter over an HTTP model service.
pub struct HttpInferenceClient {
    http: reqwest::Client,
    base_url: String,
    /// Model used for streamed answer generation and reformulation.
    generate_model: String,
    /// Model used for classification-style prompts.
    classifier_model: String,
    embedding_model: String,
    /// Transport timeout for the non-streaming calls. Streaming calls are
    /// bounded by the orchestrator's generation timeout instead.
    request_timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(
        base_url: impl Into<String>,
        generate_model: impl Into<String>,
        classifier_model: impl Into<String>,
        embedding_model: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            generate_model: generate_model.into(),
            classifier_model: classifier_model.into(),
            embedding_model: embedding_model.into(),
            request_timeout,
        }
    }

    fn map_transport_error(e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout
        } else if e.is_connect() {
            InferenceError::ConnectionError(e.to_string())
        } else {
            InferenceError::RequestFailed(e.to_string())
        }
    }

    async fn generate_once(&self, model: &str, prompt: &str) -> Result<String, InferenceError> {
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
        };
        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?
            .error_for_status()
            .map_err(|e| InferenceError::RequestFailed(e.to_string()))?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;
        Ok(parsed.response)
    }
}

/// Split buffered NDJSON bytes into completion events.
///
/// Returns the parsed events and the remaining (incomplete) tail of the
/// buffer. A line that is not valid JSON yields a malformed-response
/// error event.
fn drain_ndjson_buffer(buffer: &mut String) -> Vec<CompletionEvent> {
    let mut events = Vec::new();
    while let Some(newline) = buffer.find('\n') {
        let line: String = buffer.drain(..=newline).collect();
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<GenerateResponse>(line) {
            Ok(chunk) => {
                if !chunk.response.is_empty() {
                    events.push(CompletionEvent::Token(chunk.response));
                }
                if chunk.done {
                    events.push(CompletionEvent::Done);
                    return events;
                }
            }
            Err(e) => {
                events.push(CompletionEvent::Error(format!("malformed stream chunk: {e}")));
                return events;
            }
        }
    }
    events
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn classify(&self, prompt: &str) -> Result<String, InferenceError> {
        self.generate_once(&self.classifier_model, prompt).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, InferenceError> {
        let body = EmbeddingsRequest {
            model: &self.embedding_model,
            prompt: text,
        };
        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?
            .error_for_status()
            .map_err(|e| InferenceError::RequestFailed(e.to_string()))?;

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;
        Ok(parsed.embedding)
    }

    async fn complete_streaming(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<CompletionStream, InferenceError> {
        let body = GenerateRequest {
            model: &self.generate_model,
            prompt,
            stream: true,
        };
        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?
            .error_for_status()
            .map_err(|e| InferenceError::RequestFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(32);

        // Reader task: forwards NDJSON chunks until the body ends, the
        // consumer goes away, or the token is cancelled. Dropping the
        // response body is what releases the upstream invocation.
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Streaming completion cancelled, dropping upstream body");
                        return;
                    }
                    chunk = body.next() => chunk,
                };
                match chunk {
                    Some(Ok(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for event in drain_ndjson_buffer(&mut buffer) {
                            let terminal = matches!(
                                event,
                                CompletionEvent::Done | CompletionEvent::Error(_)
                            );
                            if tx.send(event).await.is_err() || terminal {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Streaming completion transport error: {e}");
                        let _ = tx.send(CompletionEvent::Error(e.to_string())).await;
                        return;
                    }
                    // Body ended without a done marker: treat as done.
                    None => {
                        let _ = tx.send(CompletionEvent::Done).await;
                        return;
                    }
                }
            }
        });

        Ok(CompletionStream::new(rx))
    }
}
