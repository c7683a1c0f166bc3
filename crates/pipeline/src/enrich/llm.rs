//! Text-generation clients
//!
//! Two providers sit behind the [`TextGenerator`] trait: a local model
//! server speaking the streamed NDJSON generate protocol, and a hosted API
//! returning a single response blob. Either way one prompt goes in and one
//! concatenated string comes out; the parsing contract downstream does not
//! change with the provider.

use async_trait::async_trait;
use futures::StreamExt;
use lexigraph_common::config::LlmConfig;
use lexigraph_common::errors::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Send one prompt and return the full response text.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String>;

    /// Provider name for logs and error context.
    fn name(&self) -> &str;
}

/// Select the definition provider configured in `llm.definition_provider`.
pub fn definition_generator(config: &LlmConfig) -> Result<Box<dyn TextGenerator>> {
    let endpoint = config.definition_endpoint.clone().unwrap_or_default();
    match config.definition_provider.as_str() {
        "local" => Ok(Box::new(LocalGenerator::new(
            &endpoint,
            config.num_ctx,
            Duration::from_secs(config.timeout_secs),
        )?)),
        "hosted" => Ok(Box::new(HostedGenerator::new(
            &endpoint,
            config.api_key.clone().unwrap_or_default(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        other => Err(PipelineError::InvalidConfig {
            key: "llm.definition_provider".into(),
            message: format!("unknown provider '{}'", other),
        }),
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_ctx: u32,
}

#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
}

/// Client for a local model server with a streaming generate endpoint.
///
/// The server answers with newline-delimited JSON objects, each carrying a
/// `response` fragment; the fragments are concatenated in order. Lines that
/// fail to parse are skipped rather than failing the request.
pub struct LocalGenerator {
    http: reqwest::Client,
    endpoint: String,
    num_ctx: u32,
}

impl LocalGenerator {
    pub fn new(endpoint: &str, num_ctx: u32, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            num_ctx,
        })
    }
}

#[async_trait]
impl TextGenerator for LocalGenerator {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            model,
            prompt,
            stream: true,
            options: GenerateOptions { num_ctx: self.num_ctx },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::LlmRequest { message: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::LlmRequest {
                message: format!("model server returned HTTP {}", status.as_u16()),
            });
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut output = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| PipelineError::LlmRequest { message: e.to_string() })?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Chunk boundaries need not align with line boundaries; keep the
            // trailing partial line in the buffer.
            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                append_fragment(&mut output, line.trim());
            }
        }
        append_fragment(&mut output, buffer.trim());

        debug!(model, response_len = output.len(), "Streamed generation complete");
        Ok(output)
    }

    fn name(&self) -> &str {
        "local"
    }
}

fn append_fragment(output: &mut String, line: &str) {
    if line.is_empty() {
        return;
    }
    if let Ok(chunk) = serde_json::from_str::<GenerateChunk>(line) {
        output.push_str(&chunk.response);
    }
}

#[derive(Serialize)]
struct HostedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct HostedResponse {
    #[serde(default)]
    response: String,
}

/// Client for a hosted generation API returning one JSON blob.
pub struct HostedGenerator {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HostedGenerator {
    pub fn new(endpoint: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl TextGenerator for HostedGenerator {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&HostedRequest { model, prompt })
            .send()
            .await
            .map_err(|e| PipelineError::LlmRequest { message: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::LlmRequest {
                message: format!("hosted API returned HTTP {}", status.as_u16()),
            });
        }

        let parsed: HostedResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::LlmRequest { message: e.to_string() })?;

        debug!(model, response_len = parsed.response.len(), "Hosted generation complete");
        Ok(parsed.response)
    }

    fn name(&self) -> &str {
        "hosted"
    }
}
