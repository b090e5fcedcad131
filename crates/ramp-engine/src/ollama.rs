//! Client for a local Ollama server.

use std::time::{Duration, Instant};

use ramp_core::{
    EngineError, EngineResult, Generation, GenerationRequest, InferenceEngine, InstalledModel,
    ModelIdentity,
};

use crate::http::{agent, map_error, read_stream, Framing, METADATA_TIMEOUT};
use crate::protocol::{unload_body, OllamaChatRequest, OllamaShow, OllamaTags, StreamAssembler};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub struct OllamaClient {
    agent: ureq::Agent,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Self {
        Self {
            agent: agent(connect_timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_URL, Duration::from_secs(5))
    }
}

impl InferenceEngine for OllamaClient {
    fn list_models(&self) -> EngineResult<Vec<InstalledModel>> {
        let resp = self
            .agent
            .get(&self.url("/api/tags"))
            .timeout(METADATA_TIMEOUT)
            .call()
            .map_err(|e| map_error(e, METADATA_TIMEOUT))?;
        let tags: OllamaTags = resp
            .into_json()
            .map_err(|e| EngineError::Protocol(format!("bad /api/tags response: {e}")))?;
        Ok(tags
            .models
            .into_iter()
            .map(|m| InstalledModel {
                tag: m.name,
                size_bytes: m.size,
            })
            .collect())
    }

    fn generate(&self, request: &GenerationRequest) -> EngineResult<Generation> {
        let body = OllamaChatRequest::from(request);
        let streamed = body.stream;
        tracing::debug!(
            model = %request.model.tag,
            num_ctx = request.context_window,
            num_predict = request.max_output_tokens,
            "ollama chat"
        );

        let started = Instant::now();
        let resp = self
            .agent
            .post(&self.url("/api/chat"))
            .timeout(request.timeout)
            .send_json(&body)
            .map_err(|e| map_error(e, request.timeout))?;

        if streamed {
            return read_stream(resp, Framing::Ndjson, started, request.timeout);
        }

        let text = resp
            .into_string()
            .map_err(|e| EngineError::Protocol(format!("cannot read response: {e}")))?;
        let mut assembler = StreamAssembler::new();
        assembler.push_ollama(&text, started.elapsed())?;
        Ok(assembler.finish(started.elapsed()))
    }

    fn unload(&self, model: &ModelIdentity) -> EngineResult<()> {
        self.agent
            .post(&self.url("/api/generate"))
            .timeout(METADATA_TIMEOUT)
            .send_json(unload_body(&model.tag))
            .map_err(|e| map_error(e, METADATA_TIMEOUT))?;
        tracing::debug!(model = %model.tag, "unloaded");
        Ok(())
    }

    fn license_text(&self, model: &ModelIdentity) -> EngineResult<Option<String>> {
        let resp = self
            .agent
            .post(&self.url("/api/show"))
            .timeout(METADATA_TIMEOUT)
            .send_json(serde_json::json!({ "model": model.tag }))
            .map_err(|e| map_error(e, METADATA_TIMEOUT))?;
        let show: OllamaShow = resp
            .into_json()
            .map_err(|e| EngineError::Protocol(format!("bad /api/show response: {e}")))?;
        Ok(show.license.filter(|l| !l.trim().is_empty()))
    }
}
