//! OpenAI-compatible chat-completions client for API-served models.
//!
//! Remote models have nothing to unload and no license metadata; those calls
//! succeed as no-ops so the controller treats both kinds uniformly.

use std::time::{Duration, Instant};

use ramp_core::{
    EngineError, EngineResult, Generation, GenerationRequest, InferenceEngine, InstalledModel,
    ModelIdentity,
};

use crate::http::{agent, map_error, read_stream, Framing};
use crate::protocol::CompletionRequest;

pub const DEFAULT_REMOTE_URL: &str = "https://api.mistral.ai/v1";
pub const DEFAULT_API_KEY_ENV: &str = "MISTRAL_API_KEY";

pub struct RemoteClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl RemoteClient {
    pub fn new(base_url: &str, api_key_env: &str, connect_timeout: Duration) -> Self {
        Self {
            agent: agent(connect_timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var(api_key_env).ok().filter(|k| !k.is_empty()),
            api_key_env: api_key_env.to_string(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// No key means nothing can be measured; the model is skipped like any
    /// other unreachable engine.
    fn api_key(&self) -> EngineResult<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            EngineError::Unreachable(format!("{} is not set", self.api_key_env))
        })
    }
}

impl InferenceEngine for RemoteClient {
    fn list_models(&self) -> EngineResult<Vec<InstalledModel>> {
        // Remote catalogs are not enumerated; every tag is assumed served.
        self.api_key()?;
        Ok(Vec::new())
    }

    fn generate(&self, request: &GenerationRequest) -> EngineResult<Generation> {
        let key = self.api_key()?;
        let body = CompletionRequest::from(request);
        tracing::debug!(model = %request.model.tag, max_tokens = body.max_tokens, "remote chat");

        let started = Instant::now();
        let resp = self
            .agent
            .post(&format!("{}/chat/completions", self.base_url))
            .timeout(request.timeout)
            .set("Authorization", &format!("Bearer {key}"))
            .set("Accept", "text/event-stream")
            .send_json(&body)
            .map_err(|e| map_error(e, request.timeout))?;

        read_stream(resp, Framing::Sse, started, request.timeout)
    }

    fn unload(&self, _model: &ModelIdentity) -> EngineResult<()> {
        Ok(())
    }

    fn license_text(&self, _model: &ModelIdentity) -> EngineResult<Option<String>> {
        Ok(None)
    }
}
