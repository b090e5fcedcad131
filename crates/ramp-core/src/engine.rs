use std::time::Duration;

use serde_json::Value;

use crate::error::EngineResult;
use crate::model::{InstalledModel, ModelIdentity};

/// Function tool offered to the model during a generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the parameters object.
    pub parameters: Value,
}

/// Tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: ModelIdentity,
    pub prompt: String,
    /// Context window requested from the engine (`num_ctx`).
    pub context_window: u32,
    /// Hard output-token ceiling (`num_predict` / `max_tokens`).
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub tools: Vec<ToolSpec>,
    /// Covers both model load and generation.
    pub timeout: Duration,
}

impl GenerationRequest {
    pub fn new(model: ModelIdentity, prompt: impl Into<String>) -> Self {
        Self {
            model,
            prompt: prompt.into(),
            context_window: 2048,
            max_output_tokens: 512,
            temperature: 0.0,
            tools: Vec::new(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_context(mut self, context_window: u32) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn with_max_output(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Completed generation plus the timing metadata collected while streaming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Request submission to first streamed token.
    pub time_to_first_token: Option<Duration>,
    /// Request submission to end of stream.
    pub total_duration: Duration,
    /// Model load time as reported by the engine, when available.
    pub load_duration: Option<Duration>,
    /// `length` when the output ceiling stopped generation.
    pub done_reason: Option<String>,
}

impl Generation {
    /// Whether generation stopped because it ran out of output budget.
    pub fn hit_output_cap(&self, max_output_tokens: u32) -> bool {
        self.done_reason.as_deref() == Some("length")
            || (max_output_tokens > 0 && self.output_tokens >= u64::from(max_output_tokens))
    }

    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs > 0.0 {
            self.output_tokens as f64 / secs
        } else {
            0.0
        }
    }
}

/// Thin request/response abstraction over an external inference engine.
pub trait InferenceEngine {
    /// Models currently installed. Also serves as the reachability check.
    fn list_models(&self) -> EngineResult<Vec<InstalledModel>>;

    /// Run one streamed generation to completion.
    fn generate(&self, request: &GenerationRequest) -> EngineResult<Generation>;

    /// Evict the model from engine memory so the next call starts cold.
    fn unload(&self, model: &ModelIdentity) -> EngineResult<()>;

    /// Raw license text from the model's metadata, if the engine exposes it.
    fn license_text(&self, model: &ModelIdentity) -> EngineResult<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_output_cap() {
        let mut g = Generation {
            output_tokens: 200,
            ..Default::default()
        };
        assert!(!g.hit_output_cap(512));
        g.done_reason = Some("length".into());
        assert!(g.hit_output_cap(512));
        g.done_reason = Some("stop".into());
        g.output_tokens = 512;
        assert!(g.hit_output_cap(512));
    }

    #[test]
    fn test_tokens_per_second() {
        let g = Generation {
            output_tokens: 100,
            total_duration: Duration::from_secs(4),
            ..Default::default()
        };
        assert!((g.tokens_per_second() - 25.0).abs() < 1e-9);
        assert_eq!(Generation::default().tokens_per_second(), 0.0);
    }
}
