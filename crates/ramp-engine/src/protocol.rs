use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ramp_core::{EngineError, EngineResult, Generation, GenerationRequest, ToolCall, ToolSpec};

// ---------------------------------------------------------------------------
// Shared message types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: WireFunction,
}

#[derive(Debug, Serialize)]
pub struct WireFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolSpec> for WireTool {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            tool_type: "function".into(),
            function: WireFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct OllamaOptions {
    pub num_ctx: u32,
    pub num_predict: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: OllamaOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
}

impl From<&GenerationRequest> for OllamaChatRequest {
    fn from(req: &GenerationRequest) -> Self {
        Self {
            model: req.model.tag.clone(),
            messages: vec![ChatMessage::user(&req.prompt)],
            // Ollama does not stream tool calls, so tool probes go unstreamed.
            stream: req.tools.is_empty(),
            options: OllamaOptions {
                num_ctx: req.context_window,
                num_predict: req.max_output_tokens,
                temperature: req.temperature,
            },
            tools: req.tools.iter().map(WireTool::from).collect(),
        }
    }
}

/// Body that makes the engine evict a model immediately.
pub fn unload_body(tag: &str) -> Value {
    json!({ "model": tag, "keep_alive": 0, "stream": false })
}

#[derive(Debug, Deserialize)]
pub struct OllamaTags {
    #[serde(default)]
    pub models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaTag {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct OllamaShow {
    #[serde(default)]
    pub license: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OllamaChunk {
    #[serde(default)]
    pub message: Option<OllamaChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    /// Nanoseconds.
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OllamaChunkMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaToolCall {
    pub function: OllamaFunctionCall,
}

#[derive(Debug, Deserialize)]
pub struct OllamaFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
    pub stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
}

impl From<&GenerationRequest> for CompletionRequest {
    fn from(req: &GenerationRequest) -> Self {
        Self {
            model: req.model.tag.clone(),
            messages: vec![ChatMessage::user(&req.prompt)],
            max_tokens: req.max_output_tokens,
            temperature: req.temperature,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            tools: req.tools.iter().map(WireTool::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub delta: CompletionDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletionDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// `length` in OpenAI terms is the same signal as Ollama's.
fn normalize_finish(reason: &str) -> String {
    match reason {
        "max_tokens" => "length".into(),
        other => other.into(),
    }
}

// ---------------------------------------------------------------------------
// Stream assembly
// ---------------------------------------------------------------------------

/// Folds streamed chunks into a [`Generation`]. `elapsed` is the time since
/// the request was sent, used for time-to-first-token.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    text: String,
    tool_calls: Vec<ToolCall>,
    partial_calls: BTreeMap<usize, (String, String)>,
    time_to_first_token: Option<Duration>,
    input_tokens: u64,
    output_tokens: u64,
    load_duration: Option<Duration>,
    done_reason: Option<String>,
    done: bool,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn mark_first_token(&mut self, elapsed: Duration) {
        if self.time_to_first_token.is_none() {
            self.time_to_first_token = Some(elapsed);
        }
    }

    /// One NDJSON line from `/api/chat`.
    pub fn push_ollama(&mut self, line: &str, elapsed: Duration) -> EngineResult<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let chunk: OllamaChunk = serde_json::from_str(line)
            .map_err(|e| EngineError::Protocol(format!("bad chunk: {e}")))?;
        if let Some(err) = chunk.error {
            return Err(EngineError::Rejected(err));
        }

        if let Some(msg) = chunk.message {
            if !msg.content.is_empty() || !msg.tool_calls.is_empty() {
                self.mark_first_token(elapsed);
            }
            self.text.push_str(&msg.content);
            self.tool_calls
                .extend(msg.tool_calls.into_iter().map(|c| ToolCall {
                    name: c.function.name,
                    arguments: c.function.arguments,
                }));
        }

        if chunk.done {
            self.done = true;
            self.done_reason = chunk.done_reason;
            self.load_duration = chunk.load_duration.map(Duration::from_nanos);
            self.input_tokens = chunk.prompt_eval_count.unwrap_or(0);
            self.output_tokens = chunk.eval_count.unwrap_or(0);
        }
        Ok(())
    }

    /// One SSE line from a chat-completions stream.
    pub fn push_sse(&mut self, line: &str, elapsed: Duration) -> EngineResult<()> {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }
        let chunk: CompletionChunk = serde_json::from_str(data)
            .map_err(|e| EngineError::Protocol(format!("bad event: {e}")))?;

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.mark_first_token(elapsed);
                self.text.push_str(&content);
            }
            for delta in choice.delta.tool_calls {
                self.mark_first_token(elapsed);
                let entry = self.partial_calls.entry(delta.index).or_default();
                if let Some(f) = delta.function {
                    if let Some(name) = f.name {
                        entry.0.push_str(&name);
                    }
                    if let Some(args) = f.arguments {
                        entry.1.push_str(&args);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.done_reason = Some(normalize_finish(&reason));
            }
        }
        if let Some(usage) = chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }
        Ok(())
    }

    pub fn finish(mut self, total_duration: Duration) -> Generation {
        for (_, (name, args)) in std::mem::take(&mut self.partial_calls) {
            let arguments = serde_json::from_str(&args).unwrap_or(Value::String(args));
            self.tool_calls.push(ToolCall { name, arguments });
        }
        Generation {
            text: self.text,
            tool_calls: self.tool_calls,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            time_to_first_token: self.time_to_first_token,
            total_duration,
            load_duration: self.load_duration,
            done_reason: self.done_reason,
        }
    }
}
