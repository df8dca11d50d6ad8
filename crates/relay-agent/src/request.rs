use relay_llm::{FallbackCandidate, Message};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// How the result of a call is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResponseShape {
    /// Fully consumed and folded into one [`ChatResult`](crate::ChatResult).
    #[default]
    #[serde(rename = "promise")]
    Deferred,
    /// The live event sequence, driven by the caller.
    #[serde(rename = "stream")]
    Stream,
    /// Server-sent-event framing for an HTTP response body.
    #[serde(rename = "response")]
    Framed,
}

/// One call into the [`Relay`](crate::Relay).
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Primary backend and model, tried before any fallback.
    pub primary: Option<FallbackCandidate>,
    /// Overrides the configured fallback list for this call.
    pub fallbacks: Option<Vec<FallbackCandidate>>,
    /// Names of registered tools offered to the model.
    pub tools: Vec<String>,
    /// `Some(vec![])` suppresses system prompts for this call.
    pub system_prompts: Option<Vec<String>>,
    pub shape: ResponseShape,
    /// Tool-loop bound; the configured default applies when unset.
    pub max_iterations: Option<usize>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stop_sequences: Vec<String>,
    pub cancellation: Option<CancellationToken>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>, model: impl Into<String>) -> Self {
        self.primary = Some(FallbackCandidate::new(backend, model));
        self
    }

    pub fn with_primary(mut self, candidate: FallbackCandidate) -> Self {
        self.primary = Some(candidate);
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<FallbackCandidate>) -> Self {
        self.fallbacks = Some(fallbacks);
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_system_prompts<I, S>(mut self, prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.system_prompts = Some(prompts.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_shape(mut self, shape: ResponseShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = stop_sequences;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}
