//! Request orchestration over multiple chat backends.
//!
//! Provides `Relay` with the core flow: compose system prompts -> resolve
//! fallback candidates -> stream through the fallback chain (looping over
//! local tools when any are selected) -> present the result as a deferred
//! value, a live event stream, or a framed SSE body.

pub mod config;
pub mod prompt_builder;
pub mod request;
pub mod response;
pub mod sse;
pub mod tool_loop;

pub use config::RelaySettings;
pub use prompt_builder::compose_system_prompts;
pub use request::{ChatRequest, ResponseShape};
pub use response::{fold_events, present, ChatOutput, ChatResult};
pub use sse::{encode_frame, FramedResponse, DONE_FRAME};
pub use tool_loop::ToolLoop;

use std::sync::Arc;

use relay_llm::{
    BackendRegistration, BackendRegistry, EventStream, FallbackCandidate, FallbackChain, Message,
    Request, Response,
};
use relay_tools::{Tool, ToolDefinition, ToolRegistry};
use relay_types::{RelayError, Result};

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Inner {
    backends: BackendRegistry,
    tools: ToolRegistry,
    settings: RelaySettings,
}

/// The orchestrator. Registries are fixed at construction; cloning is cheap
/// and shares them.
#[derive(Debug, Clone)]
pub struct Relay {
    inner: Arc<Inner>,
}

impl Relay {
    pub fn builder() -> RelayBuilder {
        RelayBuilder::default()
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.inner.settings
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.inner.backends
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.tools
    }

    /// A new orchestrator whose registry also holds `registration`.
    ///
    /// `self` keeps its own registry.
    pub fn with_backend(&self, registration: BackendRegistration) -> Relay {
        Relay {
            inner: Arc::new(Inner {
                backends: self.inner.backends.extended(registration),
                tools: self.inner.tools.clone(),
                settings: self.inner.settings.clone(),
            }),
        }
    }

    /// The ordered candidates a call will walk.
    ///
    /// A primary backend/model comes first, followed by the call's fallbacks
    /// or else the configured defaults (minus any repeat of the primary).
    /// Without a primary the call's own non-empty fallbacks are used, else
    /// the defaults. Every backend name is checked before anything runs.
    pub fn resolve_candidates(&self, request: &ChatRequest) -> Result<Vec<FallbackCandidate>> {
        let defaults = &self.inner.settings.fallbacks;
        let candidates = match &request.primary {
            Some(primary) => {
                let rest = request.fallbacks.as_ref().unwrap_or(defaults);
                std::iter::once(primary.clone())
                    .chain(
                        rest.iter()
                            .filter(|c| !(c.backend == primary.backend && c.model == primary.model))
                            .cloned(),
                    )
                    .collect::<Vec<_>>()
            }
            None => match &request.fallbacks {
                Some(fallbacks) if !fallbacks.is_empty() => fallbacks.clone(),
                _ => defaults.clone(),
            },
        };

        if candidates.is_empty() {
            return Err(RelayError::NoFallbacksConfigured);
        }
        self.inner.backends.check_candidates(&candidates)?;
        Ok(candidates)
    }

    /// Single-shot completion through the fallback chain. Tools are offered
    /// to the model but not executed.
    pub async fn complete(&self, request: ChatRequest) -> Result<Response> {
        let candidates = self.resolve_candidates(&request)?;
        let base = self.backend_request(&request, &candidates)?;

        tracing::debug!(candidates = candidates.len(), "Starting completion");
        FallbackChain::new(candidates)
            .with_cancellation(request.cancellation.clone())
            .run(|candidate| {
                let attempt = base.for_candidate(&candidate);
                let backend = self
                    .inner
                    .backends
                    .get(&candidate.backend)
                    .map(|registration| Arc::clone(registration.backend()));
                async move {
                    match backend {
                        Ok(backend) => backend.complete(&attempt).await,
                        Err(e) => Err(e),
                    }
                }
            })
            .await
    }

    /// Open the event sequence for a call.
    ///
    /// Lookup failures (`BackendNotFound`, `ToolNotFound`,
    /// `NoFallbacksConfigured`) are returned here, before any backend is
    /// contacted. When a selected tool has a local executor the sequence is
    /// driven by the tool loop; otherwise it is one pass of the fallback chain.
    pub fn stream(&self, request: ChatRequest) -> Result<EventStream> {
        let candidates = self.resolve_candidates(&request)?;
        let base = self.backend_request(&request, &candidates)?;
        let selected = self.inner.tools.resolve(&request.tools)?;

        let settings = &self.inner.settings;
        let tool_loop = ToolLoop::new(selected)
            .with_max_iterations(request.max_iterations.unwrap_or(settings.max_iterations))
            .with_output_limit(settings.max_tool_output_chars, settings.tool_output_truncation);

        if !tool_loop.has_executors() {
            tracing::debug!(candidates = candidates.len(), "Starting stream");
            return Ok(self.open_turn(base, candidates));
        }

        tracing::debug!(
            candidates = candidates.len(),
            tools = request.tools.len(),
            "Starting tool loop"
        );
        let relay = self.clone();
        let overrides = request.system_prompts.clone();
        Ok(tool_loop.run(base.messages.clone(), move |transcript| {
            let mut turn = base.clone();
            turn.messages = relay.compose(transcript, overrides.as_deref());
            relay.open_turn(turn, candidates.clone())
        }))
    }

    /// Run a call and hand the result back in the request's shape.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatOutput> {
        let shape = request.shape;
        let events = self.stream(request)?;
        present(events, shape).await
    }

    fn compose(&self, transcript: Vec<Message>, overrides: Option<&[String]>) -> Vec<Message> {
        compose_system_prompts(
            transcript,
            overrides,
            self.inner.settings.system_prompts.as_deref(),
        )
    }

    /// The backend request shared by every attempt of a call.
    fn backend_request(
        &self,
        request: &ChatRequest,
        candidates: &[FallbackCandidate],
    ) -> Result<Request> {
        let model = candidates
            .first()
            .map(|c| c.model.clone())
            .ok_or(RelayError::NoFallbacksConfigured)?;
        let messages = self.compose(request.messages.clone(), request.system_prompts.as_deref());

        let mut base = Request::new(model, messages);
        base.tools = self
            .inner
            .tools
            .resolve(&request.tools)?
            .iter()
            .map(|tool| tool.definition.schema())
            .collect();
        base.max_tokens = request.max_tokens;
        base.temperature = request.temperature;
        base.stop_sequences = request.stop_sequences.clone();
        base.cancellation = request.cancellation.clone();
        Ok(base)
    }

    /// One streamed pass over the fallback chain.
    fn open_turn(&self, base: Request, candidates: Vec<FallbackCandidate>) -> EventStream {
        let inner = Arc::clone(&self.inner);
        let cancellation = base.cancellation.clone();
        FallbackChain::new(candidates)
            .with_cancellation(cancellation)
            .run_stream(move |candidate| {
                let attempt = base.for_candidate(&candidate);
                let backend = inner
                    .backends
                    .get(&candidate.backend)
                    .map(|registration| Arc::clone(registration.backend()));
                async move {
                    match backend {
                        Ok(backend) => backend.stream(&attempt).await,
                        Err(e) => Err(e),
                    }
                }
            })
    }
}

// ---------------------------------------------------------------------------
// RelayBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RelayBuilder {
    backends: Vec<BackendRegistration>,
    tools: ToolRegistry,
    settings: RelaySettings,
}

impl RelayBuilder {
    pub fn backend(mut self, registration: BackendRegistration) -> Self {
        self.backends.push(registration);
        self
    }

    /// Register a tool with a local executor.
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    /// Register a tool the model may see but that runs elsewhere.
    pub fn tool_definition(mut self, definition: ToolDefinition) -> Self {
        self.tools.register_definition(definition);
        self
    }

    pub fn settings(mut self, settings: RelaySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<Relay> {
        if self.backends.is_empty() {
            return Err(RelayError::Config(
                "At least one backend must be registered".into(),
            ));
        }
        let backends = BackendRegistry::from_registrations(self.backends)?;
        backends.check_candidates(&self.settings.fallbacks)?;

        tracing::debug!(
            backends = ?backends.names(),
            tools = self.tools.len(),
            fallbacks = self.settings.fallbacks.len(),
            "Relay constructed"
        );
        Ok(Relay {
            inner: Arc::new(Inner {
                backends,
                tools: self.tools,
                settings: self.settings,
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_llm::{Backend, FinishReason, StreamEvent, Usage};

    struct NullBackend;

    #[async_trait]
    impl Backend for NullBackend {
        async fn complete(&self, request: &Request) -> Result<Response> {
            Ok(Response {
                id: "null".into(),
                text: String::new(),
                tool_calls: vec![],
                reasoning: None,
                usage: Usage::default(),
                model: request.model.clone(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        async fn stream(&self, _request: &Request) -> Result<EventStream> {
            Ok(Box::pin(tokio_stream::iter(vec![Ok(StreamEvent::done(
                FinishReason::EndTurn,
            ))])))
        }
    }

    fn relay(settings: RelaySettings) -> Relay {
        Relay::builder()
            .backend(BackendRegistration::new("a", NullBackend))
            .backend(BackendRegistration::new("b", NullBackend))
            .settings(settings)
            .build()
            .unwrap()
    }

    fn pairs(candidates: &[FallbackCandidate]) -> Vec<(String, String)> {
        candidates
            .iter()
            .map(|c| (c.backend.clone(), c.model.clone()))
            .collect()
    }

    fn pair(backend: &str, model: &str) -> (String, String) {
        (backend.to_string(), model.to_string())
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn build_requires_a_backend() {
        let err = Relay::builder().build().unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn build_rejects_duplicate_backend_names() {
        let err = Relay::builder()
            .backend(BackendRegistration::new("a", NullBackend))
            .backend(BackendRegistration::new("a", NullBackend))
            .build()
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn build_rejects_default_fallback_on_unknown_backend() {
        let err = Relay::builder()
            .backend(BackendRegistration::new("a", NullBackend))
            .settings(RelaySettings::default().with_fallbacks(vec![FallbackCandidate::new("z", "m")]))
            .build()
            .unwrap_err();
        assert!(matches!(err, RelayError::BackendNotFound { backend } if backend == "z"));
    }

    #[test]
    fn with_backend_leaves_original_untouched() {
        let original = relay(RelaySettings::default());
        let extended = original.with_backend(BackendRegistration::new("c", NullBackend));

        assert_eq!(original.backends().names(), vec!["a", "b"]);
        assert_eq!(extended.backends().names(), vec!["a", "b", "c"]);
    }

    // -----------------------------------------------------------------------
    // Candidate resolution
    // -----------------------------------------------------------------------

    #[test]
    fn primary_then_default_fallbacks() {
        let relay = relay(RelaySettings::default().with_fallbacks(vec![
            FallbackCandidate::new("a", "m1"),
            FallbackCandidate::new("b", "m2"),
        ]));
        let request = ChatRequest::new(vec![]).with_backend("a", "m1");

        let candidates = relay.resolve_candidates(&request).unwrap();
        assert_eq!(pairs(&candidates), vec![pair("a", "m1"), pair("b", "m2")]);
    }

    #[test]
    fn call_fallbacks_override_defaults() {
        let relay = relay(RelaySettings::default().with_fallbacks(vec![FallbackCandidate::new("a", "m1")]));
        let request = ChatRequest::new(vec![])
            .with_backend("b", "primary")
            .with_fallbacks(vec![FallbackCandidate::new("a", "other")]);

        let candidates = relay.resolve_candidates(&request).unwrap();
        assert_eq!(pairs(&candidates), vec![pair("b", "primary"), pair("a", "other")]);
    }

    #[test]
    fn fallback_only_call_uses_defaults() {
        let relay = relay(RelaySettings::default().with_fallbacks(vec![FallbackCandidate::new("b", "m")]));
        let candidates = relay.resolve_candidates(&ChatRequest::new(vec![])).unwrap();
        assert_eq!(pairs(&candidates), vec![pair("b", "m")]);
    }

    #[test]
    fn nothing_to_try_is_an_error() {
        let relay = relay(RelaySettings::default());
        let err = relay
            .resolve_candidates(&ChatRequest::new(vec![]).with_fallbacks(vec![]))
            .unwrap_err();
        assert!(matches!(err, RelayError::NoFallbacksConfigured));
    }

    #[test]
    fn unknown_backend_is_rejected_up_front() {
        let relay = relay(RelaySettings::default());
        let err = relay
            .resolve_candidates(&ChatRequest::new(vec![]).with_backend("nope", "m"))
            .unwrap_err();
        assert!(matches!(err, RelayError::BackendNotFound { backend } if backend == "nope"));
    }

    #[test]
    fn unknown_tool_is_rejected_before_streaming() {
        let relay = relay(RelaySettings::default());
        let err = relay
            .stream(
                ChatRequest::new(vec![Message::user("hi")])
                    .with_backend("a", "m")
                    .with_tools(["missing"]),
            )
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::ToolNotFound { tool } if tool == "missing"));
    }
}
