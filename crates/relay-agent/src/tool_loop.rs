//! Bounded tool-execution loop over streamed turns.
//!
//! Each turn is one full streamed call (its own fallback chain). When a turn
//! finishes with `tool_use`, the requested tools run one after another, their
//! results are appended to the transcript and the next turn is issued. The
//! iteration bound caps the number of tool turns, not fallback attempts.

use std::collections::HashMap;

use relay_llm::{EventStream, Message, StreamEvent, ToolCall, ToolCallAccumulator};
use relay_tools::{truncate_output, RegisteredTool, TruncationMode};
use relay_types::RelayError;
use tokio_stream::StreamExt;

use crate::config::{DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOOL_OUTPUT_CHARS};

/// Tools and limits for one looping call.
#[derive(Debug, Clone)]
pub struct ToolLoop {
    tools: HashMap<String, RegisteredTool>,
    max_iterations: usize,
    max_tool_output_chars: usize,
    truncation: TruncationMode,
}

impl ToolLoop {
    pub fn new(tools: impl IntoIterator<Item = RegisteredTool>) -> Self {
        Self {
            tools: tools
                .into_iter()
                .map(|tool| (tool.name().to_string(), tool))
                .collect(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tool_output_chars: DEFAULT_MAX_TOOL_OUTPUT_CHARS,
            truncation: TruncationMode::default(),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_output_limit(mut self, max_chars: usize, truncation: TruncationMode) -> Self {
        self.max_tool_output_chars = max_chars;
        self.truncation = truncation;
        self
    }

    /// Whether any selected tool can run locally.
    pub fn has_executors(&self) -> bool {
        self.tools.values().any(RegisteredTool::has_executor)
    }

    /// Drive turns until one finishes without requesting tools or the bound
    /// is reached.
    ///
    /// `issue` opens the event sequence for one turn from the current
    /// transcript. `Content` and `Thinking` events are forwarded as they
    /// arrive. Tool-call fragments are held until the turn's `Done` shows
    /// whether the loop will invoke them: an invoking turn's fragments are
    /// consumed by the loop, and the final turn's fragments are forwarded in
    /// their own order just before its `Done`. Events of the final turn are
    /// therefore not in backend order when a backend interleaves `ToolCall`
    /// with `Content` or `Thinking`: text always comes first. Only the final
    /// `Done` is forwarded. A raised failure from a turn ends the sequence
    /// unmodified.
    pub fn run<F>(self, transcript: Vec<Message>, mut issue: F) -> EventStream
    where
        F: FnMut(Vec<Message>) -> EventStream + Send + 'static,
    {
        Box::pin(async_stream::stream! {
            let mut transcript = transcript;
            let mut iterations = 0usize;

            loop {
                tracing::debug!(iteration = iterations, messages = transcript.len(), "Issuing turn");
                let mut events = issue(transcript.clone());
                let mut accumulator = ToolCallAccumulator::new();
                let mut fragments = Vec::new();
                let mut text = String::new();

                let (finish_reason, usage) = loop {
                    match events.next().await {
                        None => {
                            yield Err(RelayError::IncompleteStream);
                            return;
                        }
                        Some(Err(e)) => {
                            yield Err(e);
                            return;
                        }
                        Some(Ok(StreamEvent::Done { finish_reason, usage })) => break (finish_reason, usage),
                        Some(Ok(StreamEvent::Error { message, code })) => {
                            yield Err(RelayError::StreamError { message, code });
                            return;
                        }
                        Some(Ok(event @ StreamEvent::ToolCall { .. })) => {
                            accumulator.merge_event(&event);
                            fragments.push(event);
                        }
                        Some(Ok(event)) => {
                            if let StreamEvent::Content { delta, .. } = &event {
                                text.push_str(delta);
                            }
                            yield Ok(event);
                        }
                    }
                };

                let wants_tools = finish_reason.requests_tools() && !accumulator.is_empty();
                if !wants_tools || iterations >= self.max_iterations {
                    if wants_tools {
                        tracing::info!(iteration = iterations, bound = self.max_iterations, "Tool-loop bound reached");
                    }
                    for fragment in fragments {
                        yield Ok(fragment);
                    }
                    yield Ok(StreamEvent::Done { finish_reason, usage });
                    return;
                }

                let calls = accumulator.finish();
                let content = if text.is_empty() { None } else { Some(text) };
                transcript.push(Message::assistant_tool_calls(content, calls.clone()));

                for call in &calls {
                    let output = self.execute(call).await;
                    transcript.push(Message::tool_result(&call.id, output));
                }
                iterations += 1;
            }
        })
    }

    /// Run one call. Every outcome, including failure, becomes result text.
    async fn execute(&self, call: &ToolCall) -> String {
        tracing::debug!(tool = %call.name, id = %call.id, "Executing tool call");

        let Some(tool) = self.tools.get(&call.name) else {
            let msg = format!("Unknown tool: {}", call.name);
            tracing::debug!("{}", msg);
            return msg;
        };
        let Some(executor) = &tool.executor else {
            tracing::debug!(tool = %call.name, "Tool has no local executor");
            return format!("Error: tool '{}' has no executor", call.name);
        };
        let arguments = match call.parsed_arguments() {
            Ok(arguments) => arguments,
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "Unparsable tool arguments");
                return format!("Error: invalid arguments for '{}': {}", call.name, e);
            }
        };

        match executor.execute(arguments).await {
            Ok(output) => truncate_output(&output, self.max_tool_output_chars, self.truncation),
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "Tool execution failed");
                format!("Error: {}", e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
