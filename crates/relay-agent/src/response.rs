//! Deferred and streamed result shapes.

use relay_llm::{EventStream, FinishReason, StreamEvent, ToolCall, ToolCallAccumulator, Usage};
use relay_types::RelayError;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::request::ResponseShape;
use crate::sse::FramedResponse;

/// The folded outcome of a fully consumed event sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    pub text: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// Consume `events` to completion and fold them into a [`ChatResult`].
///
/// Content deltas are concatenated in order and the last thinking total is
/// kept. The sequence must end with `Done`; a raised failure is returned as-is.
pub async fn fold_events(mut events: EventStream) -> Result<ChatResult, RelayError> {
    let mut text = String::new();
    let mut thinking: Option<String> = None;
    let mut tool_calls = ToolCallAccumulator::new();

    while let Some(item) = events.next().await {
        match item? {
            StreamEvent::Content { delta, .. } => text.push_str(&delta),
            StreamEvent::Thinking { total, .. } => thinking = Some(total),
            event @ StreamEvent::ToolCall { .. } => tool_calls.merge_event(&event),
            StreamEvent::Done {
                finish_reason,
                usage,
            } => {
                return Ok(ChatResult {
                    text,
                    thinking,
                    tool_calls: tool_calls.finish(),
                    finish_reason,
                    usage,
                });
            }
            StreamEvent::Error { message, code } => {
                return Err(RelayError::StreamError { message, code });
            }
        }
    }

    Err(RelayError::IncompleteStream)
}

/// Hand `events` back in the requested shape.
///
/// Only the deferred shape consumes the sequence here; the other two leave
/// driving it to the caller or the transport.
pub async fn present(events: EventStream, shape: ResponseShape) -> Result<ChatOutput, RelayError> {
    Ok(match shape {
        ResponseShape::Deferred => ChatOutput::Deferred(fold_events(events).await?),
        ResponseShape::Stream => ChatOutput::Stream(events),
        ResponseShape::Framed => ChatOutput::Framed(FramedResponse::new(events)),
    })
}

/// What [`Relay::chat`](crate::Relay::chat) hands back, by requested shape.
pub enum ChatOutput {
    Deferred(ChatResult),
    Stream(EventStream),
    Framed(FramedResponse),
}

impl ChatOutput {
    pub fn into_result(self) -> Option<ChatResult> {
        match self {
            ChatOutput::Deferred(result) => Some(result),
            _ => None,
        }
    }

    pub fn into_stream(self) -> Option<EventStream> {
        match self {
            ChatOutput::Stream(events) => Some(events),
            _ => None,
        }
    }

    pub fn into_framed(self) -> Option<FramedResponse> {
        match self {
            ChatOutput::Framed(framed) => Some(framed),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ChatOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatOutput::Deferred(result) => f.debug_tuple("Deferred").field(result).finish(),
            ChatOutput::Stream(_) => f.write_str("Stream(..)"),
            ChatOutput::Framed(_) => f.write_str("Framed(..)"),
        }
    }
}
