use async_trait::async_trait;
use futures_core::Stream;
use std::pin::Pin;

use crate::{Request, Response, StreamEvent};
use relay_types::RelayError;

/// An owned, incrementally consumed sequence of events.
///
/// An `Err` item is a raised failure; an `Ok(StreamEvent::Error)` item is a
/// failure reported as a sentinel. The fallback executor treats both alike.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, RelayError>> + Send>>;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// The capability contract every vendor adapter implements.
///
/// `stream` must end with exactly one `Done` or `Error` event. A backend that
/// only learns of a failure after it started emitting may send `Content` or
/// `ToolCall` events before the `Error`.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, RelayError>;
    async fn stream(&self, request: &Request) -> Result<EventStream, RelayError>;
}
