//! Server-sent-event framing of an event sequence.
//!
//! Each event becomes one `data: <json>\n\n` frame; a literal `[DONE]` frame
//! marks successful completion. Writing is driven by whoever polls the body.

use std::pin::Pin;

use futures_core::Stream;
use relay_llm::{EventStream, StreamEvent};
use relay_types::RelayError;
use tokio_stream::StreamExt;

pub const CONTENT_TYPE: &str = "text/event-stream";
pub const CACHE_CONTROL: &str = "no-cache";
pub const CONNECTION: &str = "keep-alive";

/// The completion sentinel frame.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Framed body chunks. An `Err` item aborts the body.
pub type FramedBody = Pin<Box<dyn Stream<Item = Result<Vec<u8>, RelayError>> + Send>>;

/// Serialize one event as a `data:` frame.
pub fn encode_frame(event: &StreamEvent) -> Result<Vec<u8>, RelayError> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {json}\n\n").into_bytes())
}

/// A lazily written event-stream body plus its fixed headers.
pub struct FramedResponse {
    events: EventStream,
}

impl FramedResponse {
    pub fn new(events: EventStream) -> Self {
        Self { events }
    }

    pub fn headers(&self) -> [(&'static str, &'static str); 3] {
        [
            ("content-type", CONTENT_TYPE),
            ("cache-control", CACHE_CONTROL),
            ("connection", CONNECTION),
        ]
    }

    /// The frame sequence. `[DONE]` is written only after the events end
    /// without a raised failure.
    pub fn into_body(self) -> FramedBody {
        let mut events = self.events;
        Box::pin(async_stream::stream! {
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) => yield encode_frame(&event),
                    Err(e) => {
                        tracing::warn!(error = %e, "Event stream failed; aborting framed body");
                        yield Err(e);
                        return;
                    }
                }
            }
            yield Ok(DONE_FRAME.to_vec());
        })
    }
}

impl std::fmt::Debug for FramedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedResponse").finish_non_exhaustive()
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for FramedResponse {
    fn into_response(self) -> axum::response::Response {
        let headers = self.headers();
        (headers, axum::body::Body::from_stream(self.into_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_llm::FinishReason;

    fn events(items: Vec<Result<StreamEvent, RelayError>>) -> EventStream {
        Box::pin(tokio_stream::iter(items))
    }

    #[test]
    fn frame_holds_tagged_json() {
        let frame = encode_frame(&StreamEvent::content("Hi", "Hi")).unwrap();
        assert_eq!(
            String::from_utf8(frame).unwrap(),
            "data: {\"type\":\"content\",\"delta\":\"Hi\",\"total\":\"Hi\"}\n\n"
        );
    }

    #[test]
    fn fixed_headers() {
        let framed = FramedResponse::new(events(vec![]));
        let headers = framed.headers();
        assert!(headers.contains(&("content-type", "text/event-stream")));
        assert!(headers.contains(&("cache-control", "no-cache")));
        assert!(headers.contains(&("connection", "keep-alive")));
    }

    #[tokio::test]
    async fn body_ends_with_done_sentinel() {
        let framed = FramedResponse::new(events(vec![
            Ok(StreamEvent::content("Hi", "Hi")),
            Ok(StreamEvent::done(FinishReason::EndTurn)),
        ]));
        let chunks: Vec<_> = framed.into_body().collect().await;
        assert_eq!(chunks.len(), 3);

        let body: String = chunks
            .into_iter()
            .map(|c| String::from_utf8(c.unwrap()).unwrap())
            .collect();
        let frames: Vec<&str> = body.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 3);
        assert!(frames[0].starts_with("data: {\"type\":\"content\""));
        assert!(frames[1].starts_with("data: {\"type\":\"done\""));
        assert_eq!(frames[2], "data: [DONE]");
    }

    #[tokio::test]
    async fn failure_aborts_body_without_sentinel() {
        let framed = FramedResponse::new(events(vec![
            Ok(StreamEvent::content("Hi", "Hi")),
            Err(RelayError::AggregateFailure { failures: vec![] }),
        ]));
        let chunks: Vec<_> = framed.into_body().collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(matches!(chunks[1], Err(RelayError::AggregateFailure { .. })));
    }
}
