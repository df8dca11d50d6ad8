//! Sequential fallback over backend/model candidates.
//!
//! Candidates are attempted strictly one at a time, in order, each at most
//! once per call. Nothing is raced in parallel.

use std::future::Future;

use relay_types::{FailureRecord, RelayError};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{EventStream, FallbackCandidate, StreamEvent};

/// An ordered list of candidates plus an optional cancellation signal.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    candidates: Vec<FallbackCandidate>,
    cancellation: Option<CancellationToken>,
}

impl FallbackChain {
    pub fn new(candidates: Vec<FallbackCandidate>) -> Self {
        Self {
            candidates,
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    pub fn candidates(&self) -> &[FallbackCandidate] {
        &self.candidates
    }

    /// Run a single-result operation against each candidate until one succeeds.
    ///
    /// Every error from `op` is recorded against its candidate and the walk
    /// moves on; only cancellation ends it early. When every candidate fails the result is `AggregateFailure` with one
    /// record per candidate in attempt order.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RelayError>
    where
        F: FnMut(FallbackCandidate) -> Fut,
        Fut: Future<Output = Result<T, RelayError>>,
    {
        if self.candidates.is_empty() {
            return Err(RelayError::NoFallbacksConfigured);
        }

        let mut failures = Vec::with_capacity(self.candidates.len());
        for (attempt, candidate) in self.candidates.iter().enumerate() {
            tracing::debug!(
                backend = %candidate.backend,
                model = %candidate.model,
                attempt,
                "Trying fallback candidate"
            );

            let outcome = until_cancelled(self.cancellation.as_ref(), op(candidate.clone())).await?;
            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            backend = %candidate.backend,
                            model = %candidate.model,
                            attempt,
                            "Request succeeded on fallback candidate"
                        );
                    }
                    return Ok(value);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        backend = %candidate.backend,
                        model = %candidate.model,
                        attempt,
                        error = %e,
                        "Fallback candidate failed"
                    );
                    failures.push(FailureRecord::new(
                        &candidate.backend,
                        &candidate.model,
                        e.to_string(),
                    ));
                }
            }
        }

        Err(RelayError::AggregateFailure { failures })
    }

    /// Run a streaming operation with the same fallback semantics.
    ///
    /// `Content`, `Thinking` and `ToolCall` events are forwarded as they
    /// arrive. An `Error` event or a raised failure ends the current candidate
    /// without being forwarded, and the next candidate starts from scratch.
    /// Events already forwarded are not retracted. The first `Done` is
    /// forwarded and ends the sequence. If every candidate fails, the sequence
    /// ends with `Err(AggregateFailure)`. Only cancellation ends it early.
    pub fn run_stream<F, Fut>(self, mut op: F) -> EventStream
    where
        F: FnMut(FallbackCandidate) -> Fut + Send + 'static,
        Fut: Future<Output = Result<EventStream, RelayError>> + Send + 'static,
    {
        let FallbackChain {
            candidates,
            cancellation,
        } = self;

        Box::pin(async_stream::stream! {
            if candidates.is_empty() {
                yield Err(RelayError::NoFallbacksConfigured);
                return;
            }

            let mut failures = Vec::with_capacity(candidates.len());
            for (attempt, candidate) in candidates.into_iter().enumerate() {
                let backend = candidate.backend.clone();
                let model = candidate.model.clone();
                tracing::debug!(backend = %backend, model = %model, attempt, "Opening stream on fallback candidate");

                let mut events = match until_cancelled(cancellation.as_ref(), op(candidate)).await {
                    Err(cancelled) => {
                        yield Err(cancelled);
                        return;
                    }
                    Ok(Ok(events)) => events,
                    Ok(Err(e)) if e.is_cancelled() => {
                        yield Err(e);
                        return;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(backend = %backend, model = %model, attempt, error = %e, "Fallback candidate failed to open stream");
                        failures.push(FailureRecord::new(&backend, &model, e.to_string()));
                        continue;
                    }
                };

                let failure = loop {
                    let item = match until_cancelled(cancellation.as_ref(), events.next()).await {
                        Err(cancelled) => {
                            yield Err(cancelled);
                            return;
                        }
                        Ok(item) => item,
                    };
                    match item {
                        None => break RelayError::IncompleteStream,
                        Some(Err(e)) if e.is_cancelled() => {
                            yield Err(e);
                            return;
                        }
                        Some(Err(e)) => break e,
                        Some(Ok(StreamEvent::Error { message, code })) => {
                            break RelayError::StreamError { message, code };
                        }
                        Some(Ok(done @ StreamEvent::Done { .. })) => {
                            if attempt > 0 {
                                tracing::info!(backend = %backend, model = %model, attempt, "Stream succeeded on fallback candidate");
                            }
                            yield Ok(done);
                            return;
                        }
                        Some(Ok(event)) => yield Ok(event),
                    }
                };

                tracing::warn!(backend = %backend, model = %model, attempt, error = %failure, "Fallback candidate failed mid-stream");
                failures.push(FailureRecord::new(&backend, &model, failure.to_string()));
            }

            yield Err(RelayError::AggregateFailure { failures });
        })
    }
}

/// Await `fut` unless `token` fires first.
async fn until_cancelled<T>(
    token: Option<&CancellationToken>,
    fut: impl Future<Output = T>,
) -> Result<T, RelayError> {
    match token {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(RelayError::Cancelled),
                out = fut => Ok(out),
            }
        }
        None => Ok(fut.await),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FinishReason;
    use std::sync::{Arc, Mutex};

    fn candidates(names: &[&str]) -> Vec<FallbackCandidate> {
        names
            .iter()
            .map(|n| FallbackCandidate::new(*n, format!("{n}-model")))
            .collect()
    }

    fn events(items: Vec<Result<StreamEvent, RelayError>>) -> EventStream {
        Box::pin(tokio_stream::iter(items))
    }

    fn content(text: &str) -> Result<StreamEvent, RelayError> {
        Ok(StreamEvent::content(text, text))
    }

    fn done() -> Result<StreamEvent, RelayError> {
        Ok(StreamEvent::done(FinishReason::EndTurn))
    }

    // -----------------------------------------------------------------------
    // Single-result executor
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn run_stops_at_first_success() {
        let attempted = Arc::new(Mutex::new(Vec::new()));
        let seen = attempted.clone();
        let chain = FallbackChain::new(candidates(&["a", "b", "c", "d"]));

        let result = chain
            .run(move |c| {
                seen.lock().unwrap().push(c.backend.clone());
                async move {
                    if c.backend == "c" {
                        Ok(format!("answer from {}", c.model))
                    } else {
                        Err(RelayError::Other(format!("{} is down", c.backend)))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "answer from c-model");
        assert_eq!(*attempted.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn run_reports_every_failure_in_attempt_order() {
        let chain = FallbackChain::new(candidates(&["a", "b", "c"]));
        let err = chain
            .run(|c| async move { Err::<(), _>(RelayError::Other(format!("{} broke", c.backend))) })
            .await
            .unwrap_err();

        let failures = err.failures().expect("aggregate failure");
        assert_eq!(failures.len(), 3);
        assert_eq!(failures[0], FailureRecord::new("a", "a-model", "a broke"));
        assert_eq!(failures[1].backend, "b");
        assert_eq!(failures[2].backend, "c");
    }

    #[tokio::test]
    async fn run_records_backend_rejection_and_moves_on() {
        let attempted = Arc::new(Mutex::new(Vec::new()));
        let seen = attempted.clone();
        let chain = FallbackChain::new(candidates(&["a", "b", "c"]));
        let result = chain
            .run(move |c| {
                seen.lock().unwrap().push(c.backend.clone());
                async move {
                    match c.backend.as_str() {
                        "a" => Err(RelayError::InvalidRequest("model a rejects temperature".into())),
                        "b" => Err(RelayError::AuthError { provider: "b".into() }),
                        _ => Ok("from c"),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "from c");
        assert_eq!(*attempted.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn run_aggregates_config_and_request_errors() {
        let chain = FallbackChain::new(candidates(&["a", "b"]));
        let err = chain
            .run(|c| async move {
                Err::<(), _>(match c.backend.as_str() {
                    "a" => RelayError::Config("bad provider option".into()),
                    _ => RelayError::InvalidRequest("too many tokens".into()),
                })
            })
            .await
            .unwrap_err();

        let failures = err.failures().expect("aggregate failure");
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].message, "Configuration error: bad provider option");
        assert_eq!(failures[1].message, "Invalid request: too many tokens");
    }

    #[tokio::test]
    async fn run_with_no_candidates() {
        let chain = FallbackChain::new(vec![]);
        let err = chain.run(|_| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, RelayError::NoFallbacksConfigured));
    }

    #[tokio::test]
    async fn run_respects_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let chain = FallbackChain::new(candidates(&["a"])).with_cancellation(Some(token));
        let err = chain
            .run(|_| std::future::pending::<Result<(), RelayError>>())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Cancelled));
    }

    // -----------------------------------------------------------------------
    // Streaming executor
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn partial_output_before_sentinel_is_not_retracted() {
        let chain = FallbackChain::new(candidates(&["a", "b"]));
        let stream = chain.run_stream(|c| async move {
            Ok(match c.backend.as_str() {
                "a" => events(vec![content("Hi"), Ok(StreamEvent::error("overloaded"))]),
                _ => events(vec![content("Hello"), content(" there"), done()]),
            })
        });

        let seen: Vec<StreamEvent> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(
            seen,
            vec![
                StreamEvent::content("Hi", "Hi"),
                StreamEvent::content("Hello", "Hello"),
                StreamEvent::content(" there", " there"),
                StreamEvent::done(FinishReason::EndTurn),
            ]
        );
        assert!(!seen.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
    }

    #[tokio::test]
    async fn raise_before_first_event_advances_to_next_candidate() {
        let chain = FallbackChain::new(candidates(&["a", "b"]));
        let stream = chain.run_stream(|c| async move {
            if c.backend == "a" {
                Err(RelayError::RateLimited {
                    provider: "a".into(),
                    retry_after_ms: 100,
                })
            } else {
                Ok(events(vec![content("ok"), done()]))
            }
        });

        let seen: Vec<_> = stream.collect().await;
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn raised_item_mid_stream_counts_as_failure() {
        let chain = FallbackChain::new(candidates(&["a", "b"]));
        let stream = chain.run_stream(|c| async move {
            Ok(match c.backend.as_str() {
                "a" => events(vec![
                    content("x"),
                    Err(RelayError::Other("connection reset".into())),
                ]),
                _ => events(vec![done()]),
            })
        });
        let seen: Vec<_> = stream.collect().await;
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[1], Ok(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn later_candidates_are_never_opened_after_done() {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let log = opened.clone();
        let chain = FallbackChain::new(candidates(&["a", "b", "c"]));
        let stream = chain.run_stream(move |c| {
            log.lock().unwrap().push(c.backend.clone());
            async move {
                Ok(match c.backend.as_str() {
                    "a" => events(vec![Ok(StreamEvent::error("nope"))]),
                    _ => events(vec![content("fine"), done()]),
                })
            }
        });
        let _: Vec<_> = stream.collect().await;
        assert_eq!(*opened.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn exhausted_stream_chain_ends_with_aggregate_failure() {
        let chain = FallbackChain::new(candidates(&["a", "b", "c"]));
        let stream = chain.run_stream(|c| async move {
            Ok(match c.backend.as_str() {
                "a" => events(vec![Ok(StreamEvent::Error {
                    message: "quota".into(),
                    code: Some("429".into()),
                })]),
                "b" => events(vec![content("half")]),
                _ => return Err(RelayError::Other("refused".into())),
            })
        });

        let mut seen: Vec<_> = stream.collect().await;
        let last = seen.pop().unwrap();
        assert_eq!(seen.len(), 1, "only b's partial content is forwarded");

        let err = last.unwrap_err();
        let failures = err.failures().expect("aggregate failure");
        assert_eq!(failures.len(), 3);
        assert_eq!(failures[0].message, "Stream error [429]: quota");
        assert_eq!(failures[1].message, "Event stream ended without a terminal event");
        assert_eq!(failures[2].message, "refused");
    }

    #[tokio::test]
    async fn rejected_open_advances_to_next_candidate() {
        let chain = FallbackChain::new(candidates(&["a", "b"]));
        let stream = chain.run_stream(|c| async move {
            match c.backend.as_str() {
                "a" => Err(RelayError::Config("bad provider option".into())),
                _ => Ok(events(vec![content("from b"), done()])),
            }
        });
        let seen: Vec<_> = stream.collect().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].as_ref().unwrap(), &StreamEvent::content("from b", "from b"));
        assert!(seen[1].as_ref().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn raised_request_errors_mid_stream_are_aggregated() {
        let chain = FallbackChain::new(candidates(&["a", "b"]));
        let stream = chain.run_stream(|c| async move {
            let failure = match c.backend.as_str() {
                "a" => RelayError::InvalidRequest("model a rejects temperature".into()),
                _ => RelayError::AuthError { provider: "b".into() },
            };
            Ok(events(vec![Err(failure)]))
        });
        let seen: Vec<_> = stream.collect().await;
        assert_eq!(seen.len(), 1);

        let failures = match &seen[0] {
            Err(err) => err.failures().expect("aggregate failure").to_vec(),
            Ok(event) => panic!("unexpected event {event:?}"),
        };
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].backend, "a");
        assert_eq!(failures[1].message, "Authentication failed for provider b");
    }

    #[tokio::test]
    async fn cancelled_stream_stops_without_trying_others() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let chain = FallbackChain::new(candidates(&["a", "b"])).with_cancellation(Some(token));
        let stream = chain.run_stream(move |_| {
            let trigger = trigger.clone();
            async move {
                let tail = async_stream::stream! {
                    yield content("first");
                    trigger.cancel();
                    std::future::pending::<()>().await;
                };
                Ok(Box::pin(tail) as EventStream)
            }
        });

        let seen: Vec<_> = stream.collect().await;
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_ok());
        assert!(matches!(seen[1], Err(RelayError::Cancelled)));
    }

    #[tokio::test]
    async fn empty_stream_chain() {
        let chain = FallbackChain::new(vec![]);
        let seen: Vec<_> = chain
            .run_stream(|_| async { Ok(events(vec![])) })
            .collect()
            .await;
        assert!(matches!(seen[..], [Err(RelayError::NoFallbacksConfigured)]));
    }
}
