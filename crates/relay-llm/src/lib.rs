//! Unified chat model and request orchestration over multiple LLM backends.
//!
//! Provides the `Backend` capability contract, `BackendRegistry`, the
//! `FallbackChain` executors for single-shot and streamed calls, and the
//! `ToolCallAccumulator` used to reassemble partial tool invocations.

mod accumulate;
mod client;
mod fallback;
mod provider;
mod types;

pub use accumulate::*;
pub use client::*;
pub use fallback::*;
pub use provider::*;
pub use types::*;
