//! Tool definitions and registry for Relay tool loops.
//!
//! Provides `ToolDefinition`, the `Tool` executor trait, `ToolRegistry`, and
//! output truncation for tool results fed back to a model.

pub mod tool;
pub mod truncation;

pub use tool::{RegisteredTool, Tool, ToolDefinition, ToolRegistry};
pub use truncation::{truncate_output, TruncationMode};
