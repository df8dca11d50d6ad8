//! Process-wide defaults for a [`Relay`](crate::Relay).

use std::path::Path;

use relay_llm::FallbackCandidate;
use relay_tools::TruncationMode;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ITERATIONS: usize = 5;
pub const DEFAULT_MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// Settings applied when a call does not override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Ordered candidates used when a call supplies none.
    pub fallbacks: Vec<FallbackCandidate>,
    /// System prompts applied when a call does not override them.
    pub system_prompts: Option<Vec<String>>,
    /// Tool-loop bound when a call does not set one.
    pub max_iterations: usize,
    pub max_tool_output_chars: usize,
    pub tool_output_truncation: TruncationMode,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            fallbacks: Vec::new(),
            system_prompts: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tool_output_chars: DEFAULT_MAX_TOOL_OUTPUT_CHARS,
            tool_output_truncation: TruncationMode::HeadTail,
        }
    }
}

impl RelaySettings {
    pub fn from_json_str(json: &str) -> relay_types::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read settings from a JSON file at `path`.
    pub fn load(path: &Path) -> relay_types::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<FallbackCandidate>) -> Self {
        self.fallbacks = fallbacks;
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

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}
