//! Output truncation for tool results.

use serde::{Deserialize, Serialize};

/// How to truncate output that exceeds the maximum character limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationMode {
    /// Keep first 40% and last 60%, with a marker in the middle.
    #[default]
    HeadTail,
    /// Keep last `max_chars`, with a marker at the start.
    Tail,
}

/// Truncate `output` to at most `max_chars` characters using the given mode.
///
/// If the output is within the limit, it is returned unchanged.
/// Otherwise a warning marker is inserted indicating how many characters were removed.
pub fn truncate_output(output: &str, max_chars: usize, mode: TruncationMode) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }

    match mode {
        TruncationMode::HeadTail => {
            let head_size = max_chars * 40 / 100;
            let tail_size = max_chars - head_size;
            let removed = total - head_size - tail_size;
            let head: String = output.chars().take(head_size).collect();
            let tail: String = output.chars().skip(total - tail_size).collect();
            format!(
                "{}\n[WARNING: Output truncated. {} characters removed from middle]\n{}",
                head, removed, tail
            )
        }
        TruncationMode::Tail => {
            let removed = total - max_chars;
            let tail: String = output.chars().skip(removed).collect();
            format!(
                "\n[WARNING: Output truncated. {} characters removed from start]\n{}",
                removed, tail
            )
        }
    }
}
