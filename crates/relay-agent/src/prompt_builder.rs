//! System prompt composition.
//!
//! Decides which system instructions prefix a transcript before it is sent.

use relay_llm::Message;

/// Apply the effective system prompts to `transcript`.
///
/// The effective list is `overrides` when given (an explicitly empty override
/// means "no system prompts for this call"), otherwise `defaults`. When there
/// is no override and no non-empty default, the transcript is returned as is.
///
/// Otherwise the leading run of system messages, however long, is replaced
/// by one system message per prompt. A transcript with no leading system
/// messages gets the prompts prepended.
pub fn compose_system_prompts(
    transcript: Vec<Message>,
    overrides: Option<&[String]>,
    defaults: Option<&[String]>,
) -> Vec<Message> {
    let prompts = match (overrides, defaults) {
        (Some(overrides), _) => overrides,
        (None, Some(defaults)) if !defaults.is_empty() => defaults,
        _ => return transcript,
    };

    let leading = transcript.iter().take_while(|m| m.is_system()).count();
    let mut composed = Vec::with_capacity(prompts.len() + transcript.len() - leading);
    composed.extend(prompts.iter().map(Message::system));
    composed.extend(transcript.into_iter().skip(leading));
    composed
}
