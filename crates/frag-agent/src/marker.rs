//! Completion marker detection
//!
//! An agent signals it is done by embedding `<task_summary>` in its final
//! assistant message, normally as a block:
//!
//! ```text
//! <task_summary>
//! Built a counter page with increment and reset buttons.
//! </task_summary>
//! ```
//!
//! Detection is a plain substring test on the opening tag. The closing tag is
//! optional and never required for completion.

use frag_core::{Role, COMPLETION_MARKER};

use crate::types::OutputMessage;

/// Whether `text` carries the completion marker
pub fn contains_marker(text: &str) -> bool {
    text.contains(COMPLETION_MARKER)
}

/// Text of the last assistant text message in `output`
///
/// List-valued content is concatenated. Tool calls and non-assistant text
/// are skipped.
pub fn last_assistant_text(output: &[OutputMessage]) -> Option<String> {
    output.iter().rev().find_map(|message| match message {
        OutputMessage::Text {
            role: Role::Assistant,
            content,
        } => Some(content.to_text()),
        _ => None,
    })
}

/// Body of the `<task_summary>` block, trimmed
///
/// Returns `None` when there is no complete block. Used for logging; the
/// stored summary is always the full message.
pub fn summary_body(text: &str) -> Option<String> {
    extract_tag_content(text, "task_summary")
}

/// Extract content from an XML-style tag
fn extract_tag_content(text: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    let start = text.find(&start_tag)? + start_tag.len();
    let end = start + text[start..].find(&end_tag)?;

    let content = text[start..end].trim();
    (!content.is_empty()).then(|| content.to_string())
}
