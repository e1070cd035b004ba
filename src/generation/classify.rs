//! Terminal checks on a raw response before any parsing.

use super::errors::{ErrorKind, ErrorSet};
use crate::provider::FinishReason;

/// Flag the first terminal condition found; `true` means the text may be parsed.
///
/// Precedence is fixed: empty text, then truncation, then recitation.
pub fn classify(errors: &mut ErrorSet, text: &str, finish_reason: FinishReason) -> bool {
    let kind = if text.is_empty() {
        ErrorKind::EmptyOutput
    } else if finish_reason == FinishReason::MaxTokens {
        ErrorKind::MaxToken
    } else if finish_reason == FinishReason::Recitation {
        ErrorKind::Recitation
    } else {
        return true;
    };
    errors.set(kind);
    false
}
