//! Style constants and message helpers for terminal output.
//!
//! User-facing messages are built with `color_print::cformat!` using
//! HTML-like tags:
//!
//! - Errors: `<red>...</>`
//! - Warnings: `<yellow>...</>`
//! - Hints: `<dim>...</>`
//! - Progress: `<cyan>...</>`
//! - Success: `<green>...</>`
//!
//! All output goes through [`anstream`]'s `println!`/`eprintln!` so ANSI
//! codes are stripped automatically when the stream is not a terminal.

use color_print::cformat;

// Re-export the auto-stripping print macros so callers write
// `use lumenflow::styling::{eprintln, println};` and get consistent behavior.
pub use anstream::{eprint, eprintln, print, println};

/// Progress emoji: `cformat!("{PROGRESS_EMOJI} <cyan>message</>")`
pub const PROGRESS_EMOJI: &str = "🔄";

/// Success emoji: `cformat!("{SUCCESS_EMOJI} <green>message</>")`
pub const SUCCESS_EMOJI: &str = "✅";

/// Error emoji: `cformat!("{ERROR_EMOJI} <red>message</>")`
pub const ERROR_EMOJI: &str = "❌";

/// Warning emoji: `cformat!("{WARNING_EMOJI} <yellow>message</>")`
pub const WARNING_EMOJI: &str = "🟡";

/// Hint emoji: `cformat!("{HINT_EMOJI} <dim>message</>")`
pub const HINT_EMOJI: &str = "💡";

/// Info emoji - neutral status lines.
pub const INFO_EMOJI: &str = "⚪";

pub fn error_message(msg: impl AsRef<str>) -> String {
    cformat!("{ERROR_EMOJI} <red>{}</>", msg.as_ref())
}

pub fn warning_message(msg: impl AsRef<str>) -> String {
    cformat!("{WARNING_EMOJI} <yellow>{}</>", msg.as_ref())
}

pub fn success_message(msg: impl AsRef<str>) -> String {
    cformat!("{SUCCESS_EMOJI} <green>{}</>", msg.as_ref())
}

pub fn progress_message(msg: impl AsRef<str>) -> String {
    cformat!("{PROGRESS_EMOJI} <cyan>{}</>", msg.as_ref())
}

pub fn hint_message(msg: impl AsRef<str>) -> String {
    cformat!("{HINT_EMOJI} <dim>{}</>", msg.as_ref())
}

pub fn info_message(msg: impl AsRef<str>) -> String {
    cformat!("{INFO_EMOJI} {}", msg.as_ref())
}

/// Indent multi-line command or config content two spaces, one line per row.
///
/// The gutter keeps quoted content (gate output, git stderr) visually
/// separated from surrounding messages without a background color.
pub fn format_with_gutter(content: &str) -> String {
    content
        .lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gutter_indents_each_line() {
        assert_eq!(format_with_gutter("a\nb"), "  a\n  b");
    }

    #[test]
    fn messages_carry_emoji() {
        assert!(error_message("boom").contains(ERROR_EMOJI));
        assert!(hint_message("try this").contains(HINT_EMOJI));
    }
}
