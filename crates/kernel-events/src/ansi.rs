//! ANSI escape removal for tracebacks.

use std::sync::OnceLock;

use regex::Regex;

static ANSI_ESCAPE: OnceLock<Option<Regex>> = OnceLock::new();

fn ansi_escape() -> Option<&'static Regex> {
    ANSI_ESCAPE
        .get_or_init(|| {
            // CSI sequences (colors, cursor movement) and OSC sequences
            Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(\x07|\x1b\\)").ok()
        })
        .as_ref()
}

/// Remove ANSI escape sequences from `text`.
pub fn strip_ansi(text: &str) -> String {
    match ansi_escape() {
        Some(pattern) => pattern.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}
