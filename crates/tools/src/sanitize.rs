//! Tool-output sanitation.
//!
//! Everything a tool produces passes through here before it reaches the
//! model or a client: ANSI escape sequences are stripped and the result
//! is capped at 128 KiB with a visible truncation marker.

use std::sync::OnceLock;

use regex::Regex;

/// Cap on tool output surfaced to the model.
pub const MAX_TOOL_OUTPUT_BYTES: usize = 128 * 1024;

/// Marker appended when output was cut at the cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated at 128 KiB]";

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // CSI sequences, OSC sequences (BEL or ST terminated), and stray
    // two-byte escapes.
    RE.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b.")
            .expect("ansi regex compiles")
    })
}

/// Remove ANSI escape sequences.
pub fn strip_ansi(s: &str) -> String {
    ansi_re().replace_all(s, "").into_owned()
}

/// Enforce the output cap, cutting on a char boundary.
pub fn cap_output(s: &str) -> String {
    if s.len() <= MAX_TOOL_OUTPUT_BYTES {
        return s.to_string();
    }
    let mut boundary = MAX_TOOL_OUTPUT_BYTES;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}{}", &s[..boundary], TRUNCATION_MARKER)
}

/// Strip then cap, the order every caller wants.
pub fn sanitize_output(s: &str) -> String {
    cap_output(&strip_ansi(s))
}
