//! Small JSON wire helpers shared by the provider layer and the stores.
//!
//! `emit_json_string` escapes everything outside printable ASCII so the
//! output survives transports that mangle high bytes; parsing the emitted
//! literal always yields the original string.

use serde_json::Value;

/// Emit `s` as a JSON string literal, escaping `"`, `\`, control
/// characters, and every character at or above U+0080 (`\u00XX` within
/// Latin-1, `\uXXXX` above, surrogate pairs beyond the BMP).
pub fn emit_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c if c.is_ascii() => out.push(c),
            c => {
                let cp = c as u32;
                if cp <= 0xFFFF {
                    out.push_str(&format!("\\u{cp:04x}"));
                } else {
                    // Encode as a UTF-16 surrogate pair.
                    let v = cp - 0x10000;
                    let hi = 0xD800 + (v >> 10);
                    let lo = 0xDC00 + (v & 0x3FF);
                    out.push_str(&format!("\\u{hi:04x}\\u{lo:04x}"));
                }
            }
        }
    }
    out.push('"');
    out
}

/// Strict inverse of [`emit_json_string`]: parse a JSON string literal.
pub fn parse_json_string(lit: &str) -> Option<String> {
    serde_json::from_str::<String>(lit).ok()
}

/// True when the first non-whitespace byte opens a JSON object or array.
pub fn looks_like_json(body: &str) -> bool {
    matches!(body.trim_start().as_bytes().first(), Some(b'{') | Some(b'['))
}

/// If the root value carries an `error` envelope, flatten it into a
/// single human-readable detail string.
///
/// Recognized fields: `error.metadata.provider_name`, `error.code`
/// (string, integer, or float), and `error.message` falling back to
/// `error.type`.
pub fn extract_error_envelope(root: &Value) -> Option<String> {
    let err = root.get("error")?;
    if let Some(s) = err.as_str() {
        return Some(s.to_string());
    }
    let obj = err.as_object()?;

    let mut parts: Vec<String> = Vec::new();
    if let Some(name) = obj
        .get("metadata")
        .and_then(|m| m.get("provider_name"))
        .and_then(|v| v.as_str())
    {
        parts.push(name.to_string());
    }
    if let Some(code) = obj.get("code") {
        let code_str = match code {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
        if let Some(c) = code_str {
            parts.push(format!("code {c}"));
        }
    }
    let message = obj
        .get("message")
        .and_then(|v| v.as_str())
        .or_else(|| obj.get("type").and_then(|v| v.as_str()));
    if let Some(m) = message {
        parts.push(m.to_string());
    }

    if parts.is_empty() {
        // An envelope with no recognizable fields still signals failure.
        Some(err.to_string())
    } else {
        Some(parts.join(": "))
    }
}

/// Truncate `s` to at most `max` bytes on a char boundary, appending an
/// ellipsis marker when anything was cut.
pub fn excerpt(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut boundary = max;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}...", &s[..boundary])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_plain_ascii_unchanged() {
        assert_eq!(emit_json_string("hello"), "\"hello\"");
    }

    #[test]
    fn emit_escapes_quotes_and_backslashes() {
        assert_eq!(emit_json_string(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn emit_escapes_control_chars() {
        assert_eq!(emit_json_string("a\nb\tc"), "\"a\\nb\\tc\"");
        assert_eq!(emit_json_string("\u{01}"), "\"\\u0001\"");
    }

    #[test]
    fn emit_escapes_latin1_as_u00xx() {
        assert_eq!(emit_json_string("é"), "\"\\u00e9\"");
        assert_eq!(emit_json_string("ÿ"), "\"\\u00ff\"");
    }

    #[test]
    fn emit_escapes_bmp_and_astral() {
        assert_eq!(emit_json_string("→"), "\"\\u2192\"");
        // U+1F600 encodes as the surrogate pair d83d/de00.
        assert_eq!(emit_json_string("😀"), "\"\\ud83d\\ude00\"");
    }

    #[test]
    fn round_trip_all_ranges() {
        for s in [
            "plain",
            "tab\there",
            "quote\"back\\slash",
            "héllo wörld",
            "中文 and 😀 and \u{7f}\u{80}",
            "",
        ] {
            let lit = emit_json_string(s);
            assert_eq!(parse_json_string(&lit).as_deref(), Some(s), "literal: {lit}");
        }
    }

    #[test]
    fn looks_like_json_detects_objects_and_arrays() {
        assert!(looks_like_json("  {\"a\":1}"));
        assert!(looks_like_json("[1,2]"));
        assert!(!looks_like_json("<html>oops</html>"));
        assert!(!looks_like_json(""));
    }

    #[test]
    fn envelope_extracts_provider_code_and_message() {
        let v: Value = serde_json::from_str(
            r#"{"error":{"metadata":{"provider_name":"upstream"},"code":429,"message":"slow down"}}"#,
        )
        .unwrap();
        assert_eq!(
            extract_error_envelope(&v).as_deref(),
            Some("upstream: code 429: slow down")
        );
    }

    #[test]
    fn envelope_accepts_string_code_and_type_fallback() {
        let v: Value = serde_json::from_str(
            r#"{"error":{"code":"model_not_supported","type":"invalid_request_error"}}"#,
        )
        .unwrap();
        assert_eq!(
            extract_error_envelope(&v).as_deref(),
            Some("code model_not_supported: invalid_request_error")
        );
    }

    #[test]
    fn envelope_absent_returns_none() {
        let v: Value = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(extract_error_envelope(&v).is_none());
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let s = "ééééé"; // 2 bytes per char
        let cut = excerpt(s, 5);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 8);
    }
}
