//! Tolerant server-sent-event line splitting.
//!
//! Responses-stream bodies interleave `event:`, `id:`, and comment lines
//! with the `data:` payloads we care about. The splitter is line-based
//! and forgiving: blank lines, missing final newlines, and unknown field
//! names are all skipped rather than rejected.

/// Extract the `data:` payloads from an SSE body, in order.
pub(crate) fn data_payloads(body: &str) -> Vec<&str> {
    body.lines()
        .filter_map(|line| {
            let line = line.trim();
            let data = line.strip_prefix("data:")?.trim();
            if data.is_empty() {
                None
            } else {
                Some(data)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_events() {
        let body = "data: one\n\ndata: two\n\n";
        assert_eq!(data_payloads(body), vec!["one", "two"]);
    }

    #[test]
    fn ignores_non_data_fields() {
        let body = "event: delta\nid: 42\nretry: 5000\ndata: payload\n\n";
        assert_eq!(data_payloads(body), vec!["payload"]);
    }

    #[test]
    fn tolerates_missing_trailing_newline() {
        let body = "data: tail";
        assert_eq!(data_payloads(body), vec!["tail"]);
    }

    #[test]
    fn skips_empty_data_lines() {
        let body = "data:\ndata:   \ndata: real\n";
        assert_eq!(data_payloads(body), vec!["real"]);
    }

    #[test]
    fn handles_whitespace_after_prefix() {
        let body = "data:   {\"k\":1}  \n";
        assert_eq!(data_payloads(body), vec!["{\"k\":1}"]);
    }

    #[test]
    fn empty_body_yields_nothing() {
        assert!(data_payloads("").is_empty());
    }
}
