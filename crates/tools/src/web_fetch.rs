//! Capped HTTP GET for the `web_fetch` tool.

use serde::Deserialize;

use crate::sanitize::cap_output;

#[derive(Debug, Clone, Deserialize)]
pub struct WebFetchRequest {
    pub url: String,
}

/// Fetch a URL and return its body text, capped.
pub async fn web_fetch(client: &reqwest::Client, req: WebFetchRequest) -> Result<String, String> {
    if !req.url.starts_with("http://") && !req.url.starts_with("https://") {
        return Err(format!("unsupported URL scheme: '{}'", req.url));
    }

    let resp = client
        .get(&req.url)
        .send()
        .await
        .map_err(|e| format!("fetch failed: {e}"))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| format!("failed to read body: {e}"))?;

    if !status.is_success() {
        return Err(format!("HTTP {}: {}", status.as_u16(), cap_output(&body)));
    }
    Ok(cap_output(&body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let client = reqwest::Client::new();
        let err = web_fetch(
            &client,
            WebFetchRequest {
                url: "file:///etc/passwd".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.contains("unsupported URL scheme"));
    }
}
