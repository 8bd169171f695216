use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Tool, ToolCategory, ToolOutput, ToolSpec};
use crate::config::ToolsConfig;
use crate::error::{ToolError, ToolResult};

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)>")
        .expect("script pattern is valid")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Reduce an HTML document to its visible text.
pub fn html_to_text(html: &str) -> String {
    let without_scripts = SCRIPT_OR_STYLE.replace_all(html, " ");
    let without_tags = TAG.replace_all(&without_scripts, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

/// Fetches a URL and returns its text content.
///
/// Disabled unless `WEB_FETCH_ENABLED` is set; a disabled tool answers
/// every call with a `not_configured` result.
pub struct WebFetch {
    spec: ToolSpec,
    client: Client,
    enabled: bool,
    max_bytes: usize,
}

impl WebFetch {
    /// Create the tool from tool settings
    pub fn new(config: &ToolsConfig) -> ToolResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ToolError::Execution {
                tool_name: "web_fetch".to_string(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            spec: ToolSpec::new(
                "web_fetch",
                "Fetch a web page over HTTP(S) and return its text content.",
                ToolCategory::Web,
            )
            .with_param("url", "string", "Absolute http or https URL", true),
            client,
            enabled: config.web_fetch_enabled,
            max_bytes: config.web_fetch_max_bytes,
        })
    }

    async fn fetch(&self, url: Url) -> Result<Value, String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        let status = response.status();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("html"))
            .unwrap_or(false);

        let mut body = Vec::new();
        let mut truncated = false;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("Failed to read body: {}", e))?;
            let room = self.max_bytes.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let raw = String::from_utf8_lossy(&body);
        let content = if is_html {
            html_to_text(&raw)
        } else {
            raw.trim().to_string()
        };

        if !status.is_success() {
            return Err(format!("HTTP {} from {}", status.as_u16(), url));
        }

        debug!(url = %url, bytes = body.len(), truncated, "Fetched page");
        Ok(json!({
            "url": url.as_str(),
            "status": status.as_u16(),
            "content": content,
            "truncated": truncated,
        }))
    }
}

#[async_trait]
impl Tool for WebFetch {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        if !self.enabled {
            return ToolOutput::not_configured("Web fetch");
        }
        let Some(raw_url) = args["url"].as_str() else {
            return ToolOutput::failure("missing url");
        };
        let url = match Url::parse(raw_url.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                return ToolOutput::failure(format!("Unsupported URL scheme: {}", url.scheme()))
            }
            Err(e) => return ToolOutput::failure(format!("Invalid URL '{}': {}", raw_url, e)),
        };

        match self.fetch(url).await {
            Ok(result) => ToolOutput::success(result),
            Err(e) => {
                warn!(url = raw_url, error = %e, "Web fetch failed");
                ToolOutput::failure(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn enabled(max_bytes: usize) -> WebFetch {
        WebFetch::new(&ToolsConfig {
            web_fetch_enabled: true,
            web_fetch_max_bytes: max_bytes,
            ..ToolsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><style>p{}</style><script>alert(1)</script></head>\
                    <body><h1>Title</h1>\n<p>Fish &amp; chips</p></body></html>";
        assert_eq!(html_to_text(html), "Title Fish & chips");
    }

    #[tokio::test]
    async fn test_disabled_by_default() {
        let tool = WebFetch::new(&ToolsConfig::default()).unwrap();
        let output = tool.execute(json!({"url": "https://example.com"})).await;
        assert!(output.success);
        assert_eq!(output.result["status"], "not_configured");
    }

    #[tokio::test]
    async fn test_rejects_non_http_schemes() {
        let output = enabled(1024).execute(json!({"url": "file:///etc/passwd"})).await;
        assert!(!output.success);
        assert!(output.error.unwrap().contains("Unsupported URL scheme"));
    }

    #[tokio::test]
    async fn test_fetches_and_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<p>hello world</p>", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(500)))
            .mount(&server)
            .await;

        let tool = enabled(100);
        let output = tool
            .execute(json!({"url": format!("{}/page", server.uri())}))
            .await;
        assert!(output.success);
        assert_eq!(output.result["content"], "hello world");
        assert_eq!(output.result["truncated"], false);

        let output = tool
            .execute(json!({"url": format!("{}/big", server.uri())}))
            .await;
        assert_eq!(output.result["content"].as_str().unwrap().len(), 100);
        assert_eq!(output.result["truncated"], true);
    }

    #[tokio::test]
    async fn test_http_error_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let output = enabled(1024)
            .execute(json!({"url": format!("{}/missing", server.uri())}))
            .await;
        assert!(!output.success);
        assert!(output.error.unwrap().contains("HTTP 404"));
    }
}
