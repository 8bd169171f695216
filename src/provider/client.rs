use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use tracing::{debug, error, info, warn};

use super::types::{ChatChunk, ChatRequest, ChatResponse, Message};
use super::{estimate_tokens, GenerationConfig, ModelProvider, TextStream};
use crate::config::{ModelConfig, RequestConfig};
use crate::error::{ModelError, ModelResult};

/// Client for an OpenAI-compatible chat completions API
#[derive(Clone)]
pub struct HttpModelProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    request_config: RequestConfig,
}

impl HttpModelProvider {
    /// Create a new provider client
    pub fn new(config: &ModelConfig, request_config: RequestConfig) -> ModelResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(ModelError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, prompt: &str, config: &GenerationConfig, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &config.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stop: config.stop.clone(),
            stream,
        }
    }

    /// Send a request, mapping transport failures and error statuses
    async fn send(&self, request: &ChatRequest) -> ModelResult<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    ModelError::Http(e)
                }
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ModelError::RateLimited {
                message: error_body,
            });
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        Ok(response)
    }

    /// Execute a single non-streaming request (internal)
    async fn execute_request(&self, request: &ChatRequest) -> ModelResult<String> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Calling model provider"
        );

        let response = self.send(request).await?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })?;

        chat.completion()
            .map(str::to_string)
            .ok_or_else(|| ModelError::InvalidResponse {
                message: "Response contained no choices".to_string(),
            })
    }
}

#[async_trait]
impl ModelProvider for HttpModelProvider {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> ModelResult<String> {
        let request = self.build_request(prompt, config, false);

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    model = %self.model,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying model request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&request).await {
                Ok(text) => {
                    info!(
                        model = %self.model,
                        latency_ms = start.elapsed().as_millis(),
                        "Model call succeeded"
                    );
                    return Ok(text);
                }
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) => {
                    error!(
                        model = %self.model,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Model call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        match last_error {
            Some(e @ ModelError::RateLimited { .. }) => Err(e),
            other => Err(ModelError::Unavailable {
                message: other
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "Unknown error".to_string()),
                retries,
            }),
        }
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> ModelResult<TextStream> {
        let request = self.build_request(prompt, config, true);
        debug!(model = %self.model, "Opening streaming completion");

        let response = self.send(&request).await?;
        Ok(sse_fragments(response.bytes_stream().boxed()))
    }

    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Malformed bodies and client errors will not improve on retry.
fn is_retryable(err: &ModelError) -> bool {
    match err {
        ModelError::InvalidResponse { .. } => false,
        ModelError::Api { status, .. } => !(400..500).contains(status),
        _ => true,
    }
}

/// One parsed line of a server-sent event stream
#[derive(Debug, PartialEq)]
pub(crate) enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

/// Parse a single `data:` line of an OpenAI-style SSE stream
pub(crate) fn parse_sse_line(line: &str) -> ModelResult<SseLine> {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if payload.is_empty() {
        return Ok(SseLine::Skip);
    }

    let chunk: ChatChunk =
        serde_json::from_str(payload).map_err(|e| ModelError::InvalidResponse {
            message: format!("Failed to parse stream chunk: {}", e),
        })?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty())
        .map(SseLine::Fragment)
        .unwrap_or(SseLine::Skip))
}

struct SseState<S> {
    inner: S,
    buffer: String,
    pending: VecDeque<String>,
    done: bool,
}

impl<S> SseState<S> {
    /// Move complete lines out of the buffer. Returns an error on a bad chunk.
    fn drain_lines(&mut self, flush: bool) -> ModelResult<()> {
        loop {
            let line = match self.buffer.find('\n') {
                Some(pos) => {
                    let line = self.buffer[..pos].to_string();
                    self.buffer.drain(..=pos);
                    line
                }
                None if flush && !self.buffer.is_empty() => std::mem::take(&mut self.buffer),
                None => return Ok(()),
            };
            match parse_sse_line(&line)? {
                SseLine::Fragment(text) => self.pending.push_back(text),
                SseLine::Done => {
                    self.done = true;
                    self.buffer.clear();
                    return Ok(());
                }
                SseLine::Skip => {}
            }
        }
    }
}

fn sse_fragments<S, B>(inner: S) -> TextStream
where
    S: Stream<Item = reqwest::Result<B>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    let state = SseState {
        inner,
        buffer: String::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((Ok(fragment), st));
            }
            if st.done {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.push_str(&String::from_utf8_lossy(bytes.as_ref()));
                    if let Err(e) = st.drain_lines(false) {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(ModelError::Http(e)), st));
                }
                None => {
                    let flushed = st.drain_lines(true);
                    st.done = true;
                    if let Err(e) = flushed {
                        return Some((Err(e), st));
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ModelConfig {
        ModelConfig {
            api_key: "test_key".to_string(),
            base_url: "https://api.example.com/".to_string(),
            model: "test-model".to_string(),
            temperature: 0.7,
            max_tokens: 256,
        }
    }

    #[test]
    fn test_client_creation_trims_base_url() {
        let client = HttpModelProvider::new(&test_config(), RequestConfig::default()).unwrap();
        assert_eq!(client.base_url(), "https://api.example.com");
    }

    #[test]
    fn test_build_request_includes_system_prompt() {
        let client = HttpModelProvider::new(&test_config(), RequestConfig::default()).unwrap();
        let config = GenerationConfig::default().with_system("sys");
        let request = client.build_request("hello", &config, false);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].content, "sys");
        assert_eq!(request.messages[1].content, "hello");
        assert_eq!(request.model, "test-model");
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            SseLine::Fragment("Hi".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#).unwrap(),
            SseLine::Skip
        );
        assert!(parse_sse_line("data: {not json").is_err());
    }

    #[tokio::test]
    async fn test_sse_fragments_across_chunk_boundaries() {
        let parts: Vec<reqwest::Result<&'static [u8]>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi"),
            Ok(b"ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n"),
            Ok(b"data: [DONE]\n\n"),
        ];
        let stream = sse_fragments(futures_util::stream::iter(parts));
        let fragments: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);
    }
}
