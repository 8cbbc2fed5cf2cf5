//! Shared HTTP client, SSE parsing, and auth utilities.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::{DispensaryError, Result};

/// Build the HTTP client shared by all adapters of a process.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .build()?)
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Build Google-style headers (x-goog-api-key).
pub fn google_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(api_key) {
        headers.insert("x-goog-api-key", val);
    }
    headers
}

/// Parse an SSE "data:" line, returning None for "[DONE]" and non-data lines.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Map a non-success HTTP status to an error.
pub fn status_to_error(status: u16, body: &str) -> DispensaryError {
    match status {
        401 | 403 => DispensaryError::Authentication(body.to_string()),
        429 => DispensaryError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => DispensaryError::api(status, body),
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}

/// Return the response if its status is a success, else the mapped error.
pub async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_to_error(status.as_u16(), &body))
}

/// Incremental SSE line splitter.
///
/// Bytes are buffered until a newline so that lines and multi-byte UTF-8
/// sequences split across network chunks are reassembled.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed bytes, returning the `data:` payloads completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = self.take_line(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing line left without a newline at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.take_line(&rest)
    }

    fn take_line(&mut self, raw: &[u8]) -> Option<String> {
        if self.finished {
            return None;
        }
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return None;
        }
        if line == "data: [DONE]" || line == "data:[DONE]" {
            self.finished = true;
            return None;
        }
        parse_sse_data(line).map(str::to_string)
    }
}

/// Stream the `data:` payloads of an SSE response body.
pub fn sse_data_stream(resp: reqwest::Response) -> BoxStream<'static, Result<String>> {
    let byte_stream = resp.bytes_stream();
    let stream = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut failed = false;
        futures::pin_mut!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(DispensaryError::Network(e));
                    failed = true;
                    break;
                }
            };
            for data in decoder.push(&chunk) {
                yield Ok(data);
            }
            if decoder.is_finished() {
                break;
            }
        }
        if !failed {
            if let Some(data) = decoder.finish() {
                yield Ok(data);
            }
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_lines_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        assert_eq!(decoder.push(b"1}\n\n"), vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn reassembles_multibyte_characters_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: \"שלום\"\n".as_bytes();
        // split inside the first Hebrew letter
        let (head, tail) = bytes.split_at(8);
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec!["\"שלום\"".to_string()]);
    }

    #[test]
    fn done_sentinel_stops_decoding() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b"data: 1\r\n\r\ndata: [DONE]\n\ndata: 2\n");
        assert_eq!(out, vec!["1".to_string()]);
        assert!(decoder.is_finished());
    }

    #[test]
    fn comments_and_event_lines_are_ignored() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b": keep-alive\nevent: message\ndata:x\n");
        assert_eq!(out, vec!["x".to_string()]);
    }

    #[test]
    fn trailing_line_without_newline_is_flushed() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn rate_limit_body_carries_retry_hint() {
        let err = status_to_error(429, r#"{"error":{"retry_after":1.5}}"#);
        assert!(matches!(
            err,
            DispensaryError::RateLimited {
                retry_after_ms: Some(1500)
            }
        ));
        assert!(matches!(status_to_error(403, "no"), DispensaryError::Authentication(_)));
        assert!(matches!(status_to_error(500, "boom"), DispensaryError::Api { status: 500, .. }));
    }
}
