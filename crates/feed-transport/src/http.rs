use std::{future::Future, time::Instant};

use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use feed_core::{ErrorCategory, FeedError, StreamEndpoint, classify_http_status};

use crate::{HealthProbe, ProbeReport, ProbeTarget, SignalSink, StreamHandle, StreamTransport};

/// Streaming transport speaking HTTP GET with server-sent-event framing.
///
/// Each `open` issues one long-lived GET against `base_url` + the endpoint
/// path and reports frames as they are parsed off the byte stream. The
/// supplied client must not carry a total-request timeout, or the stream
/// would be cut off mid-flight.
#[derive(Debug, Clone)]
pub struct HttpStreamTransport {
    client: Client,
    base_url: String,
}

impl HttpStreamTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl StreamTransport for HttpStreamTransport {
    fn open(&self, endpoint: &StreamEndpoint, sink: SignalSink) -> StreamHandle {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let client = self.client.clone();
        let url = self.url_for(&endpoint.path);

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = run_stream(client, url, sink) => {}
            }
        });

        StreamHandle::new(token)
    }
}

async fn run_stream(client: Client, url: String, sink: SignalSink) {
    let response = match client
        .get(&url)
        .header("accept", "text/event-stream")
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            sink.failed(map_request_error(&err));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        sink.failed(FeedError::new(
            classify_http_status(status.as_u16()),
            "stream_http_status",
            format!("stream endpoint {url} returned {status}"),
        ));
        return;
    }

    sink.opened();

    let mut parser = SseParser::default();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for (name, payload) in parser.push(&bytes) {
                    sink.frame(name, payload);
                }
            }
            Err(err) => {
                sink.failed(map_request_error(&err));
                return;
            }
        }
    }

    debug!(%url, "event stream ended");
    sink.closed();
}

fn map_request_error(err: &reqwest::Error) -> FeedError {
    let category = if err.is_timeout() {
        ErrorCategory::Timeout
    } else if let Some(status) = err.status() {
        classify_http_status(status.as_u16())
    } else {
        ErrorCategory::Network
    };
    FeedError::new(category, "http_transport_error", err.to_string())
}

/// Incremental server-sent-event parser.
///
/// Accumulates `event:`/`data:` fields line by line and emits one
/// `(name, payload)` frame per blank-line boundary. Comment lines and the
/// `id:`/`retry:` fields are tolerated and ignored; multi-line `data:` is
/// joined with newlines; an event without an explicit name falls back to
/// `message`.
#[derive(Debug, Default)]
struct SseParser {
    partial: String,
    event_name: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<(String, Vec<u8>)> {
        self.partial.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(newline) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=newline).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if let Some(frame) = self.accept_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn accept_line(&mut self, line: &str) -> Option<(String, Vec<u8>)> {
        if line.is_empty() {
            if self.data.is_empty() {
                self.event_name = None;
                return None;
            }
            let name = self
                .event_name
                .take()
                .unwrap_or_else(|| "message".to_owned());
            let payload = self.data.join("\n").into_bytes();
            self.data.clear();
            return Some((name, payload));
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event_name = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
        None
    }
}

/// One-shot health probe against a JSON health endpoint.
///
/// Expects a body of the form `{ "healthy": bool, "issues": [string] }`.
/// Configure request timeouts on the supplied client; the probe itself adds
/// none.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    healthy: bool,
    #[serde(default)]
    issues: Vec<String>,
}

impl HttpHealthProbe {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe(&self, target: &ProbeTarget) -> impl Future<Output = ProbeReport> + Send {
        let client = self.client.clone();
        let url = self.url_for(&target.path);
        let name = target.name.clone();

        async move {
            let started = Instant::now();
            let response = match client.get(&url).send().await {
                Ok(response) => response,
                Err(err) => {
                    return ProbeReport::transport_failure(
                        started.elapsed().as_millis() as u64,
                        err.to_string(),
                    );
                }
            };

            let status = response.status();
            if !status.is_success() {
                return ProbeReport::unhealthy(
                    started.elapsed().as_millis() as u64,
                    vec![format!("{name} returned {status}")],
                );
            }

            match response.json::<HealthBody>().await {
                Ok(body) => {
                    let response_time_ms = started.elapsed().as_millis() as u64;
                    if body.healthy {
                        ProbeReport::healthy(response_time_ms)
                    } else {
                        let issues = if body.issues.is_empty() {
                            vec![format!("{name} reported itself unhealthy")]
                        } else {
                            body.issues
                        };
                        ProbeReport::unhealthy(response_time_ms, issues)
                    }
                }
                Err(err) => ProbeReport::unhealthy(
                    started.elapsed().as_millis() as u64,
                    vec![format!("unparseable health body: {err}")],
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_str(frame: &(String, Vec<u8>)) -> (String, String) {
        (
            frame.0.clone(),
            String::from_utf8(frame.1.clone()).expect("utf8 payload"),
        )
    }

    #[test]
    fn parses_one_named_event() {
        let mut parser = SseParser::default();
        let frames = parser.push(b"event: pre_sync\ndata: {\"cause\":\"scheduled\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frame_str(&frames[0]),
            ("pre_sync".to_owned(), "{\"cause\":\"scheduled\"}".to_owned())
        );
    }

    #[test]
    fn reassembles_events_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"event: log_bro").is_empty());
        assert!(parser.push(b"adcast\ndata: {\"mess").is_empty());
        let frames = parser.push(b"age\":\"hi\"}\n\n");
        assert_eq!(
            frame_str(&frames[0]),
            ("log_broadcast".to_owned(), "{\"message\":\"hi\"}".to_owned())
        );
    }

    #[test]
    fn joins_multi_line_data_with_newlines() {
        let mut parser = SseParser::default();
        let frames = parser.push(b"data: line one\ndata: line two\n\n");
        assert_eq!(
            frame_str(&frames[0]),
            ("message".to_owned(), "line one\nline two".to_owned())
        );
    }

    #[test]
    fn ignores_comments_id_and_retry_fields() {
        let mut parser = SseParser::default();
        let frames =
            parser.push(b": keep-alive\nid: 41\nretry: 3000\nevent: custom_message\ndata: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, "custom_message");
    }

    #[test]
    fn blank_lines_without_data_emit_nothing() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"\n\nevent: pre_sync\n\n").is_empty());
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let mut parser = SseParser::default();
        let frames = parser.push(b"event: post_sync\r\ndata: {}\r\n\r\n");
        assert_eq!(frames[0].0, "post_sync");
    }
}
