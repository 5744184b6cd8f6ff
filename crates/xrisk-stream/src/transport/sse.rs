// Server-sent-events transport over reqwest.
//
// Mirrors what a browser `EventSource` hands to `onmessage`: comment lines
// are swallowed, multi-line `data:` fields are joined with `\n`, and only
// events of the default `message` type are delivered.

use async_stream::stream;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use url::Url;

use super::{Transport, TransportConfig, TransportEvent};
use crate::error::Error;

// ── SseTransport ─────────────────────────────────────────────────────

/// Production transport: `GET` the stream URL and decode the body as SSE.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        Ok(Self::from_client(config.build_client()?))
    }

    /// Wrap an existing client (shared connection pool, custom middleware).
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for SseTransport {
    fn open(&self, url: &Url) -> BoxStream<'static, TransportEvent> {
        let client = self.client.clone();
        let url = url.clone();

        Box::pin(stream! {
            match send_request(&client, &url).await {
                Err(err) => {
                    yield TransportEvent::Failed(err);
                }
                Ok(response) => {
                    tracing::debug!(url = %url, "Event stream open");
                    yield TransportEvent::Open;

                    let mut decoder = SseDecoder::new();
                    let mut body = response.bytes_stream();
                    let mut failure = None;

                    while let Some(chunk) = body.next().await {
                        match chunk {
                            Ok(bytes) => {
                                for message in decoder.push(&bytes) {
                                    if message.is_default_type() {
                                        yield TransportEvent::Message(message.data);
                                    } else {
                                        tracing::trace!(
                                            event = message.event.as_deref().unwrap_or(""),
                                            "Skipping named SSE event"
                                        );
                                    }
                                }
                            }
                            Err(e) => {
                                failure = Some(Error::Http(e));
                                break;
                            }
                        }
                    }

                    match failure {
                        Some(err) => {
                            yield TransportEvent::Failed(err);
                        }
                        None => {
                            tracing::debug!(url = %url, "Event stream ended");
                            yield TransportEvent::Closed;
                        }
                    }
                }
            }
        })
    }
}

async fn send_request(client: &reqwest::Client, url: &Url) -> Result<reqwest::Response, Error> {
    tracing::info!(url = %url, "Connecting to event stream");

    let response = client
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::UnexpectedStatus {
            status: status.as_u16(),
        });
    }

    Ok(response)
}

// ── SSE wire decoding ────────────────────────────────────────────────

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// The `event:` field, if the server named the event.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// The `id:` field, if present.
    pub id: Option<String>,
}

impl SseMessage {
    /// Unnamed events and events named `message` reach `onmessage`.
    pub fn is_default_type(&self) -> bool {
        self.event.as_deref().is_none_or(|e| e == "message")
    }
}

/// Incremental SSE decoder. Feed it body chunks in order.
///
/// Lines end in `\r\n`, `\n` or a bare `\r`. Chunks may split lines,
/// line terminators or UTF-8 sequences anywhere; bytes are buffered until a
/// full line is available. An event left incomplete when the body ends is
/// discarded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    id: Option<String>,
    started: bool,
    /// The last chunk ended in `\r`; a leading `\n` in the next one
    /// belongs to the same terminator.
    after_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        let mut chunk = chunk;
        if self.after_cr && !chunk.is_empty() {
            self.after_cr = false;
            if let Some((b'\n', rest)) = chunk.split_first() {
                chunk = rest;
            }
        }
        self.pending.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n' || b == b'\r') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            if line.pop() == Some(b'\r') {
                match self.pending.first() {
                    Some(b'\n') => {
                        self.pending.remove(0);
                    }
                    None => self.after_cr = true,
                    Some(_) => {}
                }
            }

            let mut text = String::from_utf8_lossy(&line).into_owned();
            if !self.started {
                self.started = true;
                if let Some(stripped) = text.strip_prefix('\u{feff}') {
                    text = stripped.to_owned();
                }
            }

            if let Some(message) = self.process_line(&text) {
                messages.push(message);
            }
        }
        messages
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            tracing::trace!(comment = line, "SSE comment");
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            // `retry` only matters to browsers; backoff is ours.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take().filter(|e| !e.is_empty());
        if self.data.is_empty() {
            return None;
        }
        Some(SseMessage {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.clone(),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────
