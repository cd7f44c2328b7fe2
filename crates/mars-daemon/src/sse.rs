//! Server-Sent Events client for the server's `/global/event` endpoint
//!
//! The connection is a raw TCP socket: we write the HTTP request ourselves,
//! skip the response head and then parse the body line by line. Only `data:`
//! lines carry events; every other SSE field is ignored. A line whose JSON
//! does not decode is logged and skipped, never fatal.
//!
//! The parser ([`EventStream`]) is generic over [`AsyncBufRead`] so it runs
//! the same over a socket or an in-memory buffer.

use std::fmt;
use std::io;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use mars_core::prelude::*;
use mars_core::{ServerConfig, ServerEvent};

/// Streaming endpoint path
pub const EVENT_PATH: &str = "/global/event";

const DATA_PREFIX: &str = "data:";

/// Decode one SSE line.
///
/// `None` for anything that is not a `data:` line (comments, `event:`, `id:`,
/// `retry:`, blank separators). `Some(Err(_))` when the data is not JSON.
pub fn parse_data_line(line: &str) -> Option<Result<ServerEvent>> {
    let data = line.strip_prefix(DATA_PREFIX)?;
    let data = data.strip_prefix(' ').unwrap_or(data);

    Some(
        serde_json::from_str(data)
            .map(ServerEvent::from_envelope)
            .map_err(|e| Error::stream_decode(data, e.to_string())),
    )
}

/// Line reader that understands `Transfer-Encoding: chunked` framing
struct LineReader<R> {
    inner: R,
    chunked: bool,
    /// Bytes left in the current chunk
    chunk_remaining: usize,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            chunked: false,
            chunk_remaining: 0,
            buf: Vec::new(),
            eof: false,
        }
    }

    /// Next line without its terminator; `None` at end of body
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.buf);
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }
            if self.chunked {
                self.fill_chunked().await?;
            } else if self.inner.read_until(b'\n', &mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }

    async fn fill_chunked(&mut self) -> io::Result<()> {
        if self.chunk_remaining == 0 {
            let mut size_line = Vec::new();
            loop {
                size_line.clear();
                if self.inner.read_until(b'\n', &mut size_line).await? == 0 {
                    self.eof = true;
                    return Ok(());
                }
                // CRLF that terminates the previous chunk's data
                if !String::from_utf8_lossy(&size_line).trim().is_empty() {
                    break;
                }
            }
            let size_text = String::from_utf8_lossy(&size_line);
            let size_hex = size_text.trim().split(';').next().unwrap_or_default();
            let size = usize::from_str_radix(size_hex, 16).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid chunk size: {:?}", size_text.trim()),
                )
            })?;
            if size == 0 {
                self.eof = true;
                return Ok(());
            }
            self.chunk_remaining = size;
        }

        let available = self.inner.fill_buf().await?;
        if available.is_empty() {
            self.eof = true;
            return Ok(());
        }
        let take = available.len().min(self.chunk_remaining);
        self.buf.extend_from_slice(&available[..take]);
        self.inner.consume(take);
        self.chunk_remaining -= take;
        Ok(())
    }
}

/// Parsed event stream over an HTTP response body.
///
/// Infinite until the server closes the connection or a read fails; there is
/// no reconnection. Dropping the stream drops the underlying reader.
pub struct EventStream<R> {
    lines: LineReader<R>,
    end: Option<String>,
}

impl<R: AsyncBufRead + Unpin> EventStream<R> {
    /// Consume the HTTP status line and headers, then stream the body.
    ///
    /// Fails if the status is not 2xx.
    pub async fn new(reader: R) -> Result<Self> {
        let mut lines = LineReader::new(reader);

        let status_line = lines
            .next_line()
            .await?
            .ok_or_else(|| Error::stream_disconnected("connection closed before response"))?;
        let status = parse_status(&status_line).ok_or_else(|| {
            Error::stream_disconnected(format!("malformed status line: {:?}", status_line))
        })?;
        if !(200..300).contains(&status) {
            return Err(Error::stream_disconnected(format!(
                "server answered {}",
                status_line.trim()
            )));
        }

        // Framing applies to the body only, so switch after the blank line
        let mut chunked = false;
        while let Some(header) = lines.next_line().await? {
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.trim().eq_ignore_ascii_case("transfer-encoding")
                    && value.to_ascii_lowercase().contains("chunked")
                {
                    chunked = true;
                }
            }
        }
        lines.chunked = chunked;

        Ok(Self { lines, end: None })
    }

    /// Parse a bare event body with no HTTP head
    pub fn without_headers(reader: R) -> Self {
        Self {
            lines: LineReader::new(reader),
            end: None,
        }
    }

    /// Next decoded event; `None` once the stream has ended
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        if self.end.is_some() {
            return None;
        }
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => match parse_data_line(&line) {
                    Some(Ok(event)) => return Some(event),
                    Some(Err(e)) => warn!("Skipping event line: {}", e),
                    None => continue,
                },
                Ok(None) => {
                    self.finish("connection closed by server".to_string());
                    return None;
                }
                Err(e) => {
                    self.finish(e.to_string());
                    return None;
                }
            }
        }
    }

    fn finish(&mut self, reason: String) {
        info!("Event stream disconnected: {}", reason);
        self.end = Some(reason);
    }

    /// Why the stream ended, once it has
    pub fn end_reason(&self) -> Option<&str> {
        self.end.as_deref()
    }

    /// Adapt into a [`Stream`] of events
    pub fn into_stream(self) -> impl Stream<Item = ServerEvent> {
        stream::unfold(self, |mut events| async move {
            events.next_event().await.map(|event| (event, events))
        })
    }
}

fn parse_status(status_line: &str) -> Option<u16> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Event stream read from a live socket
pub type SocketEventStream = EventStream<BufReader<TcpStream>>;

/// How a subscription ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Server closed the connection or a read failed
    Disconnected(String),
    /// [`EventSubscription::cancel()`] was called or the subscription dropped
    Cancelled,
    /// The receiving side of the event channel went away
    ConsumerGone,
    /// The connection or HTTP handshake failed
    ConnectFailed(String),
}

impl fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEnd::Disconnected(reason) => write!(f, "disconnected: {}", reason),
            StreamEnd::Cancelled => write!(f, "cancelled"),
            StreamEnd::ConsumerGone => write!(f, "consumer gone"),
            StreamEnd::ConnectFailed(reason) => write!(f, "connect failed: {}", reason),
        }
    }
}

/// Handle to an event stream running on its own task.
///
/// Cancelling or dropping the handle stops the task, which closes the socket.
#[derive(Debug)]
pub struct EventSubscription {
    cancel_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<StreamEnd>>,
}

impl EventSubscription {
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the stream task to end
    pub async fn finished(mut self) -> StreamEnd {
        match self.task.take() {
            Some(task) => task
                .await
                .unwrap_or_else(|e| StreamEnd::Disconnected(format!("stream task failed: {}", e))),
            None => StreamEnd::Cancelled,
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

enum Step {
    Stop(StreamEnd),
    Event(ServerEvent),
    Ended,
}

/// Connects to the server's event endpoint
#[derive(Debug, Clone)]
pub struct EventStreamClient {
    config: ServerConfig,
}

impl EventStreamClient {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Open the socket, send the request and consume the response head
    pub async fn connect(&self) -> Result<SocketEventStream> {
        let addr = self.config.socket_addr();
        let mut stream = TcpStream::connect(&addr).await.map_err(|e| {
            Error::stream_disconnected(format!("could not connect to {}: {}", addr, e))
        })?;

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nAccept: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\n\r\n",
            EVENT_PATH, addr
        );
        stream
            .write_all(request.as_bytes())
            .await
            .context("Failed to send event stream request")?;
        debug!("Subscribed to events at {}{}", addr, EVENT_PATH);

        EventStream::new(BufReader::new(stream)).await
    }

    /// Lazy event stream; connection failures are logged and yield an empty stream
    pub fn events(&self) -> BoxStream<'static, ServerEvent> {
        let client = self.clone();
        stream::once(async move { client.connect().await })
            .filter_map(|connected| async move {
                match connected {
                    Ok(events) => Some(events.into_stream()),
                    Err(e) => {
                        warn!("Event stream unavailable: {}", e);
                        None
                    }
                }
            })
            .flatten()
            .boxed()
    }

    /// Run the stream on its own task and forward events to `tx`
    pub fn subscribe(&self, tx: mpsc::Sender<ServerEvent>) -> EventSubscription {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let client = self.clone();
        let task = tokio::spawn(async move { client.forward(tx, cancel_rx).await });

        EventSubscription {
            cancel_tx: Some(cancel_tx),
            task: Some(task),
        }
    }

    async fn forward(
        &self,
        tx: mpsc::Sender<ServerEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) -> StreamEnd {
        let mut events = tokio::select! {
            _ = &mut cancel_rx => return StreamEnd::Cancelled,
            connected = self.connect() => match connected {
                Ok(events) => events,
                Err(e) => {
                    warn!("Event stream unavailable: {}", e);
                    return StreamEnd::ConnectFailed(e.to_string());
                }
            },
        };

        loop {
            let step = tokio::select! {
                _ = &mut cancel_rx => Step::Stop(StreamEnd::Cancelled),
                _ = tx.closed() => Step::Stop(StreamEnd::ConsumerGone),
                next = events.next_event() => match next {
                    Some(event) => Step::Event(event),
                    None => Step::Ended,
                },
            };

            match step {
                Step::Event(event) => {
                    let sent = tokio::select! {
                        _ = &mut cancel_rx => return StreamEnd::Cancelled,
                        sent = tx.send(event) => sent,
                    };
                    if sent.is_err() {
                        return StreamEnd::ConsumerGone;
                    }
                }
                Step::Ended => {
                    let reason = events.end_reason().unwrap_or("closed").to_string();
                    return StreamEnd::Disconnected(reason);
                }
                Step::Stop(end) => {
                    debug!("Event stream stopped: {}", end);
                    return end;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{unused_port, MockServer};
    use serde_json::json;
    use std::time::Duration;

    const HEAD: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\n";

    async fn collect<R: AsyncBufRead + Unpin>(mut events: EventStream<R>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Some(event) = events.next_event().await {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_parse_data_line() {
        let event = parse_data_line(r#"data: {"type":"a","payload":{"x":1}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.payload, json!({"x": 1}));

        let event = parse_data_line(r#"data:{"y":2}"#).unwrap().unwrap();
        assert_eq!(event.payload, json!({"y": 2}));

        assert!(parse_data_line("event: message").is_none());
        assert!(parse_data_line(": keepalive").is_none());
        assert!(parse_data_line("").is_none());
        assert!(matches!(
            parse_data_line("data: {not json"),
            Some(Err(Error::StreamDecode { .. }))
        ));
    }

    #[tokio::test]
    async fn test_garbage_line_is_skipped() {
        let body = format!(
            "{}data: {{\"payload\":{{\"n\":1}}}}\n\ndata: {{broken\n\ndata: {{\"payload\":{{\"n\":2}}}}\n\n",
            HEAD
        );
        let events = collect(EventStream::new(body.as_bytes()).await.unwrap()).await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload, json!({"n": 1}));
        assert_eq!(events[1].payload, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_lines_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(HEAD.as_bytes())
            .read(b"data: {\"payload\":{\"te")
            .read(b"xt\":\"he\"}}\n")
            .read(b"\ndata: {\"n\"")
            .read(b":3}\n\n")
            .build();
        let reader = tokio::io::BufReader::new(mock);
        let events = collect(EventStream::new(reader).await.unwrap()).await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload, json!({"text": "he"}));
        assert_eq!(events[1].payload, json!({"n": 3}));
    }

    #[tokio::test]
    async fn test_other_fields_are_ignored() {
        let body = format!(
            "{}: comment\nevent: message\nid: 7\nretry: 1000\ndata: {{\"type\":\"session.idle\"}}\r\n\r\n",
            HEAD
        );
        let events = collect(EventStream::new(body.as_bytes()).await.unwrap()).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "session.idle");
        assert_eq!(events[0].payload, json!({"type": "session.idle"}));
    }

    #[tokio::test]
    async fn test_chunked_body() {
        let first = "data: {\"payload\":{\"n\":1}}\n\nda";
        let second = "ta: {\"payload\":{\"n\":2}}\n\n";
        let body = format!(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{}\r\n{:x}\r\n{}\r\n0\r\n\r\n",
            first.len(),
            first,
            second.len(),
            second
        );
        let events = collect(EventStream::new(body.as_bytes()).await.unwrap()).await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let body = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        let result = EventStream::new(body.as_bytes()).await;
        assert!(matches!(result, Err(Error::StreamDisconnected { .. })));
    }

    #[tokio::test]
    async fn test_end_reason_after_eof() {
        let mut events = EventStream::without_headers("data: {\"a\":1}\n".as_bytes());
        assert!(events.next_event().await.is_some());
        assert!(events.end_reason().is_none());
        assert!(events.next_event().await.is_none());
        assert_eq!(events.end_reason(), Some("connection closed by server"));
        assert!(events.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let events = collect(EventStream::without_headers("data: {\"a\":1}".as_bytes())).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_events_over_socket() {
        let server = MockServer::start().await;
        server.set_event_lines([
            r#"data: {"type":"server.connected","payload":{}}"#,
            "data: garbage",
            r#"data: {"payload":{"type":"message.updated","properties":{"sessionID":"ses_1"}}}"#,
        ]);

        let client = EventStreamClient::new(server.config());
        let events: Vec<ServerEvent> = client.events().collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "server.connected");
        assert_eq!(events[1].session_id(), Some("ses_1"));

        let request = &server.requests()[0];
        assert_eq!(request.method, "GET");
        assert_eq!(request.target, EVENT_PATH);
    }

    #[tokio::test]
    async fn test_chunked_events_over_socket_keep_first_event() {
        let server = MockServer::start().await;
        server.set_event_chunked(true);
        server.set_event_lines([
            r#"data: {"type":"server.connected","payload":{}}"#,
            r#"data: {"payload":{"type":"session.idle","properties":{"sessionID":"ses_9"}}}"#,
        ]);

        let client = EventStreamClient::new(server.config());
        let events: Vec<ServerEvent> = client.events().collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "server.connected");
        assert_eq!(events[1].kind(), "session.idle");
        assert_eq!(events[1].session_id(), Some("ses_9"));
    }

    #[tokio::test]
    async fn test_events_empty_when_unreachable() {
        let client = EventStreamClient::new(ServerConfig::new("127.0.0.1", unused_port()));
        let events: Vec<ServerEvent> = client.events().collect().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_subscription_forwards_and_reports_disconnect() {
        let server = MockServer::start().await;
        server.set_event_lines([r#"data: {"n":1}"#, r#"data: {"n":2}"#]);

        let (tx, mut rx) = mpsc::channel(8);
        let subscription = EventStreamClient::new(server.config()).subscribe(tx);

        assert_eq!(rx.recv().await.unwrap().payload, json!({"n": 1}));
        assert_eq!(rx.recv().await.unwrap().payload, json!({"n": 2}));
        assert!(matches!(
            subscription.finished().await,
            StreamEnd::Disconnected(_)
        ));
    }

    #[tokio::test]
    async fn test_cancel_closes_connection() {
        let server = MockServer::start().await;
        server.set_event_lines([r#"data: {"n":1}"#]);
        server.hold_event_stream(true);

        let (tx, mut rx) = mpsc::channel(8);
        let mut subscription = EventStreamClient::new(server.config()).subscribe(tx);
        assert!(rx.recv().await.is_some());

        subscription.cancel();
        assert_eq!(subscription.finished().await, StreamEnd::Cancelled);
        assert!(server.wait_stream_closed(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let (tx, _rx) = mpsc::channel(8);
        let subscription =
            EventStreamClient::new(ServerConfig::new("127.0.0.1", unused_port())).subscribe(tx);
        assert!(matches!(
            subscription.finished().await,
            StreamEnd::ConnectFailed(_)
        ));
    }
}
