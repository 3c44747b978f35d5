//! HTTP transport backed by `reqwest`.
//!
//! Each opened request runs on its own Tokio task that feeds a bounded
//! channel of [`StreamEvent`]s. The request body is streamed in fixed-size
//! chunks and every chunk handed to the connection is reported as
//! [`StreamEvent::BytesWritten`]. Redirects are followed by the client.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use reqwest::{Client, ClientBuilder};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::constants::{
    CONNECT_TIMEOUT_SECS, EVENT_CHANNEL_CAPACITY, READ_TIMEOUT_SECS, UPLOAD_CHUNK_SIZE,
};
use super::{EventStream, StreamEvent, Transport};
use crate::error::TransportError;
use crate::request::{BodySegment, WireBody, WireRequest};
use crate::user_agent;

/// Tunables for [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-exchange timeout in seconds.
    pub read_timeout_secs: u64,
    /// Upload chunk size in bytes.
    pub upload_chunk_size: usize,
    /// User-Agent header sent when the request sets none.
    pub user_agent: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            upload_chunk_size: UPLOAD_CHUNK_SIZE,
            user_agent: user_agent::default_user_agent(),
        }
    }
}

/// Production transport over a shared `reqwest::Client`.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    upload_chunk_size: usize,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Creates a transport with default settings.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration.
    /// This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_settings(TransportSettings::default())
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a transport with explicit settings.
    ///
    /// # Errors
    ///
    /// Returns the client builder error if TLS or proxy setup fails.
    #[instrument(level = "debug")]
    pub fn with_settings(settings: TransportSettings) -> Result<Self, reqwest::Error> {
        let client = base_client_builder(&settings).build()?;
        Ok(Self {
            client,
            upload_chunk_size: settings.upload_chunk_size.max(1),
        })
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn base_client_builder(settings: &TransportSettings) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .timeout(Duration::from_secs(settings.read_timeout_secs))
        .gzip(true)
        .user_agent(settings.user_agent.clone())
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(url = %request.url(), method = %request.method()))]
    async fn open(&self, request: &WireRequest) -> Result<Box<dyn EventStream>, TransportError> {
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if !request.body().is_empty() {
            let body = upload_stream(request.body(), self.upload_chunk_size, sender.clone());
            builder = builder.body(reqwest::Body::wrap_stream(body));
        }

        let url = request.url().to_string();
        let task = tokio::spawn(drive_exchange(builder, url, sender));
        Ok(Box::new(ChannelEventStream { receiver, task }))
    }
}

async fn drive_exchange(
    request: reqwest::RequestBuilder,
    url: String,
    events: mpsc::Sender<StreamEvent>,
) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let _ = events
                .send(StreamEvent::Error(TransportError::from_reqwest(url, e)))
                .await;
            return;
        }
    };

    let status = response.status().as_u16();
    debug!(status, "response headers received");
    let headers = response.headers().clone();
    if events
        .send(StreamEvent::HeadersAvailable { status, headers })
        .await
        .is_err()
    {
        return;
    }

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let event = match chunk {
            Ok(bytes) => StreamEvent::BytesAvailable(bytes),
            Err(e) => {
                let _ = events
                    .send(StreamEvent::Error(TransportError::from_reqwest(url, e)))
                    .await;
                return;
            }
        };
        // Receiver gone: the engine closed the stream.
        if events.send(event).await.is_err() {
            return;
        }
    }

    let _ = events.send(StreamEvent::Complete).await;
}

/// Event stream fed by the exchange task.
struct ChannelEventStream {
    receiver: mpsc::Receiver<StreamEvent>,
    task: JoinHandle<()>,
}

#[async_trait]
impl EventStream for ChannelEventStream {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }

    async fn close(&mut self) {
        self.task.abort();
        self.receiver.close();
    }
}

impl Drop for ChannelEventStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct OpenFile {
    file: tokio::fs::File,
    path: PathBuf,
    remaining: u64,
}

struct UploadState {
    segments: VecDeque<BodySegment>,
    current: Option<OpenFile>,
    chunk_size: usize,
    events: mpsc::Sender<StreamEvent>,
    failed: bool,
}

impl UploadState {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            if let Some(open) = self.current.as_mut() {
                if open.remaining == 0 {
                    self.current = None;
                    continue;
                }
                let want = usize::try_from(open.remaining)
                    .unwrap_or(usize::MAX)
                    .min(self.chunk_size);
                let mut buf = vec![0_u8; want];
                let read = open
                    .file
                    .read(&mut buf)
                    .await
                    .map_err(|e| TransportError::io(open.path.clone(), e))?;
                if read == 0 {
                    return Err(TransportError::io(
                        open.path.clone(),
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "file shorter than when the request was built",
                        ),
                    ));
                }
                buf.truncate(read);
                open.remaining -= read as u64;
                return Ok(Some(Bytes::from(buf)));
            }

            match self.segments.pop_front() {
                None => return Ok(None),
                Some(BodySegment::Bytes(mut bytes)) => {
                    if bytes.len() > self.chunk_size {
                        let head = bytes.split_to(self.chunk_size);
                        self.segments.push_front(BodySegment::Bytes(bytes));
                        return Ok(Some(head));
                    }
                    return Ok(Some(bytes));
                }
                Some(BodySegment::File { path, len }) => {
                    let file = tokio::fs::File::open(&path)
                        .await
                        .map_err(|e| TransportError::io(path.clone(), e))?;
                    self.current = Some(OpenFile {
                        file,
                        path,
                        remaining: len,
                    });
                }
            }
        }
    }
}

/// Streams `body` in chunks, reporting each chunk as written.
fn upload_stream(
    body: &WireBody,
    chunk_size: usize,
    events: mpsc::Sender<StreamEvent>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let state = UploadState {
        segments: body.segments().iter().cloned().collect(),
        current: None,
        chunk_size,
        events,
        failed: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.failed {
            return None;
        }
        match state.next_chunk().await {
            Ok(Some(chunk)) => {
                let _ = state
                    .events
                    .send(StreamEvent::BytesWritten(chunk.len() as u64))
                    .await;
                Some((Ok(chunk), state))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "request body streaming failed");
                let message = e.to_string();
                let _ = state.events.send(StreamEvent::Error(e)).await;
                state.failed = true;
                Some((Err(std::io::Error::other(message)), state))
            }
        }
    })
}
