//! Per-attempt stream state machine.
//!
//! `Idle -> Opened -> HeadersReceived -> Streaming -> Completed | Failed`,
//! with `HeadersReceived -> AwaitingAuth -> Opened` when a challenge is
//! detected. One [`StreamEngine`] lives for the whole logical request and
//! runs one attempt per wire request; the coordinator decides whether to
//! run another.

use std::fmt;
use std::sync::Arc;

use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use super::output::Output;
use crate::auth::{AuthChallenge, AuthChallengeHandler, Evaluation};
use crate::error::{RequestError, TransportError};
use crate::progress::ProgressTracker;
use crate::transport::{EventStream, StreamEvent, Transport};
use crate::request::WireRequest;

/// Observable lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Not started.
    Idle,
    /// A stream is open and no headers have arrived yet.
    Opened,
    /// Status and headers arrived and are being evaluated.
    HeadersReceived,
    /// The response body is being received.
    Streaming,
    /// Paused on the gate while credentials are obtained.
    AwaitingAuth,
    /// Finished successfully. Terminal.
    Completed,
    /// Finished with an error. Terminal.
    Failed,
}

impl StreamState {
    /// Whether the state is `Completed` or `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Opened => "opened",
            Self::HeadersReceived => "headers-received",
            Self::Streaming => "streaming",
            Self::AwaitingAuth => "awaiting-auth",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Status line and headers of the response currently being processed.
#[derive(Debug, Clone)]
pub(crate) struct ResponseHead {
    pub(crate) status: u16,
    pub(crate) headers: HeaderMap,
    pub(crate) content_length: Option<u64>,
}

/// How an attempt ended when it did not fail.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    /// The body was received in full.
    Finished,
    /// The server challenged; the stream was closed quietly.
    Challenge(AuthChallenge),
}

/// Drives one stream at a time, feeding progress and output.
pub(crate) struct StreamEngine {
    state: Arc<watch::Sender<StreamState>>,
    cancel: watch::Receiver<bool>,
    progress: ProgressTracker,
    output: Output,
    head: Option<ResponseHead>,
    ignore_error: bool,
}

impl StreamEngine {
    pub(crate) fn new(
        state: Arc<watch::Sender<StreamState>>,
        cancel: watch::Receiver<bool>,
        progress: ProgressTracker,
        output: Output,
    ) -> Self {
        Self {
            state,
            cancel,
            progress,
            output,
            head: None,
            ignore_error: false,
        }
    }

    pub(crate) fn transition(&self, next: StreamState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "state transition");
        }
    }

    pub(crate) fn head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    pub(crate) fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub(crate) fn progress_mut(&mut self) -> &mut ProgressTracker {
        &mut self.progress
    }

    /// Clears the suppression flag once credentials are applied and the
    /// request is about to be re-sent.
    pub(crate) fn resume(&mut self) {
        self.ignore_error = false;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancel has been requested.
    pub(crate) async fn cancelled(&mut self) {
        // Err means every handle is gone; nobody can cancel any more.
        if self.cancel.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Releases the output destination. Used on every failure path.
    pub(crate) async fn release_output(&mut self) {
        self.output.close().await;
    }

    pub(crate) fn into_output(self) -> Output {
        self.output
    }

    /// Opens `wire` and pumps its events until the body completes, a
    /// challenge is detected, or the attempt fails.
    #[instrument(skip_all, fields(url = %wire.url(), method = %wire.method(), bytes = wire.content_length()))]
    pub(crate) async fn run_attempt(
        &mut self,
        transport: &dyn Transport,
        wire: &WireRequest,
        auth: &AuthChallengeHandler,
    ) -> Result<AttemptOutcome, RequestError> {
        if self.is_cancelled() {
            return Err(RequestError::Cancelled);
        }
        self.head = None;
        self.progress.expect_upload(wire.content_length());

        let mut stream = tokio::select! {
            biased;
            () = self.cancelled() => return Err(RequestError::Cancelled),
            opened = transport.open(wire) => opened?,
        };
        self.transition(StreamState::Opened);

        let result = self.pump(stream.as_mut(), auth).await;
        match &result {
            Ok(AttemptOutcome::Finished) => {}
            Ok(AttemptOutcome::Challenge(_)) => self.close_quietly(stream.as_mut()).await,
            Err(_) => stream.close().await,
        }
        result
    }

    async fn pump(
        &mut self,
        stream: &mut dyn EventStream,
        auth: &AuthChallengeHandler,
    ) -> Result<AttemptOutcome, RequestError> {
        loop {
            let event = tokio::select! {
                biased;
                () = self.cancelled() => return Err(RequestError::Cancelled),
                event = stream.next_event() => event,
            };
            let Some(event) = event else {
                return Err(TransportError::UnexpectedEof.into());
            };

            match event {
                StreamEvent::BytesWritten(bytes) => self.progress.record_sent(bytes),
                StreamEvent::HeadersAvailable { status, headers } => {
                    if self.head.is_some() {
                        debug!(status, "duplicate headers event ignored");
                        continue;
                    }
                    if let Some(challenge) = self.on_headers(status, headers, auth).await? {
                        return Ok(AttemptOutcome::Challenge(challenge));
                    }
                }
                StreamEvent::BytesAvailable(chunk) => {
                    if *self.state.borrow() != StreamState::Streaming {
                        warn!(bytes = chunk.len(), "body bytes outside streaming state dropped");
                        continue;
                    }
                    self.output.write(&chunk).await?;
                    self.progress.record_received(chunk.len() as u64);
                }
                StreamEvent::Complete => {
                    if self.head.is_none() {
                        return Err(TransportError::UnexpectedEof.into());
                    }
                    self.output.finish().await?;
                    debug!(bytes = self.progress.bytes_received(), "response body complete");
                    return Ok(AttemptOutcome::Finished);
                }
                StreamEvent::Error(error) => {
                    if self.ignore_error {
                        debug!(error = %error, "transport error superseded by auth retry");
                        continue;
                    }
                    return Err(error.into());
                }
            }
        }
    }

    /// Handles the first headers event of an attempt. Returns the challenge
    /// if the response is one.
    async fn on_headers(
        &mut self,
        status: u16,
        headers: HeaderMap,
        auth: &AuthChallengeHandler,
    ) -> Result<Option<AuthChallenge>, RequestError> {
        self.transition(StreamState::HeadersReceived);
        let content_length = parse_content_length(&headers);
        debug!(status, ?content_length, "headers received");

        let evaluation = auth.evaluate(status, &headers);
        self.head = Some(ResponseHead {
            status,
            headers,
            content_length,
        });

        match evaluation {
            Evaluation::Challenge(challenge) => {
                debug!(status, realm = %challenge.realm(), "authentication challenge");
                self.ignore_error = true;
                Ok(Some(challenge))
            }
            Evaluation::Pass => {
                self.progress.begin_download(content_length);
                self.output.begin().await?;
                self.transition(StreamState::Streaming);
                Ok(None)
            }
        }
    }

    /// Closes a challenged stream and discards whatever it still had queued.
    /// Upload bytes already written still count.
    async fn close_quietly(&mut self, stream: &mut dyn EventStream) {
        stream.close().await;
        while let Some(event) = stream.next_event().await {
            match event {
                StreamEvent::BytesWritten(bytes) => self.progress.record_sent(bytes),
                StreamEvent::Error(error) if self.ignore_error => {
                    debug!(error = %error, "transport error superseded by auth retry");
                }
                _ => {}
            }
        }
    }
}

fn parse_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn test_parse_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_content_length(&headers), None);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        assert_eq!(parse_content_length(&headers), Some(42));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("nope"));
        assert_eq!(parse_content_length(&headers), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(StreamState::Completed.is_terminal());
        assert!(StreamState::Failed.is_terminal());
        assert!(!StreamState::AwaitingAuth.is_terminal());
        assert_eq!(StreamState::AwaitingAuth.to_string(), "awaiting-auth");
    }
}
