//! Upload and download progress accounting.
//!
//! [`ProgressTracker`] keeps four counters (sent, expected to send, received,
//! expected to receive) and forwards deltas to the registered sinks. It only
//! computes numbers; sinks redispatch to UI threads themselves if needed.

use std::fmt;
use std::sync::Arc;

/// One progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Bytes since the previous update.
    pub delta: u64,
    /// Cumulative bytes so far.
    pub total: u64,
    /// Expected total, when known.
    pub expected: Option<u64>,
}

impl ProgressUpdate {
    /// Completion fraction in `0.0..=1.0`, or `None` when the total is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.expected {
            Some(0) => Some(1.0),
            Some(expected) => Some((self.total as f64 / expected as f64).min(1.0)),
            None => None,
        }
    }
}

/// Receives progress updates for one direction of a request.
pub trait ProgressSink: Send + Sync {
    /// Called with each non-empty delta.
    fn on_progress(&self, update: ProgressUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: ProgressUpdate) {
        self(update);
    }
}

/// Running counters for one request.
#[derive(Default)]
pub struct ProgressTracker {
    sent: u64,
    expected_send: u64,
    last_sent: u64,
    received: u64,
    expected_receive: Option<u64>,
    last_received: u64,
    upload_sink: Option<Arc<dyn ProgressSink>>,
    download_sink: Option<Arc<dyn ProgressSink>>,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("sent", &self.sent)
            .field("expected_send", &self.expected_send)
            .field("received", &self.received)
            .field("expected_receive", &self.expected_receive)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// Creates a tracker with the given sinks.
    #[must_use]
    pub fn new(
        upload_sink: Option<Arc<dyn ProgressSink>>,
        download_sink: Option<Arc<dyn ProgressSink>>,
    ) -> Self {
        Self {
            upload_sink,
            download_sink,
            ..Self::default()
        }
    }

    /// Zeroes every counter. Called only at the start of a fresh load.
    pub fn reset(&mut self) {
        self.sent = 0;
        self.expected_send = 0;
        self.last_sent = 0;
        self.received = 0;
        self.expected_receive = None;
        self.last_received = 0;
    }

    /// Adds a body about to be sent to the expected upload total.
    ///
    /// Re-sends after an authentication challenge add to the total rather
    /// than resetting it, so cumulative never exceeds expected.
    pub fn expect_upload(&mut self, body_len: u64) {
        self.expected_send = self.expected_send.saturating_add(body_len);
    }

    /// Records bytes the transport reports written and notifies the upload sink.
    pub fn record_sent(&mut self, bytes: u64) {
        self.sent = self.sent.saturating_add(bytes);
        self.update_upload_progress();
    }

    /// Forwards the delta since the last upload update, if any.
    pub fn update_upload_progress(&mut self) {
        let delta = self.sent - self.last_sent;
        if delta == 0 {
            return;
        }
        self.last_sent = self.sent;
        if let Some(sink) = &self.upload_sink {
            sink.on_progress(ProgressUpdate {
                delta,
                total: self.sent,
                expected: (self.expected_send > 0).then_some(self.expected_send),
            });
        }
    }

    /// Starts receive accounting for a fresh stream.
    ///
    /// `expected` is the response's content length, if known.
    pub fn begin_download(&mut self, expected: Option<u64>) {
        self.received = 0;
        self.last_received = 0;
        self.expected_receive = expected;
    }

    /// Records received body bytes and notifies the download sink.
    pub fn record_received(&mut self, bytes: u64) {
        self.received = self.received.saturating_add(bytes);
        self.update_download_progress();
    }

    /// Forwards the delta since the last download update, if any.
    pub fn update_download_progress(&mut self) {
        let delta = self.received - self.last_received;
        if delta == 0 {
            return;
        }
        self.last_received = self.received;
        if let Some(sink) = &self.download_sink {
            sink.on_progress(ProgressUpdate {
                delta,
                total: self.received,
                expected: self.expected_receive,
            });
        }
    }

    /// Bytes sent so far.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// Expected upload total.
    #[must_use]
    pub fn expected_send(&self) -> u64 {
        self.expected_send
    }

    /// Bytes received on the current stream.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Expected download total, when known.
    #[must_use]
    pub fn expected_receive(&self) -> Option<u64> {
        self.expected_receive
    }
}
