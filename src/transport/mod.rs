//! Transport boundary.
//!
//! A [`Transport`] opens a [`WireRequest`] and hands back an [`EventStream`]
//! that yields [`StreamEvent`]s in order: zero or more `BytesWritten` while
//! the body uploads, one `HeadersAvailable`, zero or more `BytesAvailable`,
//! then `Complete` or `Error`. [`HttpTransport`] is the production
//! implementation; tests substitute scripted transports.

mod constants;
mod http;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;

use crate::error::TransportError;
use crate::request::WireRequest;

pub use constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, UPLOAD_CHUNK_SIZE};
pub use http::{HttpTransport, TransportSettings};

/// Events delivered by an open stream.
#[derive(Debug)]
pub enum StreamEvent {
    /// The transport wrote this many request body bytes.
    BytesWritten(u64),
    /// Response status line and headers arrived.
    HeadersAvailable {
        /// HTTP status code.
        status: u16,
        /// Response headers.
        headers: HeaderMap,
    },
    /// A chunk of the response body arrived.
    BytesAvailable(Bytes),
    /// The response finished successfully.
    Complete,
    /// The exchange failed.
    Error(TransportError),
}

/// An open request/response exchange.
#[async_trait]
pub trait EventStream: Send {
    /// Waits for the next event. `None` means the stream is exhausted.
    async fn next_event(&mut self) -> Option<StreamEvent>;

    /// Releases the underlying connection. Further events are not delivered.
    async fn close(&mut self);
}

/// Opens request streams.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts sending `request` and returns its event stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the exchange cannot be started at all;
    /// failures after that arrive as [`StreamEvent::Error`].
    async fn open(&self, request: &WireRequest) -> Result<Box<dyn EventStream>, TransportError>;
}
