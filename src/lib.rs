//! Requester Core Library
//!
//! An asynchronous HTTP request engine. A [`RequestDescriptor`] declares the
//! target, headers, POST fields and files, credentials, and body destination;
//! a [`RequestEngine`] drives the streaming exchange to completion, reports
//! upload and download progress, and answers authentication challenges from
//! preset, stored, or delegate-supplied credentials.
//!
//! # Architecture
//!
//! - [`request`] - descriptor and wire request encoding (form and multipart)
//! - [`transport`] - the transport boundary and the `reqwest` implementation
//! - [`auth`] - challenge parsing, credential stores, and the pause/resume gate
//! - [`progress`] - upload/download counters and progress sinks
//! - [`engine`] - stream state machine and the request coordinator
//! - [`error`] - error taxonomy

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod engine;
pub mod error;
pub mod progress;
pub mod request;
pub mod transport;
mod user_agent;

// Re-export commonly used types
pub use auth::{
    AuthChallenge, AuthResponder, ChallengeKind, Credential, CredentialKey, CredentialScope,
    CredentialStore, KeyringCredentialStore, SessionCredentialStore,
};
pub use engine::{
    RequestDelegate, RequestEngine, RequestHandle, Response, ResponseBody, StreamState,
};
pub use error::{AuthFailure, BuildError, RequestError, TransportError};
pub use progress::{ProgressSink, ProgressTracker, ProgressUpdate};
pub use request::{RequestBuilder, RequestDescriptor, WireBody, WireRequest};
pub use transport::{EventStream, HttpTransport, StreamEvent, Transport, TransportSettings};
