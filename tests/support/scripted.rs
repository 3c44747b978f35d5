//! In-memory transport that replays scripted event sequences.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};
use requester_core::{EventStream, StreamEvent, Transport, TransportError, WireRequest};

/// One step of a scripted stream.
pub enum Step {
    Event(StreamEvent),
    /// Never yields again until the stream is closed.
    Hang,
}

pub fn headers(status: u16, pairs: &[(&str, &str)]) -> Step {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        headers.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    Step::Event(StreamEvent::HeadersAvailable { status, headers })
}

pub fn challenge(realm: &str) -> Step {
    headers(401, &[("www-authenticate", &format!("Basic realm=\"{realm}\""))])
}

pub fn bytes(chunk: &[u8]) -> Step {
    Step::Event(StreamEvent::BytesAvailable(Bytes::copy_from_slice(chunk)))
}

pub fn written(n: u64) -> Step {
    Step::Event(StreamEvent::BytesWritten(n))
}

pub fn complete() -> Step {
    Step::Event(StreamEvent::Complete)
}

pub fn error(message: &str) -> Step {
    Step::Event(StreamEvent::Error(TransportError::other(message)))
}

/// A full `200` exchange with a `Content-Length` body.
pub fn ok_body(body: &[u8]) -> Vec<Step> {
    vec![
        headers(200, &[(CONTENT_LENGTH.as_str(), &body.len().to_string())]),
        bytes(body),
        complete(),
    ]
}

/// Transport that hands out one script per `open` call, in order.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<WireRequest>>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    /// Wire requests opened so far.
    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of streams closed by the engine.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: &WireRequest) -> Result<Box<dyn EventStream>, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::other("no scripted response left"))?;
        Ok(Box::new(ScriptedStream {
            steps: steps.into(),
            closed: AtomicBool::new(false),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct ScriptedStream {
    steps: VecDeque<Step>,
    closed: AtomicBool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl EventStream for ScriptedStream {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match self.steps.pop_front() {
                Some(Step::Event(event)) => return Some(event),
                Some(Step::Hang) if !self.closed.load(Ordering::SeqCst) => {
                    std::future::pending::<()>().await;
                }
                Some(Step::Hang) => {}
                None => return None,
            }
        }
    }

    // Like a closed channel: queued events still drain, nothing new arrives.
    async fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.steps.retain(|step| matches!(step, Step::Event(_)));
    }
}
