//! Top-level coordinator for one logical request.
//!
//! [`RequestEngine`] owns the descriptor, the response state, the
//! authentication context, and the progress counters for the life of one
//! request, including any authentication retries. It finalizes exactly once
//! and fans out to the delegate's success or failure callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::output::Output;
use super::response::Response;
use super::stream::{AttemptOutcome, StreamEngine, StreamState};
use crate::auth::{
    AuthChallenge, AuthChallengeHandler, AuthResponder, Credential, CredentialStore, Gate,
    GateSignal, KeyringCredentialStore, Resolution, SessionCredentialStore,
};
use crate::error::{AuthFailure, RequestError, TransportError};
use crate::progress::{ProgressSink, ProgressTracker};
use crate::request::{RequestBuilder, RequestDescriptor};
use crate::transport::Transport;

/// Callbacks for a request's outcome.
///
/// Methods are invoked from the request's worker task, not necessarily the
/// caller's thread.
pub trait RequestDelegate: Send + Sync {
    /// The request completed.
    fn request_finished(&self, _response: &Response) {}

    /// The request failed or was cancelled.
    fn request_failed(&self, _error: &RequestError) {}

    /// Neither preset nor stored credentials answered `challenge`.
    ///
    /// The request stays paused until `responder` is used, now or later from
    /// any thread, or until the request is cancelled. The default declines.
    fn authentication_needed(&self, _challenge: &AuthChallenge, responder: AuthResponder) {
        responder.decline();
    }
}

#[derive(Debug)]
struct Shared {
    state: Arc<watch::Sender<StreamState>>,
    cancel: watch::Sender<bool>,
    gate: Arc<Gate>,
    complete: AtomicBool,
}

/// Cloneable handle for observing and cancelling a request from elsewhere.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    shared: Arc<Shared>,
}

impl RequestHandle {
    /// Cancels the request. A paused request is woken immediately.
    /// No effect once the request has completed.
    pub fn cancel(&self) {
        if self.is_complete() {
            return;
        }
        self.shared.cancel.send_replace(true);
        if self.shared.gate.signal(GateSignal::Cancelled) {
            debug!("woke request paused on authentication");
        }
        info!("cancel requested");
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.shared.state.subscribe()
    }

    /// Whether the request has reached `Completed` or `Failed`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shared.complete.load(Ordering::SeqCst)
    }
}

/// Executes one logical request.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use requester_core::{HttpTransport, RequestDescriptor, RequestEngine};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let mut descriptor = RequestDescriptor::parse("https://example.com/upload")?;
/// descriptor.set_post_value("title", "beach");
/// descriptor.set_file("photo", "/tmp/a.jpg");
///
/// let engine = RequestEngine::new(descriptor, Arc::new(HttpTransport::new()));
/// let response = engine.load().await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
pub struct RequestEngine {
    descriptor: RequestDescriptor,
    transport: Arc<dyn Transport>,
    session_store: Option<Arc<dyn CredentialStore>>,
    durable_store: Option<Arc<dyn CredentialStore>>,
    delegate: Option<Arc<dyn RequestDelegate>>,
    upload_sink: Option<Arc<dyn ProgressSink>>,
    download_sink: Option<Arc<dyn ProgressSink>>,
    shared: Arc<Shared>,
}

impl RequestEngine {
    /// Creates an engine for `descriptor` that sends through `transport`.
    #[must_use]
    pub fn new(descriptor: RequestDescriptor, transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(StreamState::Idle);
        let (cancel, _) = watch::channel(false);
        Self {
            descriptor,
            transport,
            session_store: None,
            durable_store: None,
            delegate: None,
            upload_sink: None,
            download_sink: None,
            shared: Arc::new(Shared {
                state: Arc::new(state),
                cancel,
                gate: Arc::new(Gate::new()),
                complete: AtomicBool::new(false),
            }),
        }
    }

    /// Overrides the session-scoped store (default: the process-wide one).
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Overrides the durable store (default: the system keychain).
    #[must_use]
    pub fn with_durable_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.durable_store = Some(store);
        self
    }

    /// Sets the delegate for completion callbacks and credential prompts.
    #[must_use]
    pub fn with_delegate(mut self, delegate: Arc<dyn RequestDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Sets the upload progress sink.
    #[must_use]
    pub fn with_upload_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.upload_sink = Some(sink);
        self
    }

    /// Sets the download progress sink.
    #[must_use]
    pub fn with_download_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.download_sink = Some(sink);
        self
    }

    /// Handle for cancelling and observing this request.
    #[must_use]
    pub fn handle(&self) -> RequestHandle {
        RequestHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs the request on a new Tokio task.
    pub fn spawn(self) -> JoinHandle<Result<Response, RequestError>> {
        tokio::spawn(self.load())
    }

    /// Runs the request to completion.
    ///
    /// Every outcome is also delivered to the delegate, exactly once.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`RequestError`]: a build failure, a transport
    /// failure, an unresolved authentication challenge, a destination write
    /// failure, or a cancel.
    #[instrument(skip(self), fields(url = %self.descriptor.url(), method = %self.descriptor.method()))]
    pub async fn load(self) -> Result<Response, RequestError> {
        let stores = self.enabled_stores();
        let mut auth = AuthChallengeHandler::new(
            self.descriptor.url().clone(),
            self.descriptor.credential().cloned(),
            stores,
        );
        let mut stream = StreamEngine::new(
            Arc::clone(&self.shared.state),
            self.shared.cancel.subscribe(),
            ProgressTracker::new(self.upload_sink.clone(), self.download_sink.clone()),
            Output::new(self.descriptor.download_destination()),
        );
        stream.progress_mut().reset();
        stream.transition(StreamState::Idle);

        let result = match self.execute(&mut stream, &mut auth).await {
            Ok(()) => self.build_response(stream, &mut auth),
            Err(error) => {
                stream.release_output().await;
                Err(error)
            }
        };
        self.finalize(result)
    }

    fn enabled_stores(&self) -> Vec<Arc<dyn CredentialStore>> {
        let mut stores = Vec::new();
        if self.descriptor.use_session_persistence() {
            stores.push(
                self.session_store
                    .clone()
                    .unwrap_or_else(|| SessionCredentialStore::shared() as Arc<dyn CredentialStore>),
            );
        }
        if self.descriptor.use_keychain_persistence() {
            stores.push(
                self.durable_store
                    .clone()
                    .unwrap_or_else(|| Arc::new(KeyringCredentialStore::new())),
            );
        }
        stores
    }

    async fn execute(
        &self,
        stream: &mut StreamEngine,
        auth: &mut AuthChallengeHandler,
    ) -> Result<(), RequestError> {
        let builder = RequestBuilder::new();
        loop {
            let wire = builder
                .build(&self.descriptor, auth.authorization())
                .await?;
            let challenge = match stream
                .run_attempt(self.transport.as_ref(), &wire, auth)
                .await?
            {
                AttemptOutcome::Finished => return Ok(()),
                AttemptOutcome::Challenge(challenge) => challenge,
            };

            stream.transition(StreamState::AwaitingAuth);
            match auth.on_challenge(&challenge)? {
                Resolution::Retry => {}
                Resolution::AskDelegate(challenge) => {
                    let credential = self.ask_delegate(stream, auth, &challenge).await?;
                    auth.apply_delegate_credentials(&challenge, credential)?;
                }
            }
            stream.resume();
            info!(realm = %challenge.realm(), "retrying with credentials");
        }
    }

    /// Blocks on the gate until the delegate answers or the request is cancelled.
    async fn ask_delegate(
        &self,
        stream: &mut StreamEngine,
        auth: &AuthChallengeHandler,
        challenge: &AuthChallenge,
    ) -> Result<Credential, RequestError> {
        let Some(delegate) = self.delegate.as_ref() else {
            debug!(realm = %challenge.realm(), "no delegate to ask for credentials");
            return Err(auth.exhausted());
        };

        let receiver = match self.shared.gate.arm() {
            Ok(receiver) => receiver,
            Err(e) => {
                warn!(error = %e, "authentication gate busy");
                return Err(auth.exhausted());
            }
        };
        delegate.authentication_needed(
            challenge,
            AuthResponder::new(Arc::clone(&self.shared.gate), challenge.clone()),
        );

        let signal = tokio::select! {
            biased;
            () = stream.cancelled() => return Err(RequestError::Cancelled),
            signal = receiver => signal,
        };
        match signal {
            Ok(GateSignal::Credentials(credential)) => Ok(credential),
            Ok(GateSignal::Cancelled) => Err(RequestError::Cancelled),
            Ok(GateSignal::Declined) | Err(_) => Err(RequestError::authentication(
                challenge.realm(),
                AuthFailure::Declined,
            )),
        }
    }

    fn build_response(
        &self,
        stream: StreamEngine,
        auth: &mut AuthChallengeHandler,
    ) -> Result<Response, RequestError> {
        let Some(head) = stream.head().cloned() else {
            return Err(TransportError::UnexpectedEof.into());
        };
        let used_credentials = auth.on_success();
        let total_bytes_read = stream.progress().bytes_received();
        Ok(Response {
            url: self.descriptor.url().clone(),
            status: head.status,
            headers: head.headers,
            content_length: head.content_length,
            body: stream.into_output().into_body(),
            total_bytes_read,
            realm: auth.realm().map(str::to_string),
            used_credentials,
        })
    }

    fn finalize(&self, result: Result<Response, RequestError>) -> Result<Response, RequestError> {
        if self.shared.complete.swap(true, Ordering::SeqCst) {
            return result;
        }
        match &result {
            Ok(response) => {
                self.shared.state.send_replace(StreamState::Completed);
                info!(
                    status = response.status(),
                    bytes = response.total_bytes_read(),
                    "request completed"
                );
                if let Some(delegate) = &self.delegate {
                    delegate.request_finished(response);
                }
            }
            Err(error) => {
                self.shared.state.send_replace(StreamState::Failed);
                if error.is_cancelled() {
                    info!("request cancelled");
                } else {
                    warn!(error = %error, "request failed");
                }
                if let Some(delegate) = &self.delegate {
                    delegate.request_failed(error);
                }
            }
        }
        result
    }
}
