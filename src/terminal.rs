//! Terminal integration: tracing setup, progress bars, and the credential prompt.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use requester_core::{
    AuthChallenge, AuthResponder, ProgressSink, ProgressUpdate, RequestDelegate, RequestError,
    Response,
};
use tracing::{debug, warn};

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

pub(crate) fn should_show_progress(
    stderr_is_terminal: bool,
    suppressed: bool,
    dumb_terminal: bool,
) -> bool {
    stderr_is_terminal && !suppressed && !dumb_terminal
}

pub(crate) fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init();
}

/// Upload and download bars drawn to stderr.
pub(crate) struct TransferBars {
    upload: ProgressBar,
    download: ProgressBar,
}

impl TransferBars {
    pub(crate) fn new() -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let upload = multi.add(transfer_bar("upload"));
        let download = multi.add(transfer_bar("download"));
        Self { upload, download }
    }

    pub(crate) fn upload_sink(&self) -> Arc<dyn ProgressSink> {
        Arc::new(BarSink(self.upload.clone()))
    }

    pub(crate) fn download_sink(&self) -> Arc<dyn ProgressSink> {
        Arc::new(BarSink(self.download.clone()))
    }

    pub(crate) fn finish(&self) {
        self.upload.finish_and_clear();
        self.download.finish_and_clear();
    }
}

fn transfer_bar(label: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{msg:>8} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(label);
    bar
}

struct BarSink(ProgressBar);

impl ProgressSink for BarSink {
    fn on_progress(&self, update: ProgressUpdate) {
        match update.expected {
            Some(expected) => self.0.set_length(expected),
            None => self.0.set_length(update.total),
        }
        self.0.set_position(update.total);
    }
}

/// Prompts on the terminal when the server wants credentials.
pub(crate) struct TerminalDelegate;

impl RequestDelegate for TerminalDelegate {
    fn request_finished(&self, response: &Response) {
        debug!(status = response.status(), "request finished");
    }

    fn request_failed(&self, error: &RequestError) {
        debug!(error = %error, "request failed");
    }

    fn authentication_needed(&self, challenge: &AuthChallenge, responder: AuthResponder) {
        let realm = challenge.realm().to_string();
        let fallback = responder.clone();
        // Detached thread: a pending stdin read must not hold up runtime
        // shutdown after a cancel.
        let spawned = std::thread::Builder::new()
            .name("credential-prompt".to_string())
            .spawn(move || match prompt_credentials(&realm) {
                Ok(Some((username, password))) => {
                    responder.retry_with_credentials(username, password);
                }
                Ok(None) => {
                    responder.decline();
                }
                Err(e) => {
                    warn!(error = %e, "failed to read credentials from terminal");
                    responder.decline();
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to start credential prompt");
            fallback.decline();
        }
    }
}

/// Reads a username and password from stdin. An empty username declines.
fn prompt_credentials(realm: &str) -> io::Result<Option<(String, String)>> {
    let mut stderr = io::stderr();
    let stdin = io::stdin();
    let mut lines = stdin.lock();

    write!(stderr, "Authentication required for realm '{realm}'\nUsername: ")?;
    stderr.flush()?;
    let mut username = String::new();
    lines.read_line(&mut username)?;
    let username = username.trim_end_matches(['\r', '\n']).to_string();
    if username.is_empty() {
        return Ok(None);
    }

    write!(stderr, "Password (input is visible): ")?;
    stderr.flush()?;
    let mut password = String::new();
    lines.read_line(&mut password)?;
    Ok(Some((
        username,
        password.trim_end_matches(['\r', '\n']).to_string(),
    )))
}
