//! CLI entry point for the requester tool.

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use requester_core::{
    HttpTransport, RequestDescriptor, RequestEngine, ResponseBody, TransportSettings,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod terminal;

use app_config::FileConfig;
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = app_config::load_file_config(args.config.as_deref())?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config
                .verbosity
                .map_or("info", app_config::VerbositySetting::filter_directive),
            1 => "debug",
            _ => "trace",
        }
    };
    terminal::init_tracing(default_level);
    debug!(?args, ?file_config, "CLI arguments parsed");

    let descriptor = build_descriptor(&args, &file_config)?;
    let transport = HttpTransport::with_settings(transport_settings(&file_config))
        .context("Failed to build HTTP client")?;

    let show_progress = terminal::should_show_progress(
        io::stderr().is_terminal(),
        args.quiet || args.no_progress,
        terminal::is_dumb_terminal(),
    );
    let bars = show_progress.then(terminal::TransferBars::new);

    let mut engine = RequestEngine::new(descriptor, Arc::new(transport))
        .with_delegate(Arc::new(terminal::TerminalDelegate));
    if let Some(bars) = &bars {
        engine = engine
            .with_upload_progress(bars.upload_sink())
            .with_download_progress(bars.download_sink());
    }

    let handle = engine.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling request");
            handle.cancel();
        }
    });

    let result = engine.load().await;
    if let Some(bars) = &bars {
        bars.finish();
    }
    let response = result.context("Request failed")?;

    match response.body() {
        ResponseBody::Memory(bytes) => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(bytes).context("Failed to write response to stdout")?;
            stdout.flush()?;
        }
        ResponseBody::File(path) => {
            info!(
                path = %path.display(),
                bytes = response.total_bytes_read(),
                "Response saved"
            );
        }
    }

    let status = response.status();
    if status >= 400 {
        bail!("Server responded with HTTP {status}");
    }
    Ok(())
}

fn build_descriptor(args: &Args, file_config: &FileConfig) -> Result<RequestDescriptor> {
    let mut descriptor = RequestDescriptor::parse(&args.url)
        .with_context(|| format!("Invalid URL '{}'", args.url))?;

    for (name, value) in &args.headers {
        descriptor.add_request_header(name, value);
    }
    for (key, value) in &args.data {
        descriptor.set_post_value(key, value);
    }
    for (key, path) in &args.files {
        descriptor.set_file(key, path);
    }
    if let Some((username, password)) = args.credentials() {
        descriptor.set_username_and_password(username, password);
    }
    if let Some(method) = &args.method {
        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("Invalid request method '{method}'"))?;
        descriptor.set_method(method);
    }
    if let Some(output) = &args.output {
        descriptor.set_download_destination(output);
    }
    descriptor.set_use_session_persistence(
        args.session || file_config.session_persistence.unwrap_or(false),
    );
    descriptor.set_use_keychain_persistence(
        args.keychain || file_config.keychain_persistence.unwrap_or(false),
    );
    Ok(descriptor)
}

fn transport_settings(file_config: &FileConfig) -> TransportSettings {
    let defaults = TransportSettings::default();
    TransportSettings {
        connect_timeout_secs: file_config
            .connect_timeout_secs
            .unwrap_or(defaults.connect_timeout_secs),
        read_timeout_secs: file_config
            .read_timeout_secs
            .unwrap_or(defaults.read_timeout_secs),
        upload_chunk_size: file_config
            .upload_chunk_size
            .unwrap_or(defaults.upload_chunk_size),
        ..defaults
    }
}
