//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Send one HTTP request with uploads, progress, and authentication.
///
/// String fields (`-d`) are sent form-encoded; adding any file field (`-F`)
/// switches the body to multipart. Credentials are asked for on the terminal
/// when the server challenges and none are preset or stored.
#[derive(Parser, Debug)]
#[command(name = "requester")]
#[command(author, version, about)]
pub struct Args {
    /// Target URL (http or https)
    pub url: String,

    /// Custom request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// POST string field, `key=value` (repeatable)
    #[arg(short = 'd', long = "data", value_parser = parse_key_value)]
    pub data: Vec<(String, String)>,

    /// POST file field, `key=path` (repeatable)
    #[arg(short = 'F', long = "form", value_parser = parse_key_value)]
    pub files: Vec<(String, String)>,

    /// Preset credentials, `user:password`
    #[arg(short = 'u', long = "user")]
    pub user: Option<String>,

    /// Override the request method
    #[arg(short = 'X', long = "request")]
    pub method: Option<String>,

    /// Write the response body to this file instead of stdout
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Remember accepted credentials for this session
    #[arg(long)]
    pub session: bool,

    /// Remember accepted credentials in the system keychain
    #[arg(long)]
    pub keychain: bool,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Config file path (default: $XDG_CONFIG_HOME/requester/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Splits `--user` into username and password. A missing `:` means an
    /// empty password.
    #[must_use]
    pub fn credentials(&self) -> Option<(String, String)> {
        let user = self.user.as_deref()?;
        Some(match user.split_once(':') {
            Some((name, password)) => (name.to_string(), password.to_string()),
            None => (user.to_string(), String::new()),
        })
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected 'Name: value', got '{raw}'")),
    }
}
