//! Default User-Agent string for outgoing requests.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/requester";

/// Default User-Agent: tool name, crate version, and project URL.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("requester/{version} (+{PROJECT_UA_URL})")
}
