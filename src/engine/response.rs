//! Finalized response of a logical request.

use std::borrow::Cow;

use reqwest::header::HeaderMap;
use url::Url;

use super::output::ResponseBody;
use crate::auth::Credential;

/// Everything known about a completed request.
#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) url: Url,
    pub(crate) status: u16,
    pub(crate) headers: HeaderMap,
    pub(crate) content_length: Option<u64>,
    pub(crate) body: ResponseBody,
    pub(crate) total_bytes_read: u64,
    pub(crate) realm: Option<String>,
    pub(crate) used_credentials: Option<Credential>,
}

impl Response {
    /// URL the request was sent to, without userinfo.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// HTTP status code of the final response.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Headers of the final response.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// `Content-Length` of the final response, if the server sent one.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The body, in memory or at the download destination.
    #[must_use]
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// In-memory body bytes. `None` when the body went to a file.
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        match &self.body {
            ResponseBody::Memory(bytes) => Some(bytes),
            ResponseBody::File(_) => None,
        }
    }

    /// In-memory body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn data_string(&self) -> Option<Cow<'_, str>> {
        self.data().map(String::from_utf8_lossy)
    }

    /// Body bytes received on the final stream.
    #[must_use]
    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read
    }

    /// Realm of the last authentication challenge, if any occurred.
    #[must_use]
    pub fn authentication_realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// Credentials the server accepted, if any were sent.
    #[must_use]
    pub fn used_credentials(&self) -> Option<&Credential> {
        self.used_credentials.as_ref()
    }
}
