//! Turns a [`RequestDescriptor`] into a ready-to-send [`WireRequest`].
//!
//! Body selection:
//! - any file field present: `multipart/form-data`, files streamed from disk
//! - only string fields: `application/x-www-form-urlencoded`
//! - neither: empty body
//!
//! The declared `Content-Length` always equals the exact number of bytes the
//! transport will send, because upload progress expectations are derived
//! from it.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};
use url::Url;

use super::RequestDescriptor;
use super::content_type::content_type_for_path;
use crate::auth::AuthorizationHeader;
use crate::error::BuildError;

const BOUNDARY_PREFIX: &str = "----requester";
const BOUNDARY_RANDOM_LEN: usize = 24;
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// One contiguous piece of a request body.
#[derive(Debug, Clone)]
pub enum BodySegment {
    /// Bytes held in memory (form data, multipart framing, text parts).
    Bytes(Bytes),
    /// A file streamed from disk at send time.
    File {
        /// Path of the file.
        path: PathBuf,
        /// File length measured when the request was built.
        len: u64,
    },
}

impl BodySegment {
    /// Number of bytes this segment contributes to the body.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::File { len, .. } => *len,
        }
    }

    /// Returns true if the segment contributes no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Request body as an ordered list of segments with a precomputed length.
#[derive(Debug, Clone, Default)]
pub struct WireBody {
    segments: Vec<BodySegment>,
    len: u64,
}

impl WireBody {
    /// An empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A body made of a single in-memory buffer.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let mut body = Self::default();
        body.push(BodySegment::Bytes(bytes.into()));
        body
    }

    fn push(&mut self, segment: BodySegment) {
        if segment.is_empty() {
            return;
        }
        self.len += segment.len();
        self.segments.push(segment);
    }

    /// Exact body length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if there is nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Body segments in send order.
    #[must_use]
    pub fn segments(&self) -> &[BodySegment] {
        &self.segments
    }

    /// Reads the whole body into memory, including file segments.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a file segment cannot be read.
    pub async fn read_to_vec(&self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
        for segment in &self.segments {
            match segment {
                BodySegment::Bytes(bytes) => out.extend_from_slice(bytes),
                BodySegment::File { path, .. } => {
                    let mut file = tokio::fs::File::open(path).await?;
                    file.read_to_end(&mut out).await?;
                }
            }
        }
        Ok(out)
    }
}

/// A fully encoded request. Never mutated once built; authentication
/// retries build a fresh one.
#[derive(Debug, Clone)]
pub struct WireRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: WireBody,
}

impl WireRequest {
    /// Creates a wire request from already-encoded parts.
    #[must_use]
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: WireBody) -> Self {
        Self {
            method,
            url,
            headers,
            body,
        }
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Headers to send, including body and authorization headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Request body.
    #[must_use]
    pub fn body(&self) -> &WireBody {
        &self.body
    }

    /// Declared body length.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.body.len()
    }
}

/// Builds wire requests for one logical request.
///
/// The multipart boundary is fixed per builder so that rebuilding after an
/// authentication challenge yields an identical body.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    boundary: String,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    /// Creates a builder with a freshly generated boundary token.
    #[must_use]
    pub fn new() -> Self {
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(BOUNDARY_RANDOM_LEN)
            .map(char::from)
            .collect();
        Self::with_boundary(format!("{BOUNDARY_PREFIX}{random}"))
    }

    /// Creates a builder with a caller-chosen boundary token.
    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    /// The multipart boundary token.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Builds the wire request for `descriptor`, adding `authorization` if given.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] for a non-HTTP URL, an invalid header, or a
    /// file field whose path cannot be read.
    #[instrument(level = "debug", skip(self, descriptor, authorization), fields(url = %descriptor.url()))]
    pub async fn build(
        &self,
        descriptor: &RequestDescriptor,
        authorization: Option<&AuthorizationHeader>,
    ) -> Result<WireRequest, BuildError> {
        let url = descriptor.url();
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BuildError::unsupported_scheme(url.as_str(), url.scheme()));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in descriptor.headers() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| BuildError::invalid_header(name.clone()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| BuildError::invalid_header(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        let (body, content_type) = if !descriptor.post_files().is_empty() {
            let body = self.encode_multipart(descriptor).await?;
            (body, Some(format!("multipart/form-data; boundary={}", self.boundary)))
        } else if !descriptor.post_values().is_empty() {
            let body = WireBody::from_bytes(encode_form(descriptor.post_values()));
            (body, Some(FORM_URLENCODED.to_string()))
        } else {
            (WireBody::empty(), None)
        };

        if let Some(content_type) = content_type {
            let value = HeaderValue::from_str(&content_type)
                .map_err(|_| BuildError::invalid_header(CONTENT_TYPE.as_str()))?;
            headers.insert(CONTENT_TYPE, value);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        if let Some(authorization) = authorization {
            headers.insert(authorization.name().clone(), authorization.value().clone());
        }

        debug!(
            method = %descriptor.method(),
            body_bytes = body.len(),
            segments = body.segments().len(),
            "built wire request"
        );

        Ok(WireRequest::new(descriptor.method(), url.clone(), headers, body))
    }

    async fn encode_multipart(&self, descriptor: &RequestDescriptor) -> Result<WireBody, BuildError> {
        let mut body = WireBody::empty();
        let mut framing = Vec::new();

        for (name, value) in descriptor.post_values() {
            framing.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    self.boundary,
                    escape_quoted(name)
                )
                .as_bytes(),
            );
            framing.extend_from_slice(value.as_bytes());
            framing.extend_from_slice(b"\r\n");
        }

        for (name, path) in descriptor.post_files() {
            let len = readable_file_len(name, path).await?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            framing.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    self.boundary,
                    escape_quoted(name),
                    escape_quoted(&filename),
                    content_type_for_path(path)
                )
                .as_bytes(),
            );
            body.push(BodySegment::Bytes(Bytes::from(std::mem::take(&mut framing))));
            body.push(BodySegment::File {
                path: path.clone(),
                len,
            });
            framing.extend_from_slice(b"\r\n");
        }

        framing.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        body.push(BodySegment::Bytes(Bytes::from(framing)));
        Ok(body)
    }
}

fn encode_form(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

async fn readable_file_len(field: &str, path: &Path) -> Result<u64, BuildError> {
    // Opening proves readability; metadata alone would accept unreadable files.
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| BuildError::file_not_found(field, path, e))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|e| BuildError::file_not_found(field, path, e))?;
    if !metadata.is_file() {
        return Err(BuildError::file_not_found(
            field,
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    Ok(metadata.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::auth::{ChallengeKind, Credential};

    fn descriptor(url: &str) -> RequestDescriptor {
        RequestDescriptor::parse(url).unwrap()
    }

    #[tokio::test]
    async fn test_empty_descriptor_builds_empty_body_without_length() {
        let wire = RequestBuilder::new()
            .build(&descriptor("http://example.test/"), None)
            .await
            .unwrap();
        assert_eq!(wire.method(), &Method::GET);
        assert!(wire.body().is_empty());
        assert!(wire.headers().get(CONTENT_LENGTH).is_none());
    }

    #[tokio::test]
    async fn test_form_body_is_urlencoded_with_exact_length() {
        let mut desc = descriptor("http://example.test/form");
        desc.set_post_value("name", "Ada Lovelace");
        desc.set_post_value("q", "a&b=c");

        let wire = RequestBuilder::new().build(&desc, None).await.unwrap();
        let bytes = wire.body().read_to_vec().await.unwrap();

        assert_eq!(bytes, b"name=Ada%20Lovelace&q=a%26b%3Dc");
        assert_eq!(wire.content_length(), bytes.len() as u64);
        assert_eq!(
            wire.headers().get(CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded"
        );
        assert_eq!(
            wire.headers().get(CONTENT_LENGTH).unwrap(),
            &bytes.len().to_string()
        );
    }

    #[tokio::test]
    async fn test_multipart_body_framing_and_exact_length() {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("a.jpg");
        std::fs::write(&file_path, b"0123456789").unwrap();

        let mut desc = descriptor("http://example.test/upload");
        desc.set_post_value("title", "beach");
        desc.set_file("photo", &file_path);

        let builder = RequestBuilder::with_boundary("XyZ");
        let wire = builder.build(&desc, None).await.unwrap();
        let bytes = wire.body().read_to_vec().await.unwrap();

        let expected = "--XyZ\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nbeach\r\n\
--XyZ\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"a.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n\
0123456789\r\n--XyZ--\r\n";
        assert_eq!(String::from_utf8(bytes.clone()).unwrap(), expected);
        assert_eq!(wire.content_length(), bytes.len() as u64);
        assert_eq!(
            wire.headers().get(CONTENT_TYPE).unwrap(),
            "multipart/form-data; boundary=XyZ"
        );
    }

    #[tokio::test]
    async fn test_multipart_missing_file_is_build_error() {
        let mut desc = descriptor("http://example.test/upload");
        desc.set_file("photo", "/definitely/not/here.jpg");

        let result = RequestBuilder::new().build(&desc, None).await;
        assert!(matches!(result, Err(BuildError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_directory_as_file_field_is_build_error() {
        let dir = TempDir::new().unwrap();
        let mut desc = descriptor("http://example.test/upload");
        desc.set_file("photo", dir.path());

        let result = RequestBuilder::new().build(&desc, None).await;
        assert!(matches!(result, Err(BuildError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_rebuild_with_same_builder_is_identical() {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("doc.pdf");
        std::fs::write(&file_path, b"%PDF").unwrap();
        let mut desc = descriptor("http://example.test/upload");
        desc.set_file("doc", &file_path);

        let builder = RequestBuilder::new();
        let first = builder.build(&desc, None).await.unwrap();
        let second = builder.build(&desc, None).await.unwrap();
        assert_eq!(first.headers(), second.headers());
        assert_eq!(first.content_length(), second.content_length());
    }

    #[tokio::test]
    async fn test_custom_headers_and_authorization_are_applied() {
        let mut desc = descriptor("http://example.test/");
        desc.add_request_header("X-Api", "1");
        let authorization =
            AuthorizationHeader::basic(ChallengeKind::Server, &Credential::new("u", "p")).unwrap();

        let wire = RequestBuilder::new()
            .build(&desc, Some(&authorization))
            .await
            .unwrap();
        assert_eq!(wire.headers().get("x-api").unwrap(), "1");
        assert_eq!(wire.headers().get("authorization").unwrap(), "Basic dTpw");
    }

    #[tokio::test]
    async fn test_invalid_header_name_is_build_error() {
        let mut desc = descriptor("http://example.test/");
        desc.add_request_header("bad header", "1");
        let result = RequestBuilder::new().build(&desc, None).await;
        assert!(matches!(result, Err(BuildError::InvalidHeader { .. })));
    }

    #[tokio::test]
    async fn test_non_http_scheme_is_build_error() {
        let result = RequestBuilder::new()
            .build(&descriptor("ftp://example.test/x"), None)
            .await;
        assert!(matches!(result, Err(BuildError::UnsupportedScheme { .. })));
    }

    #[tokio::test]
    async fn test_random_boundaries_differ_between_builders() {
        let a = RequestBuilder::new();
        let b = RequestBuilder::new();
        assert!(a.boundary().starts_with(BOUNDARY_PREFIX));
        assert_ne!(a.boundary(), b.boundary());
    }
}
