//! End-to-end request tests against a local mock HTTP server.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use requester_core::{
    AuthChallenge, AuthFailure, AuthResponder, Credential, CredentialKey, CredentialStore,
    HttpTransport, ProgressSink, ProgressUpdate, RequestBuilder, RequestDelegate,
    RequestDescriptor, RequestEngine, RequestError, ResponseBody, SessionCredentialStore,
    TransportError,
};
use support::socket_guard::{should_skip_socket_bound_test, start_mock_server_or_skip};
use tempfile::TempDir;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[derive(Default)]
struct PromptCounter {
    prompts: AtomicUsize,
}

impl RequestDelegate for PromptCounter {
    fn authentication_needed(&self, _challenge: &AuthChallenge, responder: AuthResponder) {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        responder.decline();
    }
}

fn recording_sink() -> (Arc<dyn ProgressSink>, Arc<Mutex<Vec<ProgressUpdate>>>) {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&updates);
    let sink: Arc<dyn ProgressSink> =
        Arc::new(move |update: ProgressUpdate| captured.lock().unwrap().push(update));
    (sink, updates)
}

fn transport() -> Arc<HttpTransport> {
    Arc::new(HttpTransport::new())
}

fn challenge_response() -> ResponseTemplate {
    ResponseTemplate::new(401)
        .insert_header("WWW-Authenticate", "Basic realm=\"Files\"")
        .set_body_string("denied")
}

#[tokio::test]
async fn test_multipart_upload_reports_exact_upload_progress() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stored"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let photo = dir.path().join("a.jpg");
    std::fs::write(&photo, b"0123456789").unwrap();

    let mut descriptor = RequestDescriptor::parse(&format!("{}/upload", server.uri())).unwrap();
    descriptor.set_file("photo", &photo);
    let expected_len = RequestBuilder::new()
        .build(&descriptor, None)
        .await
        .unwrap()
        .content_length();
    let (sink, updates) = recording_sink();

    let response = RequestEngine::new(descriptor, transport())
        .with_upload_progress(sink)
        .load()
        .await
        .unwrap();
    assert_eq!(response.data_string().unwrap(), "stored");

    let updates = updates.lock().unwrap();
    assert_eq!(updates.iter().map(|u| u.delta).sum::<u64>(), expected_len);
    assert_eq!(updates.last().unwrap().expected, Some(expected_len));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body = &requests[0].body;
    assert_eq!(body.len() as u64, expected_len);
    let text = String::from_utf8_lossy(body);
    assert!(text.contains("filename=\"a.jpg\""));
    assert!(text.contains("Content-Type: image/jpeg\r\n\r\n0123456789\r\n"));
    let content_type = requests[0].headers.get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data; boundary=----requester"));
}

#[tokio::test]
async fn test_form_post_is_urlencoded() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .and(path("/form"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("name=Ada%20Lovelace&lang=en"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(1)
        .mount(&server)
        .await;

    let mut descriptor = RequestDescriptor::parse(&format!("{}/form", server.uri())).unwrap();
    descriptor.set_post_value("name", "Ada Lovelace");
    descriptor.set_post_value("lang", "en");

    let response = RequestEngine::new(descriptor, transport()).load().await.unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.data_string().unwrap(), "created");
}

#[tokio::test]
async fn test_stored_credentials_retry_once_without_prompt() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("authorization", "Basic dTpw"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(challenge_response())
        .mount(&server)
        .await;

    let url = format!("{}/private", server.uri());
    let mut descriptor = RequestDescriptor::parse(&url).unwrap();
    descriptor.set_use_session_persistence(true);
    let store = Arc::new(SessionCredentialStore::new());
    let key = CredentialKey::for_url(descriptor.url(), "Files").unwrap();
    store.save(&key, &Credential::new("u", "p")).unwrap();
    let delegate = Arc::new(PromptCounter::default());

    let response = RequestEngine::new(descriptor, transport())
        .with_session_store(store)
        .with_delegate(delegate.clone())
        .load()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.data_string().unwrap(), "ok");
    assert_eq!(delegate.prompts.load(Ordering::SeqCst), 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unresolvable_challenge_fails_within_timeout() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(challenge_response())
        .mount(&server)
        .await;

    let descriptor = RequestDescriptor::parse(&format!("{}/private", server.uri())).unwrap();
    let delegate = Arc::new(PromptCounter::default());
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        RequestEngine::new(descriptor, transport())
            .with_delegate(delegate.clone())
            .load(),
    )
    .await
    .expect("request must not block");

    let error = result.unwrap_err();
    assert!(
        matches!(error, RequestError::Authentication { ref realm, .. } if realm == "Files"),
        "unexpected error: {error}"
    );
    assert_eq!(delegate.prompts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_url_embedded_credentials_are_preset_and_saved() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(header("authorization", "Basic dTpw"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(challenge_response())
        .mount(&server)
        .await;

    let with_userinfo = server.uri().replacen("http://", "http://u:p@", 1);
    let mut descriptor = RequestDescriptor::parse(&format!("{with_userinfo}/private")).unwrap();
    descriptor.set_use_session_persistence(true);
    let store = Arc::new(SessionCredentialStore::new());

    let response = RequestEngine::new(descriptor, transport())
        .with_session_store(store.clone())
        .load()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.used_credentials(), Some(&Credential::new("u", "p")));
    let first = &server.received_requests().await.unwrap()[0];
    assert!(
        first.headers.get("authorization").is_none(),
        "userinfo must not be sent before a challenge"
    );
    let key = CredentialKey::for_url(response.url(), "Files").unwrap();
    assert_eq!(store.lookup(&key).unwrap(), Some(Credential::new("u", "p")));
}

#[tokio::test]
async fn test_download_to_file_streams_body() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let content = vec![42_u8; 64 * 1024];
    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("downloads").join("big.bin");
    let mut descriptor = RequestDescriptor::parse(&format!("{}/big.bin", server.uri())).unwrap();
    descriptor.set_download_destination(&destination);
    let (sink, updates) = recording_sink();

    let response = RequestEngine::new(descriptor, transport())
        .with_download_progress(sink)
        .load()
        .await
        .unwrap();

    assert_eq!(response.body(), &ResponseBody::File(destination.clone()));
    assert_eq!(response.total_bytes_read(), content.len() as u64);
    assert_eq!(std::fs::read(&destination).unwrap(), content);
    let updates = updates.lock().unwrap();
    assert_eq!(
        updates.iter().map(|u| u.delta).sum::<u64>(),
        content.len() as u64
    );
    assert!(updates.windows(2).all(|w| w[0].total <= w[1].total));
}

#[tokio::test]
async fn test_http_error_status_completes_with_response() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .mount(&server)
        .await;

    let descriptor = RequestDescriptor::parse(&format!("{}/nope", server.uri())).unwrap();
    let response = RequestEngine::new(descriptor, transport()).load().await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.data_string().unwrap(), "missing");
}

#[tokio::test]
async fn test_custom_headers_are_sent() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(header("x-trace", "abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut descriptor = RequestDescriptor::parse(&server.uri()).unwrap();
    descriptor.add_request_header("X-Trace", "abc");
    let response = RequestEngine::new(descriptor, transport()).load().await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    if should_skip_socket_bound_test() {
        return;
    }
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let descriptor = RequestDescriptor::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
    let error = RequestEngine::new(descriptor, transport())
        .load()
        .await
        .unwrap_err();
    assert!(
        matches!(
            error,
            RequestError::Transport(TransportError::Connect { .. } | TransportError::Http { .. })
        ),
        "unexpected error: {error}"
    );
}

#[tokio::test]
async fn test_missing_upload_file_fails_before_sending() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let mut descriptor = RequestDescriptor::parse(&format!("{}/upload", server.uri())).unwrap();
    descriptor.set_file("photo", "/definitely/not/here.jpg");

    let error = RequestEngine::new(descriptor, transport())
        .load()
        .await
        .unwrap_err();
    assert!(matches!(error, RequestError::Build(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_declined_prompt_reports_declined() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(challenge_response())
        .mount(&server)
        .await;

    let descriptor = RequestDescriptor::parse(&server.uri()).unwrap();
    let error = RequestEngine::new(descriptor, transport())
        .with_delegate(Arc::new(PromptCounter::default()))
        .load()
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        RequestError::Authentication {
            reason: AuthFailure::Declined,
            ..
        }
    ));
}
