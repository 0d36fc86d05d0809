//! reqwest-backed client and the basic signing flow against a mock server
//!
//! Run with: cargo test -p signload-flow --test reqwest_client_test

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use signload_flow::flow::{FlowOrchestrator, FlowState};
use signload_flow::http::{FileAttachment, HttpClient, HttpRequest, ReqwestClient, TransportError};
use signload_flow::journal::ResponseJournal;
use signload_flow::metrics::MetricsSink;
use signload_flow::signing::{
    basic_flow, SignaturePlacement, SigningConfig, DEFAULT_SIGNATURE_IMAGE,
};

fn client() -> ReqwestClient {
    ReqwestClient::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn sends_form_and_parses_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "abc" })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client()
        .send(
            HttpRequest::post(format!("{}/auth", server.uri()))
                .form([("grant_type", "client_credentials")]),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.str_at("access_token"), Some("abc"));
}

#[tokio::test]
async fn sends_bearer_and_multipart_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/plus-upload"))
        .and(header("authorization", "Bearer tok"))
        .and(body_string_contains("filename=\"doc.pdf\""))
        .and(body_string_contains("%PDF-1.4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "filename": "s.pdf" })))
        .expect(1)
        .mount(&server)
        .await;

    let file = FileAttachment::new(b"%PDF-1.4".to_vec(), "doc.pdf").with_content_type("application/pdf");
    let response = client()
        .send(
            HttpRequest::post(format!("{}/plus-upload", server.uri()))
                .bearer("tok")
                .multipart("file", file),
        )
        .await
        .unwrap();

    assert_eq!(response.str_at("filename"), Some("s.pdf"));
}

#[tokio::test]
async fn non_success_status_is_a_response_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let response = client()
        .send(HttpRequest::get(server.uri()))
        .await
        .unwrap();

    assert_eq!(response.status, 503);
    assert_eq!(response.body, "maintenance");
    assert!(response.json().is_none());
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let client = ReqwestClient::new(Duration::from_millis(50)).unwrap();
    let err = client.send(HttpRequest::get(server.uri())).await.unwrap_err();

    assert!(matches!(err, TransportError::Timeout(_)), "got {:?}", err);
}

#[tokio::test]
async fn basic_flow_against_mock_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/plus-upload"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "filename": "up.pdf" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/plus-requestsign"))
        .and(body_string_contains("up.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth_urls": [{ "url": "https://sign.example/approve?id=sig-1" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = Arc::new(SigningConfig {
        base_url: server.uri(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        username: "signer".to_string(),
        password: String::new(),
        otp_pin: String::new(),
        document: FileAttachment::new(b"%PDF-1.4".to_vec(), "doc.pdf")
            .with_content_type("application/pdf"),
        number_of_uploads: 2,
        sign_per_doc: 1,
        placement: SignaturePlacement::default(),
        signature_image: DEFAULT_SIGNATURE_IMAGE.to_string(),
        poll_interval: Duration::from_millis(10),
        max_status_checks: 3,
    });
    let journal = Arc::new(ResponseJournal::default());
    let orchestrator = FlowOrchestrator::new(
        Arc::new(basic_flow(config)),
        Arc::new(client()),
        Arc::new(MetricsSink::new()),
    )
    .with_journal(journal.clone());

    let outcome = orchestrator.run_iteration(0).await;

    assert_eq!(outcome.state, FlowState::Done);
    let entries = journal.entries();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[3].step, "request_sign");
    assert_eq!(entries[3].status_code, 200);
}
