//! End-to-end orchestration scenarios against a scripted HTTP client
//!
//! Run with: cargo test -p signload-flow --test flow_scenarios_test

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use signload_flow::flow::{FlowOrchestrator, FlowState};
use signload_flow::http::FileAttachment;
use signload_flow::metrics::{names, MetricsSink};
use signload_flow::report::AggregateReport;
use signload_flow::runner::{LoadProfile, LoadRunner};
use signload_flow::signing::{
    basic_flow, full_flow, SignaturePlacement, SigningConfig, DEFAULT_SIGNATURE_IMAGE,
    GET_TOKEN, REQUEST_SIGN, UPLOAD_FILE,
};
use signload_flow::testing::ScriptedClient;

const TOKEN_OK: &str = r#"{"access_token":"token-abc","token_type":"bearer"}"#;
const UPLOAD_OK: &str = r#"{"filename":"stored-1.pdf"}"#;

fn signing_config(number_of_uploads: u32) -> Arc<SigningConfig> {
    Arc::new(SigningConfig {
        base_url: "http://sign.test".to_string(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        username: "signer".to_string(),
        password: "pw".to_string(),
        otp_pin: "123456".to_string(),
        document: FileAttachment::new(b"%PDF-1.4 test".to_vec(), "doc.pdf")
            .with_content_type("application/pdf"),
        number_of_uploads,
        sign_per_doc: 1,
        placement: SignaturePlacement::default(),
        signature_image: DEFAULT_SIGNATURE_IMAGE.to_string(),
        poll_interval: Duration::from_millis(5),
        max_status_checks: 5,
    })
}

fn request_sign_ok() -> String {
    json!({ "auth_urls": [{ "url": "https://sign.test/approve?user=signer&id=sig-42" }] })
        .to_string()
}

type Harness = (Arc<FlowOrchestrator>, Arc<ScriptedClient>, Arc<MetricsSink>);

fn basic_orchestrator(client: ScriptedClient) -> Harness {
    let client = Arc::new(client);
    let sink = Arc::new(MetricsSink::new());
    let orchestrator = Arc::new(FlowOrchestrator::new(
        Arc::new(basic_flow(signing_config(1))),
        client.clone(),
        sink.clone(),
    ));
    (orchestrator, client, sink)
}

fn attempts(sink: &MetricsSink, step: &str) -> u64 {
    sink.final_values_where(names::STEP_ATTEMPTS, names::TAG_STEP, step)
        .map(|v| v.count)
        .unwrap_or(0)
}

#[tokio::test]
async fn token_success_advances_to_upload() {
    let client = ScriptedClient::new()
        .respond(200, TOKEN_OK)
        .respond(500, r#"{"error":"storage down"}"#);
    let (orchestrator, _client, sink) = basic_orchestrator(client);

    let outcome = orchestrator.run_iteration(0).await;

    assert!(outcome.step_ok(GET_TOKEN));
    assert_eq!(outcome.state, FlowState::Aborted { at: 1 });
    assert_eq!(outcome.aborted_at.as_deref(), Some("UPLOAD"));
    let token_rate = sink
        .final_values_where(names::STEP_SUCCESS, names::TAG_STEP, GET_TOKEN)
        .unwrap();
    assert_eq!(token_rate.rate, 1.0);
    assert_eq!(attempts(&sink, UPLOAD_FILE), 1);
}

#[tokio::test]
async fn token_rejection_aborts_before_upload() {
    let client = ScriptedClient::new().respond(401, r#"{"error":"invalid_client"}"#);
    let (orchestrator, client, sink) = basic_orchestrator(client);

    let outcome = orchestrator.run_iteration(0).await;

    assert_eq!(outcome.state, FlowState::Aborted { at: 0 });
    assert_eq!(outcome.aborted_at.as_deref(), Some("TOKEN"));
    assert!(!outcome.overall_ok());
    assert!(!outcome.step_ok(UPLOAD_FILE));
    assert!(!outcome.step_ok(REQUEST_SIGN));
    assert_eq!(attempts(&sink, UPLOAD_FILE), 0);
    assert_eq!(attempts(&sink, REQUEST_SIGN), 0);
    assert_eq!(client.requests().len(), 1);
    assert_eq!(
        sink.final_values_where(names::FLOW_FAILURE, names::TAG_ABORTED_AT, "TOKEN")
            .unwrap()
            .count,
        1
    );
    assert!(sink.final_values(names::FLOW_SUCCESS).is_none());
}

#[tokio::test]
async fn all_steps_succeed() {
    let client = ScriptedClient::new()
        .respond(200, TOKEN_OK)
        .respond(200, UPLOAD_OK)
        .respond(200, &request_sign_ok());
    let (orchestrator, client, sink) = basic_orchestrator(client);

    let outcome = orchestrator.run_iteration(7).await;

    assert_eq!(outcome.state, FlowState::Done);
    assert!(outcome.overall_ok());
    assert_eq!(outcome.iteration, 7);
    assert_eq!(sink.final_values(names::FLOW_SUCCESS).unwrap().count, 1);
    assert_eq!(sink.final_values(names::FLOW_OK).unwrap().rate, 1.0);

    let requests = client.requests();
    assert_eq!(requests[1].headers[0].1, "Bearer token-abc");
    let signed = match &requests[2].body {
        signload_flow::http::RequestBody::Json(body) => body.clone(),
        other => panic!("request_sign must send JSON, got {:?}", other),
    };
    assert_eq!(signed["list_pdf"][0]["filename"], "stored-1.pdf");
    assert_eq!(signed["request_id"].as_str().map(str::len), Some(6));
}

#[tokio::test]
async fn expired_token_is_refreshed_once_during_upload() {
    let client = ScriptedClient::new()
        .respond(200, TOKEN_OK)
        .respond(401, r#"{"error":"token expired"}"#)
        .respond(200, r#"{"access_token":"token-fresh"}"#)
        .respond(200, UPLOAD_OK)
        .respond(200, &request_sign_ok());
    let (orchestrator, client, sink) = basic_orchestrator(client);

    let outcome = orchestrator.run_iteration(0).await;

    assert!(outcome.overall_ok());
    assert_eq!(attempts(&sink, GET_TOKEN), 2);
    assert_eq!(attempts(&sink, UPLOAD_FILE), 2);
    assert_eq!(client.requests()[3].headers[0].1, "Bearer token-fresh");
}

#[tokio::test]
async fn second_unauthorized_aborts() {
    let client = ScriptedClient::new()
        .respond(200, TOKEN_OK)
        .respond(401, "{}")
        .respond(200, TOKEN_OK)
        .respond(401, "{}");
    let (orchestrator, _client, sink) = basic_orchestrator(client);

    let outcome = orchestrator.run_iteration(0).await;

    assert_eq!(outcome.aborted_at.as_deref(), Some("UPLOAD"));
    assert_eq!(outcome.last_result.as_ref().map(|r| r.http_status), Some(401));
    assert_eq!(attempts(&sink, UPLOAD_FILE), 2);
}

#[tokio::test]
async fn repeated_uploads_are_all_sent_to_request_sign() {
    let client = Arc::new(
        ScriptedClient::new()
            .route("/auth", 200, TOKEN_OK)
            .route("/plus-upload", 200, UPLOAD_OK)
            .route("/plus-requestsign", 200, &request_sign_ok()),
    );
    let sink = Arc::new(MetricsSink::new());
    let orchestrator = FlowOrchestrator::new(
        Arc::new(basic_flow(signing_config(3))),
        client.clone(),
        sink.clone(),
    );

    let outcome = orchestrator.run_iteration(0).await;

    assert!(outcome.overall_ok());
    assert_eq!(client.requests_to("/plus-upload"), 3);
    assert_eq!(attempts(&sink, UPLOAD_FILE), 3);
}

#[tokio::test]
async fn full_flow_polls_until_done() {
    let client = Arc::new(
        ScriptedClient::new()
            .route("/auth", 200, TOKEN_OK)
            .route("/plus-upload", 200, UPLOAD_OK)
            .route("/plus-requestsign", 200, &request_sign_ok())
            .route("/signing-authhashsign", 200, r#"{"message":"OK"}"#)
            .route("/plus-executesign", 200, r#"{"message":"PROCESS"}"#)
            .route("/plus-checksignstatus", 200, r#"{"message":"DONE"}"#),
    );
    let sink = Arc::new(MetricsSink::new());
    let definition = Arc::new(full_flow(signing_config(1)));
    let orchestrator = FlowOrchestrator::new(definition.clone(), client.clone(), sink.clone());

    let outcome = orchestrator.run_iteration(0).await;

    assert_eq!(outcome.state, FlowState::Done);
    assert_eq!(outcome.flags.len(), 7);
    assert!(client
        .requests()
        .iter()
        .any(|r| r.url.contains("id=sig-42") && r.url.contains("channel_id=client")));

    let report = AggregateReport::from_snapshot("full", &definition, &sink.snapshot());
    assert!(report.steps.iter().all(|s| s.count == 1 && s.success_pct == 100.0));
}

#[tokio::test]
async fn every_attempt_has_a_duration_sample() {
    let client = Arc::new(
        ScriptedClient::new()
            .respond(200, TOKEN_OK)
            .respond(503, "unavailable")
            .respond(200, TOKEN_OK)
            .respond(200, UPLOAD_OK)
            .respond(400, r#"{"error":"bad payload"}"#)
            .respond(401, "{}")
            .route("/auth", 200, TOKEN_OK)
            .route("/plus-upload", 200, UPLOAD_OK)
            .route("/plus-requestsign", 200, &request_sign_ok()),
    );
    let sink = Arc::new(MetricsSink::new());
    let definition = Arc::new(basic_flow(signing_config(1)));
    let orchestrator = Arc::new(FlowOrchestrator::new(definition.clone(), client, sink.clone()));

    let summary = LoadRunner::new(LoadProfile::new(1, Some(6), None))
        .run(orchestrator)
        .await;

    assert_eq!(summary.iterations_completed, 6);
    for step in definition.step_names() {
        let attempted = attempts(&sink, step);
        let samples = sink
            .final_values_where(names::STEP_DURATION, names::TAG_STEP, step)
            .map(|v| v.count)
            .unwrap_or(0);
        assert_eq!(attempted, samples, "step {}", step);
    }

    let flows = sink.final_values(names::FLOW_OK).unwrap();
    let succeeded = sink.final_values(names::FLOW_SUCCESS).map(|v| v.count).unwrap_or(0);
    assert_eq!(flows.count, 6);
    assert_eq!(summary.flows_succeeded, succeeded);
    assert!((flows.rate - succeeded as f64 / 6.0).abs() < 1e-9);
}

#[tokio::test]
async fn unreached_steps_report_zero() {
    let client = ScriptedClient::new().respond(500, "boom");
    let (orchestrator, _client, sink) = basic_orchestrator(client);
    orchestrator.run_iteration(0).await;

    let report = AggregateReport::from_snapshot(
        "zero",
        orchestrator.definition(),
        &sink.snapshot(),
    );

    let upload = report.step(UPLOAD_FILE).unwrap();
    assert_eq!(upload.count, 0);
    assert_eq!(upload.rate_per_sec, 0.0);
    assert_eq!(upload.avg_ms, 0.0);
    assert_eq!(report.flow.failure_count, 1);
    assert_eq!(report.flow.aborted_at.get("TOKEN"), Some(&1));
}
