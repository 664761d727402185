//! HTTP TAP client and service checks against a local fake TAP service

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use rspval_common::config::TAP_SCHEMA_QUERY;
use rspval_common::{CapabilityIncludes, Config, TapApplication};
use rspval_e2e::capabilities::render_capabilities;
use rspval_e2e::tap::JobPhase;
use rspval_e2e::validation::{JobPolling, TapValidationService};
use rspval_e2e::{E2eError, HttpTapClient, TapClient};

const TOKEN: &str = "t0ken";

const VOTABLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<VOTABLE xmlns="http://www.ivoa.net/xml/VOTable/v1.3" version="1.3">
  <RESOURCE type="results">
    <INFO name="QUERY_STATUS" value="OK"/>
    <TABLE>
      <FIELD name="table_name" datatype="char" arraysize="*"/>
      <DATA>
        <TABLEDATA>
          <TR><TD>TAP_SCHEMA.tables</TD></TR>
          <TR><TD>TAP_SCHEMA.columns</TD></TR>
        </TABLEDATA>
      </DATA>
    </TABLE>
  </RESOURCE>
</VOTABLE>"#;

const TABLESET: &str = r#"<vosi:tableset xmlns:vosi="http://www.ivoa.net/xml/VOSITables/v1.0">
  <schema>
    <name>TAP_SCHEMA</name>
    <table><name>TAP_SCHEMA.tables</name></table>
    <table><name>TAP_SCHEMA.columns</name></table>
    <table><name>TAP_SCHEMA.schemas</name></table>
  </schema>
</vosi:tableset>"#;

struct FakeService {
    base_url: String,
    deleted: AtomicBool,
    stuck: bool,
}

type Shared = Arc<FakeService>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false)
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

async fn sync_query(headers: HeaderMap, body: String) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if !body.contains("QUERY=") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    xml(VOTABLE.to_string())
}

async fn create_job(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Redirect::to("/api/tap/async/42").into_response()
}

async fn job(State(service): State<Shared>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    xml(format!(
        r#"<?xml version="1.0"?>
<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0" xmlns:xlink="http://www.w3.org/1999/xlink">
  <uws:jobId>42</uws:jobId>
  <uws:ownerId>someuser</uws:ownerId>
  <uws:phase>COMPLETED</uws:phase>
  <uws:quote>2026-10-16T12:00:00.000Z</uws:quote>
  <uws:executionDuration>600</uws:executionDuration>
  <uws:destruction>2026-10-23T12:00:00.000Z</uws:destruction>
  <uws:parameters>
    <uws:parameter id="LANG">ADQL</uws:parameter>
    <uws:parameter id="QUERY">{}</uws:parameter>
  </uws:parameters>
  <uws:results>
    <uws:result id="result" xlink:href="{}/api/tap/results/42/result"/>
  </uws:results>
</uws:job>"#,
        TAP_SCHEMA_QUERY, service.base_url
    ))
}

async fn delete_job(State(service): State<Shared>) -> StatusCode {
    service.deleted.store(true, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn run_phase() -> Redirect {
    Redirect::to("/api/tap/async/42")
}

async fn phase(State(service): State<Shared>) -> &'static str {
    if service.stuck {
        "EXECUTING"
    } else {
        "COMPLETED"
    }
}

async fn result() -> Response {
    xml(VOTABLE.to_string())
}

async fn tables() -> Response {
    xml(TABLESET.to_string())
}

async fn capabilities(State(service): State<Shared>) -> Response {
    xml(render_capabilities(&service.base_url, TapApplication::Tap, tap_includes()))
}

fn tap_includes() -> CapabilityIncludes {
    CapabilityIncludes {
        include_datamodel: true,
        include_geometry: false,
        include_upload: false,
    }
}

/// Serve a fake TAP application on an ephemeral localhost port
async fn spawn_service() -> Shared {
    spawn_service_with(false).await
}

async fn spawn_service_with(stuck: bool) -> Shared {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let service = Arc::new(FakeService {
        base_url,
        deleted: AtomicBool::new(false),
        stuck,
    });

    let app = Router::new()
        .route("/api/tap/sync", post(sync_query))
        .route("/api/tap/async", post(create_job))
        .route("/api/tap/async/42", get(job).delete(delete_job))
        .route("/api/tap/async/42/phase", get(phase).post(run_phase))
        .route("/api/tap/results/42/result", get(result))
        .route("/api/tap/tables", get(tables))
        .route("/api/tap/capabilities", get(capabilities))
        .with_state(service.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    service
}

fn client(service: &FakeService, token: &str) -> HttpTapClient {
    HttpTapClient::with_url(format!("{}/api/tap", service.base_url), token).unwrap()
}

fn config(service: &FakeService) -> Config {
    let mut config = Config::new("127.0.0.1", TOKEN);
    config.base_url = service.base_url.clone();
    config
}

#[tokio::test]
async fn sync_query_counts_rows() {
    let service = spawn_service().await;
    let result = client(&service, TOKEN)
        .run_sync("SELECT table_name FROM TAP_SCHEMA.tables")
        .await
        .unwrap();

    assert_eq!(result.status, "OK");
    assert_eq!(result.row_count, 2);
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let service = spawn_service().await;
    let err = client(&service, "wrong").run_sync("SELECT 1").await.unwrap_err();
    assert!(matches!(err, E2eError::Http(_)));
}

#[tokio::test]
async fn async_query_follows_job_and_cleans_up() {
    let service = spawn_service().await;
    let result = client(&service, TOKEN).run_async("SELECT 1").await.unwrap();

    assert_eq!(result.row_count, 2);
    assert!(service.deleted.load(Ordering::SeqCst));
}

#[tokio::test]
async fn async_query_stuck_executing_times_out() {
    let service = spawn_service_with(true).await;
    let client = client(&service, TOKEN).with_async_polling(JobPolling {
        interval: Duration::from_millis(10),
        ceiling: Duration::from_millis(100),
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), client.run_async("SELECT 1"))
        .await
        .expect("async query kept polling past its ceiling");

    match outcome {
        Err(E2eError::JobTimeout { job_id, phase, .. }) => {
            assert_eq!(job_id, "42");
            assert_eq!(phase, "EXECUTING");
        }
        other => panic!("expected a job timeout, got {:?}", other),
    }
    assert!(service.deleted.load(Ordering::SeqCst));
}

#[tokio::test]
async fn job_lifecycle_endpoints() {
    let service = spawn_service().await;
    let client = client(&service, TOKEN);

    let job_url = client.submit_job(TAP_SCHEMA_QUERY).await.unwrap();
    assert_eq!(job_url, format!("{}/api/tap/async/42", service.base_url));

    client.run_job(&job_url).await.unwrap();
    assert_eq!(client.job_phase(&job_url).await.unwrap(), JobPhase::Completed);

    let info = client.job_info(&job_url).await.unwrap();
    assert_eq!(info.job_id.as_deref(), Some("42"));
    assert_eq!(info.query.as_deref(), Some(TAP_SCHEMA_QUERY));
}

#[tokio::test]
async fn tables_are_listed() {
    let service = spawn_service().await;
    let tables = client(&service, TOKEN).tables().await.unwrap();
    assert_eq!(tables.len(), 3);
    assert_eq!(tables[0], "TAP_SCHEMA.tables");
}

#[tokio::test]
async fn uws_endpoint_validates() {
    let service = spawn_service().await;
    let validation = TapValidationService::new(Arc::new(client(&service, TOKEN)), TapApplication::Tap, &config(&service))
        .with_polling(JobPolling {
            interval: Duration::from_millis(10),
            ceiling: Duration::from_secs(5),
        });

    validation.validate().await.unwrap();
    assert!(service.deleted.load(Ordering::SeqCst));
}

#[tokio::test]
async fn live_capabilities_match() {
    let service = spawn_service().await;
    let validation = TapValidationService::new(Arc::new(client(&service, TOKEN)), TapApplication::Tap, &config(&service));

    validation
        .validate_live_capabilities(&service.base_url, tap_includes())
        .await
        .unwrap();
}

#[tokio::test]
async fn live_capabilities_differ_for_other_features() {
    let service = spawn_service().await;
    let validation = TapValidationService::new(Arc::new(client(&service, TOKEN)), TapApplication::Tap, &config(&service));

    let includes = CapabilityIncludes {
        include_upload: true,
        ..tap_includes()
    };
    let err = validation
        .validate_live_capabilities(&service.base_url, includes)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("does not match the expected XML for tap"));
}
