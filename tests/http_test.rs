//! HTTP interface driven through the router without a listener

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{seed_patients, Fixture, CONNECTION};
use deid::domain::{RunId, RunStatus};
use deid::server::build_app;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;

async fn call(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 64)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_form(uri: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_get_tables_and_columns() {
    let fixture = Fixture::new();
    seed_patients(&fixture.source().await, 1).await;
    let app = build_app(Arc::new(fixture.service(10, None).await));

    let (status, body) = call(app.clone(), get(&format!("/get-tables/{CONNECTION}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["tables"], serde_json::json!(["patients"]));

    let (status, body) = call(app, get(&format!("/get-columns/{CONNECTION}/patients"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["columns"],
        serde_json::json!(["id", "mrn", "name", "dob", "zip"])
    );
}

#[tokio::test]
async fn test_scan_reports_categories_without_values() {
    let fixture = Fixture::new();
    seed_patients(&fixture.source().await, 5).await;
    let app = build_app(Arc::new(fixture.service(10, None).await));

    let (status, body) = call(
        app.clone(),
        get(&format!("/scan/{CONNECTION}/patients?sample_size=3")),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["scan"]["table"], "patients");
    assert_eq!(body["scan"]["sample_size"], 3);

    let columns = body["scan"]["columns"].as_array().unwrap();
    let dob = columns.iter().find(|c| c["column"] == "dob").unwrap();
    assert_eq!(dob["sampled"], 3);
    assert_eq!(dob["categories"][0]["category"], "date");
    assert_eq!(dob["suggestion"]["kind"]["type"], "date_shift");

    let (status, _) = call(app, get(&format!("/scan/{CONNECTION}/missing"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_table_is_not_found() {
    let fixture = Fixture::new();
    seed_patients(&fixture.source().await, 1).await;
    let app = build_app(Arc::new(fixture.service(10, None).await));

    let (status, body) = call(app, get(&format!("/get-columns/{CONNECTION}/missing"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_unknown_connection_is_not_found() {
    let fixture = Fixture::new();
    let app = build_app(Arc::new(fixture.service(10, None).await));

    let (status, body) = call(app, get("/get-tables/nowhere")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_process_form_starts_a_run() {
    let fixture = Fixture::new();
    seed_patients(&fixture.source().await, 6).await;
    let service = Arc::new(fixture.service(4, None).await);
    let app = build_app(service.clone());

    let form = format!(
        "connection_id={CONNECTION}&patient_table=patients&patient_id_field=mrn\
         &rule_ids%5B%5D=mask-name&rule_ids%5B%5D=zip3&process_name=Nightly"
    );
    let (status, body) = call(app.clone(), post_form("/process", &form)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);

    let run_id = RunId::from_str(body["run_id"].as_str().unwrap()).unwrap();
    let record = service.coordinator().wait(&run_id).await.unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.request.name.as_deref(), Some("Nightly"));

    let (status, body) = call(app, get(&format!("/runs/{run_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counters"]["rows_scanned"], 6);
}

#[tokio::test]
async fn test_process_without_rules_is_bad_request() {
    let fixture = Fixture::new();
    seed_patients(&fixture.source().await, 1).await;
    let app = build_app(Arc::new(fixture.service(10, None).await));

    let form = format!("connection_id={CONNECTION}&patient_table=patients&patient_id_field=mrn");
    let (status, body) = call(app, post_form("/process", &form)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_bad_and_unknown_run_ids() {
    let fixture = Fixture::new();
    let app = build_app(Arc::new(fixture.service(10, None).await));

    let (status, _) = call(app.clone(), get("/runs/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = RunId::generate();
    let (status, body) = call(app.clone(), get(&format!("/runs/{unknown}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = call(app, post_form(&format!("/runs/{unknown}/resume"), "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
