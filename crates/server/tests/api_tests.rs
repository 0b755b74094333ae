//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TestServer, insert_image, preview_bytes, seed_orion_catalogs, unique_path};
use serde_json::{Value, json};
use skycat_core::MatchSource;
use skycat_metadata::models::MatchRow;
use skycat_metadata::repos::MatchRepo;
use skycat_solver::SolverError;
use time::OffsetDateTime;
use tower::ServiceExt;

/// Helper to make JSON requests.
async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let (status, body) = json_request(&server.router, "GET", "/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["in_flight"], 0);
    assert_eq!(body["max_in_flight"], 8);
}

#[tokio::test]
async fn test_get_image() {
    let server = TestServer::new().await;
    let image_id = insert_image(server.metadata().as_ref(), "/lights/ngc7000/l_001.fits").await;

    let (status, body) =
        json_request(&server.router, "GET", &format!("/v1/images/{image_id}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["image_id"], image_id);
    assert_eq!(body["file_path"], "/lights/ngc7000/l_001.fits");
    assert_eq!(body["astrometry_status"], "NONE");
    assert_eq!(body["is_plate_solved"], false);
    assert_eq!(body["has_wcs_header"], false);
}

#[tokio::test]
async fn test_get_image_errors() {
    let server = TestServer::new().await;

    let (status, body) = json_request(&server.router, "GET", "/v1/images/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, body) = json_request(&server.router, "GET", "/v1/images/m42", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_solve_endpoint_submits_and_reports() {
    let server = TestServer::new().await;
    let image_id = insert_image(server.metadata().as_ref(), "/lights/ngc7000/l_002.fits").await;
    let uri = format!("/v1/images/{image_id}/solve");

    let (status, body) = json_request(&server.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "submitted");
    assert_eq!(body["submission_id"], "1000");

    let (status, body) = json_request(&server.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_started");
    assert_eq!(body["status"], "SUBMITTED");

    server.settle(image_id).await;

    let (_, body) =
        json_request(&server.router, "GET", &format!("/v1/images/{image_id}"), None).await;
    assert_eq!(body["astrometry_status"], "SOLVED");
    assert_eq!(body["plate_solve_source"], "SOLVER");
    assert_eq!(body["astrometry_url"], "http://nova.astrometry.net/status/1000");

    let (status, body) =
        json_request(&server.router, "POST", &format!("{uri}?force=true"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "submitted");
}

#[tokio::test]
async fn test_solve_endpoint_defers_at_capacity() {
    let server = TestServer::with_config(|config| {
        config.admission.max_in_flight = 1;
    })
    .await;
    let metadata = server.metadata();
    let first = insert_image(metadata.as_ref(), &unique_path("/lights/cap")).await;
    let second = insert_image(metadata.as_ref(), &unique_path("/lights/cap")).await;

    let (status, _) =
        json_request(&server.router, "POST", &format!("/v1/images/{first}/solve"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        json_request(&server.router, "POST", &format!("/v1/images/{second}/solve"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "queued");
    assert_eq!(body["retry_after_secs"], 20);
    assert!(body["task_id"].is_string());
}

#[tokio::test]
async fn test_solve_endpoint_maps_solver_errors() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let image_id = insert_image(metadata.as_ref(), &unique_path("/lights/err")).await;

    server.solver.fail_next_upload(SolverError::Api {
        status: 503,
        body: "down for maintenance".to_string(),
    });
    let (status, body) = json_request(
        &server.router,
        "POST",
        &format!("/v1/images/{image_id}/solve"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "solver_error");

    let (status, _) = json_request(&server.router, "POST", "/v1/images/9999/solve", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_matches_endpoints() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    seed_orion_catalogs(metadata.as_ref()).await;
    let image_id = insert_image(metadata.as_ref(), &unique_path("/lights/orion")).await;
    let uri = format!("/v1/images/{image_id}/matches");

    // Unsolved: rematch is a no-op
    let (status, body) = json_request(&server.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inserted"], 0);

    metadata
        .insert_match(&MatchRow {
            image_id,
            catalog_kind: "MESSIER".to_string(),
            designation: "M42".to_string(),
            angular_separation_degrees: None,
            confidence_score: Some(1.0),
            match_source: MatchSource::Manual.as_str().to_string(),
            is_in_field: true,
            created_at: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();

    server.state.workflow.request_solve(image_id, false).await.unwrap();
    server.settle(image_id).await;

    let (status, body) = json_request(&server.router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["image_id"], image_id);
    let matches = body["matches"].as_array().unwrap();
    let m42: Vec<&Value> = matches
        .iter()
        .filter(|m| m["designation"] == "M42")
        .collect();
    assert_eq!(m42.len(), 1);
    assert_eq!(m42[0]["match_source"], "MANUAL");
    assert!(matches.iter().any(|m| m["designation"] == "M43"));

    let (status, body) = json_request(&server.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["image_id"], image_id);
    assert_eq!(body["degraded"], false);

    let (status, _) = json_request(&server.router, "GET", "/v1/images/9999/matches", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_annotation_endpoint() {
    let server = TestServer::new().await;
    let image_id = insert_image(server.metadata().as_ref(), &unique_path("/lights/orion")).await;
    let uri = format!("/v1/images/{image_id}/annotation");

    let (status, body) = json_request(&server.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    server.state.workflow.request_solve(image_id, false).await.unwrap();
    server.settle(image_id).await;
    server.solver.set_preview(preview_bytes());

    let (status, body) = json_request(&server.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let path = body["path"].as_str().unwrap();
    assert!(path.ends_with(&format!("annotated_{image_id}.jpg")));
}

#[tokio::test]
async fn test_bulk_endpoints() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    seed_orion_catalogs(metadata.as_ref()).await;
    for _ in 0..3 {
        insert_image(metadata.as_ref(), &unique_path("/lights/bulk_api")).await;
    }
    insert_image(metadata.as_ref(), &unique_path("/lights/elsewhere")).await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/bulk/solve",
        Some(json!({ "prefix": "/lights/bulk_api" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["queued"], 3);
    assert_eq!(body["skipped"], 0);

    server.drain().await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/bulk/match",
        Some(json!({ "prefix": "/lights/bulk_api" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["processed"], 3);
    assert_eq!(body["errors"], 0);

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/bulk/match",
        Some(json!({ "prefix": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_admission_ceiling_endpoint() {
    let server = TestServer::new().await;
    let metadata = server.metadata();

    let (status, body) = json_request(&server.router, "GET", "/v1/admission/ceiling", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_in_flight"], 8);

    let (status, body) = json_request(
        &server.router,
        "PUT",
        "/v1/admission/ceiling",
        Some(json!({ "max_in_flight": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_in_flight"], 1);
    assert_eq!(body["in_flight"], 0);

    let (_, body) = json_request(&server.router, "GET", "/v1/health", None).await;
    assert_eq!(body["max_in_flight"], 1);

    // The lowered ceiling applies to the next submissions
    let first = insert_image(metadata.as_ref(), &unique_path("/lights/ceiling")).await;
    let second = insert_image(metadata.as_ref(), &unique_path("/lights/ceiling")).await;
    let (status, _) =
        json_request(&server.router, "POST", &format!("/v1/images/{first}/solve"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) =
        json_request(&server.router, "POST", &format!("/v1/images/{second}/solve"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "queued");

    let (status, _) = json_request(
        &server.router,
        "PUT",
        "/v1/admission/ceiling",
        Some(json!({ "max_in_flight": -1 })),
    )
    .await;
    assert!(status.is_client_error());
    assert_eq!(server.state.admission.ceiling(), 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    skycat_server::metrics::register_metrics();
    let server = TestServer::new().await;
    let image_id = insert_image(server.metadata().as_ref(), &unique_path("/lights/metrics")).await;
    server.state.workflow.request_solve(image_id, false).await.unwrap();

    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("skycat_solve_requests_total"));
}

#[tokio::test]
async fn test_metrics_endpoint_disabled() {
    let server = TestServer::with_config(|config| {
        config.server.metrics_enabled = false;
    })
    .await;

    let (status, _) = json_request(&server.router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
