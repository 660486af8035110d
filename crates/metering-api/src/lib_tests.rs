use super::*;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use metering_core::{AggregatorConfig, Clock, InMemoryPersistence, MetricDefinition, NoopStatsRecorder, RealClock, ValueType};
use tower::ServiceExt;

fn test_pipeline() -> (Arc<dyn Input>, Arc<dyn StatsRecorder>) {
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let persistence = Arc::new(InMemoryPersistence::new());
    let stats: Arc<dyn StatsRecorder> = Arc::new(NoopStatsRecorder);
    let definition = MetricDefinition::new("requests", ValueType::Int64);
    let dispatcher = Arc::new(metering_core::Dispatcher::new(vec![], stats.clone()));
    let aggregator = metering_core::Aggregator::new(
        definition,
        AggregatorConfig {
            buffer_duration: std::time::Duration::from_secs(60),
        },
        persistence,
        clock,
        dispatcher,
    );
    (aggregator, stats)
}

fn report_body() -> serde_json::Value {
    serde_json::json!({
        "name": "requests",
        "startTime": chrono::Utc::now().to_rfc3339(),
        "endTime": chrono::Utc::now().to_rfc3339(),
        "labels": {},
        "value": { "int64Value": 1 },
    })
}

#[tokio::test]
async fn report_with_unknown_metric_name_returns_400() {
    let (pipeline, stats) = test_pipeline();
    let router = build_router(pipeline, stats, &ServerConfig::default());

    let mut body = report_body();
    body["name"] = serde_json::json!("unknown-metric");

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/report")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn valid_report_returns_200() {
    let (pipeline, stats) = test_pipeline();
    let router = build_router(pipeline, stats, &ServerConfig::default());

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/report")
                .header("content-type", "application/json")
                .body(Body::from(report_body().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn report_after_shutdown_returns_503() {
    let (pipeline, stats) = test_pipeline();
    pipeline.acquire();
    pipeline.release().await;
    let router = build_router(pipeline, stats, &ServerConfig::default());

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/report")
                .header("content-type", "application/json")
                .body(Body::from(report_body().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn status_endpoint_returns_a_snapshot() {
    let (pipeline, stats) = test_pipeline();
    let router = build_router(pipeline, stats, &ServerConfig::default());

    let response = router
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn healthz_is_always_ok() {
    let (pipeline, stats) = test_pipeline();
    let router = build_router(pipeline, stats, &ServerConfig::default());

    let response = router
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
