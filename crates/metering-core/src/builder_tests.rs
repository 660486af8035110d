use super::*;
use crate::clock::MockClock;
use crate::persistence::InMemoryPersistence;
use crate::stats::NoopStatsRecorder;
use crate::{MetricReport, PipelineError, ValueType};
use chrono::Utc;

fn base_config(dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        metrics: vec![MetricSpec {
            name: "requests".to_string(),
            value_type: ValueType::Int64,
            endpoints: vec!["disk".to_string()],
            mode: MetricMode::Aggregation {
                buffer_duration: Duration::from_secs(60),
            },
        }],
        endpoints: vec![EndpointSpec {
            name: "disk".to_string(),
            kind: EndpointKind::Disk { path: dir.join("out.jsonl") },
            retry: RetryConfig::default(),
        }],
        heartbeats: vec![],
        default_labels: HashMap::new(),
    }
}

fn deps() -> (Arc<dyn Persistence>, Arc<dyn Clock>, Arc<dyn StatsRecorder>) {
    (
        Arc::new(InMemoryPersistence::new()),
        Arc::new(MockClock::new(Utc::now())),
        Arc::new(NoopStatsRecorder),
    )
}

#[tokio::test]
async fn builds_a_working_pipeline_for_an_aggregated_metric() {
    let dir = tempfile::tempdir().unwrap();
    let (persistence, clock, stats) = deps();
    let pipeline = build_pipeline(base_config(dir.path()), persistence, clock, stats).unwrap();

    let report = MetricReport::new("requests", Utc::now(), Utc::now(), Default::default(), MetricValue::Int64(1)).unwrap();
    pipeline.entry.add_report(report).await.unwrap();
}

#[tokio::test]
async fn undefined_endpoint_reference_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.metrics[0].endpoints = vec!["missing".to_string()];
    let (persistence, clock, stats) = deps();

    let result = build_pipeline(config, persistence, clock, stats);
    assert!(matches!(result, Err(BuildError::UndefinedEndpoint { .. })));
}

#[tokio::test]
async fn undefined_heartbeat_metric_reference_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.heartbeats.push(HeartbeatSourceSpec {
        metric: "missing".to_string(),
        interval: Duration::from_secs(30),
        value: MetricValue::Int64(1),
        labels: Default::default(),
    });
    let (persistence, clock, stats) = deps();

    let result = build_pipeline(config, persistence, clock, stats);
    assert!(matches!(result, Err(BuildError::UndefinedHeartbeatMetric { .. })));
}

#[tokio::test]
async fn passthrough_metric_forwards_without_an_aggregator_bucket() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.metrics[0].mode = MetricMode::Passthrough;
    let (persistence, clock, stats) = deps();
    let pipeline = build_pipeline(config, persistence.clone(), clock, stats).unwrap();

    let report = MetricReport::new("requests", Utc::now(), Utc::now(), Default::default(), MetricValue::Int64(1)).unwrap();
    pipeline.entry.add_report(report).await.unwrap();

    let result: Result<crate::aggregator::AggregatorConfig, _> = crate::persistence::Value::load(persistence.as_ref(), "aggregator/requests").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn passthrough_metric_rejects_a_value_type_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.metrics[0].mode = MetricMode::Passthrough;
    let (persistence, clock, stats) = deps();
    let pipeline = build_pipeline(config, persistence, clock, stats).unwrap();

    let report = MetricReport::new("requests", Utc::now(), Utc::now(), Default::default(), MetricValue::Float64(1.0)).unwrap();
    let result = pipeline.entry.add_report(report).await;

    assert!(matches!(
        result,
        Err(PipelineError::Validation(crate::ValidationError::ValueTypeMismatch { .. }))
    ));
}

#[tokio::test]
async fn default_labels_are_applied_to_every_metric() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.default_labels.insert("region".to_string(), "us-east".to_string());
    let (persistence, clock, stats) = deps();
    let pipeline = build_pipeline(config, persistence, clock, stats).unwrap();

    let report = MetricReport::new("requests", Utc::now(), Utc::now(), Default::default(), MetricValue::Int64(1)).unwrap();
    pipeline.entry.add_report(report).await.unwrap();
}

#[tokio::test]
async fn release_cascades_through_the_whole_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());
    let (persistence, clock, stats) = deps();
    let pipeline = build_pipeline(config, persistence, clock, stats).unwrap();

    pipeline.entry.acquire();
    pipeline.entry.release().await;

    let result = pipeline.entry.add_report(
        MetricReport::new("requests", Utc::now(), Utc::now(), Default::default(), MetricValue::Int64(1)).unwrap(),
    ).await;
    assert!(matches!(result, Err(PipelineError::Closed(_))));
}
