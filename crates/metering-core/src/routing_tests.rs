use super::*;
use crate::{MetricDefinition, MetricValue, ValidationError, ValueType};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

struct RecordingInput {
    received: StdMutex<Vec<MetricReport>>,
    releases: Arc<AtomicUsize>,
}

impl RecordingInput {
    fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                received: StdMutex::new(Vec::new()),
                releases: releases.clone(),
            }),
            releases,
        )
    }
}

#[async_trait]
impl Input for RecordingInput {
    fn acquire(&self) {}

    async fn add_report(&self, report: MetricReport) -> Result<(), PipelineError> {
        self.received.lock().unwrap().push(report);
        Ok(())
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn sample(name: &str) -> MetricReport {
    MetricReport::new(name, Utc::now(), Utc::now(), Default::default(), MetricValue::Int64(1)).unwrap()
}

use chrono::Utc;

#[tokio::test]
async fn selector_routes_by_name() {
    let (req_input, _) = RecordingInput::new();
    let (other_input, _) = RecordingInput::new();
    let mut children: HashMap<String, Arc<dyn Input>> = HashMap::new();
    children.insert("requests".to_string(), req_input.clone());
    children.insert("bytes".to_string(), other_input.clone());
    let selector = Selector::new(children);

    selector.add_report(sample("requests")).await.unwrap();

    assert_eq!(req_input.received.lock().unwrap().len(), 1);
    assert_eq!(other_input.received.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn selector_rejects_unknown_metric_name() {
    let selector = Selector::new(HashMap::new());
    let result = selector.add_report(sample("unknown")).await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::UnknownMetric { .. }))
    ));
}

#[tokio::test]
async fn selector_release_cascades_to_all_children() {
    let (a, a_releases) = RecordingInput::new();
    let (b, b_releases) = RecordingInput::new();
    let mut children: HashMap<String, Arc<dyn Input>> = HashMap::new();
    children.insert("a".to_string(), a);
    children.insert("b".to_string(), b);
    let selector = Selector::new(children);
    selector.acquire();

    selector.release().await;

    assert_eq!(a_releases.load(Ordering::SeqCst), 1);
    assert_eq!(b_releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn labeling_input_adds_defaults_without_overwriting_existing_keys() {
    let (recorder, _) = RecordingInput::new();
    let mut defaults = HashMap::new();
    defaults.insert("region".to_string(), "us-east".to_string());
    defaults.insert("env".to_string(), "prod".to_string());
    let labeling = LabelingInput::new(defaults, recorder.clone());

    let mut report = sample("requests");
    report.labels.insert("env".to_string(), "staging".to_string());
    labeling.add_report(report).await.unwrap();

    let received = recorder.received.lock().unwrap();
    let got = &received[0];
    assert_eq!(got.labels.get("region").map(String::as_str), Some("us-east"));
    assert_eq!(got.labels.get("env").map(String::as_str), Some("staging"));
}

#[tokio::test]
async fn validating_input_forwards_a_matching_report() {
    let (recorder, _) = RecordingInput::new();
    let validating = ValidatingInput::new(
        MetricDefinition::new("requests", ValueType::Int64),
        recorder.clone(),
    );

    validating.add_report(sample("requests")).await.unwrap();

    assert_eq!(recorder.received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn validating_input_rejects_a_value_variant_mismatch_without_forwarding() {
    let (recorder, _) = RecordingInput::new();
    let validating = ValidatingInput::new(
        MetricDefinition::new("requests", ValueType::Float64),
        recorder.clone(),
    );

    let result = validating.add_report(sample("requests")).await;

    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::ValueTypeMismatch { .. }))
    ));
    assert_eq!(recorder.received.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn callback_input_runs_callback_exactly_once_before_delegate_release() {
    let (recorder, releases) = RecordingInput::new();
    let callback_ran = Arc::new(AtomicUsize::new(0));
    let c = callback_ran.clone();
    let callback_input = CallbackInput::new(recorder, move || {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
        }
    });

    callback_input.release().await;

    assert_eq!(callback_ran.load(Ordering::SeqCst), 1);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}
