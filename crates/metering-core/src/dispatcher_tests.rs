use super::*;
use crate::stats::NoopStatsRecorder;
use crate::{MetricReport, MetricValue, PipelineError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::EndpointError;

/// `None` on construction means every `send` succeeds; `Some` carries the
/// endpoint name and message a fresh `EndpointError` is built from on each
/// call (avoids needing `EndpointError: Clone`, which it deliberately is
/// not given its boxed `source`).
struct FakeSender {
    names: Vec<String>,
    fails_with: Option<(String, String, bool)>,
    sends: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl Sender for FakeSender {
    fn acquire(&self) {}

    async fn send(&self, _report: StampedMetricReport) -> Result<(), PipelineError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        match &self.fails_with {
            None => Ok(()),
            Some((endpoint, message, transient)) => {
                Err(EndpointError::new(endpoint, message, *transient).into())
            }
        }
    }

    fn endpoints(&self) -> Vec<String> {
        self.names.clone()
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn sample_report() -> StampedMetricReport {
    let report = MetricReport::new(
        "requests",
        Utc::now(),
        Utc::now(),
        Default::default(),
        MetricValue::Int64(1),
    )
    .unwrap();
    StampedMetricReport::new(report)
}

fn fake(
    name: &str,
    fails_with: Option<(&str, &str, bool)>,
) -> (Arc<FakeSender>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let sends = Arc::new(AtomicUsize::new(0));
    let releases = Arc::new(AtomicUsize::new(0));
    (
        Arc::new(FakeSender {
            names: vec![name.to_string()],
            fails_with: fails_with.map(|(ep, msg, t)| (ep.to_string(), msg.to_string(), t)),
            sends: sends.clone(),
            releases: releases.clone(),
        }),
        sends,
        releases,
    )
}

#[tokio::test]
async fn send_fans_out_to_every_child() {
    let (a, a_sends, _) = fake("a", None);
    let (b, b_sends, _) = fake("b", None);
    let dispatcher = Dispatcher::new(vec![a, b], Arc::new(NoopStatsRecorder));
    dispatcher.acquire();

    dispatcher.send(sample_report()).await.unwrap();

    assert_eq!(a_sends.load(Ordering::SeqCst), 1);
    assert_eq!(b_sends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn one_child_failure_is_surfaced_while_others_still_ran() {
    let (a, a_sends, _) = fake("a", None);
    let (b, b_sends, _) = fake("b", Some(("b", "rejected", false)));
    let dispatcher = Dispatcher::new(vec![a, b], Arc::new(NoopStatsRecorder));
    dispatcher.acquire();

    let result = dispatcher.send(sample_report()).await;

    assert!(result.is_err());
    assert_eq!(a_sends.load(Ordering::SeqCst), 1);
    assert_eq!(b_sends.load(Ordering::SeqCst), 1);
    match result.unwrap_err() {
        PipelineError::Multi(multi) => assert_eq!(multi.errors.len(), 1),
        other => panic!("expected MultiError, got {other:?}"),
    }
}

#[tokio::test]
async fn endpoints_are_deduplicated_preserving_first_occurrence_order() {
    let (a, ..) = fake("shared", None);
    let (b, ..) = fake("shared", None);
    let (c, ..) = fake("unique", None);
    let dispatcher = Dispatcher::new(vec![a, b, c], Arc::new(NoopStatsRecorder));

    assert_eq!(dispatcher.endpoints(), vec!["shared".to_string(), "unique".to_string()]);
}

#[tokio::test]
async fn release_releases_all_children_concurrently() {
    let (a, _, a_releases) = fake("a", None);
    let (b, _, b_releases) = fake("b", None);
    let dispatcher = Dispatcher::new(vec![a, b], Arc::new(NoopStatsRecorder));
    dispatcher.acquire();

    dispatcher.release().await;

    assert_eq!(a_releases.load(Ordering::SeqCst), 1);
    assert_eq!(b_releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn release_without_acquire_never_finalizes() {
    let (a, _, a_releases) = fake("a", None);
    let dispatcher = Dispatcher::new(vec![a], Arc::new(NoopStatsRecorder));

    dispatcher.release().await;

    assert_eq!(a_releases.load(Ordering::SeqCst), 0);
}
