//! Orchestrator tests
//!
//! The pool is driven with a scripted strategy so the fan-out/fan-in and
//! error policy can be checked without a cluster.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;

use argo_resource_tracker::argocd::Application;
use argo_resource_tracker::resource::GroupedResourceKinds;
use argo_resource_tracker::tracker::{ClosureStrategy, run_analysis};

/// Succeeds with one scripted kind per application; fails for applications
/// named `broken-*`.
struct ScriptedStrategy {
    calls: AtomicUsize,
}

impl ScriptedStrategy {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClosureStrategy for ScriptedStrategy {
    async fn discover(&self, app: &Application) -> Result<GroupedResourceKinds> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if app.name.starts_with("broken") {
            bail!("destination cluster unreachable");
        }
        let mut grouped = GroupedResourceKinds::new();
        match app.name.as_str() {
            "web" => grouped.add_api_version_kind("apps/v1", "Deployment"),
            "db" => grouped.add_api_version_kind("apps/v1", "StatefulSet"),
            "mesh" => grouped.add_api_version_kind("v1", "Service"),
            _ => grouped.add_api_version_kind("v1", "ConfigMap"),
        }
        Ok(grouped)
    }
}

fn app(name: &str) -> Application {
    Application {
        name: name.to_string(),
        namespace: "argocd".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_partial_failure_keeps_partial_output_and_first_error() {
    let strategy = Arc::new(ScriptedStrategy::new());
    let apps = vec![app("web"), app("broken-env"), app("db"), app("mesh")];

    let outcome = run_analysis(strategy.clone(), apps).await;

    // Three successful bundles contribute their kinds
    let mut expected = GroupedResourceKinds::new();
    expected.add_api_version_kind("apps/v1", "Deployment");
    expected.add_api_version_kind("apps/v1", "StatefulSet");
    expected.add_api_version_kind("v1", "Service");
    assert_eq!(outcome.kinds, expected);

    // The failing bundle surfaces as the run's terminal error
    let err = outcome.first_error.expect("expected an error");
    assert!(format!("{err:#}").contains("broken-env"));

    // Exactly one discovery per bundle
    assert_eq!(strategy.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_all_bundles_succeed() {
    let strategy = Arc::new(ScriptedStrategy::new());
    let outcome = run_analysis(strategy, vec![app("web"), app("db")]).await;

    assert!(outcome.first_error.is_none());
    assert_eq!(outcome.kinds.kind_count(), 2);
}

#[tokio::test]
async fn test_no_applications_yields_empty_document() {
    let strategy = Arc::new(ScriptedStrategy::new());
    let outcome = run_analysis(strategy.clone(), Vec::new()).await;

    assert!(outcome.first_error.is_none());
    assert!(outcome.kinds.is_empty());
    assert_eq!(strategy.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_more_bundles_than_workers_all_processed() {
    let strategy = Arc::new(ScriptedStrategy::new());
    let apps: Vec<Application> = (0..10).map(|i| app(&format!("app-{i}"))).collect();

    let outcome = run_analysis(strategy.clone(), apps).await;

    assert!(outcome.first_error.is_none());
    assert_eq!(strategy.calls.load(Ordering::SeqCst), 10);
    // Every bundle contributed the same kind; the union collapses it
    assert_eq!(outcome.kinds.kind_count(), 1);
}
