//! Analysis orchestrator
//!
//! Fans application bundles out to a bounded pool of workers, each running
//! the selected closure strategy, and fans the discovered kinds back in
//! through a single aggregator task that owns the output accumulator. The
//! run drains every bundle result, keeps the first error as the run's
//! terminal error, and still renders whatever was discovered.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kube::Client;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use crate::argocd::{Application, ClusterRegistry, DirectResources};
use crate::graph::{ApiServerBackend, GraphWalker, TrackingMethod};
use crate::relations::{MapperRegistry, RelationMiner, RelationsCache};
use crate::resource::GroupedResourceKinds;

/// Bound on concurrent per-bundle analyses.
pub const WORKER_COUNT: usize = 4;

/// Which traversal discovers the related kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RelationSource {
    /// Kind-level relations cache with BFS closure.
    #[default]
    #[value(name = "resourcegraph")]
    ResourceGraph,
    /// Instance-level graph queries with DFS.
    #[value(name = "graph")]
    Graph,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("no destination clusters synced; ensure applications have a valid destination and Argo CD has access")]
    NoUsableClusters,
}

/// One strategy for discovering the kinds related to a bundle's direct
/// resources.
#[async_trait]
pub trait ClosureStrategy: Send + Sync {
    async fn discover(&self, app: &Application) -> Result<GroupedResourceKinds>;
}

/// Kind-level strategy: per-cluster relation snapshots merged into a shared
/// cache, then a BFS closure over the bundle's direct keys.
pub struct CacheClosureStrategy {
    clusters: ClusterRegistry,
    mappers: MapperRegistry,
    cache: RelationsCache,
}

impl CacheClosureStrategy {
    pub fn new(clusters: ClusterRegistry) -> Self {
        Self {
            clusters,
            mappers: MapperRegistry::new(),
            cache: RelationsCache::new(),
        }
    }
}

#[async_trait]
impl ClosureStrategy for CacheClosureStrategy {
    async fn discover(&self, app: &Application) -> Result<GroupedResourceKinds> {
        let direct = DirectResources::from_app(app);
        tracing::debug!(
            "Application {}: {} direct keys, {} infos",
            app.name,
            direct.keys.len(),
            direct.infos.len()
        );

        // Each bundle requires its own destination's miner, not just any
        let server = self.clusters.resolve_destination(&app.destination).await?;
        let mapper = match self.clusters.client_for(&server).await {
            Ok(client) => self.mappers.get_or_create(&server, client),
            Err(e) => {
                tracing::warn!("Cannot reach destination {}: {:#}", server, e);
                if self.mappers.is_empty() {
                    return Err(TrackerError::NoUsableClusters.into());
                }
                return Err(e);
            }
        };

        // Optimistic: only sync the cluster when a direct key is unknown.
        // Concurrent workers may sync the same cluster redundantly; merges
        // are additive so the result is unaffected
        if !self.cache.contains_all(&direct.keys) {
            tracing::info!("Syncing relations cache from {}", server);
            match mapper.snapshot().await {
                Ok(snapshot) => self.cache.merge(&snapshot),
                Err(e) => {
                    tracing::warn!("Relation discovery on {} failed: {:#}", server, e);
                }
            }
            // Seed still-unknown keys so they do not re-trigger a sync
            self.cache.insert_missing(&direct.keys);
        }

        let mut grouped = GroupedResourceKinds::new();
        for key in self.cache.closure(&direct.keys) {
            grouped.add_key(&key);
        }
        Ok(grouped)
    }
}

/// Instance-level strategy: one DFS walk per direct resource instance.
///
/// The walker keeps kind-level memoization across bundles, so it sits behind
/// a mutex and walks serially even when the pool runs several bundles.
pub struct GraphClosureStrategy {
    walker: Mutex<GraphWalker>,
}

impl GraphClosureStrategy {
    pub async fn new(client: Client, tracking: TrackingMethod) -> Result<Self> {
        let backend = ApiServerBackend::new(client, tracking).await?;
        Ok(Self::from_walker(GraphWalker::new(Box::new(backend))))
    }

    pub fn from_walker(walker: GraphWalker) -> Self {
        Self {
            walker: Mutex::new(walker),
        }
    }
}

#[async_trait]
impl ClosureStrategy for GraphClosureStrategy {
    async fn discover(&self, app: &Application) -> Result<GroupedResourceKinds> {
        let direct = DirectResources::from_app(app);
        let mut grouped = GroupedResourceKinds::new();

        let mut walker = self.walker.lock().await;
        for info in &direct.infos {
            // Direct kinds are included whether or not the walk finds more
            let api_version = if info.api_version.is_empty() {
                "v1"
            } else {
                &info.api_version
            };
            grouped.add_api_version_kind(api_version, &info.kind);

            match walker.walk(info.clone()).await {
                Ok(related) => {
                    for child in related {
                        let api_version = if child.api_version.is_empty() {
                            "v1"
                        } else {
                            &child.api_version
                        };
                        grouped.add_api_version_kind(api_version, &child.kind);
                    }
                }
                Err(e) => {
                    tracing::warn!("Walk from {} failed: {:#}", info, e);
                }
            }
        }

        Ok(grouped)
    }
}

/// Result of one run: the union of everything discovered, plus the first
/// bundle error if any bundle failed.
pub struct AnalysisOutcome {
    pub kinds: GroupedResourceKinds,
    pub first_error: Option<anyhow::Error>,
}

/// Run the strategy over every bundle with a bounded worker pool.
///
/// Every bundle reports exactly one success or failure; all results are
/// drained even after a failure so in-flight work finishes and partial
/// output stays usable.
pub async fn run_analysis(
    strategy: Arc<dyn ClosureStrategy>,
    apps: Vec<Application>,
) -> AnalysisOutcome {
    tracing::info!("Analyzing {} applications", apps.len());

    let (job_tx, job_rx) = mpsc::channel::<Application>(WORKER_COUNT);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (keys_tx, mut keys_rx) = mpsc::channel::<GroupedResourceKinds>(WORKER_COUNT);
    let (result_tx, mut result_rx) = mpsc::channel::<Result<()>>(WORKER_COUNT);

    // Single owner of the accumulator; workers never touch it directly
    let aggregator = tokio::spawn(async move {
        let mut all = GroupedResourceKinds::new();
        while let Some(part) = keys_rx.recv().await {
            all.merge(&part);
        }
        all
    });

    let mut workers = Vec::with_capacity(WORKER_COUNT);
    for _ in 0..WORKER_COUNT {
        let strategy = Arc::clone(&strategy);
        let job_rx = Arc::clone(&job_rx);
        let keys_tx = keys_tx.clone();
        let result_tx = result_tx.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let app = { job_rx.lock().await.recv().await };
                let Some(app) = app else { break };
                tracing::debug!("Analyzing application {}", app.name);
                let result = match strategy.discover(&app).await {
                    Ok(part) => {
                        let _ = keys_tx.send(part).await;
                        Ok(())
                    }
                    Err(e) => Err(e.context(format!("application {}", app.name))),
                };
                let _ = result_tx.send(result).await;
            }
        }));
    }
    drop(keys_tx);
    drop(result_tx);

    let feeder = tokio::spawn(async move {
        for app in apps {
            if job_tx.send(app).await.is_err() {
                break;
            }
        }
    });

    let mut first_error = None;
    while let Some(result) = result_rx.recv().await {
        if let Err(e) = result {
            tracing::warn!("Analysis failed: {:#}", e);
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }

    let _ = feeder.await;
    for worker in workers {
        let _ = worker.await;
    }
    let kinds = aggregator.await.unwrap_or_default();

    AnalysisOutcome { kinds, first_error }
}
