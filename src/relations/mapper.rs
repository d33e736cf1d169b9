//! Per-cluster relation miner adapter
//!
//! [`ResourceMapper`] keeps a best-known kind-level adjacency snapshot for
//! one destination cluster. A background CRD watcher keeps refining the
//! snapshot as custom resource definitions appear; callers never wait for
//! discovery to finish, each snapshot call returns whatever is known now.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};

use super::cache::RelationSnapshot;
use crate::resource::ResourceKey;

/// Contract for per-cluster kind-level relation discovery.
///
/// `start` is idempotent and fire-and-forget; `snapshot` may reflect partial
/// discovery and must not block indefinitely.
#[async_trait]
pub trait RelationMiner: Send + Sync {
    /// Begin background discovery. Calling more than once is a no-op.
    fn start(&self);

    /// Return the current best-known adjacency for this cluster.
    async fn snapshot(&self) -> Result<RelationSnapshot>;
}

/// Ownership relations between built-in kinds that hold on every cluster.
///
/// The CRD watcher only observes custom kinds; these edges seed the snapshot
/// with the core controller chains (Deployment -> ReplicaSet -> Pod etc.).
pub fn builtin_relations() -> RelationSnapshot {
    let edge = |pg: &str, pk: &str, children: &[(&str, &str)]| {
        (
            ResourceKey::new(pg, pk),
            children
                .iter()
                .map(|(cg, ck)| ResourceKey::new(cg, ck))
                .collect(),
        )
    };

    HashMap::from([
        edge("apps", "Deployment", &[("apps", "ReplicaSet")]),
        edge("apps", "ReplicaSet", &[("", "Pod")]),
        edge("apps", "StatefulSet", &[("", "Pod"), ("apps", "ControllerRevision")]),
        edge("apps", "DaemonSet", &[("", "Pod"), ("apps", "ControllerRevision")]),
        edge("batch", "CronJob", &[("batch", "Job")]),
        edge("batch", "Job", &[("", "Pod")]),
        edge(
            "",
            "Service",
            &[("", "Endpoints"), ("discovery.k8s.io", "EndpointSlice")],
        ),
        edge(
            "",
            "Pod",
            &[("", "ConfigMap"), ("", "Secret"), ("", "PersistentVolumeClaim")],
        ),
        edge("", "PersistentVolumeClaim", &[("", "PersistentVolume")]),
        edge("networking.k8s.io", "Ingress", &[("", "Service")]),
    ])
}

/// Relation miner backed by a CRD watcher on one destination cluster.
///
/// Custom kinds are recorded as parent vertices as their definitions are
/// observed; relations between custom kinds are discovered over time, so an
/// early snapshot may list a kind with no children yet.
pub struct ResourceMapper {
    client: Client,
    server: String,
    relations: Arc<RwLock<RelationSnapshot>>,
    started: AtomicBool,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ResourceMapper {
    /// Create a mapper for the cluster behind `client`.
    ///
    /// `server` is only used for log attribution.
    pub fn new(client: Client, server: &str) -> Self {
        Self {
            client,
            server: server.to_string(),
            relations: Arc::new(RwLock::new(builtin_relations())),
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the CRD watcher task. Subsequent calls are no-ops.
    fn spawn_watcher(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let client = self.client.clone();
        let server = self.server.clone();
        let relations = Arc::clone(&self.relations);

        let handle = tokio::spawn(async move {
            let api: Api<CustomResourceDefinition> = Api::all(client);
            let mut stream = Box::pin(watcher(api, watcher::Config::default()));
            let mut error_count = 0u32;
            const MAX_CONSECUTIVE_ERRORS: u32 = 5;

            while let Some(event) = stream.next().await {
                match event {
                    Ok(watcher::Event::InitApply(crd)) | Ok(watcher::Event::Apply(crd)) => {
                        error_count = 0;
                        record_crd_kind(&relations, &crd);
                    }
                    // CRD deletion does not retract edges: merges are additive
                    Ok(watcher::Event::Delete(_)) => {
                        error_count = 0;
                    }
                    Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {
                        error_count = 0;
                    }
                    Err(e) => {
                        error_count += 1;
                        if error_count == 1 || error_count.is_multiple_of(10) {
                            tracing::warn!(
                                "CRD watcher error on {} ({}): {}",
                                server,
                                error_count,
                                e
                            );
                        }
                        if error_count >= MAX_CONSECUTIVE_ERRORS {
                            tracing::warn!(
                                "CRD watcher on {} stopped after {} consecutive errors",
                                server,
                                error_count
                            );
                            break;
                        }
                        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });

        *self.handle.lock().unwrap() = Some(handle);
    }
}

#[async_trait]
impl RelationMiner for ResourceMapper {
    fn start(&self) {
        self.spawn_watcher();
    }

    async fn snapshot(&self) -> Result<RelationSnapshot> {
        Ok(self.relations.read().unwrap().clone())
    }
}

/// Record a custom kind as a parent vertex in the snapshot.
fn record_crd_kind(relations: &RwLock<RelationSnapshot>, crd: &CustomResourceDefinition) {
    let group = crd.spec.group.clone();
    let kind = crd.spec.names.kind.clone();
    let key = ResourceKey::new(&group, &kind);
    tracing::debug!("Observed CRD {} ({})", crd.name_any(), key);
    relations.write().unwrap().entry(key).or_default();
}

/// Explicitly owned store of one miner per destination cluster.
///
/// Created at orchestrator construction and passed through it. Mappers are
/// kept for the process lifetime once created; their background watchers are
/// never torn down within a run.
#[derive(Default)]
pub struct MapperRegistry {
    inner: Mutex<HashMap<String, Arc<ResourceMapper>>>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing mapper for `server`, or create one from `client`
    /// and start its background discovery.
    pub fn get_or_create(&self, server: &str, client: Client) -> Arc<ResourceMapper> {
        let mut map = self.inner.lock().unwrap();
        let mapper = map
            .entry(server.to_string())
            .or_insert_with(|| Arc::new(ResourceMapper::new(client, server)))
            .clone();
        drop(map);
        mapper.start();
        mapper
    }

    /// True until the first mapper is created.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_relations_reach_pod_from_deployment() {
        let relations = builtin_relations();
        let deployment = ResourceKey::new("apps", "Deployment");
        let replicaset = ResourceKey::new("apps", "ReplicaSet");
        let pod = ResourceKey::new("", "Pod");

        assert!(relations[&deployment].contains(&replicaset));
        assert!(relations[&replicaset].contains(&pod));
    }

    #[test]
    fn test_builtin_relations_core_keys_use_sentinel() {
        let relations = builtin_relations();
        assert!(relations.contains_key(&ResourceKey::parse("core_Service").unwrap()));
        assert!(relations.contains_key(&ResourceKey::parse("core_Pod").unwrap()));
    }
}
