//! Graph-query backend
//!
//! The walker speaks a single query shape:
//!
//! ```text
//! MATCH (p: <ident>) -> (c) RETURN c.kind, c.apiVersion, c.metadata.namespace
//! MATCH (p: <ident>{name:"web"}) -> (c) RETURN c.kind, c.apiVersion, c.metadata.namespace
//! ```
//!
//! where `<ident>` is `core.<Kind>` for the core group or
//! `<plural>.<group>` otherwise. [`ApiServerBackend`] answers it against the
//! API server: the parent is resolved through discovery, Application parents
//! relate to children through the tracking criterion, everything else through
//! owner references.

use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams};
use kube::core::ApiResource;
use kube::discovery::{ApiCapabilities, Discovery, Scope, verbs};
use kube::{Client, ResourceExt};
use regex::Regex;

/// Label Argo CD stamps on managed resources (label tracking).
pub const TRACKING_LABEL: &str = "app.kubernetes.io/instance";
/// Annotation Argo CD stamps on managed resources (annotation tracking).
pub const TRACKING_ANNOTATION: &str = "argocd.argoproj.io/tracking-id";

static QUERY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^MATCH \(p: ([A-Za-z0-9.-]+)(?:\{name:"([^"]+)"\})?\) -> \(c\)"#)
        .expect("valid pattern")
});

/// How Argo CD marks the resources belonging to an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TrackingMethod {
    /// Exact match on the `app.kubernetes.io/instance` label.
    #[default]
    Label,
    /// Substring match on the `argocd.argoproj.io/tracking-id` annotation.
    Annotation,
}

impl TrackingMethod {
    /// True when `obj` is tracked as belonging to application `app`.
    fn tracks(&self, obj: &DynamicObject, app: &str) -> bool {
        match self {
            TrackingMethod::Label => obj
                .labels()
                .get(TRACKING_LABEL)
                .is_some_and(|value| value == app),
            TrackingMethod::Annotation => obj
                .annotations()
                .get(TRACKING_ANNOTATION)
                .is_some_and(|value| value.contains(app)),
        }
    }
}

/// One related resource returned by a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QueryRow {
    pub kind: String,
    pub api_version: String,
    pub name: String,
    pub namespace: String,
}

/// Contract for answering relationship queries.
///
/// An empty `namespace` means all namespaces.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    async fn execute(&self, query: &str, namespace: &str) -> Result<Vec<QueryRow>>;
}

/// Parent selector parsed out of a query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedQuery {
    /// API group, "" for core.
    pub group: String,
    /// Kind for the core group, lowercase plural otherwise.
    pub ident: String,
    pub name: Option<String>,
}

pub(crate) fn parse_query(query: &str) -> Result<ParsedQuery> {
    let caps = QUERY_PATTERN
        .captures(query)
        .with_context(|| format!("Unsupported query shape: {query}"))?;
    let ident = &caps[1];
    let name = caps.get(2).map(|m| m.as_str().to_string());

    // The plural never contains a dot, so the first dot splits it from the
    // group; `core.<Kind>` addresses the core group by kind
    let (head, tail) = ident
        .split_once('.')
        .with_context(|| format!("Unqualified kind in query: {ident}"))?;
    if head == "core" {
        Ok(ParsedQuery {
            group: String::new(),
            ident: tail.to_string(),
            name,
        })
    } else {
        Ok(ParsedQuery {
            group: tail.to_string(),
            ident: head.to_string(),
            name,
        })
    }
}

/// Kinds never worth scanning for children: high-churn objects that own
/// nothing an inclusion list would care about.
const SCAN_SKIP_KINDS: &[&str] = &["Event", "Lease", "ComponentStatus"];

/// Query backend that resolves relationships against the API server.
pub struct ApiServerBackend {
    client: Client,
    discovery: Discovery,
    tracking: TrackingMethod,
}

impl ApiServerBackend {
    /// Run discovery once and keep the resolved API surface for the life of
    /// the backend.
    pub async fn new(client: Client, tracking: TrackingMethod) -> Result<Self> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .context("API discovery failed")?;
        Ok(Self {
            client,
            discovery,
            tracking,
        })
    }

    /// Resolve the parsed parent selector to a discovered API resource.
    fn resolve_parent(&self, parsed: &ParsedQuery) -> Result<(ApiResource, ApiCapabilities)> {
        for group in self.discovery.groups() {
            if group.name() != parsed.group {
                continue;
            }
            for (ar, caps) in group.recommended_resources() {
                let matched = if parsed.group.is_empty() {
                    ar.kind == parsed.ident
                } else {
                    ar.plural == parsed.ident
                };
                if matched {
                    return Ok((ar, caps));
                }
            }
        }
        bail!(
            "no API resource for {} in group {:?}",
            parsed.ident,
            parsed.group
        )
    }

    fn api_for(&self, ar: &ApiResource, caps: &ApiCapabilities, namespace: &str) -> Api<DynamicObject> {
        if caps.scope == Scope::Namespaced && !namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), namespace, ar)
        } else {
            Api::all_with(self.client.clone(), ar)
        }
    }

    /// Every discovered resource kind worth scanning for children.
    fn listable_resources(&self) -> Vec<(ApiResource, ApiCapabilities)> {
        self.discovery
            .groups()
            .flat_map(|group| group.recommended_resources())
            .filter(|(ar, caps)| {
                caps.supports_operation(verbs::LIST) && !SCAN_SKIP_KINDS.contains(&ar.kind.as_str())
            })
            .collect()
    }

    /// Children of an Application parent: objects carrying the tracking
    /// criterion for the application's name.
    async fn tracked_children(&self, app: &str, namespace: &str) -> Result<Vec<QueryRow>> {
        let mut rows = Vec::new();
        for (ar, caps) in self.listable_resources() {
            let api = self.api_for(&ar, &caps, namespace);
            // Label tracking filters server-side; annotation tracking has to
            // list and match client-side
            let params = match self.tracking {
                TrackingMethod::Label => {
                    ListParams::default().labels(&format!("{TRACKING_LABEL}={app}"))
                }
                TrackingMethod::Annotation => ListParams::default(),
            };
            let list = match api.list(&params).await {
                Ok(list) => list,
                Err(e) => {
                    tracing::debug!("Skipping {} while matching {}: {}", ar.kind, app, e);
                    continue;
                }
            };
            for obj in list.items {
                if self.tracking == TrackingMethod::Annotation && !self.tracking.tracks(&obj, app) {
                    continue;
                }
                rows.push(row_for(&ar, &obj));
            }
        }
        Ok(rows)
    }

    /// Children of a non-Application parent: objects with an owner reference
    /// pointing at one of the parent UIDs.
    async fn owned_children(&self, owner_uids: &[String], namespace: &str) -> Result<Vec<QueryRow>> {
        let mut rows = Vec::new();
        for (ar, caps) in self.listable_resources() {
            let api = self.api_for(&ar, &caps, namespace);
            let list = match api.list(&ListParams::default()).await {
                Ok(list) => list,
                Err(e) => {
                    tracing::debug!("Skipping {} while matching owners: {}", ar.kind, e);
                    continue;
                }
            };
            for obj in list.items {
                let owned = obj
                    .owner_references()
                    .iter()
                    .any(|or| owner_uids.iter().any(|uid| uid == &or.uid));
                if owned {
                    rows.push(row_for(&ar, &obj));
                }
            }
        }
        Ok(rows)
    }
}

fn row_for(ar: &ApiResource, obj: &DynamicObject) -> QueryRow {
    QueryRow {
        kind: ar.kind.clone(),
        api_version: ar.api_version.clone(),
        name: obj.name_any(),
        namespace: obj.namespace().unwrap_or_default(),
    }
}

#[async_trait]
impl GraphBackend for ApiServerBackend {
    async fn execute(&self, query: &str, namespace: &str) -> Result<Vec<QueryRow>> {
        let parsed = parse_query(query)?;
        let (ar, caps) = self.resolve_parent(&parsed)?;
        let api = self.api_for(&ar, &caps, namespace);

        let parents = match &parsed.name {
            Some(name) => vec![
                api.get(name)
                    .await
                    .with_context(|| format!("Failed to get {} {}", ar.kind, name))?,
            ],
            None => {
                api.list(&ListParams::default())
                    .await
                    .with_context(|| format!("Failed to list {}", ar.plural))?
                    .items
            }
        };
        if parents.is_empty() {
            return Ok(Vec::new());
        }

        if parsed.group == "argoproj.io" && parsed.ident == "applications" {
            let mut rows = Vec::new();
            for parent in &parents {
                rows.extend(self.tracked_children(&parent.name_any(), namespace).await?);
            }
            Ok(rows)
        } else {
            let uids: Vec<String> = parents.iter().filter_map(|p| p.uid()).collect();
            self.owned_children(&uids, namespace).await
        }
    }
}
