//! Depth-first instance walker

use std::collections::HashSet;

use anyhow::Result;

use super::backend::{GraphBackend, QueryRow};
use crate::resource::ResourceInfo;

/// Kinds that terminate a walk: they never own anything worth following.
const LEAF_KINDS: &[&str] = &[
    "Role",
    "RoleBinding",
    "ClusterRole",
    "ClusterRoleBinding",
    "ConfigMap",
    "Secret",
    "ServiceAccount",
    "Namespace",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "Endpoints",
    "EndpointSlice",
    "NetworkPolicy",
    "Ingress",
    "Route",
    "SecurityContextConstraints",
];

/// Kinds never expanded because a query against them fans out into
/// unrelated objects (or is simply too expensive to be useful).
const BLACKLISTED_KINDS: &[&str] = &[
    "Project",
    "ProjectRequest",
    "ConfigMap",
    "Secret",
    "ServiceAccount",
    "Pod",
    "Node",
    "APIService",
    "Namespace",
];

/// Query-result kinds always discarded: they pull in large unrelated
/// subgraphs when followed.
const DISCARDED_ROW_KINDS: &[&str] = &["Namespace", "Node", "APIService"];

/// Depth-first walker over one cluster's instance graph.
///
/// Visited state accumulates for the life of the walker: the kind-level
/// memoization means each (kind, group) pair is expanded at most once even
/// across multiple walks, matching the one-query-per-kind budget.
pub struct GraphWalker {
    backend: Box<dyn GraphBackend>,
    visited_kinds: HashSet<(String, String)>,
}

impl GraphWalker {
    pub fn new(backend: Box<dyn GraphBackend>) -> Self {
        Self {
            backend,
            visited_kinds: HashSet::new(),
        }
    }

    /// All resource instances transitively related to one application.
    ///
    /// The application root itself is excluded from the returned set.
    pub async fn application_closure(
        &mut self,
        name: &str,
        namespace: &str,
    ) -> Result<HashSet<ResourceInfo>> {
        let root = ResourceInfo {
            kind: "Application".to_string(),
            api_version: "argoproj.io/v1alpha1".to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        };
        let mut visited = self.walk(root.clone()).await?;
        visited.remove(&root);
        Ok(visited)
    }

    /// Depth-first traversal from `root`.
    ///
    /// Instances are marked visited before their children are pushed, so
    /// ownership cycles terminate. A failed query abandons that subtree with
    /// a warning; the rest of the walk continues.
    pub async fn walk(&mut self, root: ResourceInfo) -> Result<HashSet<ResourceInfo>> {
        let mut visited: HashSet<ResourceInfo> = HashSet::new();
        let mut stack = vec![root];

        while let Some(info) = stack.pop() {
            if !visited.insert(info.clone()) {
                tracing::debug!("Already visited {}", info);
                continue;
            }
            tracing::debug!("Visiting {}", info);
            match self.children_of(&info).await {
                Ok(children) => stack.extend(children),
                Err(e) => {
                    tracing::warn!("Failed to get children of {}: {:#}", info, e);
                }
            }
        }

        Ok(visited)
    }

    /// Immediate children of one instance via a single query.
    ///
    /// Leaf and blacklisted kinds are never queried; a (kind, group) pair is
    /// queried at most once per walker.
    async fn children_of(&mut self, info: &ResourceInfo) -> Result<Vec<ResourceInfo>> {
        if LEAF_KINDS.contains(&info.kind.as_str())
            || BLACKLISTED_KINDS.contains(&info.kind.as_str())
        {
            tracing::debug!("Skipping leaf or blacklisted resource {}", info);
            return Ok(Vec::new());
        }

        let kind_key = (info.kind.clone(), info.group().to_string());
        if self.visited_kinds.contains(&kind_key) {
            tracing::debug!("Skipping {}, kind already expanded", info);
            return Ok(Vec::new());
        }

        let rows = self
            .backend
            .execute(&query_for(info), &info.namespace)
            .await?;
        // Only marked after a successful query, so a transient failure does
        // not permanently blind the walker to a kind
        self.visited_kinds.insert(kind_key);

        Ok(rows.into_iter().filter_map(row_to_info).collect())
    }
}

/// Render the relationship query for one instance.
fn query_for(info: &ResourceInfo) -> String {
    let group = info.group();
    let ident = if group.is_empty() {
        format!("core.{}", info.kind)
    } else {
        format!("{}s.{}", info.kind.to_lowercase(), group)
    };
    if info.name.is_empty() {
        format!("MATCH (p: {ident}) -> (c) RETURN c.kind, c.apiVersion, c.metadata.namespace")
    } else {
        format!(
            "MATCH (p: {ident}{{name:\"{}\"}}) -> (c) RETURN c.kind, c.apiVersion, c.metadata.namespace",
            info.name
        )
    }
}

/// Convert one query row, discarding the always-ignored kinds.
fn row_to_info(row: QueryRow) -> Option<ResourceInfo> {
    if row.kind.is_empty() || DISCARDED_ROW_KINDS.contains(&row.kind.as_str()) {
        tracing::debug!("Ignoring resource of kind {}", row.kind);
        return None;
    }
    Some(ResourceInfo {
        kind: row.kind,
        api_version: row.api_version,
        name: row.name,
        namespace: row.namespace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(kind: &str, api_version: &str, name: &str) -> ResourceInfo {
        ResourceInfo {
            kind: kind.to_string(),
            api_version: api_version.to_string(),
            name: name.to_string(),
            namespace: "default".to_string(),
        }
    }

    #[test]
    fn test_query_for_core_kind() {
        assert_eq!(
            query_for(&info("Service", "v1", "web")),
            "MATCH (p: core.Service{name:\"web\"}) -> (c) RETURN c.kind, c.apiVersion, c.metadata.namespace"
        );
    }

    #[test]
    fn test_query_for_grouped_kind_pluralizes() {
        assert_eq!(
            query_for(&info("Deployment", "apps/v1", "web")),
            "MATCH (p: deployments.apps{name:\"web\"}) -> (c) RETURN c.kind, c.apiVersion, c.metadata.namespace"
        );
    }

    #[test]
    fn test_query_for_unnamed_resource() {
        assert_eq!(
            query_for(&info("Application", "argoproj.io/v1alpha1", "")),
            "MATCH (p: applications.argoproj.io) -> (c) RETURN c.kind, c.apiVersion, c.metadata.namespace"
        );
    }

    #[test]
    fn test_row_to_info_discards_noise_kinds() {
        for kind in ["Namespace", "Node", "APIService"] {
            let row = QueryRow {
                kind: kind.to_string(),
                api_version: "v1".to_string(),
                name: "x".to_string(),
                namespace: String::new(),
            };
            assert!(row_to_info(row).is_none());
        }

        let row = QueryRow {
            kind: "ReplicaSet".to_string(),
            api_version: "apps/v1".to_string(),
            name: "web-abc".to_string(),
            namespace: "default".to_string(),
        };
        assert!(row_to_info(row).is_some());
    }
}
