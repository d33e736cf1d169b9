//! Resource addressing and inclusion output
//!
//! A `ResourceKey` canonicalizes an (API group, kind) pair into a single
//! comparable string used as the vertex identity in both the kind-level
//! relations cache and the instance-level walker. Versions never participate
//! in the key: `apps/v1 Deployment` and `apps/v1beta1 Deployment` address the
//! same vertex.
//!
//! The core API group is stored internally under the `"core"` sentinel and
//! rendered back as `""` in the inclusion document. Round-tripping through
//! `GroupedResourceKinds::from_inclusions_yaml` and `render_yaml` preserves
//! the empty-group semantics.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Sentinel group name used internally for the core ("" group) API group.
pub const CORE_GROUP: &str = "core";

/// Separator between the normalized group and the kind inside a key.
pub const KEY_SEPARATOR: char = '_';

/// Canonical identity of a resource kind: `normalize(group) + "_" + Kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Build a key from an API group and kind. An empty group maps to the
    /// `"core"` sentinel.
    pub fn new(group: &str, kind: &str) -> Self {
        let group = if group.is_empty() { CORE_GROUP } else { group };
        ResourceKey(format!("{group}{KEY_SEPARATOR}{kind}"))
    }

    /// Build a key from an apiVersion string ("apps/v1", "v1") and kind.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        Self::new(api_group_of(api_version), kind)
    }

    /// Parse a stored key back into its (group, kind) parts.
    ///
    /// Returns `None` when the string does not contain a separator. The
    /// returned group is the internal form (the sentinel stays `"core"`);
    /// use [`ResourceKey::api_group`] for the rendered form.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.split_once(KEY_SEPARATOR)?;
        Some(ResourceKey(raw.to_string()))
    }

    /// The internal group part of the key (`"core"` for the core group).
    pub fn group(&self) -> &str {
        self.0.split_once(KEY_SEPARATOR).map(|(g, _)| g).unwrap_or("")
    }

    /// The kind part of the key.
    pub fn kind(&self) -> &str {
        self.0.split_once(KEY_SEPARATOR).map(|(_, k)| k).unwrap_or(&self.0)
    }

    /// The group as rendered in output documents: `""` for the core group.
    pub fn api_group(&self) -> &str {
        let group = self.group();
        if group == CORE_GROUP { "" } else { group }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the API group from an apiVersion string.
///
/// "apps/v1" yields "apps"; a bare version like "v1" yields "" (core).
pub fn api_group_of(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _)) => group,
        None => "",
    }
}

/// Identifies one resource instance, with enough information to re-query
/// the cluster for that object's neighbors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ResourceInfo {
    pub kind: String,
    pub api_version: String,
    pub name: String,
    pub namespace: String,
}

impl ResourceInfo {
    /// The kind-level key for this instance.
    pub fn key(&self) -> ResourceKey {
        ResourceKey::from_api_version(&self.api_version, &self.kind)
    }

    /// The API group of this instance ("" for core).
    pub fn group(&self) -> &str {
        api_group_of(&self.api_version)
    }
}

impl fmt::Display for ResourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[group:{}, kind:{}, name:{}, namespace:{}]",
            self.group(),
            self.kind,
            self.name,
            self.namespace
        )
    }
}

/// One row of the rendered inclusion document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInclusionEntry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<String>,
}

/// Output accumulator: normalized group -> set of kinds.
///
/// BTree ordering makes the rendered document deterministic regardless of
/// worker completion or traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedResourceKinds(BTreeMap<String, BTreeSet<String>>);

impl GroupedResourceKinds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one discovered kind-level key.
    pub fn add_key(&mut self, key: &ResourceKey) {
        self.0
            .entry(key.group().to_string())
            .or_default()
            .insert(key.kind().to_string());
    }

    /// Record a kind by its apiVersion ("" or missing group maps to core).
    pub fn add_api_version_kind(&mut self, api_version: &str, kind: &str) {
        self.add_key(&ResourceKey::from_api_version(api_version, kind));
    }

    /// Group a set of resource instances by API group and merge them in.
    pub fn merge_infos<'a>(&mut self, infos: impl IntoIterator<Item = &'a ResourceInfo>) {
        for info in infos {
            self.add_key(&info.key());
        }
    }

    /// Merge another accumulator into this one.
    pub fn merge(&mut self, other: &GroupedResourceKinds) {
        for (group, kinds) in &other.0 {
            self.0.entry(group.clone()).or_default().extend(kinds.iter().cloned());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct (group, kind) pairs recorded.
    pub fn kind_count(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    /// Convert to inclusion entries, one per group, sorted by group and kind.
    /// The core sentinel renders as the empty API group.
    pub fn to_inclusions(&self) -> Vec<ResourceInclusionEntry> {
        self.0
            .iter()
            .map(|(group, kinds)| {
                let api_group = if group == CORE_GROUP || group.is_empty() {
                    String::new()
                } else {
                    group.clone()
                };
                ResourceInclusionEntry {
                    api_groups: vec![api_group],
                    kinds: kinds.iter().cloned().collect(),
                    clusters: vec!["*".to_string()],
                }
            })
            .collect()
    }

    /// Render the canonical inclusion document as YAML.
    pub fn render_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.to_inclusions())
            .context("Failed to serialize resource inclusions")
    }

    /// Parse a previously rendered inclusion document (the format stored in
    /// the `resource-relation-lookup` ConfigMap). The empty API group maps
    /// back to the core sentinel.
    pub fn from_inclusions_yaml(yaml: &str) -> Result<Self> {
        let entries: Vec<ResourceInclusionEntry> =
            serde_yaml::from_str(yaml).context("Failed to parse resource inclusions")?;
        let mut grouped = Self::new();
        for entry in entries {
            // Only the first listed group is considered, matching the
            // rendered one-group-per-entry shape.
            let Some(api_group) = entry.api_groups.first() else {
                continue;
            };
            let group = if api_group.is_empty() { CORE_GROUP } else { api_group };
            for kind in entry.kinds {
                grouped.0.entry(group.to_string()).or_default().insert(kind);
            }
        }
        Ok(grouped)
    }

    /// Iterate over (group, kinds) pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }
}
