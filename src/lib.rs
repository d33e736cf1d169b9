//! Argo Resource Tracker
//!
//! Discovers the transitive closure of resource kinds related to Argo CD
//! applications' managed resources and emits a `resource.inclusions`
//! document. Two traversal strategies are available: a kind-level relations
//! cache with BFS closure (`resourcegraph`) and an instance-level
//! depth-first walk over graph queries (`graph`).

pub mod argocd;
pub mod cli;
pub mod graph;
pub mod kube;
pub mod relations;
pub mod resource;
pub mod tracker;

pub use resource::{GroupedResourceKinds, ResourceInfo, ResourceKey};
