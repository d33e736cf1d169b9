//! Kind-level resource relations
//!
//! Provides the per-cluster relation miner adapter ([`ResourceMapper`]), the
//! registry that owns one adapter per destination cluster, and the shared
//! relations cache that merges every cluster's snapshot and answers BFS
//! closure queries.

mod cache;
mod mapper;

pub use cache::{RelationSnapshot, RelationsCache};
pub use mapper::{MapperRegistry, RelationMiner, ResourceMapper, builtin_relations};
