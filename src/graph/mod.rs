//! Instance-level graph traversal
//!
//! The walker discovers the resources related to one application bundle by
//! issuing one declarative relationship query per visited instance. The
//! query engine sits behind the [`GraphBackend`] trait; the concrete
//! [`ApiServerBackend`] answers the single query shape the walker emits with
//! kube discovery plus owner-reference and tracking-criterion matching.

mod backend;
mod walker;

pub use backend::{
    ApiServerBackend, GraphBackend, QueryRow, TRACKING_ANNOTATION, TRACKING_LABEL, TrackingMethod,
};
pub use walker::GraphWalker;
