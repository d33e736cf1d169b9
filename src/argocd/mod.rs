//! Argo CD application bundles
//!
//! Listing Application custom resources, extracting the resources an
//! application directly manages from its reported status, and resolving
//! destination clusters (endpoint + credentials) from Argo CD cluster
//! secrets.

mod application;
mod cluster;

pub use application::{
    AppCondition, AppResource, Application, Destination, DirectResources, get_application,
    list_applications,
};
pub use cluster::ClusterRegistry;
