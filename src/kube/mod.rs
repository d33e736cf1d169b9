//! Kubernetes client construction
//!
//! Builds the client for the control-plane cluster (the one holding the
//! Argo CD applications and cluster secrets), either from an explicit
//! kubeconfig path or through the default loading strategy.
//!
//! Supports HTTP/HTTPS proxy configuration via standard environment variables
//! (`HTTP_PROXY`, `HTTPS_PROXY`, `NO_PROXY` and lowercase variants) and
//! automatically adds internal cluster hosts to `NO_PROXY` so corporate
//! proxies do not intercept in-cluster traffic.

use std::path::Path;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use url::Url;

/// Build a client for the control-plane cluster.
///
/// With `kubeconfig` set, that file is loaded with its current context.
/// Otherwise the default strategy applies: in-cluster config when running in
/// a pod, then `KUBECONFIG`, then `~/.kube/config`.
///
/// Widens `NO_PROXY` for internal cluster hosts, which mutates the process
/// environment: call this during startup only, before any worker task is
/// spawned. Worker-side code reuses the client built here instead of
/// creating its own.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("Invalid kubeconfig {}", path.display()))?
        }
        None => Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?,
    };

    // Extract cluster host for NO_PROXY auto-detection
    let cluster_url_str = config.cluster_url.to_string();
    if let Ok(url) = Url::parse(&cluster_url_str) {
        if let Some(host) = url.host_str() {
            ensure_no_proxy_bypass(host);
        }
    }

    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// Ensure that an internal host is included in NO_PROXY.
///
/// Public hosts are left alone; internal ones are appended to both the
/// uppercase and lowercase variables unless already covered.
fn ensure_no_proxy_bypass(host: &str) {
    if !is_internal_host(host) {
        return;
    }

    let no_proxy = std::env::var("NO_PROXY").unwrap_or_default();
    let no_proxy_lower = std::env::var("no_proxy").unwrap_or_default();

    // NO_PROXY takes precedence when both are set
    let current_no_proxy = if !no_proxy.is_empty() {
        no_proxy
    } else {
        no_proxy_lower
    };

    if no_proxy_contains(&current_no_proxy, host) {
        return;
    }

    let updated_no_proxy = if current_no_proxy.is_empty() {
        host.to_string()
    } else {
        format!("{},{}", current_no_proxy, host)
    };

    tracing::debug!("Adding {} to NO_PROXY", host);
    // Only reachable through create_client, which runs during startup
    // before any worker task is spawned
    unsafe {
        std::env::set_var("NO_PROXY", &updated_no_proxy);
        std::env::set_var("no_proxy", &updated_no_proxy);
    }
}

/// Check if a host looks like an internal/private endpoint: private IP
/// ranges, localhost, or internal TLDs like `.local` and `.internal`.
fn is_internal_host(host: &str) -> bool {
    if host.starts_with("10.")
        || host.starts_with("172.")
        || host.starts_with("192.168.")
        || host == "localhost"
        || host == "127.0.0.1"
        || host == "::1"
    {
        return true;
    }

    // The short in-cluster service form (kubernetes.default.svc) resolves
    // only inside the cluster, so it is internal by definition
    host.ends_with(".svc")
        || host.ends_with(".local")
        || host.ends_with(".internal")
        || host.ends_with(".cluster.local")
        || host.ends_with(".svc.cluster.local")
}

/// Check if NO_PROXY already covers the host.
///
/// Handles exact entries, leading-dot suffix patterns (`.example.com`), and
/// bare-domain entries which also match subdomains.
fn no_proxy_contains(no_proxy: &str, host: &str) -> bool {
    if no_proxy.is_empty() {
        return false;
    }

    no_proxy
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .any(|pattern| {
            if pattern == host {
                return true;
            }
            if let Some(suffix) = pattern.strip_prefix('.') {
                if host == suffix || host.ends_with(&format!(".{}", suffix)) {
                    return true;
                }
            }
            host.ends_with(&format!(".{}", pattern))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_internal_host() {
        assert!(is_internal_host("10.0.0.1"));
        assert!(is_internal_host("192.168.1.1"));
        assert!(is_internal_host("localhost"));
        assert!(is_internal_host("kubernetes.default.svc.cluster.local"));
        assert!(is_internal_host("api.internal"));

        assert!(!is_internal_host("example.com"));
        assert!(!is_internal_host("api.github.com"));
    }

    #[test]
    fn test_is_internal_host_short_service_form() {
        assert!(is_internal_host("kubernetes.default.svc"));
        assert!(is_internal_host("argocd-server.argocd.svc"));
    }

    #[test]
    fn test_no_proxy_contains() {
        assert!(no_proxy_contains("example.com", "example.com"));
        assert!(no_proxy_contains("localhost, example.com", "example.com"));
        assert!(no_proxy_contains(".example.com", "sub.example.com"));
        assert!(no_proxy_contains(".example.com", "example.com"));
        assert!(no_proxy_contains("example.com", "sub.example.com"));

        assert!(!no_proxy_contains("", "example.com"));
        assert!(!no_proxy_contains("other.com", "example.com"));
        assert!(!no_proxy_contains(".prod.example.com", "devprod.example.com"));
    }
}
