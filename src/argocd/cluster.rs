//! Destination cluster resolution
//!
//! Argo CD registers managed clusters as secrets labelled
//! `argocd.argoproj.io/secret-type=cluster`, each carrying the server
//! endpoint, a display name, and a JSON connection config (bearer token or
//! basic auth plus TLS material). The registry resolves a destination to a
//! server endpoint and builds a [`kube::Client`] for it.

use anyhow::{Context, Result, bail};
use k8s_openapi::api::core::v1::Secret;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use serde::Deserialize;
use serde_json::json;

use super::application::Destination;

const CLUSTER_SECRET_LABEL: &str = "argocd.argoproj.io/secret-type=cluster";

/// Connection config stored in a cluster secret's `config` field.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterConfig {
    #[serde(default)]
    bearer_token: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    tls_client_config: TlsClientConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TlsClientConfig {
    #[serde(default)]
    insecure: bool,
    #[serde(default)]
    server_name: String,
    /// base64-encoded, passed through to the generated kubeconfig as-is
    #[serde(default)]
    ca_data: String,
    #[serde(default)]
    cert_data: String,
    #[serde(default)]
    key_data: String,
}

/// Resolves destination clusters registered with Argo CD.
pub struct ClusterRegistry {
    secrets: Api<Secret>,
    local: Client,
}

impl ClusterRegistry {
    /// `namespace` is the Argo CD controller namespace holding the cluster
    /// secrets. `client` is the control-plane client built at startup; it is
    /// reused for in-cluster destinations, so resolving one never touches
    /// the process environment from a worker task.
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            secrets: Api::namespaced(client.clone(), namespace),
            local: client,
        }
    }

    /// Resolve a destination to its server endpoint.
    ///
    /// A destination names either the server directly or a registered
    /// cluster; an unresolvable destination is a configuration error.
    pub async fn resolve_destination(&self, dest: &Destination) -> Result<String> {
        if !dest.server.is_empty() {
            return Ok(dest.server.clone());
        }
        if dest.name.is_empty() {
            bail!("both destination server and name are empty");
        }

        let mut servers = Vec::new();
        for secret in self.cluster_secrets().await? {
            if secret_field(&secret, "name").as_deref() == Some(&dest.name) {
                if let Some(server) = secret_field(&secret, "server") {
                    servers.push(server);
                }
            }
        }

        match servers.len() {
            0 => bail!("there are no clusters with this name: {}", dest.name),
            1 => Ok(servers.remove(0)),
            n => bail!("there are {} clusters with the same name: {:?}", n, servers),
        }
    }

    /// Build a client for a resolved server endpoint.
    ///
    /// The in-cluster endpoint reuses the startup control-plane client;
    /// anything else uses the matching cluster secret's connection config.
    pub async fn client_for(&self, server: &str) -> Result<Client> {
        if server.contains("kubernetes.default.svc") {
            tracing::debug!("In-cluster destination {}, using local credentials", server);
            return Ok(self.local.clone());
        }

        for secret in self.cluster_secrets().await? {
            if secret_field(&secret, "server").as_deref() == Some(server) {
                let raw = secret_field(&secret, "config")
                    .with_context(|| format!("cluster secret for {server} has no config"))?;
                let config: ClusterConfig = serde_json::from_str(&raw)
                    .with_context(|| format!("invalid cluster config for {server}"))?;
                return client_from_cluster_config(server, &config).await;
            }
        }
        bail!("no cluster secret found for server {server}")
    }

    async fn cluster_secrets(&self) -> Result<Vec<Secret>> {
        let params = ListParams::default().labels(CLUSTER_SECRET_LABEL);
        let list = self
            .secrets
            .list(&params)
            .await
            .context("Failed to list Argo CD cluster secrets")?;
        Ok(list.items)
    }
}

/// Read a string field from a secret's (already base64-decoded) data.
fn secret_field(secret: &Secret, field: &str) -> Option<String> {
    let data = secret.data.as_ref()?;
    let bytes = data.get(field)?;
    Some(String::from_utf8_lossy(&bytes.0).into_owned())
}

/// Build a client by rendering the cluster config into an in-memory
/// kubeconfig; kube then handles TLS material and auth uniformly.
async fn client_from_cluster_config(server: &str, config: &ClusterConfig) -> Result<Client> {
    let tls = &config.tls_client_config;

    let mut cluster = json!({ "server": server });
    if tls.insecure {
        cluster["insecure-skip-tls-verify"] = json!(true);
    }
    if !tls.ca_data.is_empty() {
        cluster["certificate-authority-data"] = json!(tls.ca_data);
    }
    if !tls.server_name.is_empty() {
        cluster["tls-server-name"] = json!(tls.server_name);
    }

    let mut user = json!({});
    if !config.bearer_token.is_empty() {
        user["token"] = json!(config.bearer_token);
    } else if !config.username.is_empty() {
        user["username"] = json!(config.username);
        user["password"] = json!(config.password);
    }
    if !tls.cert_data.is_empty() {
        user["client-certificate-data"] = json!(tls.cert_data);
        user["client-key-data"] = json!(tls.key_data);
    }

    let doc = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": "destination", "cluster": cluster }],
        "users": [{ "name": "destination", "user": user }],
        "contexts": [{
            "name": "destination",
            "context": { "cluster": "destination", "user": "destination" },
        }],
        "current-context": "destination",
    });

    let yaml = serde_yaml::to_string(&doc).context("Failed to render cluster kubeconfig")?;
    let kubeconfig =
        Kubeconfig::from_yaml(&yaml).context("Failed to parse generated kubeconfig")?;
    let kube_config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("Failed to build client config for {server}"))?;
    Client::try_from(kube_config).context("Failed to create cluster client")
}
