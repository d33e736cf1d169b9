//! Application custom resource model and direct-resource extraction

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client};
use regex::Regex;
use serde::Deserialize;

use crate::resource::{ResourceInfo, ResourceKey};

/// Condition type Argo CD uses to report resources it refused to manage.
const EXCLUDED_RESOURCE_CONDITION: &str = "ExcludedResourceWarning";

/// Fixed `group/kind name` pattern embedded in excluded-resource messages.
static EXCLUDED_RESOURCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9.-]*)/([A-Za-z0-9.]+) ([A-Za-z0-9_.-]+)").expect("valid pattern")
});

/// Destination cluster of an application, by server endpoint or by the name
/// of a registered cluster.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Destination {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub name: String,
}

/// One entry of `status.resources`: a resource the application manages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppResource {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl AppResource {
    /// apiVersion as Argo CD reports it: bare version for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// One entry of `status.conditions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppCondition {
    #[serde(rename = "type", default)]
    pub condition_type: String,
    #[serde(default)]
    pub message: String,
}

/// A deployed application bundle, reduced to the fields the tracker reads.
#[derive(Debug, Clone, Default)]
pub struct Application {
    pub name: String,
    pub namespace: String,
    pub destination: Destination,
    pub resources: Vec<AppResource>,
    pub conditions: Vec<AppCondition>,
}

impl Application {
    /// Build from a dynamic Application object.
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self> {
        #[derive(Deserialize, Default)]
        struct Spec {
            #[serde(default)]
            destination: Destination,
        }
        #[derive(Deserialize, Default)]
        struct Status {
            #[serde(default)]
            resources: Vec<AppResource>,
            #[serde(default)]
            conditions: Vec<AppCondition>,
        }

        let spec: Spec = obj
            .data
            .get("spec")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .context("Invalid application spec")?
            .unwrap_or_default();
        let status: Status = obj
            .data
            .get("status")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .context("Invalid application status")?
            .unwrap_or_default();

        Ok(Application {
            name: obj.metadata.name.clone().unwrap_or_default(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            destination: spec.destination,
            resources: status.resources,
            conditions: status.conditions,
        })
    }
}

fn application_api(client: Client, namespace: &str) -> Api<DynamicObject> {
    let gvk = GroupVersionKind::gvk("argoproj.io", "v1alpha1", "Application");
    let resource = ApiResource::from_gvk_with_plural(&gvk, "applications");
    if namespace.is_empty() {
        Api::all_with(client, &resource)
    } else {
        Api::namespaced_with(client, namespace, &resource)
    }
}

/// List all applications in a namespace (all namespaces when empty).
pub async fn list_applications(client: Client, namespace: &str) -> Result<Vec<Application>> {
    let api = application_api(client, namespace);
    let list = api
        .list(&Default::default())
        .await
        .context("Failed to list applications")?;
    let mut apps = Vec::with_capacity(list.items.len());
    for obj in &list.items {
        apps.push(Application::from_dynamic(obj)?);
    }
    tracing::info!("Listed {} applications", apps.len());
    Ok(apps)
}

/// Fetch a single application by name.
pub async fn get_application(client: Client, namespace: &str, name: &str) -> Result<Application> {
    let api = application_api(client, namespace);
    let obj = api
        .get(name)
        .await
        .with_context(|| format!("Failed to get application {namespace}/{name}"))?;
    Application::from_dynamic(&obj)
}

/// Direct resources of one application bundle: detailed instance infos for
/// graph queries and compact kind-level keys for cache traversal.
#[derive(Debug, Clone, Default)]
pub struct DirectResources {
    pub infos: Vec<ResourceInfo>,
    pub keys: HashSet<ResourceKey>,
}

impl DirectResources {
    /// Derive from an application's reported status.
    ///
    /// Reads the managed-resource list and additionally recovers kinds from
    /// excluded-resource warning messages; Argo CD intentionally did not
    /// manage those, but they are still relevant to the inclusion list.
    pub fn from_app(app: &Application) -> Self {
        let mut direct = DirectResources::default();

        for res in &app.resources {
            direct.add(&res.kind, &res.api_version(), &res.name, &res.namespace);
        }

        for cond in &app.conditions {
            if !cond
                .condition_type
                .eq_ignore_ascii_case(EXCLUDED_RESOURCE_CONDITION)
            {
                continue;
            }
            if let Some(caps) = EXCLUDED_RESOURCE_PATTERN.captures(&cond.message) {
                let group = &caps[1];
                let kind = &caps[2];
                let name = &caps[3];
                // The message carries no version; v1 stands in since the key
                // is version-independent anyway
                let api_version = if group.is_empty() {
                    "v1".to_string()
                } else {
                    format!("{group}/v1")
                };
                direct.add(kind, &api_version, name, "");
            }
        }

        direct
    }

    fn add(&mut self, kind: &str, api_version: &str, name: &str, namespace: &str) {
        let info = ResourceInfo {
            kind: kind.to_string(),
            api_version: api_version.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        };
        self.keys.insert(info.key());
        self.infos.push(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_resources_from_status() {
        let app = Application {
            name: "web".to_string(),
            resources: vec![AppResource {
                group: "apps".to_string(),
                version: "v1".to_string(),
                kind: "Deployment".to_string(),
                name: "web".to_string(),
                namespace: "default".to_string(),
            }],
            ..Default::default()
        };

        let direct = DirectResources::from_app(&app);
        assert_eq!(direct.infos.len(), 1);
        assert_eq!(direct.infos[0].api_version, "apps/v1");
        assert!(direct.keys.contains(&ResourceKey::new("apps", "Deployment")));
    }

    #[test]
    fn test_excluded_resource_condition_recovers_kind() {
        let app = Application {
            conditions: vec![AppCondition {
                condition_type: "ExcludedResourceWarning".to_string(),
                message: "rbac.authorization.k8s.io/RoleBinding my-binding".to_string(),
            }],
            ..Default::default()
        };

        let direct = DirectResources::from_app(&app);
        assert!(
            direct
                .keys
                .contains(&ResourceKey::new("rbac.authorization.k8s.io", "RoleBinding"))
        );
        assert_eq!(direct.infos[0].name, "my-binding");
    }

    #[test]
    fn test_excluded_resource_core_group() {
        let app = Application {
            conditions: vec![AppCondition {
                condition_type: "excludedresourcewarning".to_string(),
                message: "resource /Endpoints kube-dns is excluded".to_string(),
            }],
            ..Default::default()
        };

        let direct = DirectResources::from_app(&app);
        assert!(direct.keys.contains(&ResourceKey::new("", "Endpoints")));
        assert_eq!(direct.infos[0].api_version, "v1");
    }

    #[test]
    fn test_app_resource_api_version() {
        let core = AppResource {
            version: "v1".to_string(),
            kind: "Service".to_string(),
            ..Default::default()
        };
        assert_eq!(core.api_version(), "v1");

        let grouped = AppResource {
            group: "apps".to_string(),
            version: "v1".to_string(),
            kind: "Deployment".to_string(),
            ..Default::default()
        };
        assert_eq!(grouped.api_version(), "apps/v1");
    }
}
