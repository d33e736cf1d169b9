//! Inclusion document tests
//!
//! Rendering shape, determinism, and round-tripping through the stored
//! YAML format.

use argo_resource_tracker::resource::{
    GroupedResourceKinds, ResourceInclusionEntry, ResourceInfo, ResourceKey,
};

fn grouped_from(pairs: &[(&str, &str)]) -> GroupedResourceKinds {
    let mut grouped = GroupedResourceKinds::new();
    for (api_version, kind) in pairs {
        grouped.add_api_version_kind(api_version, kind);
    }
    grouped
}

#[test]
fn test_one_entry_per_group_sorted() {
    let grouped = grouped_from(&[
        ("v1", "Service"),
        ("apps/v1", "StatefulSet"),
        ("v1", "ConfigMap"),
        ("apps/v1", "Deployment"),
        ("batch/v1", "Job"),
    ]);

    let entries = grouped.to_inclusions();
    let groups: Vec<&str> = entries
        .iter()
        .map(|e| e.api_groups[0].as_str())
        .collect();
    assert_eq!(groups, vec!["apps", "batch", ""]);

    // Kinds sorted within each group
    assert_eq!(entries[0].kinds, vec!["Deployment", "StatefulSet"]);
    assert_eq!(entries[2].kinds, vec!["ConfigMap", "Service"]);
    for entry in &entries {
        assert_eq!(entry.clusters, vec!["*"]);
    }
}

#[test]
fn test_render_is_byte_deterministic() {
    let forward = grouped_from(&[
        ("apps/v1", "Deployment"),
        ("v1", "Pod"),
        ("v1", "ConfigMap"),
        ("networking.k8s.io/v1", "Ingress"),
    ]);
    let reverse = grouped_from(&[
        ("networking.k8s.io/v1", "Ingress"),
        ("v1", "ConfigMap"),
        ("v1", "Pod"),
        ("apps/v1", "Deployment"),
    ]);

    assert_eq!(
        forward.render_yaml().unwrap(),
        reverse.render_yaml().unwrap()
    );
}

#[test]
fn test_duplicate_kinds_collapse() {
    let grouped = grouped_from(&[
        ("apps/v1", "Deployment"),
        ("apps/v1beta1", "Deployment"),
        ("apps/v1", "Deployment"),
    ]);
    assert_eq!(grouped.kind_count(), 1);
}

#[test]
fn test_yaml_round_trip_preserves_core_group() {
    let grouped = grouped_from(&[("v1", "Service"), ("apps/v1", "Deployment")]);

    let yaml = grouped.render_yaml().unwrap();
    let parsed = GroupedResourceKinds::from_inclusions_yaml(&yaml).unwrap();
    assert_eq!(parsed, grouped);
}

#[test]
fn test_parse_stored_inclusion_document() {
    let yaml = r#"
- apiGroups:
  - ""
  kinds:
  - ConfigMap
  - Service
  clusters:
  - "*"
- apiGroups:
  - apps
  kinds:
  - Deployment
  clusters:
  - "*"
"#;

    let grouped = GroupedResourceKinds::from_inclusions_yaml(yaml).unwrap();
    assert_eq!(grouped.kind_count(), 3);

    let entries = grouped.to_inclusions();
    assert_eq!(
        entries,
        vec![
            ResourceInclusionEntry {
                api_groups: vec!["apps".to_string()],
                kinds: vec!["Deployment".to_string()],
                clusters: vec!["*".to_string()],
            },
            ResourceInclusionEntry {
                api_groups: vec![String::new()],
                kinds: vec!["ConfigMap".to_string(), "Service".to_string()],
                clusters: vec!["*".to_string()],
            },
        ]
    );
}

#[test]
fn test_merge_infos_groups_by_api_group() {
    let infos = vec![
        ResourceInfo {
            kind: "Deployment".to_string(),
            api_version: "apps/v1".to_string(),
            name: "web".to_string(),
            namespace: "default".to_string(),
        },
        ResourceInfo {
            kind: "Service".to_string(),
            api_version: "v1".to_string(),
            name: "web".to_string(),
            namespace: "default".to_string(),
        },
    ];

    let mut grouped = GroupedResourceKinds::new();
    grouped.merge_infos(&infos);

    let mut expected = GroupedResourceKinds::new();
    expected.add_key(&ResourceKey::new("apps", "Deployment"));
    expected.add_key(&ResourceKey::new("", "Service"));
    assert_eq!(grouped, expected);
}

#[test]
fn test_merge_unions_accumulators() {
    let mut a = grouped_from(&[("apps/v1", "Deployment")]);
    let b = grouped_from(&[("apps/v1", "ReplicaSet"), ("v1", "Pod")]);

    a.merge(&b);
    assert_eq!(a.kind_count(), 3);
}
