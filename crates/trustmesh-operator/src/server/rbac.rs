//! RBAC and ServiceAccount builders for the server reconciler.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use trustmesh_common::constants::{components, names, standard_labels, OPERATOR_NAMESPACE};
use trustmesh_common::crd::SpireServerSpec;

use super::statefulset::SERVER_APP_NAME;
use crate::rbac::rule;

fn labels(spec: &SpireServerSpec) -> BTreeMap<String, String> {
    standard_labels(
        SERVER_APP_NAME,
        components::CONTROL_PLANE,
        spec.common.labels.as_ref(),
    )
}

fn server_subject() -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: names::SPIRE_SERVER.to_string(),
        namespace: Some(OPERATOR_NAMESPACE.to_string()),
        ..Default::default()
    }
}

/// spire-server ServiceAccount, shared by the server and the co-located
/// controller-manager.
pub fn build_service_account(spec: &SpireServerSpec) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_SERVER.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// ClusterRole for the server itself: node attestation needs token reviews
/// plus read access to nodes and pods.
pub fn build_server_cluster_role(spec: &SpireServerSpec) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_SERVER.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        rules: Some(vec![
            rule(
                &["authentication.k8s.io"],
                &["tokenreviews"],
                &["get", "watch", "list", "create"],
            ),
            rule(&[""], &["nodes", "pods"], &["get", "list"]),
        ]),
        ..Default::default()
    }
}

pub fn build_server_cluster_role_binding(spec: &SpireServerSpec) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_SERVER.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: names::SPIRE_SERVER.to_string(),
        },
        subjects: Some(vec![server_subject()]),
    }
}

/// ClusterRole for the co-located controller-manager: the downstream SPIRE
/// CRDs plus the discovery reads and webhook patching it performs.
pub fn build_controller_manager_cluster_role(spec: &SpireServerSpec) -> ClusterRole {
    let spire_crds = ["clusterfederatedtrustdomains", "clusterspiffeids", "clusterstaticentries"];
    let mut rules: Vec<PolicyRule> = vec![
        rule(&[""], &["namespaces"], &["get", "list", "watch"]),
        rule(
            &["admissionregistration.k8s.io"],
            &["validatingwebhookconfigurations"],
            &["get", "list", "patch", "watch"],
        ),
        rule(&[""], &["nodes"], &["get", "list", "watch"]),
        rule(&[""], &["endpoints"], &["get", "list", "watch"]),
        rule(&[""], &["pods"], &["get", "list", "watch"]),
    ];
    for crd in spire_crds {
        rules.push(rule(
            &["spire.spiffe.io"],
            &[crd],
            &["get", "list", "watch", "create", "update", "patch", "delete"],
        ));
        rules.push(rule(
            &["spire.spiffe.io"],
            &[&format!("{crd}/finalizers")],
            &["update"],
        ));
        rules.push(rule(
            &["spire.spiffe.io"],
            &[&format!("{crd}/status")],
            &["get", "patch", "update"],
        ));
    }

    ClusterRole {
        metadata: ObjectMeta {
            name: Some(names::CONTROLLER_MANAGER.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

pub fn build_controller_manager_cluster_role_binding(spec: &SpireServerSpec) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(names::CONTROLLER_MANAGER.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: names::CONTROLLER_MANAGER.to_string(),
        },
        subjects: Some(vec![server_subject()]),
    }
}

/// Role letting the bundle notifier patch the bundle ConfigMap.
pub fn build_bundle_role(spec: &SpireServerSpec) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_BUNDLE.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["".to_string()]),
            resources: Some(vec!["configmaps".to_string()]),
            resource_names: Some(vec![spec.bundle_config_map.clone()]),
            verbs: vec!["get".to_string(), "patch".to_string()],
            ..Default::default()
        }]),
    }
}

pub fn build_bundle_role_binding(spec: &SpireServerSpec) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_BUNDLE.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: names::SPIRE_BUNDLE.to_string(),
        },
        subjects: Some(vec![server_subject()]),
    }
}

/// Role backing the controller-manager's leader election.
pub fn build_leader_election_role(spec: &SpireServerSpec) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(names::CONTROLLER_MANAGER_LEADER_ELECTION.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        rules: Some(vec![
            rule(
                &[""],
                &["configmaps"],
                &["get", "list", "watch", "create", "update", "patch", "delete"],
            ),
            rule(
                &["coordination.k8s.io"],
                &["leases"],
                &["get", "list", "watch", "create", "update", "patch", "delete"],
            ),
            rule(&[""], &["events"], &["create", "patch"]),
        ]),
    }
}

pub fn build_leader_election_role_binding(spec: &SpireServerSpec) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(names::CONTROLLER_MANAGER_LEADER_ELECTION.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: names::CONTROLLER_MANAGER_LEADER_ELECTION.to_string(),
        },
        subjects: Some(vec![server_subject()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SpireServerSpec {
        SpireServerSpec {
            trust_domain: "cluster1.example.com".to_string(),
            cluster_name: "c1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn server_cluster_role_covers_token_reviews() {
        let role = build_server_cluster_role(&spec());
        let rules = role.rules.unwrap();
        assert!(rules.iter().any(|r| {
            r.api_groups.as_deref() == Some(&["authentication.k8s.io".to_string()])
                && r.verbs.contains(&"create".to_string())
        }));
    }

    #[test]
    fn controller_manager_role_covers_all_three_spire_crds() {
        let role = build_controller_manager_cluster_role(&spec());
        let rules = role.rules.unwrap();
        for crd in ["clusterfederatedtrustdomains", "clusterspiffeids", "clusterstaticentries"] {
            assert!(rules.iter().any(|r| {
                r.resources.as_deref() == Some(&[crd.to_string()])
                    && r.verbs.contains(&"delete".to_string())
            }));
            assert!(rules
                .iter()
                .any(|r| r.resources.as_deref() == Some(&[format!("{crd}/status")])));
        }
    }

    #[test]
    fn bundle_role_is_scoped_to_the_bundle_config_map() {
        let mut s = spec();
        s.bundle_config_map = "my-bundle".to_string();
        let role = build_bundle_role(&s);
        let rule = &role.rules.unwrap()[0];
        assert_eq!(rule.resource_names.as_ref().unwrap(), &vec!["my-bundle".to_string()]);
        assert_eq!(rule.verbs, vec!["get", "patch"]);
    }

    #[test]
    fn bindings_target_the_server_service_account() {
        for subjects in [
            build_server_cluster_role_binding(&spec()).subjects,
            build_controller_manager_cluster_role_binding(&spec()).subjects,
            build_bundle_role_binding(&spec()).subjects,
            build_leader_election_role_binding(&spec()).subjects,
        ] {
            let subject = &subjects.unwrap()[0];
            assert_eq!(subject.name, "spire-server");
            assert_eq!(subject.namespace.as_deref(), Some("trustmesh-system"));
        }
    }
}
