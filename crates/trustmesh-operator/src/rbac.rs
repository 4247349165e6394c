//! RBAC builders shared across reconcilers.

use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use trustmesh_common::constants::{router, OPERATOR_NAMESPACE};

/// Role/RoleBinding pair granting the ingress router's service account read
/// access to exactly one named secret.
///
/// Required before a Route can reference the secret as its external
/// certificate: the ingress layer rejects routes whose router cannot read
/// the referenced secret. Callers must apply the pair before the route.
pub fn external_cert_reader_pair(
    role_name: &str,
    secret_name: &str,
    labels: &BTreeMap<String, String>,
) -> (Role, RoleBinding) {
    let role = Role {
        metadata: ObjectMeta {
            name: Some(role_name.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["".to_string()]),
            resources: Some(vec!["secrets".to_string()]),
            resource_names: Some(vec![secret_name.to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        }]),
    };

    let binding = RoleBinding {
        metadata: ObjectMeta {
            name: Some(role_name.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role_name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: router::SERVICE_ACCOUNT.to_string(),
            namespace: Some(router::NAMESPACE.to_string()),
            ..Default::default()
        }]),
    };

    (role, binding)
}

/// Shorthand for a policy rule.
pub fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(api_groups.iter().map(|s| s.to_string()).collect()),
        resources: Some(resources.iter().map(|s| s.to_string()).collect()),
        verbs: verbs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}
