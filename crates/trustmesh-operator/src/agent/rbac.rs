//! RBAC, ServiceAccount and Service builders for the agent reconciler.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServiceAccount, ServicePort, ServiceSpec};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use trustmesh_common::constants::{
    components, names, selector_labels, standard_labels, OPERATOR_NAMESPACE,
};
use trustmesh_common::crd::SpireAgentSpec;

use super::daemonset::AGENT_APP_NAME;
use crate::rbac::rule;

fn labels(spec: &SpireAgentSpec) -> BTreeMap<String, String> {
    standard_labels(AGENT_APP_NAME, components::NODE_AGENT, spec.common.labels.as_ref())
}

pub fn build_service_account(spec: &SpireAgentSpec) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_AGENT.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Workload attestation reads pods, nodes and the kubelet's node proxy.
pub fn build_cluster_role(spec: &SpireAgentSpec) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_AGENT.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        rules: Some(vec![rule(
            &[""],
            &["pods", "nodes", "nodes/proxy"],
            &["get"],
        )]),
        ..Default::default()
    }
}

pub fn build_cluster_role_binding(spec: &SpireAgentSpec) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_AGENT.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: names::SPIRE_AGENT.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: names::SPIRE_AGENT.to_string(),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            ..Default::default()
        }]),
    }
}

/// Metrics Service in front of the agent pods.
pub fn build_service(spec: &SpireAgentSpec) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_AGENT.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels(spec)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("metrics".to_string()),
                port: 9402,
                target_port: Some(IntOrString::Int(9402)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            selector: Some(selector_labels(AGENT_APP_NAME)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_role_covers_node_proxy_reads() {
        let role = build_cluster_role(&SpireAgentSpec::default());
        let rules = role.rules.unwrap();
        assert_eq!(
            rules[0].resources.as_ref().unwrap(),
            &vec!["pods".to_string(), "nodes".to_string(), "nodes/proxy".to_string()]
        );
        assert_eq!(rules[0].verbs, vec!["get"]);
    }

    #[test]
    fn binding_targets_agent_service_account() {
        let binding = build_cluster_role_binding(&SpireAgentSpec::default());
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.name, "spire-agent");
        assert_eq!(subject.namespace.as_deref(), Some("trustmesh-system"));
    }

    #[test]
    fn metrics_service_selects_agent_pods() {
        let svc = build_service(&SpireAgentSpec::default());
        let spec = svc.spec.unwrap();
        assert_eq!(spec.ports.unwrap()[0].port, 9402);
        assert_eq!(
            spec.selector.unwrap().get("app.kubernetes.io/name").map(String::as_str),
            Some("agent")
        );
    }
}
