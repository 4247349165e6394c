//! Controller-manager configuration rendering.
//!
//! Unlike server.conf this is a typed document serialized to YAML; struct
//! field order fixes the output order, which keeps the hash stable.

use serde::Serialize;

use trustmesh_common::constants::{names, OPERATOR_NAMESPACE};
use trustmesh_common::crd::SpireServerSpec;
use trustmesh_common::{Error, Result};

/// Class name binding ClusterSPIFFEID/ClusterFederatedTrustDomain objects to
/// this controller-manager instance.
pub const CONTROLLER_MANAGER_CLASS_NAME: &str = "trustmesh-spire";

/// SPIRE server API socket shared between the two containers.
pub const SERVER_SOCKET_PATH: &str = "/tmp/spire-server/private/api.sock";

/// Typed controller-manager-config.yaml document.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerManagerConfig {
    pub kind: String,
    pub api_version: String,
    pub metadata: ControllerManagerMetadata,
    pub cluster_name: String,
    pub trust_domain: String,
    pub metrics: MetricsConfig,
    pub health: HealthConfig,
    #[serde(rename = "entryIDPrefix")]
    pub entry_id_prefix: String,
    pub watch_classless: bool,
    pub class_name: String,
    #[serde(rename = "parentIDTemplate")]
    pub parent_id_template: String,
    pub reconcile: ReconcileConfig,
    pub validating_webhook_configuration_name: String,
    #[serde(rename = "spireServerSocketPath")]
    pub spire_server_socket_path: String,
    pub ignore_namespaces: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerManagerMetadata {
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    pub bind_address: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    pub health_probe_bind_address: String,
}

/// Toggles for the three downstream CRD kinds the controller-manager
/// reconciles.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileConfig {
    #[serde(rename = "clusterSPIFFEIDs")]
    pub cluster_spiffe_ids: bool,
    pub cluster_federated_trust_domains: bool,
    pub cluster_static_entries: bool,
}

/// Build the typed controller-manager configuration.
pub fn controller_manager_config(spec: &SpireServerSpec) -> Result<ControllerManagerConfig> {
    if spec.trust_domain.is_empty() {
        return Err(Error::rendering_for("controller-manager-config.yaml", "trust domain is empty"));
    }
    if spec.cluster_name.is_empty() {
        return Err(Error::rendering_for("controller-manager-config.yaml", "cluster name is empty"));
    }

    Ok(ControllerManagerConfig {
        kind: "ControllerManagerConfig".to_string(),
        api_version: "spire.spiffe.io/v1alpha1".to_string(),
        metadata: ControllerManagerMetadata {
            name: names::CONTROLLER_MANAGER.to_string(),
            namespace: OPERATOR_NAMESPACE.to_string(),
        },
        cluster_name: spec.cluster_name.clone(),
        trust_domain: spec.trust_domain.clone(),
        metrics: MetricsConfig {
            bind_address: "0.0.0.0:8082".to_string(),
        },
        health: HealthConfig {
            health_probe_bind_address: "0.0.0.0:8083".to_string(),
        },
        entry_id_prefix: spec.cluster_name.clone(),
        watch_classless: false,
        class_name: CONTROLLER_MANAGER_CLASS_NAME.to_string(),
        parent_id_template:
            "spiffe://{{ .TrustDomain }}/spire/agent/k8s_psat/{{ .ClusterName }}/{{ .NodeMeta.UID }}"
                .to_string(),
        reconcile: ReconcileConfig {
            cluster_spiffe_ids: true,
            cluster_federated_trust_domains: true,
            cluster_static_entries: true,
        },
        validating_webhook_configuration_name: names::CONTROLLER_MANAGER_WEBHOOK.to_string(),
        spire_server_socket_path: SERVER_SOCKET_PATH.to_string(),
        ignore_namespaces: vec![
            "kube-system".to_string(),
            "kube-public".to_string(),
            "local-path-storage".to_string(),
            "openshift-*".to_string(),
        ],
    })
}

/// Render controller-manager-config.yaml.
pub fn render_controller_manager_config(spec: &SpireServerSpec) -> Result<String> {
    let config = controller_manager_config(spec)?;
    serde_yaml::to_string(&config)
        .map_err(|e| Error::rendering_for("controller-manager-config.yaml", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustmesh_common::hash::config_hash;

    fn spec() -> SpireServerSpec {
        SpireServerSpec {
            trust_domain: "cluster1.example.com".to_string(),
            cluster_name: "c1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn entry_id_prefix_is_the_cluster_name() {
        let config = controller_manager_config(&spec()).unwrap();
        assert_eq!(config.entry_id_prefix, "c1");
        assert_eq!(config.cluster_name, "c1");
        assert_eq!(config.class_name, CONTROLLER_MANAGER_CLASS_NAME);
        assert!(config.reconcile.cluster_federated_trust_domains);
    }

    #[test]
    fn rendered_yaml_is_byte_stable() {
        let a = render_controller_manager_config(&spec()).unwrap();
        let b = render_controller_manager_config(&spec()).unwrap();
        assert_eq!(a, b);
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn rendered_yaml_uses_expected_field_names() {
        let yaml = render_controller_manager_config(&spec()).unwrap();
        assert!(yaml.contains("kind: ControllerManagerConfig"));
        assert!(yaml.contains("apiVersion: spire.spiffe.io/v1alpha1"));
        assert!(yaml.contains("entryIDPrefix: c1"));
        assert!(yaml.contains("clusterSPIFFEIDs: true"));
        assert!(yaml.contains("spireServerSocketPath: /tmp/spire-server/private/api.sock"));
        assert!(yaml.contains("validatingWebhookConfigurationName: spire-controller-manager-webhook"));
        assert!(yaml.contains("parentIDTemplate"));
    }

    #[test]
    fn missing_cluster_name_fails() {
        let mut bad = spec();
        bad.cluster_name.clear();
        assert!(render_controller_manager_config(&bad).is_err());
    }
}
