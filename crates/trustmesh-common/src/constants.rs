//! Names, labels and annotation keys shared by every reconciler.

use std::collections::BTreeMap;

/// Namespace all operand workloads are installed into.
pub const OPERATOR_NAMESPACE: &str = "trustmesh-system";

/// Value of the `app.kubernetes.io/managed-by` label on every child object.
pub const MANAGED_BY: &str = "trustmesh-operator";

/// Value of the `app.kubernetes.io/part-of` label on every child object.
pub const PART_OF: &str = "trustmesh";

/// Value of the `app.kubernetes.io/instance` label on every child object.
pub const STANDARD_INSTANCE: &str = "spire";

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Component label values, one per operand.
pub mod components {
    pub const CONTROL_PLANE: &str = "control-plane";
    pub const NODE_AGENT: &str = "node-agent";
    pub const CSI: &str = "csi";
    pub const DISCOVERY: &str = "discovery";
}

/// Controller names, used for event reporting and log targets.
pub mod controllers {
    pub const TRUST_MESH: &str = "trustmesh-controller";
    pub const SPIRE_SERVER: &str = "trustmesh-spire-server-controller";
    pub const SPIRE_AGENT: &str = "trustmesh-spire-agent-controller";
    pub const SPIFFE_CSI_DRIVER: &str = "trustmesh-spiffe-csi-driver-controller";
    pub const OIDC_DISCOVERY_PROVIDER: &str = "trustmesh-oidc-discovery-provider-controller";
}

/// Pod-template annotation keys carrying rendered-config hashes.
pub mod annotations {
    pub const SPIRE_SERVER_CONFIG_HASH: &str = "trustmesh.io/spire-server-config-hash";
    pub const CONTROLLER_MANAGER_CONFIG_HASH: &str =
        "trustmesh.io/spire-controller-manager-config-hash";
    pub const SPIRE_AGENT_CONFIG_HASH: &str = "trustmesh.io/spire-agent-config-hash";
    pub const OIDC_CONFIG_HASH: &str = "trustmesh.io/oidc-discovery-provider-config-hash";

    /// Host-platform annotation requesting a serving cert in the named secret.
    pub const SERVICE_SERVING_CERT: &str = "service.beta.openshift.io/serving-cert-secret-name";
}

/// Well-known child object names.
pub mod names {
    pub const SPIRE_SERVER: &str = "spire-server";
    pub const SPIRE_AGENT: &str = "spire-agent";
    pub const SPIFFE_CSI_DRIVER: &str = "spire-spiffe-csi-driver";
    pub const OIDC_DISCOVERY_PROVIDER: &str = "spire-spiffe-oidc-discovery-provider";
    pub const CONTROLLER_MANAGER: &str = "spire-controller-manager";
    pub const CONTROLLER_MANAGER_WEBHOOK: &str = "spire-controller-manager-webhook";
    pub const CONTROLLER_MANAGER_LEADER_ELECTION: &str =
        "spire-controller-manager-leader-election";
    pub const SPIRE_BUNDLE: &str = "spire-bundle";
    pub const FEDERATION_SERVICE: &str = "spire-server-federation";
    pub const FEDERATION_ROUTE: &str = "spire-server-federation";
    pub const OIDC_ROUTE: &str = "spire-oidc-discovery-provider";
    pub const SERVER_SERVING_CERT: &str = "spire-server-serving-cert";
    pub const OIDC_SERVING_CERT: &str = "oidc-serving-cert";
    pub const SERVER_EXTERNAL_CERT_READER: &str = "spire-server-external-cert-reader";
    pub const OIDC_EXTERNAL_CERT_READER: &str = "spire-oidc-external-cert-reader";
    pub const CSI_DRIVER: &str = "csi.spiffe.io";
}

/// Service account of the ingress router that reads external-certificate
/// secrets, and the namespace it lives in.
pub mod router {
    pub const SERVICE_ACCOUNT: &str = "router";
    pub const NAMESPACE: &str = "openshift-ingress";
}

/// Environment variable names consumed at startup.
pub mod env {
    pub const OPERATOR_CONDITION_NAME: &str = "OPERATOR_CONDITION_NAME";
    pub const CREATE_ONLY_MODE: &str = "CREATE_ONLY_MODE";
    pub const HTTP_PROXY: &str = "HTTP_PROXY";
    pub const HTTPS_PROXY: &str = "HTTPS_PROXY";
    pub const TRUSTED_CA_BUNDLE_CONFIGMAP: &str = "TRUSTED_CA_BUNDLE_CONFIGMAP";

    pub const IMAGE_SPIRE_SERVER: &str = "RELATED_IMAGE_SPIRE_SERVER";
    pub const IMAGE_SPIRE_AGENT: &str = "RELATED_IMAGE_SPIRE_AGENT";
    pub const IMAGE_SPIFFE_CSI_DRIVER: &str = "RELATED_IMAGE_SPIFFE_CSI_DRIVER";
    pub const IMAGE_OIDC_DISCOVERY_PROVIDER: &str = "RELATED_IMAGE_SPIRE_OIDC_DISCOVERY_PROVIDER";
    pub const IMAGE_CONTROLLER_MANAGER: &str = "RELATED_IMAGE_SPIRE_CONTROLLER_MANAGER";
    pub const IMAGE_NODE_DRIVER_REGISTRAR: &str = "RELATED_IMAGE_NODE_DRIVER_REGISTRAR";
    pub const IMAGE_CSI_INIT_CONTAINER: &str = "RELATED_IMAGE_SPIFFE_CSI_INIT_CONTAINER";
}

/// Build the canonical label set for a component.
///
/// Custom labels from the spec are merged in first so they can never
/// overwrite the identifying labels.
pub fn standard_labels(
    name: &str,
    component: &str,
    custom: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    if let Some(custom) = custom {
        labels.extend(custom.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    labels.insert(LABEL_NAME.to_string(), name.to_string());
    labels.insert(LABEL_INSTANCE.to_string(), STANDARD_INSTANCE.to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels.insert(LABEL_PART_OF.to_string(), PART_OF.to_string());
    labels.insert(LABEL_COMPONENT.to_string(), component.to_string());
    labels
}

/// The subset of labels used in workload selectors.
///
/// Selectors are immutable on StatefulSets and Deployments, so they only use
/// the core identifying labels and never custom user labels.
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), name.to_string()),
        (LABEL_INSTANCE.to_string(), STANDARD_INSTANCE.to_string()),
    ])
}

/// Label selector string used to narrow child watches to one component.
pub fn watch_selector(component: &str) -> String {
    format!("{LABEL_MANAGED_BY}={MANAGED_BY},{LABEL_COMPONENT}={component}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_labels_cannot_be_overridden_by_custom() {
        let custom = BTreeMap::from([
            ("team".to_string(), "identity".to_string()),
            (LABEL_MANAGED_BY.to_string(), "someone-else".to_string()),
        ]);
        let labels = standard_labels("server", components::CONTROL_PLANE, Some(&custom));
        assert_eq!(labels.get("team").map(String::as_str), Some("identity"));
        assert_eq!(
            labels.get(LABEL_MANAGED_BY).map(String::as_str),
            Some(MANAGED_BY)
        );
        assert_eq!(
            labels.get(LABEL_COMPONENT).map(String::as_str),
            Some(components::CONTROL_PLANE)
        );
    }

    #[test]
    fn selector_labels_exclude_custom_and_component() {
        let labels = selector_labels("server");
        assert_eq!(labels.len(), 2);
        assert!(labels.contains_key(LABEL_NAME));
        assert!(labels.contains_key(LABEL_INSTANCE));
    }

    #[test]
    fn watch_selector_narrows_by_component() {
        assert_eq!(
            watch_selector(components::NODE_AGENT),
            "app.kubernetes.io/managed-by=trustmesh-operator,app.kubernetes.io/component=node-agent"
        );
    }
}
