//! Baseline ClusterSPIFFEID for the discovery provider's own identity.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use trustmesh_common::constants::{
    components, names, selector_labels, standard_labels, OPERATOR_NAMESPACE,
};
use trustmesh_common::crd::{ClusterSPIFFEID, ClusterSPIFFEIDSpec, SpireOidcDiscoveryProviderSpec};

use super::config::oidc_host;
use super::deployment::OIDC_APP_NAME;
use crate::server::controller_manager::CONTROLLER_MANAGER_CLASS_NAME;

/// Build the registration policy that issues the provider its SVID.
pub fn build_cluster_spiffe_id(spec: &SpireOidcDiscoveryProviderSpec) -> ClusterSPIFFEID {
    let mut id = ClusterSPIFFEID::new(
        names::OIDC_DISCOVERY_PROVIDER,
        ClusterSPIFFEIDSpec {
            class_name: CONTROLLER_MANAGER_CLASS_NAME.to_string(),
            spiffe_id_template:
                "spiffe://{{ .TrustDomain }}/ns/{{ .PodMeta.Namespace }}/sa/{{ .PodSpec.ServiceAccountName }}"
                    .to_string(),
            pod_selector: Some(LabelSelector {
                match_labels: Some(selector_labels(OIDC_APP_NAME)),
                ..Default::default()
            }),
            namespace_selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    "kubernetes.io/metadata.name".to_string(),
                    OPERATOR_NAMESPACE.to_string(),
                )])),
                ..Default::default()
            }),
            dns_name_templates: vec![oidc_host(spec)],
            auto_populate_dns_names: Some(true),
            hint: Some("oidc-discovery-provider".to_string()),
        },
    );
    id.metadata.labels = Some(standard_labels(
        OIDC_APP_NAME,
        components::DISCOVERY,
        spec.common.labels.as_ref(),
    ));
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_entry_binds_to_the_controller_manager_class() {
        let spec = SpireOidcDiscoveryProviderSpec {
            trust_domain: "cluster1.example.com".to_string(),
            jwt_issuer: "https://oidc-discovery.cluster1.example.com".to_string(),
            ..Default::default()
        };
        let id = build_cluster_spiffe_id(&spec);
        assert_eq!(id.spec.class_name, "trustmesh-spire");
        assert!(id.spec.spiffe_id_template.contains(".TrustDomain"));
        assert_eq!(
            id.spec.dns_name_templates,
            vec!["oidc-discovery.cluster1.example.com".to_string()]
        );
        let ns = id.spec.namespace_selector.unwrap().match_labels.unwrap();
        assert_eq!(
            ns.get("kubernetes.io/metadata.name").map(String::as_str),
            Some("trustmesh-system")
        );
    }
}
