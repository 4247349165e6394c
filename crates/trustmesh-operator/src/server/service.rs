//! Server and webhook Service builders.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use trustmesh_common::constants::{
    annotations, components, names, selector_labels, standard_labels, OPERATOR_NAMESPACE,
};
use trustmesh_common::crd::SpireServerSpec;

use super::statefulset::SERVER_APP_NAME;

/// Build the spire-server Service.
///
/// When federation is configured the service grows the `federation` port and
/// the serving-cert annotation that asks the host platform to provision the
/// server's internal TLS secret.
pub fn build_server_service(spec: &SpireServerSpec) -> Service {
    let labels = standard_labels(
        SERVER_APP_NAME,
        components::CONTROL_PLANE,
        spec.common.labels.as_ref(),
    );

    let mut ports = vec![
        ServicePort {
            name: Some("grpc".to_string()),
            port: 443,
            target_port: Some(IntOrString::String("grpc".to_string())),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
        ServicePort {
            name: Some("metrics".to_string()),
            port: 9402,
            target_port: Some(IntOrString::Int(9402)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
    ];

    let mut service_annotations = None;
    if spec.federation.is_some() {
        ports.push(ServicePort {
            name: Some("federation".to_string()),
            port: 8443,
            target_port: Some(IntOrString::Int(8443)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
        service_annotations = Some(BTreeMap::from([(
            annotations::SERVICE_SERVING_CERT.to_string(),
            names::SERVER_SERVING_CERT.to_string(),
        )]));
    }

    Service {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_SERVER.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels),
            annotations: service_annotations,
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(ports),
            selector: Some(selector_labels(SERVER_APP_NAME)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the controller-manager webhook Service.
pub fn build_webhook_service(spec: &SpireServerSpec) -> Service {
    let labels = standard_labels(
        SERVER_APP_NAME,
        components::CONTROL_PLANE,
        spec.common.labels.as_ref(),
    );

    Service {
        metadata: ObjectMeta {
            name: Some(names::CONTROLLER_MANAGER_WEBHOOK.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("https".to_string()),
                port: 443,
                target_port: Some(IntOrString::String("https".to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            selector: Some(selector_labels(SERVER_APP_NAME)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustmesh_common::crd::{BundleEndpointConfig, FederationConfig};

    fn base_spec() -> SpireServerSpec {
        SpireServerSpec {
            trust_domain: "cluster1.example.com".to_string(),
            cluster_name: "c1".to_string(),
            ..Default::default()
        }
    }

    fn federated_spec() -> SpireServerSpec {
        let mut spec = base_spec();
        spec.federation = Some(FederationConfig {
            bundle_endpoint: BundleEndpointConfig {
                port: 8443,
                address: "0.0.0.0".to_string(),
                profile: Default::default(),
                refresh_hint: 300,
                https_web: None,
            },
            federates_with: Vec::new(),
            managed_route: "true".to_string(),
        });
        spec
    }

    #[test]
    fn plain_service_has_no_federation_surface() {
        let svc = build_server_service(&base_spec());
        let ports = svc.spec.as_ref().unwrap().ports.as_ref().unwrap();
        assert!(!ports.iter().any(|p| p.name.as_deref() == Some("federation")));
        assert!(svc.metadata.annotations.is_none());
    }

    /// Story: federation adds the 8443 port and asks the platform for a
    /// serving cert.
    #[test]
    fn story_federation_adds_port_and_serving_cert_annotation() {
        let svc = build_server_service(&federated_spec());
        let ports = svc.spec.as_ref().unwrap().ports.as_ref().unwrap();
        assert!(ports
            .iter()
            .any(|p| p.name.as_deref() == Some("federation") && p.port == 8443));
        assert_eq!(
            svc.metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(annotations::SERVICE_SERVING_CERT)
                .map(String::as_str),
            Some("spire-server-serving-cert")
        );
    }

    #[test]
    fn webhook_service_targets_https_port() {
        let svc = build_webhook_service(&base_spec());
        assert_eq!(svc.metadata.name.as_deref(), Some("spire-controller-manager-webhook"));
        let ports = svc.spec.as_ref().unwrap().ports.as_ref().unwrap();
        assert_eq!(ports[0].port, 443);
        assert_eq!(
            ports[0].target_port,
            Some(IntOrString::String("https".to_string()))
        );
    }

    #[test]
    fn selector_uses_core_identity_labels_only() {
        let mut spec = base_spec();
        spec.common.labels = Some(BTreeMap::from([("team".to_string(), "x".to_string())]));
        let svc = build_server_service(&spec);
        let selector = svc.spec.as_ref().unwrap().selector.as_ref().unwrap();
        assert_eq!(selector.len(), 2);
        assert!(!selector.contains_key("team"));
        // Custom labels still land on the object itself.
        assert!(svc.metadata.labels.as_ref().unwrap().contains_key("team"));
    }
}
