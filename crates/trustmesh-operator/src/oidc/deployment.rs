//! OIDC discovery provider Deployment and Service builders.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    CSIVolumeSource, ConfigMapVolumeSource, Container, ContainerPort, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, SecretVolumeSource, SecurityContext, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use trustmesh_common::constants::{
    annotations, components, names, selector_labels, standard_labels, OPERATOR_NAMESPACE,
};
use trustmesh_common::crd::SpireOidcDiscoveryProviderSpec;

use super::config::OIDC_TLS_MOUNT_PATH;
use crate::config::{Images, ProxySettings};
use crate::workload::add_proxy_env;

/// Component label value for everything owned by the OIDC reconciler.
pub const OIDC_APP_NAME: &str = "spiffe-oidc-discovery-provider";

const OIDC_HEALTH_PORT: &str = "healthz";

/// Build the provider Deployment; the rendered config's hash rolls the pods.
pub fn build_deployment(
    spec: &SpireOidcDiscoveryProviderSpec,
    images: &Images,
    proxy: &ProxySettings,
    config_hash: &str,
) -> Deployment {
    let labels = standard_labels(OIDC_APP_NAME, components::DISCOVERY, spec.common.labels.as_ref());

    let container = Container {
        name: names::OIDC_DISCOVERY_PROVIDER.to_string(),
        image: Some(images.oidc_discovery_provider.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![
            "-config".to_string(),
            "/run/spire/oidc/config/oidc-discovery-provider.conf".to_string(),
        ]),
        ports: Some(vec![
            ContainerPort {
                name: Some("https".to_string()),
                container_port: 8443,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some(OIDC_HEALTH_PORT.to_string()),
                container_port: 8008,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        liveness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/live".to_string()),
                port: IntOrString::String(OIDC_HEALTH_PORT.to_string()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(15),
            period_seconds: Some(60),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/ready".to_string()),
                port: IntOrString::String(OIDC_HEALTH_PORT.to_string()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(5),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        resources: spec.common.resources.clone(),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "spire-oidc-config".to_string(),
                mount_path: "/run/spire/oidc/config".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "spire-oidc-tls".to_string(),
                mount_path: OIDC_TLS_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "spiffe-workload-api".to_string(),
                mount_path: "/spiffe-workload-api".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let mut pod_spec = PodSpec {
        service_account_name: Some(names::OIDC_DISCOVERY_PROVIDER.to_string()),
        containers: vec![container],
        volumes: Some(vec![
            Volume {
                name: "spire-oidc-config".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: names::OIDC_DISCOVERY_PROVIDER.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: "spire-oidc-tls".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(names::OIDC_SERVING_CERT.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: "spiffe-workload-api".to_string(),
                csi: Some(CSIVolumeSource {
                    driver: names::CSI_DRIVER.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        affinity: spec.common.affinity.clone(),
        node_selector: spec.common.node_selector.clone(),
        tolerations: spec.common.tolerations.clone(),
        ..Default::default()
    };
    add_proxy_env(&mut pod_spec, proxy);

    Deployment {
        metadata: ObjectMeta {
            name: Some(names::OIDC_DISCOVERY_PROVIDER.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(OIDC_APP_NAME)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([(
                        annotations::OIDC_CONFIG_HASH.to_string(),
                        config_hash.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the provider Service, asking the platform for its serving cert.
pub fn build_service(spec: &SpireOidcDiscoveryProviderSpec) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(names::OIDC_DISCOVERY_PROVIDER.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(standard_labels(
                OIDC_APP_NAME,
                components::DISCOVERY,
                spec.common.labels.as_ref(),
            )),
            annotations: Some(BTreeMap::from([(
                annotations::SERVICE_SERVING_CERT.to_string(),
                names::OIDC_SERVING_CERT.to_string(),
            )])),
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
            selector: Some(selector_labels(OIDC_APP_NAME)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SpireOidcDiscoveryProviderSpec {
        SpireOidcDiscoveryProviderSpec {
            trust_domain: "cluster1.example.com".to_string(),
            jwt_issuer: "https://oidc-discovery.cluster1.example.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn deployment_mounts_the_workload_api_via_csi() {
        let deploy = build_deployment(&spec(), &Images::default(), &ProxySettings::default(), "h");
        let pod = deploy.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let csi_volume = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == "spiffe-workload-api")
            .expect("csi volume");
        assert_eq!(csi_volume.csi.as_ref().unwrap().driver, "csi.spiffe.io");
        assert_eq!(csi_volume.csi.as_ref().unwrap().read_only, Some(true));
    }

    #[test]
    fn config_hash_rolls_the_deployment() {
        let a = build_deployment(&spec(), &Images::default(), &ProxySettings::default(), "h1");
        let b = build_deployment(&spec(), &Images::default(), &ProxySettings::default(), "h2");
        assert_ne!(
            a.spec.unwrap().template.metadata.unwrap().annotations,
            b.spec.unwrap().template.metadata.unwrap().annotations
        );
    }

    #[test]
    fn service_requests_the_platform_serving_cert() {
        let svc = build_service(&spec());
        assert_eq!(
            svc.metadata
                .annotations
                .unwrap()
                .get(annotations::SERVICE_SERVING_CERT)
                .map(String::as_str),
            Some("oidc-serving-cert")
        );
    }
}
