//! SPIRE server StatefulSet builder.
//!
//! The workload runs two containers in a shared process namespace: the
//! server itself and the co-located controller-manager. Both rendered
//! configs are hashed into pod-template annotations so a content change
//! rolls the pods.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction,
    HostPathVolumeSource, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, Probe, SecretVolumeSource, SecurityContext, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use trustmesh_common::constants::{
    annotations, components, names, selector_labels, standard_labels, OPERATOR_NAMESPACE,
};
use trustmesh_common::crd::{PersistenceType, SpireServerSpec};

use super::config::{DB_TLS_MOUNT_PATH, FEDERATION_CERTS_MOUNT_PATH};
use crate::config::{Images, ProxySettings};
use crate::workload::add_proxy_env;

const SERVER_HEALTH_PORT: &str = "server-healthz";
const CTRL_MGR_HEALTH_PORT: &str = "ctrlmgr-healthz";

/// Component label value for everything owned by the server reconciler.
pub const SERVER_APP_NAME: &str = "server";

/// Build the spire-server StatefulSet.
pub fn build_stateful_set(
    spec: &SpireServerSpec,
    images: &Images,
    proxy: &ProxySettings,
    server_conf_hash: &str,
    controller_manager_conf_hash: &str,
) -> StatefulSet {
    let labels = standard_labels(
        SERVER_APP_NAME,
        components::CONTROL_PLANE,
        spec.common.labels.as_ref(),
    );

    let mut server_mounts = vec![
        mount("spire-server-socket", "/tmp/spire-server/private", false),
        mount("spire-config", "/run/spire/config", true),
        mount("spire-data", "/run/spire/data", false),
        mount("server-tmp", "/tmp", false),
    ];

    let mut volumes = vec![
        empty_dir_volume("server-tmp"),
        config_map_volume("spire-config", names::SPIRE_SERVER),
        empty_dir_volume("spire-server-socket"),
        empty_dir_volume("spire-controller-manager-tmp"),
        config_map_volume("controller-manager-config", names::CONTROLLER_MANAGER),
    ];

    if !spec.datastore.tls_secret_name.is_empty() {
        server_mounts.push(mount("db-certs", DB_TLS_MOUNT_PATH, false));
        volumes.push(secret_volume("db-certs", &spec.datastore.tls_secret_name));
    }

    let mut server_ports = vec![
        container_port("grpc", 8081),
        container_port(SERVER_HEALTH_PORT, 8080),
    ];

    // Federation wiring only exists when federation is configured.
    if let Some(federation) = &spec.federation {
        server_ports.push(container_port("federation", 8443));

        let uses_serving_cert = federation
            .bundle_endpoint
            .https_web
            .as_ref()
            .is_some_and(|web| web.serving_cert.is_some());
        if uses_serving_cert {
            server_mounts.push(mount("spire-server-tls", FEDERATION_CERTS_MOUNT_PATH, true));
            volumes.push(secret_volume("spire-server-tls", names::SERVER_SERVING_CERT));
        }
    }

    let server_container = Container {
        name: names::SPIRE_SERVER.to_string(),
        image: Some(images.spire_server.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![
            "-expandEnv".to_string(),
            "-config".to_string(),
            "/run/spire/config/server.conf".to_string(),
        ]),
        env: Some(vec![EnvVar {
            name: "PATH".to_string(),
            value: Some("/opt/spire/bin:/bin".to_string()),
            ..Default::default()
        }]),
        ports: Some(server_ports),
        liveness_probe: Some(Probe {
            http_get: Some(http_get("/live", SERVER_HEALTH_PORT)),
            initial_delay_seconds: Some(15),
            period_seconds: Some(60),
            timeout_seconds: Some(3),
            failure_threshold: Some(2),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            http_get: Some(http_get("/ready", SERVER_HEALTH_PORT)),
            initial_delay_seconds: Some(5),
            period_seconds: Some(5),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        resources: spec.common.resources.clone(),
        volume_mounts: Some(server_mounts),
        ..Default::default()
    };

    let controller_manager_container = Container {
        name: names::CONTROLLER_MANAGER.to_string(),
        image: Some(images.controller_manager.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec!["--config=controller-manager-config.yaml".to_string()]),
        env: Some(vec![EnvVar {
            name: "ENABLE_WEBHOOKS".to_string(),
            value: Some("true".to_string()),
            ..Default::default()
        }]),
        ports: Some(vec![
            container_port("https", 9443),
            container_port(CTRL_MGR_HEALTH_PORT, 8083),
        ]),
        liveness_probe: Some(Probe {
            http_get: Some(http_get("/healthz", CTRL_MGR_HEALTH_PORT)),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            http_get: Some(http_get("/readyz", CTRL_MGR_HEALTH_PORT)),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        resources: spec.common.resources.clone(),
        volume_mounts: Some(vec![
            mount("spire-server-socket", "/tmp/spire-server/private", true),
            VolumeMount {
                name: "controller-manager-config".to_string(),
                mount_path: "/controller-manager-config.yaml".to_string(),
                sub_path: Some("controller-manager-config.yaml".to_string()),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "spire-controller-manager-tmp".to_string(),
                mount_path: "/tmp".to_string(),
                sub_path: Some("spire-controller-manager".to_string()),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let mut volume_claim_templates = None;
    match spec.persistence.type_ {
        PersistenceType::Pvc => {
            let storage_class = if spec.persistence.storage_class.is_empty() {
                None
            } else {
                Some(spec.persistence.storage_class.clone())
            };
            volume_claim_templates = Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("spire-data".to_string()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec![spec.persistence.access_mode.clone()]),
                    storage_class_name: storage_class,
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity(spec.persistence.size.clone()),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]);
        }
        PersistenceType::HostPath => {
            volumes.push(Volume {
                name: "spire-data".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: spec.persistence.host_path.clone(),
                    type_: Some("DirectoryOrCreate".to_string()),
                }),
                ..Default::default()
            });
        }
        PersistenceType::EmptyDir => {
            volumes.push(empty_dir_volume("spire-data"));
        }
    }

    let mut pod_spec = PodSpec {
        service_account_name: Some(names::SPIRE_SERVER.to_string()),
        share_process_namespace: Some(true),
        containers: vec![server_container, controller_manager_container],
        volumes: Some(volumes),
        affinity: spec.common.affinity.clone(),
        node_selector: spec.common.node_selector.clone(),
        tolerations: spec.common.tolerations.clone(),
        ..Default::default()
    };
    add_proxy_env(&mut pod_spec, proxy);

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_SERVER.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: names::SPIRE_SERVER.to_string(),
            selector: LabelSelector {
                match_labels: Some(selector_labels(SERVER_APP_NAME)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([
                        (
                            "kubectl.kubernetes.io/default-container".to_string(),
                            names::SPIRE_SERVER.to_string(),
                        ),
                        (
                            annotations::SPIRE_SERVER_CONFIG_HASH.to_string(),
                            server_conf_hash.to_string(),
                        ),
                        (
                            annotations::CONTROLLER_MANAGER_CONFIG_HASH.to_string(),
                            controller_manager_conf_hash.to_string(),
                        ),
                    ])),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            volume_claim_templates,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn http_get(path: &str, port: &str) -> HTTPGetAction {
    HTTPGetAction {
        path: Some(path.to_string()),
        port: IntOrString::String(port.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustmesh_common::crd::{
        BundleEndpointConfig, BundleEndpointProfile, DataStore, FederationConfig, HttpsWebConfig,
        ServingCertConfig,
    };

    fn base_spec() -> SpireServerSpec {
        SpireServerSpec {
            trust_domain: "cluster1.example.com".to_string(),
            cluster_name: "c1".to_string(),
            ..Default::default()
        }
    }

    fn build(spec: &SpireServerSpec) -> StatefulSet {
        build_stateful_set(
            spec,
            &Images::default(),
            &ProxySettings::default(),
            "hash-a",
            "hash-b",
        )
    }

    fn pod_spec(sts: &StatefulSet) -> &PodSpec {
        sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    #[test]
    fn two_containers_share_the_process_namespace() {
        let sts = build(&base_spec());
        let pod = pod_spec(&sts);
        assert_eq!(pod.share_process_namespace, Some(true));
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.containers[0].name, "spire-server");
        assert_eq!(pod.containers[1].name, "spire-controller-manager");
    }

    /// Story: both config hashes land in the pod template, so either config
    /// changing rolls the pods.
    #[test]
    fn story_config_hashes_are_stamped_on_the_pod_template() {
        let sts = build(&base_spec());
        let annotations = sts
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .annotations
            .as_ref()
            .unwrap();
        assert_eq!(
            annotations.get(annotations::SPIRE_SERVER_CONFIG_HASH).map(String::as_str),
            Some("hash-a")
        );
        assert_eq!(
            annotations
                .get(annotations::CONTROLLER_MANAGER_CONFIG_HASH)
                .map(String::as_str),
            Some("hash-b")
        );
    }

    #[test]
    fn health_port_is_named_server_healthz() {
        let sts = build(&base_spec());
        let ports = pod_spec(&sts).containers[0].ports.as_ref().unwrap();
        assert!(ports.iter().any(|p| p.name.as_deref() == Some("server-healthz")));
        // No federation configured: no federation port.
        assert!(!ports.iter().any(|p| p.name.as_deref() == Some("federation")));
    }

    #[test]
    fn federation_port_is_added_only_when_configured() {
        let mut spec = base_spec();
        spec.federation = Some(FederationConfig {
            bundle_endpoint: BundleEndpointConfig {
                port: 8443,
                address: "0.0.0.0".to_string(),
                profile: BundleEndpointProfile::HttpsSpiffe,
                refresh_hint: 300,
                https_web: None,
            },
            federates_with: Vec::new(),
            managed_route: "true".to_string(),
        });
        let sts = build(&spec);
        let ports = pod_spec(&sts).containers[0].ports.as_ref().unwrap();
        assert!(ports.iter().any(|p| p.name.as_deref() == Some("federation")
            && p.container_port == 8443));
        // SPIFFE profile: no serving-cert volume.
        assert!(!pod_spec(&sts)
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .any(|v| v.name == "spire-server-tls"));
    }

    /// Story: the serving-cert branch mounts the platform-managed secret at
    /// the federation certs path.
    #[test]
    fn story_serving_cert_volume_mounts_at_federation_path() {
        let mut spec = base_spec();
        spec.federation = Some(FederationConfig {
            bundle_endpoint: BundleEndpointConfig {
                port: 8443,
                address: "0.0.0.0".to_string(),
                profile: BundleEndpointProfile::HttpsWeb,
                refresh_hint: 0,
                https_web: Some(HttpsWebConfig {
                    acme: None,
                    serving_cert: Some(ServingCertConfig {
                        secret_name: "spire-server-federation-tls".to_string(),
                        file_sync_interval: 86400,
                        external_certificate: String::new(),
                    }),
                }),
            },
            federates_with: Vec::new(),
            managed_route: "true".to_string(),
        });
        let sts = build(&spec);
        let pod = pod_spec(&sts);

        let volume = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == "spire-server-tls")
            .expect("serving cert volume");
        assert_eq!(
            volume.secret.as_ref().unwrap().secret_name.as_deref(),
            Some("spire-server-serving-cert")
        );

        let mount = pod.containers[0]
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .find(|m| m.name == "spire-server-tls")
            .expect("serving cert mount");
        assert_eq!(mount.mount_path, "/run/spire/federation-certs");
    }

    #[test]
    fn db_tls_secret_is_mounted_at_fixed_path() {
        let mut spec = base_spec();
        spec.datastore = DataStore {
            tls_secret_name: "spire-db-tls".to_string(),
            ..Default::default()
        };
        let sts = build(&spec);
        let pod = pod_spec(&sts);
        let mount = pod.containers[0]
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .find(|m| m.name == "db-certs")
            .expect("db certs mount");
        assert_eq!(mount.mount_path, "/run/spire/db/certs");
    }

    #[test]
    fn pvc_template_honors_persistence_block() {
        let mut spec = base_spec();
        spec.persistence.size = "5Gi".to_string();
        spec.persistence.storage_class = "fast".to_string();
        let sts = build(&spec);
        let templates = sts.spec.as_ref().unwrap().volume_claim_templates.as_ref().unwrap();
        assert_eq!(templates.len(), 1);
        let claim = templates[0].spec.as_ref().unwrap();
        assert_eq!(claim.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(
            claim.resources.as_ref().unwrap().requests.as_ref().unwrap()["storage"],
            Quantity("5Gi".to_string())
        );
    }

    #[test]
    fn empty_dir_persistence_replaces_claim_template() {
        let mut spec = base_spec();
        spec.persistence.type_ = PersistenceType::EmptyDir;
        let sts = build(&spec);
        assert!(sts.spec.as_ref().unwrap().volume_claim_templates.is_none());
        assert!(pod_spec(&sts)
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .any(|v| v.name == "spire-data" && v.empty_dir.is_some()));
    }

    /// Building twice from the same spec yields identical objects, which the
    /// diff step reads as "no update needed".
    #[test]
    fn builder_is_deterministic() {
        let spec = base_spec();
        assert_eq!(build(&spec), build(&spec));
    }
}
