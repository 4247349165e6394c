//! SPIRE agent DaemonSet builder.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction, HostPathVolumeSource,
    PodSpec, PodTemplateSpec, Probe, ProjectedVolumeSource, SecurityContext,
    ServiceAccountTokenProjection, Volume, VolumeMount, VolumeProjection,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use trustmesh_common::constants::{
    annotations, components, names, selector_labels, standard_labels, OPERATOR_NAMESPACE,
};
use trustmesh_common::crd::SpireAgentSpec;

use super::config::AGENT_SOCKET_DIR;
use crate::config::{Images, ProxySettings};
use crate::workload::add_proxy_env;

const AGENT_HEALTH_PORT: &str = "healthz";

/// Component label value for everything owned by the agent reconciler.
pub const AGENT_APP_NAME: &str = "agent";

/// Build the spire-agent DaemonSet.
pub fn build_daemon_set(
    spec: &SpireAgentSpec,
    images: &Images,
    proxy: &ProxySettings,
    config_hash: &str,
) -> DaemonSet {
    let labels = standard_labels(AGENT_APP_NAME, components::NODE_AGENT, spec.common.labels.as_ref());

    let container = Container {
        name: names::SPIRE_AGENT.to_string(),
        image: Some(images.spire_agent.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![
            "-expandEnv".to_string(),
            "-config".to_string(),
            "/run/spire/config/agent.conf".to_string(),
        ]),
        env: Some(vec![EnvVar {
            name: "PATH".to_string(),
            value: Some("/opt/spire/bin:/bin".to_string()),
            ..Default::default()
        }]),
        ports: Some(vec![ContainerPort {
            name: Some(AGENT_HEALTH_PORT.to_string()),
            container_port: 4246,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        liveness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/live".to_string()),
                port: IntOrString::String(AGENT_HEALTH_PORT.to_string()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(15),
            period_seconds: Some(60),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/ready".to_string()),
                port: IntOrString::String(AGENT_HEALTH_PORT.to_string()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(5),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(true),
            privileged: Some(true),
            ..Default::default()
        }),
        resources: spec.common.resources.clone(),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "spire-config".to_string(),
                mount_path: "/run/spire/config".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "spire-bundle".to_string(),
                mount_path: "/run/spire/bundle".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "spire-agent-socket-dir".to_string(),
                mount_path: AGENT_SOCKET_DIR.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "spire-token".to_string(),
                mount_path: "/var/run/secrets/tokens".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let mut pod_spec = PodSpec {
        service_account_name: Some(names::SPIRE_AGENT.to_string()),
        host_pid: Some(true),
        containers: vec![container],
        volumes: Some(vec![
            Volume {
                name: "spire-config".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: names::SPIRE_AGENT.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: "spire-bundle".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: spec.bundle_config_map.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: "spire-agent-socket-dir".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: AGENT_SOCKET_DIR.to_string(),
                    type_: Some("DirectoryOrCreate".to_string()),
                }),
                ..Default::default()
            },
            Volume {
                name: "spire-token".to_string(),
                projected: Some(ProjectedVolumeSource {
                    sources: Some(vec![VolumeProjection {
                        service_account_token: Some(ServiceAccountTokenProjection {
                            audience: Some("spire-server".to_string()),
                            expiration_seconds: Some(7200),
                            path: names::SPIRE_AGENT.to_string(),
                        }),
                        ..Default::default()
                    }]),
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

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(names::SPIRE_AGENT.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector_labels(AGENT_APP_NAME)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([(
                        annotations::SPIRE_AGENT_CONFIG_HASH.to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SpireAgentSpec {
        SpireAgentSpec {
            trust_domain: "cluster1.example.com".to_string(),
            cluster_name: "c1".to_string(),
            ..Default::default()
        }
    }

    fn build(spec: &SpireAgentSpec) -> DaemonSet {
        build_daemon_set(spec, &Images::default(), &ProxySettings::default(), "hash-1")
    }

    #[test]
    fn config_hash_is_stamped_on_the_pod_template() {
        let ds = build(&spec());
        let annotations = ds
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
            annotations.get(annotations::SPIRE_AGENT_CONFIG_HASH).map(String::as_str),
            Some("hash-1")
        );
    }

    #[test]
    fn agent_projects_a_server_audience_token() {
        let ds = build(&spec());
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let token_volume = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == "spire-token")
            .expect("token volume");
        let projection = &token_volume.projected.as_ref().unwrap().sources.as_ref().unwrap()[0];
        let token = projection.service_account_token.as_ref().unwrap();
        assert_eq!(token.audience.as_deref(), Some("spire-server"));
    }

    #[test]
    fn socket_dir_is_a_host_path() {
        let ds = build(&spec());
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let socket = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == "spire-agent-socket-dir")
            .expect("socket volume");
        assert_eq!(
            socket.host_path.as_ref().unwrap().path,
            "/run/spire/agent-sockets"
        );
        assert_eq!(pod.host_pid, Some(true));
    }

    #[test]
    fn bundle_config_map_name_flows_through() {
        let mut s = spec();
        s.bundle_config_map = "custom-bundle".to_string();
        let ds = build(&s);
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let bundle = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == "spire-bundle")
            .unwrap();
        assert_eq!(bundle.config_map.as_ref().unwrap().name, "custom-bundle");
    }
}
