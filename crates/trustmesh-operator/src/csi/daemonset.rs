//! SPIFFE CSI driver DaemonSet and CSIDriver builders.

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, HostPathVolumeSource, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::api::storage::v1::{CSIDriver, CSIDriverSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use trustmesh_common::constants::{
    components, names, selector_labels, standard_labels, OPERATOR_NAMESPACE,
};
use trustmesh_common::crd::SpiffeCsiDriverSpec;

use crate::config::{Images, ProxySettings};
use crate::workload::add_proxy_env;

/// Component label value for everything owned by the CSI reconciler.
pub const CSI_APP_NAME: &str = "spiffe-csi-driver";

const KUBELET_PLUGIN_DIR: &str = "/var/lib/kubelet/plugins/csi.spiffe.io";
const KUBELET_REGISTRATION_DIR: &str = "/var/lib/kubelet/plugins_registry";
const KUBELET_PODS_DIR: &str = "/var/lib/kubelet/pods";

/// Build the CSIDriver registration object.
pub fn build_csi_driver(spec: &SpiffeCsiDriverSpec) -> CSIDriver {
    CSIDriver {
        metadata: ObjectMeta {
            name: Some(names::CSI_DRIVER.to_string()),
            labels: Some(standard_labels(
                CSI_APP_NAME,
                components::CSI,
                spec.common.labels.as_ref(),
            )),
            ..Default::default()
        },
        spec: CSIDriverSpec {
            attach_required: Some(false),
            pod_info_on_mount: Some(true),
            fs_group_policy: Some("None".to_string()),
            volume_lifecycle_modes: Some(vec!["Ephemeral".to_string()]),
            ..Default::default()
        },
    }
}

/// Build the CSI driver DaemonSet: the driver plus the kubelet registrar,
/// preceded by an init container that fixes the socket directory's SELinux
/// context.
pub fn build_daemon_set(
    spec: &SpiffeCsiDriverSpec,
    images: &Images,
    proxy: &ProxySettings,
) -> DaemonSet {
    let labels = standard_labels(CSI_APP_NAME, components::CSI, spec.common.labels.as_ref());

    let init_container = Container {
        name: "set-context".to_string(),
        image: Some(images.csi_init_container.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec![
            "chcon".to_string(),
            "-Rvt".to_string(),
            "container_file_t".to_string(),
            "spire-agent-socket/".to_string(),
        ]),
        working_dir: Some("/".to_string()),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: "spire-agent-socket-dir".to_string(),
            mount_path: "/spire-agent-socket".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let driver_container = Container {
        name: names::SPIFFE_CSI_DRIVER.to_string(),
        image: Some(images.spiffe_csi_driver.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![
            "-workload-api-socket-dir".to_string(),
            "/spire-agent-socket".to_string(),
            "-plugin-name".to_string(),
            names::CSI_DRIVER.to_string(),
            "-csi-socket-path".to_string(),
            "/spiffe-csi/csi.sock".to_string(),
        ]),
        env: Some(vec![EnvVar {
            name: "MY_NODE_NAME".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "spec.nodeName".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        resources: spec.common.resources.clone(),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "spire-agent-socket-dir".to_string(),
                mount_path: "/spire-agent-socket".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "spiffe-csi-socket-dir".to_string(),
                mount_path: "/spiffe-csi".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "mountpoint-dir".to_string(),
                mount_path: KUBELET_PODS_DIR.to_string(),
                mount_propagation: Some("Bidirectional".to_string()),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let registrar_container = Container {
        name: "node-driver-registrar".to_string(),
        image: Some(images.node_driver_registrar.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![
            "-csi-address".to_string(),
            "/spiffe-csi/csi.sock".to_string(),
            "-kubelet-registration-path".to_string(),
            format!("{KUBELET_PLUGIN_DIR}/csi.sock"),
        ]),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "spiffe-csi-socket-dir".to_string(),
                mount_path: "/spiffe-csi".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "kubelet-plugin-registration-dir".to_string(),
                mount_path: "/registration".to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let mut pod_spec = PodSpec {
        service_account_name: Some(names::SPIFFE_CSI_DRIVER.to_string()),
        init_containers: Some(vec![init_container]),
        containers: vec![driver_container, registrar_container],
        volumes: Some(vec![
            host_path_volume("spire-agent-socket-dir", spec.agent_socket_path.as_str(), "DirectoryOrCreate"),
            host_path_volume("spiffe-csi-socket-dir", KUBELET_PLUGIN_DIR, "DirectoryOrCreate"),
            host_path_volume(
                "kubelet-plugin-registration-dir",
                KUBELET_REGISTRATION_DIR,
                "Directory",
            ),
            host_path_volume("mountpoint-dir", KUBELET_PODS_DIR, "Directory"),
        ]),
        affinity: spec.common.affinity.clone(),
        node_selector: spec.common.node_selector.clone(),
        tolerations: spec.common.tolerations.clone(),
        ..Default::default()
    };
    add_proxy_env(&mut pod_spec, proxy);

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(names::SPIFFE_CSI_DRIVER.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector_labels(CSI_APP_NAME)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn host_path_volume(name: &str, path: &str, type_: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: Some(type_.to_string()),
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(spec: &SpiffeCsiDriverSpec) -> DaemonSet {
        build_daemon_set(spec, &Images::default(), &ProxySettings::default())
    }

    #[test]
    fn csi_driver_registration_is_ephemeral_only() {
        let driver = build_csi_driver(&SpiffeCsiDriverSpec::default());
        let spec = driver.spec;
        assert_eq!(spec.attach_required, Some(false));
        assert_eq!(spec.pod_info_on_mount, Some(true));
        assert_eq!(spec.volume_lifecycle_modes.unwrap(), vec!["Ephemeral"]);
    }

    #[test]
    fn driver_pod_mounts_kubelet_directories() {
        let ds = build(&SpiffeCsiDriverSpec::default());
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.init_containers.as_ref().unwrap().len(), 1);

        let volumes = pod.volumes.as_ref().unwrap();
        let paths: Vec<&str> = volumes
            .iter()
            .filter_map(|v| v.host_path.as_ref())
            .map(|hp| hp.path.as_str())
            .collect();
        assert!(paths.contains(&"/run/spire/agent-sockets"));
        assert!(paths.contains(&"/var/lib/kubelet/plugins/csi.spiffe.io"));
        assert!(paths.contains(&"/var/lib/kubelet/plugins_registry"));
        assert!(paths.contains(&"/var/lib/kubelet/pods"));
    }

    #[test]
    fn mountpoint_mount_is_bidirectional() {
        let ds = build(&SpiffeCsiDriverSpec::default());
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let mount = pod.containers[0]
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .find(|m| m.name == "mountpoint-dir")
            .unwrap();
        assert_eq!(mount.mount_propagation.as_deref(), Some("Bidirectional"));
    }

    #[test]
    fn custom_agent_socket_path_flows_through() {
        let spec = SpiffeCsiDriverSpec {
            agent_socket_path: "/run/custom-sockets".to_string(),
            ..Default::default()
        };
        let ds = build(&spec);
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let socket = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == "spire-agent-socket-dir")
            .unwrap();
        assert_eq!(socket.host_path.as_ref().unwrap().path, "/run/custom-sockets");
    }
}
