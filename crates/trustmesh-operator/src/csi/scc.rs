//! SecurityContextConstraints for the CSI driver.
//!
//! The driver mounts workload volumes under the kubelet's pod directory,
//! which requires privileged containers and hostPath access.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use trustmesh_common::constants::{components, names, standard_labels, OPERATOR_NAMESPACE};
use trustmesh_common::crd::{SccStrategy, SecurityContextConstraints, SpiffeCsiDriverSpec};

use super::daemonset::CSI_APP_NAME;

pub fn build_scc(spec: &SpiffeCsiDriverSpec) -> SecurityContextConstraints {
    let mut scc = SecurityContextConstraints::new(ObjectMeta {
        name: Some(names::SPIFFE_CSI_DRIVER.to_string()),
        labels: Some(standard_labels(
            CSI_APP_NAME,
            components::CSI,
            spec.common.labels.as_ref(),
        )),
        ..Default::default()
    });

    scc.allow_host_dir_volume_plugin = true;
    scc.allow_host_ipc = false;
    scc.allow_host_network = false;
    scc.allow_host_pid = false;
    scc.allow_host_ports = false;
    scc.allow_privileged_container = true;
    scc.allow_privilege_escalation = Some(true);
    scc.read_only_root_filesystem = true;
    scc.required_drop_capabilities = vec!["ALL".to_string()];
    scc.fs_group = SccStrategy::run_as_any();
    scc.run_as_user = SccStrategy::run_as_any();
    scc.se_linux_context = SccStrategy::run_as_any();
    scc.supplemental_groups = SccStrategy::run_as_any();
    scc.users = vec![format!(
        "system:serviceaccount:{OPERATOR_NAMESPACE}:{}",
        names::SPIFFE_CSI_DRIVER
    )];
    scc.volumes = vec![
        "configMap".to_string(),
        "emptyDir".to_string(),
        "hostPath".to_string(),
        "projected".to_string(),
        "secret".to_string(),
    ];
    scc
}
