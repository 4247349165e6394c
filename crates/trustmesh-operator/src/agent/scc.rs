//! SecurityContextConstraints for the agent.
//!
//! The agent binds node-local sockets through a hostPath and reads host
//! process state, which the restricted SCC forbids.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use trustmesh_common::constants::{components, names, standard_labels, OPERATOR_NAMESPACE};
use trustmesh_common::crd::{SccStrategy, SecurityContextConstraints, SpireAgentSpec};

use super::daemonset::AGENT_APP_NAME;

pub fn build_scc(spec: &SpireAgentSpec) -> SecurityContextConstraints {
    let mut scc = SecurityContextConstraints::new(ObjectMeta {
        name: Some(names::SPIRE_AGENT.to_string()),
        labels: Some(standard_labels(
            AGENT_APP_NAME,
            components::NODE_AGENT,
            spec.common.labels.as_ref(),
        )),
        ..Default::default()
    });

    scc.allow_host_dir_volume_plugin = true;
    scc.allow_host_ipc = false;
    scc.allow_host_network = false;
    scc.allow_host_pid = true;
    scc.allow_host_ports = false;
    scc.allow_privileged_container = true;
    scc.read_only_root_filesystem = true;
    scc.required_drop_capabilities = vec!["ALL".to_string()];
    scc.fs_group = SccStrategy::run_as_any();
    scc.run_as_user = SccStrategy::run_as_any();
    scc.se_linux_context = SccStrategy::run_as_any();
    scc.supplemental_groups = SccStrategy::run_as_any();
    scc.users = vec![format!(
        "system:serviceaccount:{OPERATOR_NAMESPACE}:{}",
        names::SPIRE_AGENT
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scc_grants_host_path_and_host_pid() {
        let scc = build_scc(&SpireAgentSpec::default());
        assert!(scc.allow_host_dir_volume_plugin);
        assert!(scc.allow_host_pid);
        assert!(!scc.allow_host_network);
        assert!(scc.volumes.contains(&"hostPath".to_string()));
        assert_eq!(
            scc.users,
            vec!["system:serviceaccount:trustmesh-system:spire-agent".to_string()]
        );
        assert_eq!(scc.run_as_user.type_.as_deref(), Some("RunAsAny"));
    }
}
