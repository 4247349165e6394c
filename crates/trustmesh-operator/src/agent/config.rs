//! SPIRE agent configuration rendering.
//!
//! Same canonical-JSON pattern as server.conf: sorted keys, fixed
//! indentation, trimmed before hashing.

use serde_json::{json, Value};

use trustmesh_common::constants::names;
use trustmesh_common::crd::SpireAgentSpec;
use trustmesh_common::{Error, Result};

/// Directory the agent exposes its Workload API socket in (hostPath shared
/// with the CSI driver).
pub const AGENT_SOCKET_DIR: &str = "/run/spire/agent-sockets";

/// Render agent.conf as canonical indented JSON.
pub fn render_agent_conf(spec: &SpireAgentSpec) -> Result<String> {
    let conf = agent_conf_value(spec)?;
    serde_json::to_string_pretty(&conf)
        .map_err(|e| Error::rendering_for("agent.conf", e.to_string()))
}

/// Build the agent.conf document.
pub fn agent_conf_value(spec: &SpireAgentSpec) -> Result<Value> {
    if spec.trust_domain.is_empty() {
        return Err(Error::rendering_for("agent.conf", "trust domain is empty"));
    }
    if spec.cluster_name.is_empty() {
        return Err(Error::rendering_for("agent.conf", "cluster name is empty"));
    }

    Ok(json!({
        "agent": {
            "data_dir": "/run/spire",
            "log_level": spec.log_level.to_uppercase(),
            "retry_bootstrap": true,
            "server_address": names::SPIRE_SERVER,
            "server_port": "443",
            "socket_path": format!("{AGENT_SOCKET_DIR}/spire-agent.sock"),
            "trust_bundle_path": "/run/spire/bundle/bundle.crt",
            "trust_domain": spec.trust_domain
        },
        "health_checks": {
            "bind_address": "0.0.0.0",
            "bind_port": "4246",
            "listener_enabled": true,
            "live_path": "/live",
            "ready_path": "/ready"
        },
        "plugins": {
            "KeyManager": [{
                "memory": { "plugin_data": {} }
            }],
            "NodeAttestor": [{
                "k8s_psat": {
                    "plugin_data": {
                        "cluster": spec.cluster_name,
                        "token_path": "/var/run/secrets/tokens/spire-agent"
                    }
                }
            }],
            "WorkloadAttestor": [{
                "k8s": {
                    "plugin_data": {
                        "disable_container_selectors": false,
                        "skip_kubelet_verification": true
                    }
                }
            }]
        },
        "telemetry": {
            "Prometheus": {
                "host": "0.0.0.0",
                "port": "9402"
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustmesh_common::hash::config_hash;

    fn spec() -> SpireAgentSpec {
        SpireAgentSpec {
            trust_domain: "cluster1.example.com".to_string(),
            cluster_name: "c1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn agent_conf_points_at_the_server_service() {
        let conf = agent_conf_value(&spec()).unwrap();
        assert_eq!(conf["agent"]["server_address"], "spire-server");
        assert_eq!(conf["agent"]["trust_domain"], "cluster1.example.com");
        assert_eq!(
            conf["agent"]["socket_path"],
            "/run/spire/agent-sockets/spire-agent.sock"
        );
        assert_eq!(
            conf["plugins"]["NodeAttestor"][0]["k8s_psat"]["plugin_data"]["cluster"],
            "c1"
        );
    }

    #[test]
    fn render_is_byte_stable() {
        let a = render_agent_conf(&spec()).unwrap();
        let b = render_agent_conf(&spec()).unwrap();
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn missing_cluster_name_fails() {
        let mut bad = spec();
        bad.cluster_name.clear();
        assert!(render_agent_conf(&bad).is_err());
    }
}
