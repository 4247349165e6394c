//! Process-wide operator configuration, read once from the environment.

use std::env;

use trustmesh_common::constants::env as env_vars;
use trustmesh_common::crd::string_to_bool;
use trustmesh_common::{Error, Result};

/// Everything the operator reads from its environment at startup.
///
/// Create-only mode never changes during a process's lifetime: when true,
/// every reconciler creates missing children but never updates existing
/// ones.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Name of the external OperatorCondition object the `Upgradeable`
    /// signal is published on
    pub operator_condition_name: String,

    /// Create-if-missing-but-never-update mode
    pub create_only: bool,

    /// Workload image references
    pub images: Images,

    /// Proxy settings validated against the trusted CA bundle
    pub proxy: ProxySettings,
}

/// Image references for the managed workloads.
#[derive(Clone, Debug)]
pub struct Images {
    pub spire_server: String,
    pub spire_agent: String,
    pub spiffe_csi_driver: String,
    pub oidc_discovery_provider: String,
    pub controller_manager: String,
    pub node_driver_registrar: String,
    pub csi_init_container: String,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            spire_server: "ghcr.io/spiffe/spire-server:1.12.4".to_string(),
            spire_agent: "ghcr.io/spiffe/spire-agent:1.12.4".to_string(),
            spiffe_csi_driver: "ghcr.io/spiffe/spiffe-csi-driver:0.2.7".to_string(),
            oidc_discovery_provider: "ghcr.io/spiffe/oidc-discovery-provider:1.12.4".to_string(),
            controller_manager: "ghcr.io/spiffe/spire-controller-manager:0.6.2".to_string(),
            node_driver_registrar: "registry.k8s.io/sig-storage/csi-node-driver-registrar:v2.13.0"
                .to_string(),
            csi_init_container: "docker.io/library/busybox:1.36".to_string(),
        }
    }
}

/// Proxy-related environment, paired with the trusted CA bundle reference.
#[derive(Clone, Debug, Default)]
pub struct ProxySettings {
    pub http_proxy: String,
    pub https_proxy: String,
    pub trusted_ca_bundle_config_map: String,
}

impl ProxySettings {
    /// True if either proxy variable is configured.
    pub fn proxy_enabled(&self) -> bool {
        !self.http_proxy.is_empty() || !self.https_proxy.is_empty()
    }
}

fn env_or(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

impl OperatorConfig {
    /// Read the configuration from the environment.
    ///
    /// `OPERATOR_CONDITION_NAME` is required; image references fall back to
    /// the upstream SPIRE images when unset.
    pub fn from_env() -> Result<Self> {
        let operator_condition_name = env::var(env_vars::OPERATOR_CONDITION_NAME)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                Error::environment(env_vars::OPERATOR_CONDITION_NAME, "must be set and non-empty")
            })?;

        let create_only = env::var(env_vars::CREATE_ONLY_MODE)
            .map(|v| string_to_bool(&v) || v.trim() == "1")
            .unwrap_or(false);

        let defaults = Images::default();
        let images = Images {
            spire_server: env_or(env_vars::IMAGE_SPIRE_SERVER, &defaults.spire_server),
            spire_agent: env_or(env_vars::IMAGE_SPIRE_AGENT, &defaults.spire_agent),
            spiffe_csi_driver: env_or(env_vars::IMAGE_SPIFFE_CSI_DRIVER, &defaults.spiffe_csi_driver),
            oidc_discovery_provider: env_or(
                env_vars::IMAGE_OIDC_DISCOVERY_PROVIDER,
                &defaults.oidc_discovery_provider,
            ),
            controller_manager: env_or(
                env_vars::IMAGE_CONTROLLER_MANAGER,
                &defaults.controller_manager,
            ),
            node_driver_registrar: env_or(
                env_vars::IMAGE_NODE_DRIVER_REGISTRAR,
                &defaults.node_driver_registrar,
            ),
            csi_init_container: env_or(
                env_vars::IMAGE_CSI_INIT_CONTAINER,
                &defaults.csi_init_container,
            ),
        };

        let proxy = ProxySettings {
            http_proxy: env::var(env_vars::HTTP_PROXY).unwrap_or_default(),
            https_proxy: env::var(env_vars::HTTPS_PROXY).unwrap_or_default(),
            trusted_ca_bundle_config_map: env::var(env_vars::TRUSTED_CA_BUNDLE_CONFIGMAP)
                .unwrap_or_default(),
        };

        Ok(Self {
            operator_condition_name,
            create_only,
            images,
            proxy,
        })
    }

    /// Fixed configuration for unit tests.
    pub fn for_testing() -> Self {
        Self {
            operator_condition_name: "trustmesh-operator.v0.3.0".to_string(),
            create_only: false,
            images: Images::default(),
            proxy: ProxySettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_enabled_when_either_variable_set() {
        let mut proxy = ProxySettings::default();
        assert!(!proxy.proxy_enabled());
        proxy.http_proxy = "http://proxy:3128".to_string();
        assert!(proxy.proxy_enabled());

        let proxy = ProxySettings {
            https_proxy: "http://proxy:3128".to_string(),
            ..Default::default()
        };
        assert!(proxy.proxy_enabled());
    }

    #[test]
    fn test_config_defaults_are_complete() {
        let config = OperatorConfig::for_testing();
        assert!(!config.create_only);
        assert!(config.images.spire_server.contains("spire-server"));
        assert!(config.images.node_driver_registrar.contains("csi-node-driver-registrar"));
    }
}
