//! SpiffeCsiDriver — configuration for the SPIFFE CSI driver operand.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonConfig, ConditionalStatus, HasConditionalStatus};

/// Specification for the SPIFFE CSI driver operand.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trustmesh.io",
    version = "v1alpha1",
    kind = "SpiffeCsiDriver",
    plural = "spiffecsidrivers",
    status = "SpiffeCsiDriverStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpiffeCsiDriverSpec {
    /// Logging level for the operand: debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory the SPIRE agent exposes its workload API socket in
    #[serde(default = "default_agent_socket_path")]
    pub agent_socket_path: String,

    #[serde(flatten)]
    pub common: CommonConfig,
}

// Default mirrors the serde/API defaults so hand-built specs behave like
// deserialized ones.
impl Default for SpiffeCsiDriverSpec {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            agent_socket_path: default_agent_socket_path(),
            common: CommonConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_agent_socket_path() -> String {
    "/run/spire/agent-sockets".to_string()
}

/// Status of the SPIFFE CSI driver operand.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpiffeCsiDriverStatus {
    #[serde(flatten)]
    pub conditional_status: ConditionalStatus,
}

impl HasConditionalStatus for SpiffeCsiDriver {
    fn conditional_status(&self) -> Option<&ConditionalStatus> {
        self.status.as_ref().map(|s| &s.conditional_status)
    }
}
