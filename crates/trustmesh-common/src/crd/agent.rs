//! SpireAgent — configuration for the per-node SPIRE agent operand.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonConfig, ConditionalStatus, HasConditionalStatus};

/// Specification for the SPIRE agent operand.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trustmesh.io",
    version = "v1alpha1",
    kind = "SpireAgent",
    plural = "spireagents",
    status = "SpireAgentStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpireAgentSpec {
    /// Trust domain used for SPIFFE identifiers
    #[serde(default)]
    pub trust_domain: String,

    /// Cluster name for node attestation
    #[serde(default)]
    pub cluster_name: String,

    /// Logging level for the operand: debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Name of the ConfigMap holding the trust bundle
    #[serde(default = "default_bundle_config_map")]
    pub bundle_config_map: String,

    #[serde(flatten)]
    pub common: CommonConfig,
}

// Default mirrors the serde/API defaults so hand-built specs behave like
// deserialized ones.
impl Default for SpireAgentSpec {
    fn default() -> Self {
        Self {
            trust_domain: String::new(),
            cluster_name: String::new(),
            log_level: default_log_level(),
            bundle_config_map: default_bundle_config_map(),
            common: CommonConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bundle_config_map() -> String {
    "spire-bundle".to_string()
}

/// Status of the SPIRE agent operand.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpireAgentStatus {
    #[serde(flatten)]
    pub conditional_status: ConditionalStatus,
}

impl HasConditionalStatus for SpireAgent {
    fn conditional_status(&self) -> Option<&ConditionalStatus> {
        self.status.as_ref().map(|s| &s.conditional_status)
    }
}
