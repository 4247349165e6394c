//! TrustMesh — the top-level singleton CR.
//!
//! Holds the cross-cutting installation settings and aggregates operand
//! readiness in its status. The four operand CRs name this CR as their
//! controller, so deleting it tears the whole control plane down.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonConfig, ConditionalStatus, HasConditionalStatus, OperandStatus};

/// Specification for the TrustMesh singleton.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trustmesh.io",
    version = "v1alpha1",
    kind = "TrustMesh",
    plural = "trustmeshes",
    status = "TrustMeshStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TrustMeshSpec {
    /// Trust domain under which SVIDs are issued (e.g. "apps.example.com")
    #[serde(default)]
    pub trust_domain: String,

    /// Cluster name used in node attestation and entry IDs
    #[serde(default)]
    pub cluster_name: String,

    /// Logging level applied to operands that do not override it.
    /// Valid values: debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(flatten)]
    pub common: CommonConfig,
}

// Default mirrors the serde/API defaults so hand-built specs behave like
// deserialized ones.
impl Default for TrustMeshSpec {
    fn default() -> Self {
        Self {
            trust_domain: String::new(),
            cluster_name: String::new(),
            log_level: default_log_level(),
            common: CommonConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Status for the TrustMesh singleton.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrustMeshStatus {
    /// Summaries of the four operand CRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operands: Vec<OperandStatus>,

    #[serde(flatten)]
    pub conditional_status: ConditionalStatus,
}

impl HasConditionalStatus for TrustMesh {
    fn conditional_status(&self) -> Option<&ConditionalStatus> {
        self.status.as_ref().map(|s| &s.conditional_status)
    }
}
