//! SpireOidcDiscoveryProvider — configuration for the OIDC discovery
//! provider operand.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{CommonConfig, ConditionalStatus, HasConditionalStatus};

/// Specification for the OIDC discovery provider operand.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trustmesh.io",
    version = "v1alpha1",
    kind = "SpireOidcDiscoveryProvider",
    plural = "spireoidcdiscoveryproviders",
    status = "SpireOidcDiscoveryProviderStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpireOidcDiscoveryProviderSpec {
    /// Trust domain used for SPIFFE identifiers
    #[serde(default)]
    pub trust_domain: String,

    /// JWT issuer URL served by the discovery document. Must be scheme +
    /// host only — no path, query or fragment.
    #[serde(default)]
    pub jwt_issuer: String,

    /// Logging level for the operand: debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// External certificate for the provider's Route, read by the ingress
    /// router
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_secret_ref: Option<ExternalSecretRef>,

    #[serde(flatten)]
    pub common: CommonConfig,
}

// Default mirrors the serde/API defaults so hand-built specs behave like
// deserialized ones.
impl Default for SpireOidcDiscoveryProviderSpec {
    fn default() -> Self {
        Self {
            trust_domain: String::new(),
            jwt_issuer: String::new(),
            log_level: default_log_level(),
            external_secret_ref: None,
            common: CommonConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Reference to a secret carrying an externally managed TLS certificate.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretRef {
    /// Name of the secret containing tls.crt and tls.key
    pub secret_name: String,
}

/// Status of the OIDC discovery provider operand.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpireOidcDiscoveryProviderStatus {
    #[serde(flatten)]
    pub conditional_status: ConditionalStatus,
}

impl HasConditionalStatus for SpireOidcDiscoveryProvider {
    fn conditional_status(&self) -> Option<&ConditionalStatus> {
        self.status.as_ref().map(|s| &s.conditional_status)
    }
}
