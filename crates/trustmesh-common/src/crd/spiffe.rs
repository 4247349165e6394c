//! Typed `spire.spiffe.io/v1alpha1 ClusterSPIFFEID` resource.
//!
//! The co-located controller-manager watches these; the operator only
//! creates the baseline entry for the OIDC discovery provider's identity.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a ClusterSPIFFEID registration policy.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "spire.spiffe.io",
    version = "v1alpha1",
    kind = "ClusterSPIFFEID",
    plural = "clusterspiffeids"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSPIFFEIDSpec {
    /// Class name binding the entry to one controller-manager instance
    #[serde(default)]
    pub class_name: String,

    /// Template for the SPIFFE ID issued to matching workloads
    pub spiffe_id_template: String,

    /// Pods the policy applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<LabelSelector>,

    /// Namespaces the policy applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,

    /// Extra DNS name templates added to issued SVIDs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_name_templates: Vec<String>,

    /// Populate DNS names from the pod's endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_populate_dns_names: Option<bool>,

    /// Hint propagated to workloads through the Workload API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}
