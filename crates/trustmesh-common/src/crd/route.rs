//! Typed `route.openshift.io/v1 Route` resource.
//!
//! The routing layer's API is not part of `k8s-openapi`, so the fields the
//! operator manages are modelled here. Only the spec surface we produce is
//! covered; unknown fields returned by the server are ignored on read.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// TLS termination strategies used by the operator.
pub const TLS_TERMINATION_PASSTHROUGH: &str = "passthrough";
pub const TLS_TERMINATION_REENCRYPT: &str = "reencrypt";

/// Desired state of an OpenShift Route.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    plural = "routes",
    namespaced,
    status = "RouteStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Externally routable host name
    #[serde(default)]
    pub host: String,

    /// Target service the route points at
    pub to: RouteTargetReference,

    /// Target port on the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,

    /// TLS termination configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,

    /// Wildcard policy; the operator always uses "None"
    #[serde(default = "default_wildcard_policy")]
    pub wildcard_policy: String,
}

fn default_wildcard_policy() -> String {
    "None".to_string()
}

/// Reference from a Route to its backing service.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTargetReference {
    /// Kind of the target; always "Service"
    pub kind: String,

    /// Name of the target service
    pub name: String,

    /// Weight of this target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

impl RouteTargetReference {
    /// Full-weight reference to a service.
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            kind: "Service".to_string(),
            name: name.into(),
            weight: Some(100),
        }
    }
}

/// Port selection for a Route.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    /// Named or numeric target port on the service
    pub target_port: IntOrString,
}

/// TLS termination settings for a Route.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    /// Termination strategy: passthrough, reencrypt or edge
    pub termination: String,

    /// Policy for insecure (plain HTTP) traffic; the operator redirects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<String>,

    /// Reference to a secret carrying an externally managed certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_certificate: Option<RouteSecretReference>,
}

/// Local secret reference used by Route TLS.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteSecretReference {
    /// Name of the referenced secret
    pub name: String,
}

/// Observed state of a Route; the operator only reads it.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    /// Per-router admission records
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<RouteIngress>,
}

/// Admission record for one router.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteIngress {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub router_name: String,
}
