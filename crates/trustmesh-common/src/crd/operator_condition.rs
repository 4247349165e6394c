//! Typed `operators.coreos.com/v2 OperatorCondition` resource.
//!
//! The lifecycle manager creates one per operator installation; the operator
//! publishes its `Upgradeable` signal on its status subresource and never on
//! its own CRs.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec of an OperatorCondition; written by the lifecycle manager.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v2",
    kind = "OperatorCondition",
    plural = "operatorconditions",
    namespaced,
    status = "OperatorConditionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConditionSpec {
    /// Conditions the operator is expected to manage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Status of an OperatorCondition; the operator writes `Upgradeable` here.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConditionStatus {
    /// Conditions reported by the operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
