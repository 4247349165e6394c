//! Typed `security.openshift.io/v1 SecurityContextConstraints` resource.
//!
//! SCCs have no spec/status envelope — their policy fields sit at the top
//! level — so the CRD derive does not fit and `kube::Resource` is implemented
//! by hand instead.

use std::borrow::Cow;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ClusterResourceScope;
use serde::{Deserialize, Serialize};

/// Security context constraints granted to an operand's service account.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContextConstraints {
    /// API version; fixed to security.openshift.io/v1
    #[serde(default = "SecurityContextConstraints::default_api_version")]
    pub api_version: String,

    /// Kind; fixed to SecurityContextConstraints
    #[serde(default = "SecurityContextConstraints::default_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    #[serde(default)]
    pub allow_host_dir_volume_plugin: bool,
    #[serde(default)]
    pub allow_host_ipc: bool,
    #[serde(default)]
    pub allow_host_network: bool,
    #[serde(default)]
    pub allow_host_pid: bool,
    #[serde(default)]
    pub allow_host_ports: bool,
    #[serde(default)]
    pub allow_privilege_escalation: Option<bool>,
    #[serde(default)]
    pub allow_privileged_container: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_add_capabilities: Vec<String>,
    #[serde(default)]
    pub fs_group: SccStrategy,
    #[serde(default)]
    pub read_only_root_filesystem: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_drop_capabilities: Vec<String>,
    #[serde(default)]
    pub run_as_user: SccStrategy,
    #[serde(default)]
    pub se_linux_context: SccStrategy,
    #[serde(default)]
    pub supplemental_groups: SccStrategy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
}

/// Strategy block used by several SCC fields.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SccStrategy {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

impl SccStrategy {
    pub fn run_as_any() -> Self {
        Self {
            type_: Some("RunAsAny".to_string()),
        }
    }
}

impl SecurityContextConstraints {
    fn default_api_version() -> String {
        "security.openshift.io/v1".to_string()
    }

    fn default_kind() -> String {
        "SecurityContextConstraints".to_string()
    }

    /// Empty SCC with the fixed apiVersion/kind pair filled in.
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            ..Default::default()
        }
    }
}

impl kube::Resource for SecurityContextConstraints {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "SecurityContextConstraints".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "security.openshift.io".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "securitycontextconstraints".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn scc_resource_coordinates() {
        assert_eq!(SecurityContextConstraints::kind(&()), "SecurityContextConstraints");
        assert_eq!(SecurityContextConstraints::group(&()), "security.openshift.io");
        assert_eq!(SecurityContextConstraints::version(&()), "v1");
        assert_eq!(
            SecurityContextConstraints::plural(&()),
            "securitycontextconstraints"
        );
    }

    #[test]
    fn scc_serializes_with_type_meta() {
        let scc = SecurityContextConstraints::new(ObjectMeta {
            name: Some("spire-agent".to_string()),
            ..Default::default()
        });
        let value = serde_json::to_value(&scc).unwrap();
        assert_eq!(value["apiVersion"], "security.openshift.io/v1");
        assert_eq!(value["kind"], "SecurityContextConstraints");
        assert_eq!(value["metadata"]["name"], "spire-agent");
    }
}
