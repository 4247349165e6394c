//! Generic diff-and-apply helpers shared by all reconcilers.
//!
//! The subroutine every child object goes through: fetch by name, create if
//! absent, otherwise preserve server-managed fields onto the desired object,
//! compare the semantically relevant projection, and update only on real
//! drift. Create-only mode turns updates into no-ops while leaving creates
//! intact so a fresh install still bootstraps.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::api::storage::v1::CSIDriver;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, PostParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::crd::{ClusterSPIFFEID, Route, SecurityContextConstraints};
use crate::{Error, Result};

/// What the diff-and-apply subroutine did with one child object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Object was absent and has been created
    Created,
    /// Object existed and drifted; an update was issued
    Updated,
    /// Object existed and already matched the desired state
    Unchanged,
    /// Object existed and drifted, but create-only mode suppressed the update
    SkippedCreateOnly,
}

/// Child-object behavior the generic apply needs: which fields the cluster
/// owns and which projection decides whether an update is due.
pub trait ManagedObject: Serialize {
    /// Copy server-managed fields from the live object onto the desired one
    /// and normalize serializer-visible defaults, so the comparison below
    /// sees only real drift.
    fn preserve_server_managed(&mut self, _existing: &Self) {}

    /// The projection compared between live and desired objects. Defaults to
    /// spec + labels, which fits every spec-shaped kind.
    fn comparable(&self) -> serde_json::Value
    where
        Self: Sized,
    {
        projection(self, &["/spec", "/metadata/labels"])
    }
}

/// Extract the given JSON pointers from a serialized object.
fn projection<T: Serialize>(obj: &T, pointers: &[&str]) -> serde_json::Value {
    let value = serde_json::to_value(obj).unwrap_or_default();
    let fields: Vec<serde_json::Value> = pointers
        .iter()
        .map(|p| value.pointer(p).cloned().unwrap_or(serde_json::Value::Null))
        .collect();
    serde_json::Value::Array(fields)
}

/// True if the live object differs from the desired one in the compared
/// projection. Callers must run `preserve_server_managed` first.
pub fn needs_update<K: ManagedObject>(existing: &K, desired: &K) -> bool {
    existing.comparable() != desired.comparable()
}

impl ManagedObject for ConfigMap {
    fn comparable(&self) -> serde_json::Value {
        projection(self, &["/data", "/metadata/labels"])
    }
}

impl ManagedObject for ServiceAccount {
    fn comparable(&self) -> serde_json::Value {
        projection(self, &["/metadata/labels"])
    }
}

impl ManagedObject for ClusterRole {
    fn comparable(&self) -> serde_json::Value {
        projection(self, &["/rules", "/metadata/labels"])
    }
}

impl ManagedObject for Role {
    fn comparable(&self) -> serde_json::Value {
        projection(self, &["/rules", "/metadata/labels"])
    }
}

impl ManagedObject for ClusterRoleBinding {
    fn comparable(&self) -> serde_json::Value {
        projection(self, &["/subjects", "/roleRef", "/metadata/labels"])
    }
}

impl ManagedObject for RoleBinding {
    fn comparable(&self) -> serde_json::Value {
        projection(self, &["/subjects", "/roleRef", "/metadata/labels"])
    }
}

impl ManagedObject for ValidatingWebhookConfiguration {
    fn comparable(&self) -> serde_json::Value {
        projection(self, &["/webhooks", "/metadata/labels"])
    }
}

impl ManagedObject for Service {
    fn preserve_server_managed(&mut self, existing: &Self) {
        let existing_spec = existing.spec.clone().unwrap_or_default();
        let spec = self.spec.get_or_insert_with(Default::default);

        spec.cluster_ip = existing_spec.cluster_ip.clone();
        spec.cluster_ips = existing_spec.cluster_ips.clone();
        spec.ip_families = existing_spec.ip_families.clone();
        spec.ip_family_policy = existing_spec.ip_family_policy.clone();
        spec.internal_traffic_policy = existing_spec.internal_traffic_policy.clone();
        spec.session_affinity = existing_spec.session_affinity.clone();
        if existing_spec.health_check_node_port.unwrap_or(0) != 0 {
            spec.health_check_node_port = existing_spec.health_check_node_port;
        }

        // Default service port protocol to TCP so an unset field does not
        // read as drift against the server-defaulted live object.
        if let Some(ports) = spec.ports.as_mut() {
            for port in ports {
                if port.protocol.as_deref().unwrap_or("").is_empty() {
                    port.protocol = Some("TCP".to_string());
                }
            }
        }
    }
}

impl ManagedObject for StatefulSet {}
impl ManagedObject for DaemonSet {}
impl ManagedObject for Deployment {}
impl ManagedObject for CSIDriver {}
impl ManagedObject for Route {}
impl ManagedObject for ClusterSPIFFEID {}

impl ManagedObject for SecurityContextConstraints {
    fn comparable(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        let labels = value
            .pointer("/metadata/labels")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("metadata");
            map.remove("apiVersion");
            map.remove("kind");
            map.insert("labels".to_string(), labels);
        }
        value
    }
}

/// Fetch-diff-create-or-update one child object.
///
/// The desired object's controller reference must already be set. Returns
/// the outcome so callers can track per-step conditions.
pub async fn apply_resource<K>(api: &Api<K>, mut desired: K, create_only: bool) -> Result<ApplyOutcome>
where
    K: Resource<DynamicType = ()> + ManagedObject + Clone + DeserializeOwned + std::fmt::Debug,
{
    let name = desired.name_any();
    let kind = K::kind(&());

    match api.get_opt(&name).await? {
        None => {
            api.create(&PostParams::default(), &desired).await?;
            info!(kind = %kind, name = %name, "created resource");
            Ok(ApplyOutcome::Created)
        }
        Some(existing) => {
            desired.preserve_server_managed(&existing);
            desired.meta_mut().resource_version = existing.resource_version();

            if !needs_update(&existing, &desired) {
                debug!(kind = %kind, name = %name, "resource is up to date");
                return Ok(ApplyOutcome::Unchanged);
            }
            if create_only {
                info!(kind = %kind, name = %name, "drift detected, skipping update in create-only mode");
                return Ok(ApplyOutcome::SkippedCreateOnly);
            }

            api.replace(&name, &PostParams::default(), &desired).await?;
            info!(kind = %kind, name = %name, "updated resource");
            Ok(ApplyOutcome::Updated)
        }
    }
}

/// Create the object if absent, leave it untouched otherwise.
///
/// Used for children whose content the operator never reconciles after
/// creation, like the bundle ConfigMap that SPIRE itself writes into.
pub async fn create_if_missing<K>(api: &Api<K>, desired: K) -> Result<ApplyOutcome>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
{
    let name = desired.name_any();
    match api.get_opt(&name).await? {
        None => {
            api.create(&PostParams::default(), &desired).await?;
            info!(kind = %K::kind(&()), name = %name, "created resource");
            Ok(ApplyOutcome::Created)
        }
        Some(_) => Ok(ApplyOutcome::Unchanged),
    }
}

/// Build a controller owner reference for the given owner object.
pub fn controller_reference<K>(owner: &K) -> Result<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let uid = owner.meta().uid.clone().ok_or_else(|| {
        Error::internal_with_context("owner-reference", "owner object has no UID")
    })?;
    Ok(OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Install `owner_ref` as the controller reference, replacing any previous
/// controller while leaving non-controller references alone.
pub fn set_controller_reference(meta: &mut ObjectMeta, owner_ref: OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.controller != Some(true));
    refs.push(owner_ref);
}

/// True if `child` does not yet name `owner` as its controller.
pub fn needs_owner_reference_update(child: &ObjectMeta, owner_ref: &OwnerReference) -> bool {
    !child
        .owner_references
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .any(|r| r.controller == Some(true) && r.uid == owner_ref.uid)
}
