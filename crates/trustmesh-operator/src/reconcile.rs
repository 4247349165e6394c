//! Shared pieces of the operand reconcile pipeline.
//!
//! All four operand reconcilers follow the same shape: load the CR, adopt it
//! under the top-level CR, surface create-only mode, validate, then walk the
//! child set with the diff-and-apply subroutine while tracking per-step
//! conditions. The pieces that are identical across operands live here.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, OwnerReference};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use trustmesh_common::conditions::{
    find_condition, reasons, types, CONDITION_FALSE, CONDITION_TRUE,
};
use trustmesh_common::crd::{TrustMesh, SINGLETON_NAME};
use trustmesh_common::events::EventPublisher;
use trustmesh_common::kube_utils::{
    apply_resource, controller_reference, needs_owner_reference_update, set_controller_reference,
    ApplyOutcome, ManagedObject,
};
use trustmesh_common::status;
use trustmesh_common::{Error, Result};

use crate::config::OperatorConfig;

/// Requeue delay for retryable reconcile errors.
pub const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Shared state handed to every reconciler.
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,
    /// Process-wide operator configuration
    pub config: OperatorConfig,
    /// Event publisher for warning/normal events on CR objects
    pub events: Arc<dyn EventPublisher>,
}

impl Context {
    pub fn new(client: Client, config: OperatorConfig, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            client,
            config,
            events,
        }
    }
}

/// Error policy shared by all controllers: transient errors requeue with a
/// delay, user-input errors wait for a spec change.
pub fn error_action(error: &Error) -> Action {
    if error.is_retryable() {
        Action::requeue(RETRY_DELAY)
    } else {
        Action::await_change()
    }
}

/// Fetch the top-level CR; `None` means it does not exist.
pub async fn fetch_trust_mesh(client: &Client) -> Result<Option<TrustMesh>> {
    let api: Api<TrustMesh> = Api::all(client.clone());
    Ok(api.get_opt(SINGLETON_NAME).await?)
}

/// One-shot ownership migration: make the top-level CR the operand's
/// controller so deletion cascades.
pub async fn adopt_operand<K>(api: &Api<K>, operand: &K, trust_mesh: &TrustMesh) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
{
    let owner_ref = controller_reference(trust_mesh)?;
    if !needs_owner_reference_update(operand.meta(), &owner_ref) {
        return Ok(());
    }

    let mut meta = operand.meta().clone();
    set_controller_reference(&mut meta, owner_ref);
    let patch = serde_json::json!({
        "metadata": { "ownerReferences": meta.owner_references }
    });
    api.patch(
        &operand.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    info!(name = %operand.name_any(), "adopted operand under TrustMesh");
    Ok(())
}

/// Surface create-only mode on the operand's conditions.
///
/// The mode is process-wide and set at startup; a `False` condition is only
/// emitted once after a previous `True` so the transition is visible without
/// keeping a permanent condition on every CR.
pub fn handle_create_only_mode(
    existing: &[Condition],
    create_only: bool,
    status: &mut status::Manager,
) -> bool {
    if create_only {
        status.add_condition(
            types::CREATE_ONLY_MODE,
            reasons::CREATE_ONLY_MODE_ENABLED,
            "Create-only mode is active: updates are not reconciled to existing resources",
            CONDITION_TRUE,
        );
    } else if find_condition(existing, types::CREATE_ONLY_MODE)
        .is_some_and(|c| c.status == CONDITION_TRUE)
    {
        status.add_condition(
            types::CREATE_ONLY_MODE,
            reasons::CREATE_ONLY_MODE_DISABLED,
            "Create-only mode is disabled",
            CONDITION_FALSE,
        );
    }
    create_only
}

/// Diff-and-apply one child object and track its per-step condition.
///
/// The owner reference is stamped before the apply so garbage collection
/// cascades from the operand CR. Multiple children may share one condition
/// type; a failure returns immediately so its `False` condition sticks.
pub async fn apply_child<K>(
    api: &Api<K>,
    owner_ref: &OwnerReference,
    mut desired: K,
    create_only: bool,
    status: &mut status::Manager,
    condition_type: &str,
    what: &str,
) -> Result<ApplyOutcome>
where
    K: Resource<DynamicType = ()> + ManagedObject + Clone + DeserializeOwned + std::fmt::Debug,
{
    set_controller_reference(desired.meta_mut(), owner_ref.clone());
    match apply_resource(api, desired, create_only).await {
        Ok(outcome) => {
            status.add_condition(
                condition_type,
                reasons::READY,
                &format!("{what} applied"),
                CONDITION_TRUE,
            );
            Ok(outcome)
        }
        Err(e) => {
            warn!(error = %e, what, "child apply failed");
            status.add_condition(
                condition_type,
                reasons::FAILED,
                &format!("Failed to apply {what}: {e}"),
                CONDITION_FALSE,
            );
            Err(e)
        }
    }
}

/// Stage the failed-parent condition used when the top-level CR is absent.
pub fn stage_missing_trust_mesh(status: &mut status::Manager, operand_kind: &str) {
    status.add_condition(
        types::READY,
        reasons::FAILED,
        &format!("Failed to retrieve TrustMesh for {operand_kind}: CR not found"),
        CONDITION_FALSE,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustmesh_common::conditions::new_condition;

    /// Story: the create-only condition flips to False exactly once after
    /// the mode is turned off, and is absent otherwise.
    #[test]
    fn story_create_only_transition_is_emitted_once() {
        // Mode on: condition staged True.
        let mut status = status::Manager::new();
        assert!(handle_create_only_mode(&[], true, &mut status));
        assert!(status.has_condition(types::CREATE_ONLY_MODE));

        // Mode off, no previous condition: nothing staged.
        let mut status = status::Manager::new();
        assert!(!handle_create_only_mode(&[], false, &mut status));
        assert!(!status.has_condition(types::CREATE_ONLY_MODE));

        // Mode off after a previous True: False staged once.
        let previous = vec![new_condition(
            types::CREATE_ONLY_MODE,
            CONDITION_TRUE,
            reasons::CREATE_ONLY_MODE_ENABLED,
            "",
        )];
        let mut status = status::Manager::new();
        assert!(!handle_create_only_mode(&previous, false, &mut status));
        assert!(status.has_condition(types::CREATE_ONLY_MODE));

        // Mode off after the False was already recorded: nothing staged.
        let previous = vec![new_condition(
            types::CREATE_ONLY_MODE,
            CONDITION_FALSE,
            reasons::CREATE_ONLY_MODE_DISABLED,
            "",
        )];
        let mut status = status::Manager::new();
        assert!(!handle_create_only_mode(&previous, false, &mut status));
        assert!(!status.has_condition(types::CREATE_ONLY_MODE));
    }

    #[test]
    fn error_action_distinguishes_retryable() {
        assert_eq!(error_action(&Error::validation("bad spec")), Action::await_change());
        assert_eq!(
            error_action(&Error::internal("transient")),
            Action::requeue(RETRY_DELAY)
        );
    }
}
