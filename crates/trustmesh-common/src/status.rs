//! Per-reconcile status collection and transactional application.
//!
//! Reconcilers stage conditions into a [`Manager`] while they work; on exit
//! the collected set is merged into the CR's live conditions and written
//! through the status subresource with optimistic-concurrency retry. A patch
//! is only issued when the merged set actually differs, so status-triggered
//! watch events cannot re-trigger the reconciler into a storm.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use k8s_openapi::chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::conditions::{self, new_condition, set_condition, CONDITION_FALSE, CONDITION_TRUE};
use crate::crd::HasConditionalStatus;
use crate::Result;

/// Attempts made against status-subresource write conflicts.
const STATUS_UPDATE_RETRIES: usize = 3;

/// Collects conditions during a reconcile and applies them on exit.
#[derive(Default)]
pub struct Manager {
    staged: Vec<Condition>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a condition. Staging the same type again replaces the earlier
    /// entry, so the last call wins.
    pub fn add_condition(&mut self, type_: &str, reason: &str, message: &str, status: &str) {
        self.staged.retain(|c| c.type_ != type_);
        self.staged.push(new_condition(type_, status, reason, message));
    }

    /// True if a condition of this type has been staged.
    pub fn has_condition(&self, type_: &str) -> bool {
        self.staged.iter().any(|c| c.type_ == type_)
    }

    /// Merge the staged set into `existing` with transition-time semantics,
    /// then derive the `Ready` condition unless one was staged explicitly.
    pub fn merge(&self, existing: &mut Vec<Condition>, now: Time) {
        for condition in &self.staged {
            set_condition(existing, condition.clone(), now.clone());
        }
        if !self.has_condition(conditions::types::READY) {
            if let Some(ready) = derive_ready(existing) {
                set_condition(existing, ready, now);
            }
        }
    }

    /// Apply the staged conditions to the CR's status subresource.
    ///
    /// Fetches a fresh copy each attempt so a conflicting writer never causes
    /// lost updates; retries on 409. `decorate` lets callers add fields next
    /// to `conditions` in the status document (the aggregator uses it for the
    /// operand summaries). Disappearance of the CR is a silent success.
    pub async fn apply<K, F>(&self, api: &Api<K>, name: &str, decorate: F) -> Result<()>
    where
        K: Resource<DynamicType = ()> + HasConditionalStatus + Clone + DeserializeOwned + std::fmt::Debug,
        F: Fn(&K, &mut serde_json::Map<String, serde_json::Value>),
    {
        for attempt in 0..STATUS_UPDATE_RETRIES {
            let Some(fresh) = api.get_opt(name).await? else {
                debug!(name = %name, "resource gone before status update, skipping");
                return Ok(());
            };

            let mut conditions = fresh
                .conditional_status()
                .map(|s| s.conditions.clone())
                .unwrap_or_default();
            let before = conditions.clone();
            self.merge(&mut conditions, Time(Utc::now()));

            if conditions == before {
                debug!(name = %name, "status unchanged, skipping update");
                return Ok(());
            }

            let mut status = serde_json::Map::new();
            status.insert(
                "conditions".to_string(),
                serde_json::to_value(&conditions).unwrap_or_default(),
            );
            decorate(&fresh, &mut status);
            let patch = serde_json::json!({ "status": serde_json::Value::Object(status) });

            match api
                .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(_) => return Ok(()),
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    warn!(name = %name, attempt, "status update conflict, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(crate::Error::internal_with_context(
            "status",
            format!("status update for {name} kept conflicting"),
        ))
    }
}

/// Derive `Ready` from the other conditions: any `False` condition besides
/// `CreateOnlyMode` makes the resource not ready. A feature that was
/// deliberately disabled reports `False` without degrading readiness.
fn derive_ready(conditions: &[Condition]) -> Option<Condition> {
    let considered: Vec<&Condition> = conditions
        .iter()
        .filter(|c| {
            c.type_ != conditions::types::READY && c.type_ != conditions::types::CREATE_ONLY_MODE
        })
        .collect();
    if considered.is_empty() {
        return None;
    }

    let failed: Vec<&str> = considered
        .iter()
        .filter(|c| c.status == CONDITION_FALSE)
        .filter(|c| c.reason != conditions::reasons::FEDERATION_ROUTE_DISABLED)
        .map(|c| c.type_.as_str())
        .collect();

    Some(if failed.is_empty() {
        new_condition(
            conditions::types::READY,
            CONDITION_TRUE,
            conditions::reasons::READY,
            "All resources applied",
        )
    } else {
        new_condition(
            conditions::types::READY,
            CONDITION_FALSE,
            conditions::reasons::FAILED,
            &format!("Degraded conditions: {}", failed.join(", ")),
        )
    })
}

/// Stamp `Ready=False/InitialReconcile` on a CR that has never been
/// reconciled, so consumers can distinguish "never seen" from "failed".
pub async fn set_initial_reconciliation_status<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: Resource<DynamicType = ()> + HasConditionalStatus + Clone + DeserializeOwned + std::fmt::Debug,
{
    let Some(fresh) = api.get_opt(name).await? else {
        return Ok(());
    };
    let has_conditions = fresh
        .conditional_status()
        .map(|s| !s.conditions.is_empty())
        .unwrap_or(false);
    if has_conditions {
        return Ok(());
    }

    let mut manager = Manager::new();
    manager.add_condition(
        conditions::types::READY,
        conditions::reasons::INITIAL_RECONCILE,
        "Reconciliation has started",
        CONDITION_FALSE,
    );
    manager.apply(api, name, |_, _| {}).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{reasons, types};
    use k8s_openapi::chrono::TimeZone;

    fn time(secs: i64) -> Time {
        Time(Utc.timestamp_opt(secs, 0).unwrap())
    }

    /// Story: a second identical reconcile leaves the condition set
    /// byte-identical, so no status write is issued.
    #[test]
    fn story_identical_merge_is_a_no_op() {
        let mut manager = Manager::new();
        manager.add_condition(types::CONFIG_MAP_AVAILABLE, reasons::READY, "applied", CONDITION_TRUE);
        manager.add_condition(types::SERVICE_AVAILABLE, reasons::READY, "applied", CONDITION_TRUE);

        let mut conditions = Vec::new();
        manager.merge(&mut conditions, time(100));
        let after_first = conditions.clone();

        manager.merge(&mut conditions, time(200));
        assert_eq!(conditions, after_first);
    }

    /// Story: Ready is derived from the per-step conditions unless the
    /// reconciler staged it explicitly.
    #[test]
    fn story_ready_is_derived_from_step_conditions() {
        let mut manager = Manager::new();
        manager.add_condition(types::CONFIG_MAP_AVAILABLE, reasons::READY, "applied", CONDITION_TRUE);
        manager.add_condition(
            types::STATEFUL_SET_AVAILABLE,
            reasons::FAILED,
            "create failed",
            CONDITION_FALSE,
        );

        let mut conditions = Vec::new();
        manager.merge(&mut conditions, time(1));

        let ready = conditions::find_condition(&conditions, types::READY).unwrap();
        assert_eq!(ready.status, CONDITION_FALSE);
        assert_eq!(ready.reason, reasons::FAILED);
        assert!(ready.message.contains("StatefulSetAvailable"));
    }

    #[test]
    fn ready_true_when_all_steps_true() {
        let mut manager = Manager::new();
        manager.add_condition(types::CONFIG_MAP_AVAILABLE, reasons::READY, "applied", CONDITION_TRUE);

        let mut conditions = Vec::new();
        manager.merge(&mut conditions, time(1));

        let ready = conditions::find_condition(&conditions, types::READY).unwrap();
        assert_eq!(ready.status, CONDITION_TRUE);
        assert_eq!(ready.reason, reasons::READY);
    }

    #[test]
    fn deliberately_disabled_route_does_not_degrade_ready() {
        let mut manager = Manager::new();
        manager.add_condition(types::CONFIG_MAP_AVAILABLE, reasons::READY, "applied", CONDITION_TRUE);
        manager.add_condition(
            types::FEDERATION_ROUTE_READY,
            reasons::FEDERATION_ROUTE_DISABLED,
            "Federation managed route disabled",
            CONDITION_FALSE,
        );

        let mut conditions = Vec::new();
        manager.merge(&mut conditions, time(1));

        let ready = conditions::find_condition(&conditions, types::READY).unwrap();
        assert_eq!(ready.status, CONDITION_TRUE);
    }

    #[test]
    fn create_only_condition_does_not_degrade_ready() {
        let mut manager = Manager::new();
        manager.add_condition(types::CONFIG_MAP_AVAILABLE, reasons::READY, "applied", CONDITION_TRUE);
        manager.add_condition(
            types::CREATE_ONLY_MODE,
            reasons::CREATE_ONLY_MODE_DISABLED,
            "Create-only mode is disabled",
            CONDITION_FALSE,
        );

        let mut conditions = Vec::new();
        manager.merge(&mut conditions, time(1));

        let ready = conditions::find_condition(&conditions, types::READY).unwrap();
        assert_eq!(ready.status, CONDITION_TRUE);
    }

    #[test]
    fn explicit_ready_wins_over_derivation() {
        let mut manager = Manager::new();
        manager.add_condition(types::CONFIG_MAP_AVAILABLE, reasons::READY, "applied", CONDITION_TRUE);
        manager.add_condition(
            types::READY,
            reasons::FAILED,
            "parent CR missing",
            CONDITION_FALSE,
        );

        let mut conditions = Vec::new();
        manager.merge(&mut conditions, time(1));

        let ready = conditions::find_condition(&conditions, types::READY).unwrap();
        assert_eq!(ready.message, "parent CR missing");
    }

    #[test]
    fn staging_same_type_twice_keeps_last() {
        let mut manager = Manager::new();
        manager.add_condition(types::ROUTE_AVAILABLE, reasons::FAILED, "first", CONDITION_FALSE);
        manager.add_condition(types::ROUTE_AVAILABLE, reasons::READY, "second", CONDITION_TRUE);

        let mut conditions = Vec::new();
        manager.merge(&mut conditions, time(1));

        let route = conditions::find_condition(&conditions, types::ROUTE_AVAILABLE).unwrap();
        assert_eq!(route.message, "second");
        assert_eq!(route.status, CONDITION_TRUE);
    }

    /// Story: transition times survive message refreshes across reconciles
    /// (status monotonicity).
    #[test]
    fn story_transition_time_is_monotonic_across_reconciles() {
        let mut conditions = Vec::new();

        let mut first = Manager::new();
        first.add_condition(types::SERVICE_AVAILABLE, reasons::READY, "applied", CONDITION_TRUE);
        first.merge(&mut conditions, time(100));

        let mut second = Manager::new();
        second.add_condition(
            types::SERVICE_AVAILABLE,
            reasons::READY,
            "applied again",
            CONDITION_TRUE,
        );
        second.merge(&mut conditions, time(500));

        let svc = conditions::find_condition(&conditions, types::SERVICE_AVAILABLE).unwrap();
        assert_eq!(svc.last_transition_time, time(100));
        assert_eq!(svc.message, "applied again");
    }
}
