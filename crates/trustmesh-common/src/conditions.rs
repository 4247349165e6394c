//! Condition types, reasons and merge semantics.
//!
//! Conditions follow the standard `metav1.Condition` contract: a condition's
//! `lastTransitionTime` changes only when its `status` flips, never when only
//! the reason or message is refreshed.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

/// Condition statuses as the API encodes them.
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";

/// Condition types shared across controllers.
pub mod types {
    pub const READY: &str = "Ready";
    pub const UPGRADEABLE: &str = "Upgradeable";
    pub const OPERANDS_AVAILABLE: &str = "OperandsAvailable";
    pub const CREATE_ONLY_MODE: &str = "CreateOnlyMode";
    pub const CONFIGURATION_VALID: &str = "ConfigurationValid";
    pub const TTL_CONFIGURATION_VALID: &str = "TTLConfigurationValid";
    pub const FEDERATION_CONFIGURATION_VALID: &str = "FederationConfigurationValid";

    pub const CONFIG_MAP_AVAILABLE: &str = "ConfigMapAvailable";
    pub const SERVICE_AVAILABLE: &str = "ServiceAvailable";
    pub const SERVICE_ACCOUNT_AVAILABLE: &str = "ServiceAccountAvailable";
    pub const RBAC_AVAILABLE: &str = "RBACAvailable";
    pub const WEBHOOK_AVAILABLE: &str = "WebhookConfigurationAvailable";
    pub const STATEFUL_SET_AVAILABLE: &str = "StatefulSetAvailable";
    pub const DAEMON_SET_AVAILABLE: &str = "DaemonSetAvailable";
    pub const DEPLOYMENT_AVAILABLE: &str = "DeploymentAvailable";
    pub const CSI_DRIVER_AVAILABLE: &str = "CSIDriverAvailable";
    pub const SCC_AVAILABLE: &str = "SecurityContextConstraintsAvailable";
    pub const ROUTE_AVAILABLE: &str = "RouteAvailable";
    pub const CLUSTER_SPIFFE_ID_AVAILABLE: &str = "ClusterSPIFFEIDAvailable";
    pub const FEDERATION_SERVICE_READY: &str = "FederationServiceReady";
    pub const FEDERATION_ROUTE_READY: &str = "FederationRouteReady";
}

/// Condition reasons shared across controllers.
pub mod reasons {
    pub const READY: &str = "Ready";
    pub const FAILED: &str = "Failed";
    pub const IN_PROGRESS: &str = "InProgress";
    pub const NOT_FOUND: &str = "NotFound";
    pub const INITIAL_RECONCILE: &str = "InitialReconcile";
    pub const RECONCILING: &str = "Reconciling";
    pub const UNHEALTHY: &str = "Unhealthy";
    pub const OPERANDS_NOT_READY: &str = "OperandsNotReady";

    pub const CREATE_ONLY_MODE_ENABLED: &str = "CreateOnlyModeEnabled";
    pub const CREATE_ONLY_MODE_DISABLED: &str = "CreateOnlyModeDisabled";

    pub const TTL_VALIDATION_FAILED: &str = "TTLValidationFailed";
    pub const TTL_VALIDATION_WARNING: &str = "TTLValidationWarning";
    pub const TTL_VALIDATION_SUCCEEDED: &str = "TTLValidationSucceeded";
    pub const INVALID_JWT_ISSUER_URL: &str = "InvalidJWTIssuerURL";
    pub const VALID_JWT_ISSUER_URL: &str = "ValidJWTIssuerURL";
    pub const INVALID_FEDERATION_CONFIGURATION: &str = "InvalidFederationConfiguration";
    pub const VALID_FEDERATION_CONFIGURATION: &str = "ValidFederationConfiguration";
    pub const PROXY_CONFIGURATION_INVALID: &str = "ProxyConfigurationInvalid";

    pub const FEDERATION_ROUTE_DISABLED: &str = "FederationRouteDisabled";
}

/// Operand summary message constants the aggregator matches on.
pub mod messages {
    pub const CR_NOT_FOUND: &str = "CR not found";
    pub const WAITING_INITIAL_RECONCILE: &str = "Waiting for initial reconciliation";
    pub const RECONCILING: &str = "Reconciling";
}

/// Build a condition. `last_transition_time` is filled in by [`set_condition`].
pub fn new_condition(type_: &str, status: &str, reason: &str, message: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Time(k8s_openapi::chrono::DateTime::UNIX_EPOCH),
        observed_generation: None,
    }
}

/// Find a condition by type.
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Returns true if the condition of the given type exists with status True.
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == CONDITION_TRUE)
}

/// Merge a condition into the set.
///
/// Same-type conditions are replaced; `lastTransitionTime` is carried over
/// from the existing condition unless the status actually changed, in which
/// case `now` is stamped.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition, now: Time) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.clone()
            } else {
                now
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = now;
            conditions.push(condition);
        }
    }
}
