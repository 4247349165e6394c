//! TrustMesh aggregator.
//!
//! Owns the singleton top-level CR: summarizes the four operand CRs into
//! per-operand records, folds them into the overall `Ready` and
//! `OperandsAvailable` conditions, and publishes the operator's
//! `Upgradeable` signal on the external OperatorCondition resource (never on
//! the CR itself).

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use k8s_openapi::chrono::Utc;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use trustmesh_common::conditions::{
    find_condition, messages, new_condition, reasons, set_condition, types, CONDITION_FALSE,
    CONDITION_TRUE,
};
use trustmesh_common::constants::OPERATOR_NAMESPACE;
use trustmesh_common::crd::{
    kinds, string_to_bool, HasConditionalStatus, OperandStatus, OperatorCondition, SpiffeCsiDriver,
    SpireAgent, SpireOidcDiscoveryProvider, SpireServer, TrustMesh, SINGLETON_NAME,
};
use trustmesh_common::status;
use trustmesh_common::{Error, Result};

use crate::reconcile::{error_action, handle_create_only_mode, Context};

// =============================================================================
// Operand access
// =============================================================================

/// Narrow read surface the aggregator needs: each operand CR's conditions.
/// `Ok(None)` means the CR does not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperandReader: Send + Sync {
    async fn server_conditions(&self) -> Result<Option<Vec<Condition>>>;
    async fn agent_conditions(&self) -> Result<Option<Vec<Condition>>>;
    async fn csi_conditions(&self) -> Result<Option<Vec<Condition>>>;
    async fn oidc_conditions(&self) -> Result<Option<Vec<Condition>>>;
}

/// Production reader backed by the cluster.
pub struct KubeOperandReader {
    client: Client,
}

impl KubeOperandReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn conditions_of<K>(&self) -> Result<Option<Vec<Condition>>>
    where
        K: kube::Resource<DynamicType = ()>
            + HasConditionalStatus
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
    {
        let api: Api<K> = Api::all(self.client.clone());
        Ok(api.get_opt(SINGLETON_NAME).await?.map(|obj| {
            obj.conditional_status()
                .map(|s| s.conditions.clone())
                .unwrap_or_default()
        }))
    }
}

#[async_trait]
impl OperandReader for KubeOperandReader {
    async fn server_conditions(&self) -> Result<Option<Vec<Condition>>> {
        self.conditions_of::<SpireServer>().await
    }

    async fn agent_conditions(&self) -> Result<Option<Vec<Condition>>> {
        self.conditions_of::<SpireAgent>().await
    }

    async fn csi_conditions(&self) -> Result<Option<Vec<Condition>>> {
        self.conditions_of::<SpiffeCsiDriver>().await
    }

    async fn oidc_conditions(&self) -> Result<Option<Vec<Condition>>> {
        self.conditions_of::<SpireOidcDiscoveryProvider>().await
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Whether a non-ready operand is still converging or actually broken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandState {
    Ready,
    Progressing,
    Failed,
}

/// Classify an operand record.
///
/// Priority order: the `Ready` condition's reason when it names a known
/// progressing or failure reason, then the known message constants, then a
/// case-insensitive substring match, then failed.
pub fn classify_operand_state(operand: &OperandStatus) -> OperandState {
    if string_to_bool(&operand.ready) {
        return OperandState::Ready;
    }

    if let Some(ready) = find_condition(&operand.conditions, types::READY) {
        match ready.reason.as_str() {
            reasons::IN_PROGRESS
            | reasons::NOT_FOUND
            | reasons::INITIAL_RECONCILE
            | reasons::RECONCILING => return OperandState::Progressing,
            reasons::FAILED | reasons::UNHEALTHY | reasons::OPERANDS_NOT_READY => {
                return OperandState::Failed
            }
            reasons::READY => return OperandState::Ready,
            _ => {}
        }
    }

    match operand.message.as_str() {
        messages::CR_NOT_FOUND | messages::WAITING_INITIAL_RECONCILE | messages::RECONCILING => {
            return OperandState::Progressing
        }
        _ => {}
    }

    let message = operand.message.to_lowercase();
    if ["not found", "initial", "reconciling", "progressing"]
        .iter()
        .any(|needle| message.contains(needle))
    {
        return OperandState::Progressing;
    }

    OperandState::Failed
}

/// Build the summary record for one operand from its fetched conditions.
/// `None` means the CR does not exist.
pub fn build_operand_record(kind: &str, fetched: Option<Vec<Condition>>) -> OperandStatus {
    let mut record = OperandStatus {
        kind: kind.to_string(),
        name: SINGLETON_NAME.to_string(),
        ready: "false".to_string(),
        message: String::new(),
        conditions: Vec::new(),
    };

    let Some(conditions) = fetched else {
        record.message = messages::CR_NOT_FOUND.to_string();
        return record;
    };
    if conditions.is_empty() {
        record.message = messages::WAITING_INITIAL_RECONCILE.to_string();
        return record;
    }

    match find_condition(&conditions, types::READY) {
        Some(ready) if ready.status == CONDITION_TRUE => {
            record.ready = "true".to_string();
            record.message = "Ready".to_string();
        }
        Some(ready) => {
            record.message = ready.message.clone();
        }
        None => {
            record.message = messages::RECONCILING.to_string();
        }
    }

    record.conditions = extract_key_conditions(&conditions, string_to_bool(&record.ready));
    record
}

/// Prune an operand's condition list for the aggregated surface.
///
/// Keeps the create-only condition when enabled, and — when the operand is
/// not ready — the `Ready` condition plus any other `False` condition, so
/// consumers see what is wrong without the full set.
pub fn extract_key_conditions(conditions: &[Condition], is_ready: bool) -> Vec<Condition> {
    let mut key_conditions = Vec::new();

    if let Some(create_only) = find_condition(conditions, types::CREATE_ONLY_MODE) {
        if create_only.status == CONDITION_TRUE {
            key_conditions.push(create_only.clone());
        }
    }

    if is_ready {
        return key_conditions;
    }

    if let Some(ready) = find_condition(conditions, types::READY) {
        key_conditions.push(ready.clone());
    }
    for condition in conditions {
        if condition.type_ == types::READY || condition.type_ == types::CREATE_ONLY_MODE {
            continue;
        }
        if condition.status == CONDITION_FALSE {
            key_conditions.push(condition.clone());
        }
    }

    key_conditions
}

// =============================================================================
// Aggregation
// =============================================================================

/// Aggregate view across all operands.
#[derive(Clone, Debug)]
pub struct Aggregate {
    pub operands: Vec<OperandStatus>,
    pub all_ready: bool,
    pub progressing_count: usize,
    pub failed_count: usize,
}

/// Fold the operand records into counts.
pub fn aggregate(operands: Vec<OperandStatus>) -> Aggregate {
    let mut all_ready = true;
    let mut progressing_count = 0;
    let mut failed_count = 0;

    for operand in &operands {
        match classify_operand_state(operand) {
            OperandState::Ready => {}
            OperandState::Progressing => {
                all_ready = false;
                progressing_count += 1;
            }
            OperandState::Failed => {
                all_ready = false;
                failed_count += 1;
            }
        }
    }

    Aggregate {
        operands,
        all_ready,
        progressing_count,
        failed_count,
    }
}

/// Stage `OperandsAvailable` and `Ready` from the aggregate.
///
/// All ready → both `True/Ready`. No failures but something progressing →
/// both `False/InProgress` naming each pending operand. Otherwise both
/// `False/Failed` naming the failed operands.
pub fn stage_aggregate_conditions(agg: &Aggregate, status: &mut status::Manager) {
    if agg.all_ready {
        status.add_condition(
            types::OPERANDS_AVAILABLE,
            reasons::READY,
            "All operand CRs are ready",
            CONDITION_TRUE,
        );
        status.add_condition(
            types::READY,
            reasons::READY,
            "All components are ready",
            CONDITION_TRUE,
        );
        return;
    }

    if agg.failed_count == 0 && agg.progressing_count > 0 {
        let pending: Vec<String> = agg
            .operands
            .iter()
            .filter(|o| classify_operand_state(o) == OperandState::Progressing)
            .map(|o| {
                if o.message == messages::CR_NOT_FOUND {
                    format!("{}(not created)", o.kind)
                } else {
                    format!("{}(reconciling)", o.kind)
                }
            })
            .collect();
        let message = format!("Waiting for operands: [{}]", pending.join(", "));
        status.add_condition(
            types::OPERANDS_AVAILABLE,
            reasons::IN_PROGRESS,
            &message,
            CONDITION_FALSE,
        );
        status.add_condition(types::READY, reasons::IN_PROGRESS, &message, CONDITION_FALSE);
        return;
    }

    let unhealthy: Vec<String> = agg
        .operands
        .iter()
        .filter(|o| classify_operand_state(o) == OperandState::Failed)
        .map(|o| format!("{}/{}", o.kind, o.name))
        .collect();
    let message = format!("Some operands not ready: [{}]", unhealthy.join(", "));
    status.add_condition(
        types::OPERANDS_AVAILABLE,
        reasons::FAILED,
        &message,
        CONDITION_FALSE,
    );
    status.add_condition(types::READY, reasons::FAILED, &message, CONDITION_FALSE);
}

/// Compute the `Upgradeable` condition published on the OperatorCondition.
///
/// Create-only mode blocks upgrades, as does any operand that exists but is
/// not ready. Operands whose CR does not exist are not blockers.
pub fn upgradeable_condition(create_only: bool, operands: &[OperandStatus]) -> Condition {
    if create_only {
        return new_condition(
            types::UPGRADEABLE,
            CONDITION_FALSE,
            reasons::OPERANDS_NOT_READY,
            "Not safe to upgrade: create-only mode is enabled",
        );
    }

    let not_ready: Vec<&str> = operands
        .iter()
        .filter(|o| !string_to_bool(&o.ready) && o.message != messages::CR_NOT_FOUND)
        .map(|o| o.kind.as_str())
        .collect();

    if not_ready.is_empty() {
        new_condition(
            types::UPGRADEABLE,
            CONDITION_TRUE,
            reasons::READY,
            "Operator is upgradeable",
        )
    } else {
        new_condition(
            types::UPGRADEABLE,
            CONDITION_FALSE,
            reasons::OPERANDS_NOT_READY,
            &format!(
                "Not safe to upgrade: existing operands are not ready: [{}]",
                not_ready.join(", ")
            ),
        )
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Reconcile the TrustMesh singleton.
#[instrument(skip(trust_mesh, ctx), fields(name = %trust_mesh.name_any()))]
pub async fn reconcile(trust_mesh: Arc<TrustMesh>, ctx: Arc<Context>) -> Result<Action> {
    info!("reconciling trust mesh");
    let api: Api<TrustMesh> = Api::all(ctx.client.clone());
    let name = trust_mesh.name_any();

    status::set_initial_reconciliation_status(&api, &name).await?;

    let reader = KubeOperandReader::new(ctx.client.clone());
    let operands = collect_operand_records(&reader).await?;
    let agg = aggregate(operands);

    let mut status = status::Manager::new();
    stage_aggregate_conditions(&agg, &mut status);

    let existing_conditions = trust_mesh
        .conditional_status()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    handle_create_only_mode(&existing_conditions, ctx.config.create_only, &mut status);

    let operands_value = serde_json::to_value(&agg.operands).unwrap_or_default();
    if let Err(e) = status
        .apply(&api, &name, move |_, doc| {
            doc.insert("operands".to_string(), operands_value.clone());
        })
        .await
    {
        error!(error = %e, "failed to update status");
    }

    // Best effort: the operator may run without a lifecycle manager, in
    // which case there is no OperatorCondition to publish on.
    if let Err(e) = update_operator_condition(&ctx, &agg.operands).await {
        warn!(error = %e, "failed to update OperatorCondition, continuing");
    }

    Ok(Action::await_change())
}

/// Error policy for the aggregator.
pub fn error_policy(trust_mesh: Arc<TrustMesh>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        name = %trust_mesh.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    error_action(error)
}

/// Recreate the singleton if it was deleted out from under the operator.
pub async fn ensure_trust_mesh_exists(client: &Client) -> Result<()> {
    let api: Api<TrustMesh> = Api::all(client.clone());
    if api.get_opt(SINGLETON_NAME).await?.is_none() {
        info!("recreating TrustMesh 'cluster' singleton");
        let trust_mesh = TrustMesh::new(SINGLETON_NAME, Default::default());
        match api.create(&PostParams::default(), &trust_mesh).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!("TrustMesh already recreated by another writer");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read all four operand records.
pub async fn collect_operand_records(reader: &dyn OperandReader) -> Result<Vec<OperandStatus>> {
    Ok(vec![
        build_operand_record(kinds::SPIRE_SERVER, reader.server_conditions().await?),
        build_operand_record(kinds::SPIRE_AGENT, reader.agent_conditions().await?),
        build_operand_record(kinds::SPIFFE_CSI_DRIVER, reader.csi_conditions().await?),
        build_operand_record(kinds::OIDC_DISCOVERY_PROVIDER, reader.oidc_conditions().await?),
    ])
}

/// Publish `Upgradeable` on the OperatorCondition's status subresource.
async fn update_operator_condition(ctx: &Context, operands: &[OperandStatus]) -> Result<()> {
    let api: Api<OperatorCondition> =
        Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let name = &ctx.config.operator_condition_name;

    let Some(operator_condition) = api.get_opt(name).await? else {
        debug!(name = %name, "OperatorCondition not found, operator may be running outside a lifecycle manager");
        return Ok(());
    };

    let upgradeable = upgradeable_condition(ctx.config.create_only, operands);

    let mut conditions = operator_condition
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    set_condition(&mut conditions, upgradeable, Time(Utc::now()));

    let patch = serde_json::json!({ "status": { "conditions": conditions } });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    info!(name = %name, "updated OperatorCondition");
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_conditions() -> Vec<Condition> {
        vec![new_condition(types::READY, CONDITION_TRUE, reasons::READY, "All resources applied")]
    }

    fn not_ready_conditions(reason: &str, message: &str) -> Vec<Condition> {
        vec![new_condition(types::READY, CONDITION_FALSE, reason, message)]
    }

    fn ready_record(kind: &str) -> OperandStatus {
        build_operand_record(kind, Some(ready_conditions()))
    }

    fn staged_message(status: &status::Manager, type_: &str) -> String {
        let mut conditions = Vec::new();
        status.merge(&mut conditions, Time(Utc::now()));
        find_condition(&conditions, type_).expect("condition staged").message.clone()
    }

    fn staged(status: &status::Manager, type_: &str) -> Condition {
        let mut conditions = Vec::new();
        status.merge(&mut conditions, Time(Utc::now()));
        find_condition(&conditions, type_).expect("condition staged").clone()
    }

    // =========================================================================
    // Record building
    // =========================================================================

    #[test]
    fn missing_cr_yields_not_found_record() {
        let record = build_operand_record(kinds::SPIRE_SERVER, None);
        assert_eq!(record.ready, "false");
        assert_eq!(record.message, messages::CR_NOT_FOUND);
        assert!(record.conditions.is_empty());
    }

    #[test]
    fn unreconciled_cr_waits_for_initial_reconciliation() {
        let record = build_operand_record(kinds::SPIRE_AGENT, Some(Vec::new()));
        assert_eq!(record.ready, "false");
        assert_eq!(record.message, messages::WAITING_INITIAL_RECONCILE);
    }

    #[test]
    fn ready_cr_summarizes_as_ready() {
        let record = ready_record(kinds::SPIRE_SERVER);
        assert_eq!(record.ready, "true");
        assert_eq!(record.message, "Ready");
        assert!(record.conditions.is_empty());
    }

    // =========================================================================
    // Classification
    // =========================================================================

    #[test]
    fn classification_prefers_the_ready_reason() {
        let mut record = build_operand_record(
            kinds::SPIRE_SERVER,
            Some(not_ready_conditions(reasons::RECONCILING, "anything at all")),
        );
        record.message = "unrelated".to_string();
        assert_eq!(classify_operand_state(&record), OperandState::Progressing);

        let record = build_operand_record(
            kinds::SPIRE_SERVER,
            Some(not_ready_conditions(reasons::UNHEALTHY, "pods crashlooping")),
        );
        assert_eq!(classify_operand_state(&record), OperandState::Failed);
    }

    #[test]
    fn classification_falls_back_to_message_constants() {
        let record = OperandStatus {
            kind: kinds::SPIRE_AGENT.to_string(),
            name: "cluster".to_string(),
            ready: "false".to_string(),
            message: messages::CR_NOT_FOUND.to_string(),
            conditions: Vec::new(),
        };
        assert_eq!(classify_operand_state(&record), OperandState::Progressing);
    }

    #[test]
    fn classification_falls_back_to_substring_match() {
        let record = OperandStatus {
            kind: kinds::SPIRE_AGENT.to_string(),
            name: "cluster".to_string(),
            ready: "false".to_string(),
            message: "Still RECONCILING the daemon set".to_string(),
            conditions: Vec::new(),
        };
        assert_eq!(classify_operand_state(&record), OperandState::Progressing);
    }

    #[test]
    fn classification_defaults_to_failed() {
        let record = OperandStatus {
            kind: kinds::SPIRE_AGENT.to_string(),
            name: "cluster".to_string(),
            ready: "false".to_string(),
            message: "something exploded".to_string(),
            conditions: Vec::new(),
        };
        assert_eq!(classify_operand_state(&record), OperandState::Failed);
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    /// Story: everything ready — both conditions True/Ready.
    #[test]
    fn story_all_ready_aggregates_to_ready() {
        let agg = aggregate(vec![
            ready_record(kinds::SPIRE_SERVER),
            ready_record(kinds::SPIRE_AGENT),
            ready_record(kinds::SPIFFE_CSI_DRIVER),
            ready_record(kinds::OIDC_DISCOVERY_PROVIDER),
        ]);
        assert!(agg.all_ready);

        let mut status = status::Manager::new();
        stage_aggregate_conditions(&agg, &mut status);
        let ready = staged(&status, types::READY);
        assert_eq!(ready.status, CONDITION_TRUE);
        assert_eq!(ready.reason, reasons::READY);
        let available = staged(&status, types::OPERANDS_AVAILABLE);
        assert_eq!(available.status, CONDITION_TRUE);
    }

    /// Story: three ready, one reconciling — progressing, naming the
    /// reconciling operand; flipping it to Failed flips the aggregate.
    #[test]
    fn story_progressing_then_failed_operand() {
        let reconciling = build_operand_record(
            kinds::OIDC_DISCOVERY_PROVIDER,
            Some(not_ready_conditions(reasons::RECONCILING, "applying children")),
        );
        let agg = aggregate(vec![
            ready_record(kinds::SPIRE_SERVER),
            ready_record(kinds::SPIRE_AGENT),
            ready_record(kinds::SPIFFE_CSI_DRIVER),
            reconciling,
        ]);
        assert!(!agg.all_ready);
        assert_eq!(agg.progressing_count, 1);
        assert_eq!(agg.failed_count, 0);

        let mut status = status::Manager::new();
        stage_aggregate_conditions(&agg, &mut status);
        let ready = staged(&status, types::READY);
        assert_eq!(ready.status, CONDITION_FALSE);
        assert_eq!(ready.reason, reasons::IN_PROGRESS);
        assert!(ready.message.contains("SpireOidcDiscoveryProvider(reconciling)"));

        // Now the same operand fails outright.
        let failed = build_operand_record(
            kinds::OIDC_DISCOVERY_PROVIDER,
            Some(not_ready_conditions(reasons::FAILED, "deployment rejected")),
        );
        let agg = aggregate(vec![
            ready_record(kinds::SPIRE_SERVER),
            ready_record(kinds::SPIRE_AGENT),
            ready_record(kinds::SPIFFE_CSI_DRIVER),
            failed,
        ]);
        assert_eq!(agg.failed_count, 1);

        let mut status = status::Manager::new();
        stage_aggregate_conditions(&agg, &mut status);
        let ready = staged(&status, types::READY);
        assert_eq!(ready.reason, reasons::FAILED);
        assert!(ready.message.contains("SpireOidcDiscoveryProvider/cluster"));
    }

    #[test]
    fn missing_crs_report_not_created() {
        let agg = aggregate(vec![
            ready_record(kinds::SPIRE_SERVER),
            build_operand_record(kinds::SPIRE_AGENT, None),
            ready_record(kinds::SPIFFE_CSI_DRIVER),
            ready_record(kinds::OIDC_DISCOVERY_PROVIDER),
        ]);

        let mut status = status::Manager::new();
        stage_aggregate_conditions(&agg, &mut status);
        assert!(staged_message(&status, types::READY).contains("SpireAgent(not created)"));
    }

    // =========================================================================
    // Upgradeable
    // =========================================================================

    /// Story: create-only mode blocks upgrades regardless of health.
    #[test]
    fn story_create_only_mode_blocks_upgrade() {
        let condition = upgradeable_condition(true, &[ready_record(kinds::SPIRE_SERVER)]);
        assert_eq!(condition.status, CONDITION_FALSE);
        assert_eq!(condition.reason, reasons::OPERANDS_NOT_READY);
    }

    /// Story: an operand that exists but is not ready blocks upgrades; a CR
    /// that was never created does not.
    #[test]
    fn story_only_existing_unready_operands_block_upgrade() {
        let missing = build_operand_record(kinds::SPIRE_AGENT, None);
        let condition = upgradeable_condition(false, &[ready_record(kinds::SPIRE_SERVER), missing]);
        assert_eq!(condition.status, CONDITION_TRUE);

        let broken = build_operand_record(
            kinds::SPIRE_AGENT,
            Some(not_ready_conditions(reasons::FAILED, "daemonset rejected")),
        );
        let condition = upgradeable_condition(false, &[ready_record(kinds::SPIRE_SERVER), broken]);
        assert_eq!(condition.status, CONDITION_FALSE);
        assert!(condition.message.contains("SpireAgent"));
    }

    // =========================================================================
    // Pruning
    // =========================================================================

    /// Story: the emitted record keeps the surface compact — create-only if
    /// enabled, plus Ready and failing conditions only when not ready.
    #[test]
    fn story_condition_pruning_keeps_the_surface_compact() {
        let conditions = vec![
            new_condition(types::READY, CONDITION_FALSE, reasons::FAILED, "degraded"),
            new_condition(types::CONFIG_MAP_AVAILABLE, CONDITION_TRUE, reasons::READY, "ok"),
            new_condition(types::STATEFUL_SET_AVAILABLE, CONDITION_FALSE, reasons::FAILED, "bad"),
            new_condition(
                types::CREATE_ONLY_MODE,
                CONDITION_TRUE,
                reasons::CREATE_ONLY_MODE_ENABLED,
                "on",
            ),
        ];

        let pruned = extract_key_conditions(&conditions, false);
        let kept: Vec<&str> = pruned.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(
            kept,
            vec![types::CREATE_ONLY_MODE, types::READY, types::STATEFUL_SET_AVAILABLE]
        );

        // Ready operand: only the create-only condition survives.
        let pruned = extract_key_conditions(&conditions, true);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].type_, types::CREATE_ONLY_MODE);
    }

    // =========================================================================
    // Reader plumbing
    // =========================================================================

    #[tokio::test]
    async fn collect_operand_records_covers_all_four_operands() {
        let mut reader = MockOperandReader::new();
        reader
            .expect_server_conditions()
            .returning(|| Ok(Some(vec![new_condition(
                types::READY,
                CONDITION_TRUE,
                reasons::READY,
                "",
            )])));
        reader.expect_agent_conditions().returning(|| Ok(None));
        reader.expect_csi_conditions().returning(|| Ok(Some(Vec::new())));
        reader.expect_oidc_conditions().returning(|| {
            Ok(Some(vec![new_condition(
                types::READY,
                CONDITION_FALSE,
                reasons::RECONCILING,
                "applying children",
            )]))
        });

        let records = collect_operand_records(&reader).await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].ready, "true");
        assert_eq!(records[1].message, messages::CR_NOT_FOUND);
        assert_eq!(records[2].message, messages::WAITING_INITIAL_RECONCILE);
        assert_eq!(records[3].message, "applying children");
    }
}
