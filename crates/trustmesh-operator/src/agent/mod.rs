//! SpireAgent reconciler.
//!
//! Per-node operand: service account, RBAC, SecurityContextConstraints,
//! metrics service, rendered agent.conf and the DaemonSet carrying its hash.

pub mod config;
pub mod daemonset;
pub mod rbac;
pub mod scc;

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use trustmesh_common::conditions::{reasons, types, CONDITION_FALSE};
use trustmesh_common::constants::{components, standard_labels, OPERATOR_NAMESPACE};
use trustmesh_common::crd::{HasConditionalStatus, SecurityContextConstraints, SpireAgent};
use trustmesh_common::hash::config_hash;
use trustmesh_common::kube_utils::controller_reference;
use trustmesh_common::status;
use trustmesh_common::{Error, Result};

use crate::reconcile::{
    adopt_operand, apply_child, error_action, fetch_trust_mesh, handle_create_only_mode,
    stage_missing_trust_mesh, Context,
};
use crate::validation::validate_proxy;

use self::daemonset::AGENT_APP_NAME;

/// Reconcile the SpireAgent singleton.
#[instrument(skip(agent, ctx), fields(name = %agent.name_any()))]
pub async fn reconcile(agent: Arc<SpireAgent>, ctx: Arc<Context>) -> Result<Action> {
    info!("reconciling spire agent");
    let api: Api<SpireAgent> = Api::all(ctx.client.clone());
    let name = agent.name_any();

    status::set_initial_reconciliation_status(&api, &name).await?;

    let mut status = status::Manager::new();
    let outcome = reconcile_inner(&agent, &ctx, &mut status).await;

    if let Err(e) = status.apply(&api, &name, |_, _| {}).await {
        error!(error = %e, "failed to update status");
    }

    outcome
}

/// Error policy for the agent controller.
pub fn error_policy(agent: Arc<SpireAgent>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        name = %agent.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    error_action(error)
}

async fn reconcile_inner(
    agent: &SpireAgent,
    ctx: &Context,
    status: &mut status::Manager,
) -> Result<Action> {
    let existing_conditions = agent
        .conditional_status()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let Some(trust_mesh) = fetch_trust_mesh(&ctx.client).await? else {
        warn!("TrustMesh 'cluster' not found");
        stage_missing_trust_mesh(status, "SpireAgent");
        return Ok(Action::await_change());
    };
    let api: Api<SpireAgent> = Api::all(ctx.client.clone());
    adopt_operand(&api, agent, &trust_mesh).await?;

    let create_only = handle_create_only_mode(&existing_conditions, ctx.config.create_only, status);

    if let Err(message) = validate_proxy(&ctx.config.proxy) {
        status.add_condition(
            types::CONFIGURATION_VALID,
            reasons::PROXY_CONFIGURATION_INVALID,
            &message,
            CONDITION_FALSE,
        );
        return Ok(Action::await_change());
    }

    reconcile_children(agent, ctx, status, create_only).await?;
    Ok(Action::await_change())
}

async fn reconcile_children(
    agent: &SpireAgent,
    ctx: &Context,
    status: &mut status::Manager,
    create_only: bool,
) -> Result<()> {
    let spec = &agent.spec;
    let owner_ref = controller_reference(agent)?;
    let labels = standard_labels(AGENT_APP_NAME, components::NODE_AGENT, spec.common.labels.as_ref());

    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let service_accounts: Api<ServiceAccount> =
        Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let cluster_roles: Api<ClusterRole> = Api::all(ctx.client.clone());
    let cluster_role_bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    let sccs: Api<SecurityContextConstraints> = Api::all(ctx.client.clone());
    let daemon_sets: Api<DaemonSet> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);

    apply_child(
        &service_accounts,
        &owner_ref,
        rbac::build_service_account(spec),
        create_only,
        status,
        types::SERVICE_ACCOUNT_AVAILABLE,
        "spire-agent service account",
    )
    .await?;
    apply_child(
        &services,
        &owner_ref,
        rbac::build_service(spec),
        create_only,
        status,
        types::SERVICE_AVAILABLE,
        "spire-agent service",
    )
    .await?;
    apply_child(
        &cluster_roles,
        &owner_ref,
        rbac::build_cluster_role(spec),
        create_only,
        status,
        types::RBAC_AVAILABLE,
        "spire-agent cluster role",
    )
    .await?;
    apply_child(
        &cluster_role_bindings,
        &owner_ref,
        rbac::build_cluster_role_binding(spec),
        create_only,
        status,
        types::RBAC_AVAILABLE,
        "spire-agent cluster role binding",
    )
    .await?;
    apply_child(
        &sccs,
        &owner_ref,
        scc::build_scc(spec),
        create_only,
        status,
        types::SCC_AVAILABLE,
        "spire-agent security context constraints",
    )
    .await?;

    let agent_conf = match config::render_agent_conf(spec) {
        Ok(conf) => conf,
        Err(e) => {
            status.add_condition(
                types::CONFIG_MAP_AVAILABLE,
                reasons::FAILED,
                &format!("Failed to generate agent.conf: {e}"),
                CONDITION_FALSE,
            );
            return Err(e);
        }
    };
    let agent_conf_hash = config_hash(&agent_conf);

    apply_child(
        &config_maps,
        &owner_ref,
        build_config_map(&labels, &agent_conf),
        create_only,
        status,
        types::CONFIG_MAP_AVAILABLE,
        "spire-agent config map",
    )
    .await?;

    apply_child(
        &daemon_sets,
        &owner_ref,
        daemonset::build_daemon_set(spec, &ctx.config.images, &ctx.config.proxy, &agent_conf_hash),
        create_only,
        status,
        types::DAEMON_SET_AVAILABLE,
        "spire-agent daemon set",
    )
    .await?;

    Ok(())
}

fn build_config_map(labels: &BTreeMap<String, String>, content: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(trustmesh_common::constants::names::SPIRE_AGENT.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "agent.conf".to_string(),
            content.to_string(),
        )])),
        ..Default::default()
    }
}
