//! SpiffeCsiDriver reconciler.
//!
//! Smallest operand: service account, CSIDriver registration,
//! SecurityContextConstraints and the driver DaemonSet.

pub mod daemonset;
pub mod scc;

use std::sync::Arc;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::storage::v1::CSIDriver;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use trustmesh_common::conditions::{reasons, types, CONDITION_FALSE};
use trustmesh_common::constants::{components, names, standard_labels, OPERATOR_NAMESPACE};
use trustmesh_common::crd::{HasConditionalStatus, SecurityContextConstraints, SpiffeCsiDriver};
use trustmesh_common::kube_utils::controller_reference;
use trustmesh_common::status;
use trustmesh_common::{Error, Result};

use crate::reconcile::{
    adopt_operand, apply_child, error_action, fetch_trust_mesh, handle_create_only_mode,
    stage_missing_trust_mesh, Context,
};
use crate::validation::validate_proxy;

use self::daemonset::CSI_APP_NAME;

/// Reconcile the SpiffeCsiDriver singleton.
#[instrument(skip(driver, ctx), fields(name = %driver.name_any()))]
pub async fn reconcile(driver: Arc<SpiffeCsiDriver>, ctx: Arc<Context>) -> Result<Action> {
    info!("reconciling spiffe csi driver");
    let api: Api<SpiffeCsiDriver> = Api::all(ctx.client.clone());
    let name = driver.name_any();

    status::set_initial_reconciliation_status(&api, &name).await?;

    let mut status = status::Manager::new();
    let outcome = reconcile_inner(&driver, &ctx, &mut status).await;

    if let Err(e) = status.apply(&api, &name, |_, _| {}).await {
        error!(error = %e, "failed to update status");
    }

    outcome
}

/// Error policy for the CSI controller.
pub fn error_policy(driver: Arc<SpiffeCsiDriver>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        name = %driver.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    error_action(error)
}

async fn reconcile_inner(
    driver: &SpiffeCsiDriver,
    ctx: &Context,
    status: &mut status::Manager,
) -> Result<Action> {
    let existing_conditions = driver
        .conditional_status()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let Some(trust_mesh) = fetch_trust_mesh(&ctx.client).await? else {
        warn!("TrustMesh 'cluster' not found");
        stage_missing_trust_mesh(status, "SpiffeCsiDriver");
        return Ok(Action::await_change());
    };
    let api: Api<SpiffeCsiDriver> = Api::all(ctx.client.clone());
    adopt_operand(&api, driver, &trust_mesh).await?;

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

    let spec = &driver.spec;
    let owner_ref = controller_reference(driver)?;

    let service_accounts: Api<ServiceAccount> =
        Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let csi_drivers: Api<CSIDriver> = Api::all(ctx.client.clone());
    let sccs: Api<SecurityContextConstraints> = Api::all(ctx.client.clone());
    let daemon_sets: Api<DaemonSet> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);

    apply_child(
        &service_accounts,
        &owner_ref,
        build_service_account(spec),
        create_only,
        status,
        types::SERVICE_ACCOUNT_AVAILABLE,
        "spiffe-csi-driver service account",
    )
    .await?;
    apply_child(
        &csi_drivers,
        &owner_ref,
        daemonset::build_csi_driver(spec),
        create_only,
        status,
        types::CSI_DRIVER_AVAILABLE,
        "csi.spiffe.io driver registration",
    )
    .await?;
    apply_child(
        &sccs,
        &owner_ref,
        scc::build_scc(spec),
        create_only,
        status,
        types::SCC_AVAILABLE,
        "spiffe-csi-driver security context constraints",
    )
    .await?;
    apply_child(
        &daemon_sets,
        &owner_ref,
        daemonset::build_daemon_set(spec, &ctx.config.images, &ctx.config.proxy),
        create_only,
        status,
        types::DAEMON_SET_AVAILABLE,
        "spiffe-csi-driver daemon set",
    )
    .await?;

    Ok(Action::await_change())
}

fn build_service_account(spec: &trustmesh_common::crd::SpiffeCsiDriverSpec) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(names::SPIFFE_CSI_DRIVER.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(standard_labels(
                CSI_APP_NAME,
                components::CSI,
                spec.common.labels.as_ref(),
            )),
            ..Default::default()
        },
        ..Default::default()
    }
}
