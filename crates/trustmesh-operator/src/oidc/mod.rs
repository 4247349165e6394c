//! SpireOidcDiscoveryProvider reconciler.
//!
//! Service account, service, baseline ClusterSPIFFEID, rendered provider
//! config, Deployment and the externally routable discovery Route — with the
//! external-certificate RBAC pair applied strictly before the route.

pub mod config;
pub mod deployment;
pub mod route;
pub mod spiffe_id;

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use trustmesh_common::conditions::{
    find_condition, reasons, types, CONDITION_FALSE, CONDITION_TRUE,
};
use trustmesh_common::constants::{components, names, standard_labels, OPERATOR_NAMESPACE};
use trustmesh_common::crd::{
    ClusterSPIFFEID, HasConditionalStatus, Route, SpireOidcDiscoveryProvider,
};
use trustmesh_common::hash::config_hash;
use trustmesh_common::kube_utils::controller_reference;
use trustmesh_common::status;
use trustmesh_common::{Error, Result};

use crate::rbac::external_cert_reader_pair;
use crate::reconcile::{
    adopt_operand, apply_child, error_action, fetch_trust_mesh, handle_create_only_mode,
    stage_missing_trust_mesh, Context,
};
use crate::validation::{validate_jwt_issuer, validate_proxy};

use self::deployment::OIDC_APP_NAME;

/// Reconcile the SpireOidcDiscoveryProvider singleton.
#[instrument(skip(oidc, ctx), fields(name = %oidc.name_any()))]
pub async fn reconcile(
    oidc: Arc<SpireOidcDiscoveryProvider>,
    ctx: Arc<Context>,
) -> Result<Action> {
    info!("reconciling oidc discovery provider");
    let api: Api<SpireOidcDiscoveryProvider> = Api::all(ctx.client.clone());
    let name = oidc.name_any();

    status::set_initial_reconciliation_status(&api, &name).await?;

    let mut status = status::Manager::new();
    let outcome = reconcile_inner(&oidc, &ctx, &mut status).await;

    if let Err(e) = status.apply(&api, &name, |_, _| {}).await {
        error!(error = %e, "failed to update status");
    }

    outcome
}

/// Error policy for the OIDC controller.
pub fn error_policy(
    oidc: Arc<SpireOidcDiscoveryProvider>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        ?error,
        name = %oidc.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    error_action(error)
}

async fn reconcile_inner(
    oidc: &SpireOidcDiscoveryProvider,
    ctx: &Context,
    status: &mut status::Manager,
) -> Result<Action> {
    let existing_conditions = oidc
        .conditional_status()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let Some(trust_mesh) = fetch_trust_mesh(&ctx.client).await? else {
        warn!("TrustMesh 'cluster' not found");
        stage_missing_trust_mesh(status, "SpireOidcDiscoveryProvider");
        return Ok(Action::await_change());
    };
    let api: Api<SpireOidcDiscoveryProvider> = Api::all(ctx.client.clone());
    adopt_operand(&api, oidc, &trust_mesh).await?;

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

    if let Err(message) = validate_jwt_issuer(&oidc.spec.jwt_issuer) {
        warn!(jwt_issuer = %oidc.spec.jwt_issuer, %message, "invalid JWT issuer URL");
        status.add_condition(
            types::CONFIGURATION_VALID,
            reasons::INVALID_JWT_ISSUER_URL,
            &format!("JWT issuer URL validation failed: {message}"),
            CONDITION_FALSE,
        );
        return Ok(Action::await_change());
    }
    if find_condition(&existing_conditions, types::CONFIGURATION_VALID)
        .is_some_and(|c| c.status == CONDITION_FALSE)
    {
        status.add_condition(
            types::CONFIGURATION_VALID,
            reasons::VALID_JWT_ISSUER_URL,
            "JWT issuer URL validation passed",
            CONDITION_TRUE,
        );
    }

    reconcile_children(oidc, ctx, status, create_only).await?;
    Ok(Action::await_change())
}

async fn reconcile_children(
    oidc: &SpireOidcDiscoveryProvider,
    ctx: &Context,
    status: &mut status::Manager,
    create_only: bool,
) -> Result<()> {
    let spec = &oidc.spec;
    let owner_ref = controller_reference(oidc)?;
    let labels = standard_labels(OIDC_APP_NAME, components::DISCOVERY, spec.common.labels.as_ref());

    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let service_accounts: Api<ServiceAccount> =
        Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let roles: Api<Role> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let role_bindings: Api<RoleBinding> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let routes: Api<Route> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let spiffe_ids: Api<ClusterSPIFFEID> = Api::all(ctx.client.clone());

    apply_child(
        &service_accounts,
        &owner_ref,
        build_service_account(&labels),
        create_only,
        status,
        types::SERVICE_ACCOUNT_AVAILABLE,
        "oidc discovery provider service account",
    )
    .await?;
    apply_child(
        &services,
        &owner_ref,
        deployment::build_service(spec),
        create_only,
        status,
        types::SERVICE_AVAILABLE,
        "oidc discovery provider service",
    )
    .await?;
    apply_child(
        &spiffe_ids,
        &owner_ref,
        spiffe_id::build_cluster_spiffe_id(spec),
        create_only,
        status,
        types::CLUSTER_SPIFFE_ID_AVAILABLE,
        "oidc discovery provider cluster SPIFFE ID",
    )
    .await?;

    let oidc_conf = match config::render_oidc_conf(spec) {
        Ok(conf) => conf,
        Err(e) => {
            status.add_condition(
                types::CONFIG_MAP_AVAILABLE,
                reasons::FAILED,
                &format!("Failed to generate oidc-discovery-provider.conf: {e}"),
                CONDITION_FALSE,
            );
            return Err(e);
        }
    };
    let oidc_conf_hash = config_hash(&oidc_conf);

    apply_child(
        &config_maps,
        &owner_ref,
        build_config_map(&labels, &oidc_conf),
        create_only,
        status,
        types::CONFIG_MAP_AVAILABLE,
        "oidc discovery provider config map",
    )
    .await?;
    apply_child(
        &deployments,
        &owner_ref,
        deployment::build_deployment(spec, &ctx.config.images, &ctx.config.proxy, &oidc_conf_hash),
        create_only,
        status,
        types::DEPLOYMENT_AVAILABLE,
        "oidc discovery provider deployment",
    )
    .await?;

    // The reader RBAC pair must exist before the route references the
    // external certificate, or the ingress layer rejects the route.
    if let Some(secret_name) = spec
        .external_secret_ref
        .as_ref()
        .map(|r| r.secret_name.as_str())
        .filter(|name| !name.is_empty())
    {
        let (role, binding) =
            external_cert_reader_pair(names::OIDC_EXTERNAL_CERT_READER, secret_name, &labels);
        apply_child(
            &roles,
            &owner_ref,
            role,
            create_only,
            status,
            types::RBAC_AVAILABLE,
            "oidc external-cert reader role",
        )
        .await?;
        apply_child(
            &role_bindings,
            &owner_ref,
            binding,
            create_only,
            status,
            types::RBAC_AVAILABLE,
            "oidc external-cert reader role binding",
        )
        .await?;
    }

    apply_child(
        &routes,
        &owner_ref,
        route::build_route(spec),
        create_only,
        status,
        types::ROUTE_AVAILABLE,
        "oidc discovery provider route",
    )
    .await?;

    Ok(())
}

fn build_service_account(labels: &BTreeMap<String, String>) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(names::OIDC_DISCOVERY_PROVIDER.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn build_config_map(labels: &BTreeMap<String, String>, content: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(names::OIDC_DISCOVERY_PROVIDER.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "oidc-discovery-provider.conf".to_string(),
            content.to_string(),
        )])),
        ..Default::default()
    }
}
