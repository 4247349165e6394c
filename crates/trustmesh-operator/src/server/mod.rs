//! SpireServer reconciler.
//!
//! Renders the three content-bearing ConfigMaps, the two-container
//! StatefulSet, services, RBAC, the controller-manager webhook and — when
//! federation is configured — the federation service and route with
//! profile-specific TLS termination.

pub mod config;
pub mod controller_manager;
pub mod federation;
pub mod rbac;
pub mod service;
pub mod statefulset;
pub mod webhook;

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::Resource;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use trustmesh_common::conditions::{
    find_condition, reasons, types, CONDITION_FALSE, CONDITION_TRUE,
};
use trustmesh_common::constants::{components, names, standard_labels, OPERATOR_NAMESPACE};
use trustmesh_common::crd::{string_to_bool, HasConditionalStatus, Route, SpireServer};
use trustmesh_common::events::{actions, reasons as event_reasons};
use trustmesh_common::hash::config_hash;
use trustmesh_common::kube_utils::{controller_reference, create_if_missing, set_controller_reference};
use trustmesh_common::status;
use trustmesh_common::{Error, Result};

use crate::rbac::external_cert_reader_pair;
use crate::reconcile::{
    adopt_operand, apply_child, error_action, fetch_trust_mesh, handle_create_only_mode,
    stage_missing_trust_mesh, Context,
};
use crate::validation::{validate_jwt_issuer, validate_proxy, validate_ttl_durations};

use self::federation::{
    build_federation_route, build_federation_service, external_certificate_secret,
    validate_federation_config,
};
use self::statefulset::SERVER_APP_NAME;

/// Reconcile the SpireServer singleton.
#[instrument(skip(server, ctx), fields(name = %server.name_any()))]
pub async fn reconcile(server: Arc<SpireServer>, ctx: Arc<Context>) -> Result<Action> {
    info!("reconciling spire server");
    let api: Api<SpireServer> = Api::all(ctx.client.clone());
    let name = server.name_any();

    status::set_initial_reconciliation_status(&api, &name).await?;

    let mut status = status::Manager::new();
    let outcome = reconcile_inner(&server, &ctx, &mut status).await;

    // Deferred status application: the collected conditions are written even
    // when a step failed, so consumers see exactly where the pipeline stopped.
    if let Err(e) = status.apply(&api, &name, |_, _| {}).await {
        error!(error = %e, "failed to update status");
    }

    outcome
}

/// Error policy for the server controller.
pub fn error_policy(server: Arc<SpireServer>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        name = %server.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    error_action(error)
}

async fn reconcile_inner(
    server: &SpireServer,
    ctx: &Context,
    status: &mut status::Manager,
) -> Result<Action> {
    let existing_conditions = server
        .conditional_status()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    // The operand must be owned by the top-level CR so deletion cascades.
    let Some(trust_mesh) = fetch_trust_mesh(&ctx.client).await? else {
        warn!("TrustMesh 'cluster' not found");
        stage_missing_trust_mesh(status, "SpireServer");
        return Ok(Action::await_change());
    };
    let api: Api<SpireServer> = Api::all(ctx.client.clone());
    adopt_operand(&api, server, &trust_mesh).await?;

    let create_only = handle_create_only_mode(&existing_conditions, ctx.config.create_only, status);

    // Validation failures reflect bad user input: requeueing cannot fix the
    // input, so they return without error.
    if let Err(message) = validate_proxy(&ctx.config.proxy) {
        status.add_condition(
            types::CONFIGURATION_VALID,
            reasons::PROXY_CONFIGURATION_INVALID,
            &message,
            CONDITION_FALSE,
        );
        return Ok(Action::await_change());
    }

    if let Err(message) = validate_jwt_issuer(&server.spec.jwt_issuer) {
        warn!(jwt_issuer = %server.spec.jwt_issuer, %message, "invalid JWT issuer URL");
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

    if !handle_ttl_validation(server, ctx, status).await {
        return Ok(Action::await_change());
    }

    if let Some(federation) = &server.spec.federation {
        if let Err(message) = validate_federation_config(federation, &server.spec.trust_domain) {
            warn!(trust_domain = %server.spec.trust_domain, %message, "invalid federation configuration");
            status.add_condition(
                types::FEDERATION_CONFIGURATION_VALID,
                reasons::INVALID_FEDERATION_CONFIGURATION,
                &format!("Federation configuration validation failed: {message}"),
                CONDITION_FALSE,
            );
            return Ok(Action::await_change());
        }
        let previous = find_condition(&existing_conditions, types::FEDERATION_CONFIGURATION_VALID);
        if previous.is_none() || previous.is_some_and(|c| c.status == CONDITION_FALSE) {
            status.add_condition(
                types::FEDERATION_CONFIGURATION_VALID,
                reasons::VALID_FEDERATION_CONFIGURATION,
                "Federation configuration validation passed",
                CONDITION_TRUE,
            );
        }
    }

    reconcile_children(server, ctx, status, create_only, &existing_conditions).await?;
    Ok(Action::await_change())
}

/// TTL validation with warning handling; returns false when reconciliation
/// must stop.
async fn handle_ttl_validation(
    server: &SpireServer,
    ctx: &Context,
    status: &mut status::Manager,
) -> bool {
    let result = validate_ttl_durations(&server.spec);

    if let Some(error) = &result.error {
        warn!(%error, "TTL validation failed");
        status.add_condition(
            types::TTL_CONFIGURATION_VALID,
            reasons::TTL_VALIDATION_FAILED,
            error,
            CONDITION_FALSE,
        );
        return false;
    }

    if result.warnings.is_empty() {
        status.add_condition(
            types::TTL_CONFIGURATION_VALID,
            reasons::TTL_VALIDATION_SUCCEEDED,
            "TTL configuration is valid",
            CONDITION_TRUE,
        );
        return true;
    }

    for warning in &result.warnings {
        info!(%warning, "TTL configuration warning");
        ctx.events
            .publish(
                &server.object_ref(&()),
                EventType::Warning,
                event_reasons::TTL_CONFIGURATION_WARNING,
                actions::VALIDATE,
                Some(warning.clone()),
            )
            .await;
    }
    status.add_condition(
        types::TTL_CONFIGURATION_VALID,
        reasons::TTL_VALIDATION_WARNING,
        &result.status_message,
        CONDITION_TRUE,
    );
    true
}

async fn reconcile_children(
    server: &SpireServer,
    ctx: &Context,
    status: &mut status::Manager,
    create_only: bool,
    existing_conditions: &[Condition],
) -> Result<()> {
    let spec = &server.spec;
    let owner_ref = controller_reference(server)?;
    let labels = standard_labels(SERVER_APP_NAME, components::CONTROL_PLANE, spec.common.labels.as_ref());

    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let service_accounts: Api<ServiceAccount> =
        Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let cluster_roles: Api<ClusterRole> = Api::all(ctx.client.clone());
    let cluster_role_bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    let roles: Api<Role> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let role_bindings: Api<RoleBinding> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let webhooks: Api<ValidatingWebhookConfiguration> = Api::all(ctx.client.clone());
    let stateful_sets: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);
    let routes: Api<Route> = Api::namespaced(ctx.client.clone(), OPERATOR_NAMESPACE);

    // Service account and RBAC.
    apply_child(
        &service_accounts,
        &owner_ref,
        rbac::build_service_account(spec),
        create_only,
        status,
        types::SERVICE_ACCOUNT_AVAILABLE,
        "spire-server service account",
    )
    .await?;
    apply_child(
        &cluster_roles,
        &owner_ref,
        rbac::build_server_cluster_role(spec),
        create_only,
        status,
        types::RBAC_AVAILABLE,
        "spire-server cluster role",
    )
    .await?;
    apply_child(
        &cluster_role_bindings,
        &owner_ref,
        rbac::build_server_cluster_role_binding(spec),
        create_only,
        status,
        types::RBAC_AVAILABLE,
        "spire-server cluster role binding",
    )
    .await?;
    apply_child(
        &cluster_roles,
        &owner_ref,
        rbac::build_controller_manager_cluster_role(spec),
        create_only,
        status,
        types::RBAC_AVAILABLE,
        "controller-manager cluster role",
    )
    .await?;
    apply_child(
        &cluster_role_bindings,
        &owner_ref,
        rbac::build_controller_manager_cluster_role_binding(spec),
        create_only,
        status,
        types::RBAC_AVAILABLE,
        "controller-manager cluster role binding",
    )
    .await?;
    apply_child(
        &roles,
        &owner_ref,
        rbac::build_bundle_role(spec),
        create_only,
        status,
        types::RBAC_AVAILABLE,
        "spire-bundle role",
    )
    .await?;
    apply_child(
        &role_bindings,
        &owner_ref,
        rbac::build_bundle_role_binding(spec),
        create_only,
        status,
        types::RBAC_AVAILABLE,
        "spire-bundle role binding",
    )
    .await?;
    apply_child(
        &roles,
        &owner_ref,
        rbac::build_leader_election_role(spec),
        create_only,
        status,
        types::RBAC_AVAILABLE,
        "leader-election role",
    )
    .await?;
    apply_child(
        &role_bindings,
        &owner_ref,
        rbac::build_leader_election_role_binding(spec),
        create_only,
        status,
        types::RBAC_AVAILABLE,
        "leader-election role binding",
    )
    .await?;

    // Services and the webhook.
    apply_child(
        &services,
        &owner_ref,
        service::build_server_service(spec),
        create_only,
        status,
        types::SERVICE_AVAILABLE,
        "spire-server service",
    )
    .await?;
    apply_child(
        &services,
        &owner_ref,
        service::build_webhook_service(spec),
        create_only,
        status,
        types::SERVICE_AVAILABLE,
        "controller-manager webhook service",
    )
    .await?;
    apply_child(
        &webhooks,
        &owner_ref,
        webhook::build_webhook_configuration(spec),
        create_only,
        status,
        types::WEBHOOK_AVAILABLE,
        "controller-manager webhook configuration",
    )
    .await?;

    // Rendered configs. Render errors are user-input problems surfaced as a
    // failed generation condition without requeue.
    let server_conf = match config::render_server_conf(spec) {
        Ok(conf) => conf,
        Err(e) => {
            status.add_condition(
                types::CONFIG_MAP_AVAILABLE,
                reasons::FAILED,
                &format!("Failed to generate server.conf: {e}"),
                CONDITION_FALSE,
            );
            return Err(e);
        }
    };
    let controller_manager_conf = match controller_manager::render_controller_manager_config(spec) {
        Ok(conf) => conf,
        Err(e) => {
            status.add_condition(
                types::CONFIG_MAP_AVAILABLE,
                reasons::FAILED,
                &format!("Failed to generate controller-manager config: {e}"),
                CONDITION_FALSE,
            );
            return Err(e);
        }
    };
    let server_conf_hash = config_hash(&server_conf);
    let controller_manager_conf_hash = config_hash(&controller_manager_conf);

    apply_child(
        &config_maps,
        &owner_ref,
        build_config_map(names::SPIRE_SERVER, &labels, "server.conf", &server_conf),
        create_only,
        status,
        types::CONFIG_MAP_AVAILABLE,
        "spire-server config map",
    )
    .await?;
    apply_child(
        &config_maps,
        &owner_ref,
        build_config_map(
            names::CONTROLLER_MANAGER,
            &labels,
            "controller-manager-config.yaml",
            &controller_manager_conf,
        ),
        create_only,
        status,
        types::CONFIG_MAP_AVAILABLE,
        "controller-manager config map",
    )
    .await?;

    // The bundle ConfigMap is written by SPIRE's notifier; the operator only
    // guarantees it exists.
    let mut bundle_cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(spec.bundle_config_map.clone()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    set_controller_reference(&mut bundle_cm.metadata, owner_ref.clone());
    create_if_missing(&config_maps, bundle_cm).await?;

    // The workload, stamped with both config hashes.
    apply_child(
        &stateful_sets,
        &owner_ref,
        statefulset::build_stateful_set(
            spec,
            &ctx.config.images,
            &ctx.config.proxy,
            &server_conf_hash,
            &controller_manager_conf_hash,
        ),
        create_only,
        status,
        types::STATEFUL_SET_AVAILABLE,
        "spire-server stateful set",
    )
    .await?;

    // Federation service and route.
    match &spec.federation {
        Some(federation) => {
            apply_child(
                &services,
                &owner_ref,
                build_federation_service(spec, federation),
                create_only,
                status,
                types::FEDERATION_SERVICE_READY,
                "federation service",
            )
            .await?;

            // External-certificate RBAC strictly precedes the route: the
            // ingress layer rejects a route whose router cannot read the
            // referenced secret.
            if let Some(secret_name) = external_certificate_secret(federation) {
                let (role, binding) =
                    external_cert_reader_pair(names::SERVER_EXTERNAL_CERT_READER, secret_name, &labels);
                apply_child(
                    &roles,
                    &owner_ref,
                    role,
                    create_only,
                    status,
                    types::RBAC_AVAILABLE,
                    "federation external-cert reader role",
                )
                .await?;
                apply_child(
                    &role_bindings,
                    &owner_ref,
                    binding,
                    create_only,
                    status,
                    types::RBAC_AVAILABLE,
                    "federation external-cert reader role binding",
                )
                .await?;
            }

            if string_to_bool(&federation.managed_route) {
                apply_child(
                    &routes,
                    &owner_ref,
                    build_federation_route(spec, federation),
                    create_only,
                    status,
                    types::FEDERATION_ROUTE_READY,
                    "federation route",
                )
                .await?;
            } else if find_condition(existing_conditions, types::FEDERATION_ROUTE_READY)
                .map_or(true, |c| c.reason != reasons::FEDERATION_ROUTE_DISABLED)
            {
                status.add_condition(
                    types::FEDERATION_ROUTE_READY,
                    reasons::FEDERATION_ROUTE_DISABLED,
                    "Federation managed route disabled",
                    CONDITION_FALSE,
                );
            }
        }
        None => {
            // Federation was removed: clean up the endpoint surface.
            delete_if_exists(&services, names::FEDERATION_SERVICE).await?;
            delete_if_exists(&routes, names::FEDERATION_ROUTE).await?;
        }
    }

    Ok(())
}

fn build_config_map(
    name: &str,
    labels: &BTreeMap<String, String>,
    key: &str,
    content: &str,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(key.to_string(), content.to_string())])),
        ..Default::default()
    }
}

async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: kube::Resource<DynamicType = ()> + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    if api.get_opt(name).await?.is_some() {
        api.delete(name, &Default::default()).await?;
        info!(kind = %K::kind(&()), name = %name, "deleted resource");
    }
    Ok(())
}
