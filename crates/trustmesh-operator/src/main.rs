//! TrustMesh operator - SPIFFE/SPIRE workload-identity control plane manager

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::api::storage::v1::CSIDriver;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use trustmesh_common::constants::{components, controllers, watch_selector, OPERATOR_NAMESPACE};
use trustmesh_common::crd::{
    ClusterSPIFFEID, OperatorCondition, Route, SecurityContextConstraints, SpiffeCsiDriver,
    SpireAgent, SpireOidcDiscoveryProvider, SpireServer, TrustMesh, SINGLETON_NAME,
};
use trustmesh_common::events::KubeEventPublisher;
use trustmesh_common::telemetry;

use trustmesh_operator::reconcile::Context;
use trustmesh_operator::{agent, csi, manager, oidc, server, OperatorConfig};

/// TrustMesh - operator for a SPIFFE/SPIRE workload-identity control plane
#[derive(Parser, Debug)]
#[command(name = "trustmesh-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        // Print all operator-owned CRDs as a multi-document YAML stream.
        let crds = [
            serde_yaml::to_string(&TrustMesh::crd())?,
            serde_yaml::to_string(&SpireServer::crd())?,
            serde_yaml::to_string(&SpireAgent::crd())?,
            serde_yaml::to_string(&SpiffeCsiDriver::crd())?,
            serde_yaml::to_string(&SpireOidcDiscoveryProvider::crd())?,
        ];
        println!("{}", crds.join("---\n"));
        return Ok(());
    }

    telemetry::init_telemetry()?;
    run_operator().await
}

/// Install the operator's own CRDs via server-side apply so their versions
/// always match the running operator.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("trustmesh-operator").force();

    for (name, crd) in [
        ("trustmeshes.trustmesh.io", TrustMesh::crd()),
        ("spireservers.trustmesh.io", SpireServer::crd()),
        ("spireagents.trustmesh.io", SpireAgent::crd()),
        ("spiffecsidrivers.trustmesh.io", SpiffeCsiDriver::crd()),
        (
            "spireoidcdiscoveryproviders.trustmesh.io",
            SpireOidcDiscoveryProvider::crd(),
        ),
    ] {
        tracing::info!(crd = %name, "installing CRD");
        crds.patch(name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install CRD {name}: {e}"))?;
    }
    Ok(())
}

async fn run_operator() -> anyhow::Result<()> {
    tracing::info!("TrustMesh operator starting");

    let config = OperatorConfig::from_env()
        .map_err(|e| anyhow::anyhow!("invalid operator environment: {e}"))?;
    if config.create_only {
        tracing::info!("create-only mode is enabled: existing children will never be updated");
    }

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {e}"))?;

    ensure_crds_installed(&client).await?;
    manager::ensure_trust_mesh_exists(&client).await?;

    // One context per controller so events carry the right reporting
    // component.
    let context_for = |controller_name: &str| {
        Arc::new(Context::new(
            client.clone(),
            config.clone(),
            Arc::new(KubeEventPublisher::new(client.clone(), controller_name)),
        ))
    };

    // Child watches are narrowed to one component's objects and every event
    // maps to the singleton key.
    let component_watch = |component: &str| WatcherConfig::default().labels(&watch_selector(component));
    let ns = OPERATOR_NAMESPACE;

    tracing::info!("starting controllers");

    // --- Aggregator: TrustMesh + all operand CRs + the OperatorCondition ---
    let trust_meshes: Api<TrustMesh> = Api::all(client.clone());
    let manager_controller = Controller::new(trust_meshes, WatcherConfig::default())
        .watches(
            Api::<SpireServer>::all(client.clone()),
            WatcherConfig::default(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<SpireAgent>::all(client.clone()),
            WatcherConfig::default(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<SpiffeCsiDriver>::all(client.clone()),
            WatcherConfig::default(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<SpireOidcDiscoveryProvider>::all(client.clone()),
            WatcherConfig::default(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<OperatorCondition>::namespaced(client.clone(), ns),
            WatcherConfig::default(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .shutdown_on_signal()
        .run(
            manager::reconcile,
            manager::error_policy,
            context_for(controllers::TRUST_MESH),
        )
        .for_each(log_reconcile_result);

    // --- SpireServer ---
    let servers: Api<SpireServer> = Api::all(client.clone());
    let server_watch = component_watch(components::CONTROL_PLANE);
    let server_controller = Controller::new(servers, WatcherConfig::default())
        .watches(
            Api::<StatefulSet>::namespaced(client.clone(), ns),
            server_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<ConfigMap>::namespaced(client.clone(), ns),
            server_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<Service>::namespaced(client.clone(), ns),
            server_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<ValidatingWebhookConfiguration>::all(client.clone()),
            server_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<Route>::namespaced(client.clone(), ns),
            server_watch,
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<TrustMesh>::all(client.clone()),
            WatcherConfig::default(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .shutdown_on_signal()
        .run(
            server::reconcile,
            server::error_policy,
            context_for(controllers::SPIRE_SERVER),
        )
        .for_each(log_reconcile_result);

    // --- SpireAgent ---
    let agents: Api<SpireAgent> = Api::all(client.clone());
    let agent_watch = component_watch(components::NODE_AGENT);
    let agent_controller = Controller::new(agents, WatcherConfig::default())
        .watches(
            Api::<DaemonSet>::namespaced(client.clone(), ns),
            agent_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<ConfigMap>::namespaced(client.clone(), ns),
            agent_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<Service>::namespaced(client.clone(), ns),
            agent_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<ServiceAccount>::namespaced(client.clone(), ns),
            agent_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<ClusterRole>::all(client.clone()),
            agent_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<ClusterRoleBinding>::all(client.clone()),
            agent_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<SecurityContextConstraints>::all(client.clone()),
            agent_watch,
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<TrustMesh>::all(client.clone()),
            WatcherConfig::default(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .shutdown_on_signal()
        .run(
            agent::reconcile,
            agent::error_policy,
            context_for(controllers::SPIRE_AGENT),
        )
        .for_each(log_reconcile_result);

    // --- SpiffeCsiDriver ---
    let csi_drivers: Api<SpiffeCsiDriver> = Api::all(client.clone());
    let csi_watch = component_watch(components::CSI);
    let csi_controller = Controller::new(csi_drivers, WatcherConfig::default())
        .watches(
            Api::<DaemonSet>::namespaced(client.clone(), ns),
            csi_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<ServiceAccount>::namespaced(client.clone(), ns),
            csi_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<CSIDriver>::all(client.clone()),
            csi_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<SecurityContextConstraints>::all(client.clone()),
            csi_watch,
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<TrustMesh>::all(client.clone()),
            WatcherConfig::default(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .shutdown_on_signal()
        .run(
            csi::reconcile,
            csi::error_policy,
            context_for(controllers::SPIFFE_CSI_DRIVER),
        )
        .for_each(log_reconcile_result);

    // --- SpireOidcDiscoveryProvider ---
    let oidc_providers: Api<SpireOidcDiscoveryProvider> = Api::all(client.clone());
    let oidc_watch = component_watch(components::DISCOVERY);
    let oidc_controller = Controller::new(oidc_providers, WatcherConfig::default())
        .watches(
            Api::<Deployment>::namespaced(client.clone(), ns),
            oidc_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<ConfigMap>::namespaced(client.clone(), ns),
            oidc_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<Service>::namespaced(client.clone(), ns),
            oidc_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<ServiceAccount>::namespaced(client.clone(), ns),
            oidc_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<Route>::namespaced(client.clone(), ns),
            oidc_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<Role>::namespaced(client.clone(), ns),
            oidc_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<RoleBinding>::namespaced(client.clone(), ns),
            oidc_watch.clone(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<ClusterSPIFFEID>::all(client.clone()),
            oidc_watch,
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .watches(
            Api::<TrustMesh>::all(client.clone()),
            WatcherConfig::default(),
            |_| Some(ObjectRef::new(SINGLETON_NAME)),
        )
        .shutdown_on_signal()
        .run(
            oidc::reconcile,
            oidc::error_policy,
            context_for(controllers::OIDC_DISCOVERY_PROVIDER),
        )
        .for_each(log_reconcile_result);

    tokio::select! {
        _ = manager_controller => tracing::info!("trust mesh controller stopped"),
        _ = server_controller => tracing::info!("spire server controller stopped"),
        _ = agent_controller => tracing::info!("spire agent controller stopped"),
        _ = csi_controller => tracing::info!("spiffe csi driver controller stopped"),
        _ = oidc_controller => tracing::info!("oidc discovery provider controller stopped"),
    }

    tracing::info!("TrustMesh operator shutting down");
    Ok(())
}

async fn log_reconcile_result<K, E>(
    result: std::result::Result<(ObjectRef<K>, kube::runtime::controller::Action), E>,
) where
    K: kube::Resource,
    K::DynamicType: std::fmt::Debug,
    E: std::fmt::Display,
{
    match result {
        Ok((obj, action)) => {
            tracing::debug!(object = ?obj, ?action, "reconciliation completed");
        }
        Err(e) => {
            tracing::error!(error = %e, "reconciliation error");
        }
    }
}
