//! Tarantool operator binary.
//!
//! Runs the Cluster, Role and CartridgeConfig controllers until a shutdown
//! signal arrives.

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, CustomResourceExt, Resource};
use std::fmt::Debug;
use std::sync::Arc;
use tarantool_operator::config::{LogConfig, OperatorArgs, OperatorConfig, init_tracing};
use tarantool_operator::controller::{
    CartridgeConfigController, ClusterController, ControllerContext, RoleController,
    cartridge_config_error_policy, cluster_error_policy, role_error_policy, role_to_cluster,
};
use tarantool_operator::crd::{CartridgeConfig, Cluster, Role};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = OperatorArgs::parse();

    if args.generate_crds {
        return generate_crds();
    }

    init_tracing(&LogConfig::from_env().with_overrides(&args))?;
    let config = OperatorConfig::from(&args);

    tracing::info!(
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        container = %config.container_name,
        exec_timeout = ?config.exec_timeout,
        "Starting Tarantool operator"
    );

    let client = Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let ctx = Arc::new(ControllerContext::from_client(client.clone(), &config));
    let namespace = config.namespace.as_deref();

    tokio::select! {
        _ = run_cluster_controller(client.clone(), namespace, ctx.clone()) => {
            tracing::warn!("Cluster controller exited");
        }
        _ = run_role_controller(client.clone(), namespace, ctx.clone()) => {
            tracing::warn!("Role controller exited");
        }
        _ = run_cartridge_config_controller(client.clone(), namespace, ctx.clone()) => {
            tracing::warn!("CartridgeConfig controller exited");
        }
    }

    tracing::info!("Tarantool operator stopped");
    Ok(())
}

/// Api over the watched namespace, or over all namespaces.
fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

fn log_result<T: Debug, E: std::fmt::Display>(kind: &'static str, result: Result<T, E>) {
    match result {
        Ok(reconciled) => tracing::debug!(kind, object = ?reconciled, "Reconciled"),
        Err(err) => tracing::warn!(kind, error = %err, "Controller stream error"),
    }
}

async fn run_cluster_controller(
    client: Client,
    namespace: Option<&str>,
    ctx: Arc<ControllerContext>,
) {
    tracing::info!("Starting Cluster controller");
    let controller = ClusterController::new(ctx.clone());

    Controller::new(
        scoped_api::<Cluster>(client.clone(), namespace),
        WatcherConfig::default(),
    )
    .owns(
        scoped_api::<Service>(client.clone(), namespace),
        WatcherConfig::default(),
    )
    .watches(
        scoped_api::<Role>(client, namespace),
        WatcherConfig::default(),
        role_to_cluster,
    )
    .shutdown_on_signal()
    .run(
        move |cluster, _ctx| {
            let controller = controller.clone();
            async move { controller.reconcile(cluster).await.map(Action::from) }
        },
        cluster_error_policy,
        ctx,
    )
    .for_each(|result| async move { log_result("Cluster", result) })
    .await;
}

async fn run_role_controller(client: Client, namespace: Option<&str>, ctx: Arc<ControllerContext>) {
    tracing::info!("Starting Role controller");
    let controller = RoleController::new(ctx.clone());

    Controller::new(
        scoped_api::<Role>(client.clone(), namespace),
        WatcherConfig::default(),
    )
    .owns(
        scoped_api::<StatefulSet>(client, namespace),
        WatcherConfig::default(),
    )
    .shutdown_on_signal()
    .run(
        move |role, _ctx| {
            let controller = controller.clone();
            async move { controller.reconcile(role).await.map(Action::from) }
        },
        role_error_policy,
        ctx,
    )
    .for_each(|result| async move { log_result("Role", result) })
    .await;
}

async fn run_cartridge_config_controller(
    client: Client,
    namespace: Option<&str>,
    ctx: Arc<ControllerContext>,
) {
    tracing::info!("Starting CartridgeConfig controller");
    let controller = CartridgeConfigController::new(ctx.clone());

    Controller::new(
        scoped_api::<CartridgeConfig>(client, namespace),
        WatcherConfig::default(),
    )
    .shutdown_on_signal()
    .run(
        move |config, _ctx| {
            let controller = controller.clone();
            async move { controller.reconcile(config).await.map(Action::from) }
        },
        cartridge_config_error_policy,
        ctx,
    )
    .for_each(|result| async move { log_result("CartridgeConfig", result) })
    .await;
}

/// Print the CRD manifests.
fn generate_crds() -> anyhow::Result<()> {
    println!("---");
    println!("{}", serde_yaml::to_string(&Cluster::crd())?);
    println!("---");
    println!("{}", serde_yaml::to_string(&Role::crd())?);
    println!("---");
    println!("{}", serde_yaml::to_string(&CartridgeConfig::crd())?);
    Ok(())
}
