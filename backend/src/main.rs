use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use tracing_subscriber::EnvFilter;

use storeprov_backend::args::ServerArgs;
use storeprov_backend::classifier::RoleRules;
use storeprov_backend::cluster::KubeClusterReader;
use storeprov_backend::db::{PgStoreRepository, init_schema};
use storeprov_backend::lifecycle::Lifecycle;
use storeprov_backend::packager::HelmPackager;
use storeprov_backend::reconciler::{Reconciler, ReconcilerConfig};
use storeprov_backend::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    storeprov_common::init();

    let args = ServerArgs::parse();
    init_tracing(&args)?;

    if let Some(ref kubeconfig) = args.kubeconfig {
        // SAFETY: set before any other thread reads env; this runs once at
        // process startup before the tokio runtime spins up worker threads
        // that might race on it.
        unsafe { std::env::set_var("KUBECONFIG", kubeconfig) };
    }

    let pool = storeprov_common::postgres::create_pool(args.postgres.clone()).await;
    init_schema(&pool).await.context("failed to initialize database schema")?;

    let packager = Arc::new(HelmPackager::new(
        args.helm_chart_path.clone(),
        args.helm_values_file.clone(),
        args.helm_env_values_file.clone(),
    ));
    packager
        .validate_startup()
        .await
        .context("packaging tool startup validation failed")?;

    let kube_client = Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;
    let cluster_reader = Arc::new(KubeClusterReader::new(kube_client));

    let repo = Arc::new(PgStoreRepository::new(pool));

    let reconciler_config = ReconcilerConfig {
        max_workers: args.provisioning_max_workers,
        provisioning_timeout: Duration::from_secs(args.provisioning_timeout_seconds),
        poll_interval: Duration::from_secs(args.provisioning_poll_interval_seconds),
        scheduling_delay: Duration::from_secs(15),
        base_domain: args.base_domain.clone(),
        role_rules: RoleRules::default(),
    };
    let reconciler = Arc::new(Reconciler::new(
        repo.clone(),
        packager.clone(),
        cluster_reader,
        reconciler_config,
    ));

    let lifecycle = Arc::new(Lifecycle::new(repo, packager, reconciler));
    lifecycle
        .resume_in_flight()
        .await
        .context("failed to resume in-flight provisioning work")?;

    run_server(args.port, lifecycle).await
}

fn init_tracing(args: &ServerArgs) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(ref log_dir) = args.log_dir {
        let file_appender = tracing_appender::rolling::daily(log_dir, "store-provisioning-backend.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked intentionally: the guard must outlive the process for the
        // background writer thread to flush on every log line.
        Box::leak(Box::new(guard));
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(non_blocking).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
