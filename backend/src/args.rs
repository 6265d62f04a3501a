use clap::Parser;
use storeprov_common::args::PostgresArgs;

#[derive(Parser, Debug, Clone)]
#[command(name = "storeprov-backend")]
#[command(about = "Store provisioning control plane")]
pub struct ServerArgs {
    #[clap(flatten)]
    pub postgres: PostgresArgs,

    /// HTTP port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory containing the packaging tool's chart (values.yaml,
    /// values-local.yaml and the chart manifest live here).
    #[arg(long, env = "HELM_CHART_PATH")]
    pub helm_chart_path: String,

    #[arg(long, env = "HELM_VALUES_FILE", default_value = "values.yaml")]
    pub helm_values_file: String,

    #[arg(long, env = "HELM_ENV_VALUES_FILE", default_value = "values-local.yaml")]
    pub helm_env_values_file: String,

    /// Path to the kubeconfig used to build the cluster-read client. When
    /// unset, the in-cluster config (or kube-rs's default local lookup) is
    /// used.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Base domain new stores' ingress hosts are derived from:
    /// `{name}.{BASE_DOMAIN}`.
    #[arg(long, env = "BASE_DOMAIN", default_value = "localhost")]
    pub base_domain: String,

    #[arg(long, env = "PROVISIONING_TIMEOUT_SECONDS", default_value_t = 600)]
    pub provisioning_timeout_seconds: u64,

    #[arg(long, env = "PROVISIONING_POLL_INTERVAL_SECONDS", default_value_t = 5)]
    pub provisioning_poll_interval_seconds: u64,

    #[arg(long, env = "PROVISIONING_MAX_WORKERS", default_value_t = 5)]
    pub provisioning_max_workers: usize,

    /// Directory rolling log files are written to. When unset, logs go to
    /// stdout only.
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
