use clap::Parser;
use pkg_constants::controller::{DEFAULT_SYNC_INTERVAL_SECS, DEFAULT_SYNC_TIMEOUT_SECS};
use pkg_constants::paths::{DEFAULT_CONTROLLER_CONFIG, DEFAULT_CONTROLLER_DATA_DIR};
use pkg_controllers::statefulset::StatefulSetController;
use pkg_state::StateStore;
use pkg_types::config::{ControllerConfigFile, ReconcilerConfig, load_config_file};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "sts-controller", about = "StatefulSet reconciler")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONTROLLER_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Seconds between reconcile passes
    #[arg(long)]
    sync_interval_secs: Option<u64>,

    /// Upper bound for a single StatefulSet sync
    #[arg(long)]
    sync_timeout_secs: Option<u64>,

    /// Force ordered (true) or burst (false) pod management for every set
    #[arg(long)]
    monotonic_override: Option<bool>,

    /// Honor claim retention policies
    #[arg(long)]
    auto_delete_pvc: Option<bool>,

    /// Apply claim template changes to existing claims of InPlace sets
    #[arg(long)]
    update_claim_template: Option<bool>,

    /// Roll updates under max_unavailable instead of one pod at a time
    #[arg(long)]
    bounded_max_unavailable: Option<bool>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// CLI flags win over the config file.
    fn reconciler_config(&self, file_cfg: &ControllerConfigFile) -> ReconcilerConfig {
        let base = file_cfg.reconciler_config();
        ReconcilerConfig {
            monotonic_override: self.monotonic_override.or(base.monotonic_override),
            auto_delete_pvc: self.auto_delete_pvc.unwrap_or(base.auto_delete_pvc),
            update_claim_template: self.update_claim_template.unwrap_or(base.update_claim_template),
            bounded_max_unavailable: self
                .bounded_max_unavailable
                .unwrap_or(base.bounded_max_unavailable),
        }
    }
}

fn init_logging(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: ControllerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let reconciler = cli.reconciler_config(&file_cfg);
    let data_dir = cli
        .data_dir
        .clone()
        .or(file_cfg.data_dir.clone())
        .unwrap_or_else(|| DEFAULT_CONTROLLER_DATA_DIR.to_string());
    let sync_interval = cli
        .sync_interval_secs
        .or(file_cfg.sync_interval_secs)
        .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);
    let sync_timeout = cli
        .sync_timeout_secs
        .or(file_cfg.sync_timeout_secs)
        .unwrap_or(DEFAULT_SYNC_TIMEOUT_SECS);

    info!("Starting sts-controller");
    info!("  Data dir:       {}", data_dir);
    info!("  Sync interval:  {}s", sync_interval);
    info!("  Sync timeout:   {}s", sync_timeout);
    info!("  Reconciler:     {:?}", reconciler);

    let store = StateStore::new(&data_dir).await?;
    let handle = StatefulSetController::new(store.clone(), reconciler)
        .with_intervals(Duration::from_secs(sync_interval), Duration::from_secs(sync_timeout))
        .start();

    info!("Controller is running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down sts-controller");
    handle.abort();
    store.close().await?;

    Ok(())
}
