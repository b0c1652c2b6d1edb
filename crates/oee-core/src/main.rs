use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use oee_client::{FileTokenStorage, LogNavigator, MemoryTokenStorage, ReqwestTransport, TokenStorage};
use oee_core::{Dashboard, DashboardConfig, DashboardDeps};
use std::path::PathBuf;
use std::sync::Arc;

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("oee-dashboard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Headless OEE dashboard: polls a line and mirrors its state")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_parser(clap::value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("token")
                .long("token")
                .help("Bearer token; otherwise the stored token is used"),
        )
        .arg(
            Arg::new("line")
                .long("line")
                .action(ArgAction::Append)
                .help("Line id to show (repeatable); the first is controlled"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        );

    let matches = cli.get_matches();
    init_tracing(matches.get_flag("json-logs"));

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => DashboardConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DashboardConfig::default(),
    };
    if let Some(lines) = matches.get_many::<String>("line") {
        config = config.with_lines(lines.cloned().collect());
    }
    config.validate().context("invalid configuration")?;

    let storage: Arc<dyn TokenStorage> = match &config.api.token_store {
        Some(path) => Arc::new(FileTokenStorage::open(path)?),
        None => Arc::new(MemoryTokenStorage::new()),
    };
    let transport = Arc::new(ReqwestTransport::new(config.api.timeout())?);
    let deps = DashboardDeps::new(transport, storage, Arc::new(LogNavigator));
    let dashboard = Dashboard::new(config, deps)?;

    match matches.get_one::<String>("token") {
        Some(token) => dashboard.login(token.clone())?,
        None => {
            if !dashboard.client().is_authenticated() {
                tracing::warn!("no token configured; pollers stay idle until login");
            }
            dashboard.start()?;
        }
    }

    let mut snapshots = dashboard.store().subscribe();
    let mut timeline = dashboard.subscribe_timeline();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                tracing::info!(
                    line = %snapshot.machine.line_id,
                    status = %snapshot.machine.status,
                    good = snapshot.machine.production.good,
                    rejected = snapshot.machine.production.rejected,
                    downtime_events = snapshot.machine.downtime_history.len(),
                    view = ?snapshot.navigation.current,
                    "state updated"
                );
            }
            changed = timeline.changed() => {
                if changed.is_err() {
                    break;
                }
                let events = timeline.borrow_and_update().len();
                tracing::info!(events, "timeline updated");
            }
        }
    }

    dashboard.shutdown();
    Ok(())
}
