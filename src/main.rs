use std::sync::Arc;

use jarkeeper::config;
use jarkeeper::ipc::{self, IpcServer, IpcState};
use jarkeeper_updater_lib::{AutoCheckScheduler, UpdateManager};

fn init_logging(to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    // CLI 모드는 stdout의 JSON을 오염시키지 않도록 stderr
    if to_stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) != Some("serve") {
        init_logging(true);
        let code = match jarkeeper::cli::run(&args).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("✗ Error: {:#}", e);
                1
            }
        };
        std::process::exit(code);
    }

    init_logging(false);
    serve().await
}

async fn serve() -> anyhow::Result<()> {
    tracing::info!("jarkeeper daemon {} starting", env!("CARGO_PKG_VERSION"));

    let cfg = config::load_config()?;
    tracing::info!(
        "[Config] plugins_dir={} channel={} retention={}d",
        cfg.updater.plugins_dir.display(),
        cfg.updater.update_channel,
        cfg.updater.backup_retention_days
    );

    let manager = UpdateManager::new(cfg.updater.clone())?;
    match manager.scan(None).await {
        Ok(plugins) => tracing::info!("[Inventory] {} plugin(s) found", plugins.len()),
        Err(e) => tracing::warn!("[Inventory] Initial scan failed: {}", e),
    }

    let mut scheduler = AutoCheckScheduler::new(
        Arc::clone(&manager),
        cfg.updater.check_interval_hours,
        cfg.updater.auto_check,
    );
    scheduler.start();

    let token = match ipc::auth::generate_and_save_token() {
        Ok(token) => Some(token),
        Err(e) => {
            tracing::warn!("[IPC] Could not write auth token, IPC auth disabled: {}", e);
            None
        }
    };

    let listen = cfg.ipc_listen.clone();
    let server = IpcServer::new(IpcState::new(Arc::clone(&manager), cfg), &listen);
    let shutdown_manager = Arc::clone(&manager);
    let shutdown = async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, cancelling in-flight work...");
        shutdown_manager.shutdown();
    };

    if let Err(e) = server.start(token, shutdown).await {
        tracing::error!("[IPC] Server error: {}", e);
    }

    scheduler.stop();
    tracing::info!("jarkeeper daemon shutting down");
    Ok(())
}
