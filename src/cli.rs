//! CLI 모드
//!
//! ## 사용법
//! ```text
//! jarkeeper scan                        # 플러그인 폴더 스캔
//! jarkeeper check [--json] [id...]      # 업데이트 확인
//! jarkeeper update <id>                 # 플러그인 하나 업데이트
//! jarkeeper update-all [id...]          # 일괄 업데이트 (인자 없으면 업데이트 가능한 전체)
//! jarkeeper backups [id]                # 백업 목록
//! jarkeeper restore <backup-id>         # 백업 복원
//! jarkeeper prune                       # 보존 기간이 지난 백업 삭제
//! jarkeeper config                      # 설정 표시
//! jarkeeper config set <key> <value>    # 설정 변경
//! jarkeeper serve                       # 데몬 (IPC + 자동 확인)
//! ```
//!
//! ## 종료 코드 (check --json)
//! - `0`: 업데이트 있음
//! - `1`: 에러
//! - `2`: 업데이트 없음

use std::sync::Arc;

use jarkeeper_updater_lib::{exit_code, Backup, TaskOutcome, UpdateManager};

use crate::config::{config_file_path, load_config, set_config_value};

/// `serve` 이외의 명령 실행. 프로세스 종료 코드 반환
pub async fn run(args: &[String]) -> anyhow::Result<i32> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    if args.is_empty() || matches!(args[0], "help" | "--help" | "-h") {
        print_help();
        return Ok(0);
    }
    if matches!(args[0], "--version" | "-V") {
        println!("jarkeeper {}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }
    if args[0] == "config" {
        return cmd_config(&args[1..]);
    }

    let cfg = load_config()?;
    let manager = UpdateManager::new(cfg.updater)?;

    match args[0] {
        "scan" => cmd_scan(&manager).await,
        "check" => cmd_check(&manager, &args[1..]).await,
        "update" => cmd_update(&manager, &args[1..]).await,
        "update-all" => cmd_update_all(&manager, &args[1..]).await,
        "backups" => cmd_backups(&manager, &args[1..]).await,
        "restore" => cmd_restore(&manager, &args[1..]).await,
        "prune" => cmd_prune(&manager).await,
        other => {
            eprintln!("✗ Unknown command: {}", other);
            eprintln!("  Run 'jarkeeper help' for usage.");
            Ok(1)
        }
    }
}

// ═══════════════════════════════════════════════════════
// 명령어 핸들러
// ═══════════════════════════════════════════════════════

async fn cmd_scan(manager: &Arc<UpdateManager>) -> anyhow::Result<i32> {
    let plugins = manager.scan(None).await?;
    println!("📦 {} plugin(s) in {}", plugins.len(), manager.plugins_dir().display());
    println!("─────────────────────────────────────────────");
    for p in &plugins {
        let name = p.descriptor_name.as_deref().unwrap_or(&p.name);
        println!("  {:<28} {:<16} {}", name, p.current_version, p.file_name);
    }
    Ok(0)
}

async fn cmd_check(manager: &Arc<UpdateManager>, flags: &[&str]) -> anyhow::Result<i32> {
    let json_mode = flags.contains(&"--json");
    let ids: Vec<String> = flags
        .iter()
        .filter(|f| !f.starts_with("--"))
        .map(|f| f.to_string())
        .collect();

    if let Err(e) = manager.scan(None).await {
        if json_mode {
            println!(
                "{}",
                serde_json::json!({ "success": false, "error": e.to_string(), "error_code": e.error_code() })
            );
            return Ok(1);
        }
        return Err(e.into());
    }

    let report = if ids.is_empty() {
        manager.check_all(None).await
    } else {
        manager.check_all(Some(ids.as_slice())).await
    };

    if json_mode {
        println!("{}", serde_json::to_string(&report)?);
        return Ok(exit_code(&report));
    }

    for outcome in &report.outcomes {
        print_outcome(outcome);
    }
    println!();
    if report.updates_available() > 0 {
        println!("📦 {} update(s) available.", report.updates_available());
        println!("💡 Run 'jarkeeper update-all' to install them.");
    } else if report.errors() == 0 {
        println!("✓ Nothing to update.");
    }
    if report.unresolved() > 0 {
        println!("⚠ {} plugin(s) could not be resolved on any source.", report.unresolved());
    }
    Ok(exit_code(&report))
}

async fn cmd_update(manager: &Arc<UpdateManager>, args: &[&str]) -> anyhow::Result<i32> {
    let Some(id) = args.first() else {
        anyhow::bail!("Usage: jarkeeper update <plugin-id>");
    };
    manager.scan(None).await?;
    println!("⏳ Updating {}...", id);
    let outcome = manager.update(id).await?;
    print_outcome(&outcome);
    Ok(if outcome.error.is_some() { 1 } else { 0 })
}

async fn cmd_update_all(manager: &Arc<UpdateManager>, args: &[&str]) -> anyhow::Result<i32> {
    manager.scan(None).await?;
    let report = if args.is_empty() {
        println!("⏳ Checking for updates first...");
        manager.check_all(None).await;
        manager.update_available().await
    } else {
        let ids: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        manager.update_all(&ids).await
    };

    if report.outcomes.is_empty() {
        println!("✓ Nothing to update.");
        return Ok(0);
    }
    for outcome in &report.outcomes {
        print_outcome(outcome);
    }
    println!();
    println!("✓ {} succeeded, ✗ {} failed", report.succeeded(), report.failed());
    Ok(if report.failed() > 0 { 1 } else { 0 })
}

async fn cmd_backups(manager: &Arc<UpdateManager>, args: &[&str]) -> anyhow::Result<i32> {
    let backups = match args.first() {
        Some(id) => manager.list_backups(id).await?,
        None => manager.list_all_backups().await?,
    };
    if backups.is_empty() {
        println!("  No backups.");
        return Ok(0);
    }
    println!("🗂 {} backup(s)", backups.len());
    println!("─────────────────────────────────────────────");
    for b in &backups {
        print_backup(b);
    }
    Ok(0)
}

async fn cmd_restore(manager: &Arc<UpdateManager>, args: &[&str]) -> anyhow::Result<i32> {
    let Some(backup_id) = args.first() else {
        anyhow::bail!("Usage: jarkeeper restore <backup-id>");
    };
    if let Err(e) = manager.scan(None).await {
        tracing::warn!("[CLI] Scan before restore failed: {}", e);
    }
    let plugin = manager.restore_backup(backup_id).await?;
    println!("✓ Restored {} ({})", plugin.name, plugin.current_version);
    Ok(0)
}

async fn cmd_prune(manager: &Arc<UpdateManager>) -> anyhow::Result<i32> {
    let report = manager.prune_backups().await?;
    println!(
        "✓ Removed {} backup(s), kept {}",
        report.removed.len(),
        report.retained.len()
    );
    for b in &report.removed {
        println!("  - {}", b.id);
    }
    Ok(0)
}

fn cmd_config(args: &[&str]) -> anyhow::Result<i32> {
    let path = config_file_path();
    match args {
        ["set", key, value] => {
            set_config_value(&path, key, value)?;
            println!("✓ {} = {} ({})", key, value, path.display());
        }
        ["path"] => println!("{}", path.display()),
        [] => {
            let cfg = load_config()?;
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(&cfg.redacted())?);
        }
        _ => anyhow::bail!("Usage: jarkeeper config [set <key> <value> | path]"),
    }
    Ok(0)
}

// ═══════════════════════════════════════════════════════
// 출력
// ═══════════════════════════════════════════════════════

fn print_outcome(o: &TaskOutcome) {
    let current = o.current_version.as_deref().unwrap_or("-");
    let latest = o.latest_version.as_deref().unwrap_or("-");
    let source = o.source.as_deref().unwrap_or("-");
    match &o.error {
        None if o.updated => println!("  ✓ {:<28} updated to {} ({})", o.plugin_id, current, source),
        None => println!("  • {:<28} {:<12} latest {:<12} [{}]", o.plugin_id, current, latest, o.state),
        Some(e) if o.fatal => {
            println!("  ✗ {:<28} {}", o.plugin_id, e.user_message());
            println!("    ‼ Manual recovery needed: check the live archive and .backups/");
        }
        Some(e) => println!("  ✗ {:<28} [{}] {}", o.plugin_id, e.error_code(), e.user_message()),
    }
}

fn print_backup(b: &Backup) {
    println!(
        "  {:<48} {:<20} {}",
        b.id,
        b.plugin_id,
        b.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

fn print_help() {
    println!("jarkeeper {} - plugin folder manager", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  jarkeeper <command> [args]");
    println!();
    println!("COMMANDS:");
    println!("  scan                       List plugins in the plugin folder");
    println!("  check [--json] [id...]     Check registries for newer versions");
    println!("  update <id>                Update one plugin (backup + rollback)");
    println!("  update-all [id...]         Update several plugins independently");
    println!("  backups [id]               List backups");
    println!("  restore <backup-id>        Restore a backup over the live archive");
    println!("  prune                      Delete backups past the retention period");
    println!("  config                     Show configuration");
    println!("  config set <key> <value>   Change a configuration value");
    println!("  config path                Print the configuration file path");
    println!("  serve                      Run the daemon (IPC API + auto-check)");
    println!();
    println!("EXIT CODES (check):");
    println!("  0  updates available");
    println!("  1  error");
    println!("  2  nothing to do");
    println!();
    println!("ENVIRONMENT:");
    println!("  JARKEEPER_CONFIG           Configuration file path");
    println!("  RUST_LOG                   Log filter (default: info)");
}
