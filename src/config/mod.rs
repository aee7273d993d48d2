//! 설정 파일 관리
//!
//! `config/jarkeeper.toml` 또는 `config/global.toml`의 `[jarkeeper]` 섹션에서
//! 설정을 로드합니다. `JARKEEPER_CONFIG` 환경 변수로 경로를 지정할 수 있습니다.
//!
//! ```toml
//! plugins_dir = "plugins"
//! backup_retention_days = 7
//! update_channel = "stable"
//! conflict_policy = "highest_version"
//!
//! [sources]
//! priority = ["modrinth", "spigot", "bukkit", "github"]
//!
//! [sources.base_urls]
//! modrinth = "https://api.modrinth.com"
//!
//! [api_keys]
//! bukkit = "..."
//!
//! [github.repos]
//! LuckPerms = "LuckPerms/LuckPerms"
//! ```

use anyhow::{anyhow, bail, Context, Result};
use jarkeeper_updater_lib::{ConflictPolicy, UpdateChannel, UpdateConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_IPC_LISTEN: &str = "127.0.0.1:57480";
const CONFIG_FILE_NAME: &str = "jarkeeper.toml";
const SECTION: &str = "jarkeeper";

/// 애플리케이션 설정 (업데이터 설정 + 데몬 설정)
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub updater: UpdateConfig,
    pub ipc_listen: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            updater: UpdateConfig::default(),
            ipc_listen: DEFAULT_IPC_LISTEN.to_string(),
        }
    }
}

impl AppConfig {
    /// API 키를 가린 사본 (출력/IPC용)
    pub fn redacted(&self) -> Self {
        Self {
            updater: self.updater.redacted(),
            ipc_listen: self.ipc_listen.clone(),
        }
    }
}

/// 설정 파일 경로 결정
pub fn config_file_path() -> PathBuf {
    if let Ok(path) = std::env::var("JARKEEPER_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // 1. 실행 파일 옆 config/jarkeeper.toml
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let cfg = dir.join("config").join(CONFIG_FILE_NAME);
            if cfg.exists() {
                return cfg;
            }
        }
    }

    // 2. 기본: CWD의 config/jarkeeper.toml (생성용)
    PathBuf::from("config").join(CONFIG_FILE_NAME)
}

/// 설정 로드. 파일이 없으면 global.toml의 [jarkeeper] 섹션, 그것도 없으면 기본값
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path();
    if path.exists() {
        return load_config_from(&path);
    }

    if let Some(global) = find_global_toml() {
        let content = std::fs::read_to_string(&global)?;
        let parsed: toml::Value = content
            .parse()
            .with_context(|| format!("invalid TOML in {}", global.display()))?;
        if let Some(section) = parsed.get(SECTION) {
            tracing::info!("[Config] Loaded [{}] from {}", SECTION, global.display());
            return parse_config(section);
        }
    }

    tracing::info!("[Config] No config file found, using defaults");
    Ok(AppConfig::default())
}

/// 지정한 파일에서 로드. `[jarkeeper]` 섹션이 있으면 그 섹션만 사용
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: toml::Value = content
        .parse()
        .with_context(|| format!("invalid TOML in {}", path.display()))?;
    let config = match parsed.get(SECTION) {
        Some(section) => parse_config(section)?,
        None => parse_config(&parsed)?,
    };
    tracing::info!("[Config] Loaded {}", path.display());
    Ok(config)
}

pub fn parse_config(val: &toml::Value) -> Result<AppConfig> {
    let mut app = AppConfig::default();
    let cfg = &mut app.updater;

    if let Some(v) = get_str(val, "plugins_dir")? {
        cfg.plugins_dir = PathBuf::from(v);
    }
    if let Some(v) = get_uint(val, "backup_retention_days")? {
        cfg.backup_retention_days = narrow("backup_retention_days", v)?;
    }
    if let Some(v) = get_str(val, "update_channel")? {
        cfg.update_channel = UpdateChannel::parse(v)
            .ok_or_else(|| anyhow!("Invalid update_channel: '{}' (use stable/beta)", v))?;
    }
    if let Some(v) = get_bool(val, "auto_download")? {
        cfg.auto_download = v;
    }
    if let Some(v) = get_bool(val, "auto_check")? {
        cfg.auto_check = v;
    }
    if let Some(v) = get_uint(val, "check_interval_hours")? {
        cfg.check_interval_hours = narrow("check_interval_hours", v)?;
    }
    if let Some(v) = get_uint(val, "pool_size")? {
        cfg.pool_size = narrow("pool_size", v)?;
    }
    if let Some(v) = get_uint(val, "request_timeout_secs")? {
        cfg.request_timeout_secs = v;
    }
    if let Some(v) = get_uint(val, "download_timeout_secs")? {
        cfg.download_timeout_secs = v;
    }
    if let Some(v) = get_uint(val, "io_timeout_secs")? {
        cfg.io_timeout_secs = v;
    }
    if let Some(v) = get_uint(val, "request_retries")? {
        cfg.request_retries = narrow("request_retries", v)?;
    }
    if let Some(v) = get_str_list(val, "archive_extensions")? {
        cfg.archive_extensions = v
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
    }
    if let Some(v) = get_str(val, "conflict_policy")? {
        cfg.conflict_policy = ConflictPolicy::parse(v).ok_or_else(|| {
            anyhow!("Invalid conflict_policy: '{}' (use highest_version/source_priority)", v)
        })?;
    }

    if let Some(sources) = val.get("sources") {
        if let Some(v) = get_str_list(sources, "priority")? {
            cfg.source_priority = v;
        }
        if let Some(v) = get_str_table(sources, "base_urls")? {
            cfg.base_urls = v;
        }
    }
    if let Some(v) = get_str_table(val, "api_keys")? {
        cfg.api_keys = v;
    }
    if let Some(github) = val.get("github") {
        if let Some(v) = get_str_table(github, "repos")? {
            cfg.github_repos = v;
        }
    }

    if let Some(v) = get_str(val, "ipc_listen")? {
        app.ipc_listen = v.to_string();
    }

    app.updater.validate().map_err(|e| anyhow!("{}", e))?;
    Ok(app)
}

fn get_str<'a>(val: &'a toml::Value, key: &str) -> Result<Option<&'a str>> {
    match val.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| anyhow!("'{}' must be a string", key)),
    }
}

fn get_bool(val: &toml::Value, key: &str) -> Result<Option<bool>> {
    match val.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| anyhow!("'{}' must be true or false", key)),
    }
}

fn get_uint(val: &toml::Value, key: &str) -> Result<Option<u64>> {
    match val.get(key) {
        None => Ok(None),
        Some(v) => match v.as_integer() {
            Some(n) if n >= 0 => Ok(Some(n as u64)),
            _ => bail!("'{}' must be a non-negative integer", key),
        },
    }
}

fn get_str_list(val: &toml::Value, key: &str) -> Result<Option<Vec<String>>> {
    let Some(v) = val.get(key) else {
        return Ok(None);
    };
    let items = v
        .as_array()
        .ok_or_else(|| anyhow!("'{}' must be an array of strings", key))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("'{}' must be an array of strings", key))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn get_str_table(val: &toml::Value, key: &str) -> Result<Option<HashMap<String, String>>> {
    let Some(v) = val.get(key) else {
        return Ok(None);
    };
    let table = v
        .as_table()
        .ok_or_else(|| anyhow!("[{}] must be a table of strings", key))?;
    let mut out = HashMap::new();
    for (k, v) in table {
        let s = v
            .as_str()
            .ok_or_else(|| anyhow!("'{}.{}' must be a string", key, k))?;
        out.insert(k.clone(), s.to_string());
    }
    Ok(Some(out))
}

fn narrow<T: TryFrom<u64>>(key: &str, value: u64) -> Result<T> {
    T::try_from(value).map_err(|_| anyhow!("'{}' is out of range: {}", key, value))
}

/// config set <key> <value>
///
/// 최상위 스칼라 키와 `api_keys.<source>`, `github.repos.<plugin>`를 지원합니다.
/// 저장 전에 전체 설정을 다시 검증합니다.
pub fn set_config_value(path: &Path, key: &str, value: &str) -> Result<()> {
    let mut table: toml::value::Table = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        content
            .parse::<toml::Value>()?
            .as_table()
            .cloned()
            .unwrap_or_default()
    } else {
        toml::value::Table::new()
    };

    let toml_val: toml::Value = match key {
        "auto_download" | "auto_check" => toml::Value::Boolean(value.parse::<bool>().map_err(|_| {
            anyhow!("Invalid boolean value: '{}' (use true/false)", value)
        })?),
        "backup_retention_days" | "check_interval_hours" | "pool_size" | "request_timeout_secs"
        | "download_timeout_secs" | "io_timeout_secs" | "request_retries" => {
            toml::Value::Integer(
                value
                    .parse::<i64>()
                    .map_err(|_| anyhow!("Invalid integer value: '{}'", value))?,
            )
        }
        "plugins_dir" | "update_channel" | "conflict_policy" | "ipc_listen" => {
            toml::Value::String(value.to_string())
        }
        _ => {
            if let Some(source) = key.strip_prefix("api_keys.") {
                insert_nested(&mut table, &["api_keys"], source, value);
            } else if let Some(plugin) = key.strip_prefix("github.repos.") {
                insert_nested(&mut table, &["github", "repos"], plugin, value);
            } else {
                bail!(
                    "Unknown config key: '{}'\nAvailable: plugins_dir, backup_retention_days, update_channel, \
                    auto_download, auto_check, check_interval_hours, pool_size, request_timeout_secs, \
                    download_timeout_secs, io_timeout_secs, request_retries, conflict_policy, ipc_listen, \
                    api_keys.<source>, github.repos.<plugin>",
                    key
                );
            }
            return write_table(path, table);
        }
    };

    table.insert(key.to_string(), toml_val);
    write_table(path, table)
}

fn insert_nested(table: &mut toml::value::Table, sections: &[&str], key: &str, value: &str) {
    let mut current = table;
    for section in sections {
        let entry = current
            .entry(section.to_string())
            .or_insert_with(|| toml::Value::Table(toml::value::Table::new()));
        if !entry.is_table() {
            *entry = toml::Value::Table(toml::value::Table::new());
        }
        current = match entry {
            toml::Value::Table(inner) => inner,
            _ => return,
        };
    }
    current.insert(key.to_string(), toml::Value::String(value.to_string()));
}

fn write_table(path: &Path, table: toml::value::Table) -> Result<()> {
    let value = toml::Value::Table(table);
    parse_config(&value)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = toml::to_string_pretty(&value)?;
    std::fs::write(path, content)?;
    tracing::info!("[Config] Saved {}", path.display());
    Ok(())
}

fn find_global_toml() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let p = dir.join("config").join("global.toml");
            if p.exists() {
                return Some(p);
            }
        }
    }
    let p = PathBuf::from("config").join("global.toml");
    if p.exists() {
        return Some(p);
    }
    None
}
