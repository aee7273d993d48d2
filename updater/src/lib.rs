//! # jarkeeper 업데이터 라이브러리
//!
//! 서버 플러그인 폴더(`.jar` 아카이브)를 관리합니다.
//! 설치된 플러그인을 스캔하고, 여러 원격 레지스트리에서 최신 버전을 확인하며,
//! 백업과 자동 롤백을 동반한 안전한 인플레이스 업데이트를 수행합니다.
//!
//! ## 파이프라인
//! - **인벤토리(inventory.rs)**: 폴더 스캔, `plugin.yml`에서 이름/버전 추출
//! - **소스(sources/)**: Modrinth, Spiget, BukkitDev, GitHub 레지스트리 어댑터
//! - **버전(version.rs)**: 버전 비교 및 후보 중 승자 결정
//! - **백업(backup.rs)**: 검증된 사본 생성, 원자적 복원, 보존 기간 정리
//! - **오케스트레이터(orchestrator.rs)**: 플러그인별 상태 머신, 동시성 제한, 취소
//! - **워커(worker.rs)**: 진행 이벤트 브로드캐스트, 주기적 자동 확인
//!
//! ## 디렉터리 구조
//! ```text
//! plugins/
//!   EssentialsX.jar
//!   LuckPerms.jar
//!   .backups/
//!     EssentialsX__20240301T120000000Z.jar.bak
//!     EssentialsX__20240301T120000000Z.jar.bak.sha256
//! ```

// ══════════════════════════════════════════════════════
// 모듈
// ══════════════════════════════════════════════════════

pub mod backup;
pub mod error;
pub mod inventory;
pub mod orchestrator;
pub mod sources;
pub mod task;
pub mod version;
pub mod worker;

#[cfg(test)]
mod tests;

pub use backup::{Backup, BackupManager, PruneReport};
pub use error::{ErrorContext, RecoveryStrategy, UpdaterError};
pub use inventory::Scanner;
pub use orchestrator::{BatchReport, CheckReport, TaskOutcome, UpdateManager};
pub use sources::{ResolveRequest, SourceError, VersionSource};
pub use task::{TaskState, UpdateTask};
pub use version::{compare_versions, ConflictPolicy, Resolution, SourceReport, Version};
pub use worker::{exit_code, AutoCheckScheduler, WorkerEvent};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// 버전을 알 수 없을 때 사용하는 값
pub const UNKNOWN_VERSION: &str = "Unknown";

/// 백업 디렉터리 이름 (플러그인 폴더 하위)
pub const BACKUP_DIR_NAME: &str = ".backups";

// ══════════════════════════════════════════════════════
// 데이터 모델
// ══════════════════════════════════════════════════════

/// 설치된 플러그인 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    /// 플러그인 식별자 (파일 이름에서 확장자를 뺀 값)
    pub id: String,
    pub name: String,
    /// 아카이브 내부 디스크립터에 선언된 이름
    pub descriptor_name: Option<String>,
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    pub current_version: String,
    /// 스캔 시점 아카이브의 SHA-256
    pub content_hash: String,
}

impl Plugin {
    /// 레지스트리 조회에 사용할 이름
    pub fn lookup_name(&self) -> &str {
        self.descriptor_name.as_deref().unwrap_or(&self.name)
    }

    pub fn has_known_version(&self) -> bool {
        self.current_version != UNKNOWN_VERSION
    }
}

/// 해시 알고리즘
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

/// 레지스트리가 제공한 다운로드 체크섬
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    /// 소문자 hex
    pub value: String,
}

impl Checksum {
    pub fn sha256(value: impl Into<String>) -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            value: value.into().to_ascii_lowercase(),
        }
    }

    pub fn sha512(value: impl Into<String>) -> Self {
        Self {
            algorithm: HashAlgorithm::Sha512,
            value: value.into().to_ascii_lowercase(),
        }
    }

    /// 주어진 바이트의 다이제스트 (같은 알고리즘)
    pub fn digest(&self, bytes: &[u8]) -> String {
        use sha2::Digest;
        match self.algorithm {
            HashAlgorithm::Sha256 => hex::encode(sha2::Sha256::digest(bytes)),
            HashAlgorithm::Sha512 => hex::encode(sha2::Sha512::digest(bytes)),
        }
    }

    pub fn matches(&self, bytes: &[u8]) -> bool {
        self.digest(bytes).eq_ignore_ascii_case(&self.value)
    }
}

/// 업데이트 채널
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateChannel {
    #[default]
    Stable,
    Beta,
}

impl UpdateChannel {
    /// 이 채널 설정에서 후보 채널을 허용하는지
    pub fn admits(&self, candidate: UpdateChannel) -> bool {
        match self {
            UpdateChannel::Stable => candidate == UpdateChannel::Stable,
            UpdateChannel::Beta => true,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stable" | "release" => Some(UpdateChannel::Stable),
            "beta" | "prerelease" => Some(UpdateChannel::Beta),
            _ => None,
        }
    }
}

impl std::fmt::Display for UpdateChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateChannel::Stable => write!(f, "stable"),
            UpdateChannel::Beta => write!(f, "beta"),
        }
    }
}

/// 어댑터 한 곳이 보고한 최신 버전
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// 어댑터 식별자
    pub source: String,
    pub latest_version: String,
    pub download_url: String,
    pub checksum: Option<Checksum>,
    pub channel: UpdateChannel,
    pub published_at: Option<DateTime<Utc>>,
}

// ══════════════════════════════════════════════════════
// 설정
// ══════════════════════════════════════════════════════

/// 업데이터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// 스캔 대상 플러그인 폴더
    pub plugins_dir: PathBuf,
    /// 백업 보존 기간 (일, 1 이상)
    pub backup_retention_days: u32,
    pub update_channel: UpdateChannel,
    /// UpdateAvailable 상태에서 바로 업데이트를 진행할지
    pub auto_download: bool,
    pub auto_check: bool,
    pub check_interval_hours: u32,
    /// 동시 네트워크 작업 수
    pub pool_size: usize,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub io_timeout_secs: u64,
    /// 어댑터 요청 단위 재시도 횟수
    pub request_retries: u32,
    pub archive_extensions: Vec<String>,
    /// 어댑터 우선순위 (앞쪽이 높음)
    pub source_priority: Vec<String>,
    pub conflict_policy: ConflictPolicy,
    /// 레지스트리별 API 키
    pub api_keys: HashMap<String, String>,
    /// 레지스트리 base URL 덮어쓰기 (테스트/미러용)
    pub base_urls: HashMap<String, String>,
    /// 플러그인 이름 → "owner/repo"
    pub github_repos: HashMap<String, String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
            backup_retention_days: 7,
            update_channel: UpdateChannel::Stable,
            auto_download: false,
            auto_check: true,
            check_interval_hours: 6,
            pool_size: 4,
            request_timeout_secs: 15,
            download_timeout_secs: 120,
            io_timeout_secs: 30,
            request_retries: 1,
            archive_extensions: vec!["jar".to_string()],
            source_priority: vec![
                "modrinth".to_string(),
                "spigot".to_string(),
                "bukkit".to_string(),
                "github".to_string(),
            ],
            conflict_policy: ConflictPolicy::HighestVersion,
            api_keys: HashMap::new(),
            base_urls: HashMap::new(),
            github_repos: HashMap::new(),
        }
    }
}

impl UpdateConfig {
    /// 값 범위 검증
    pub fn validate(&self) -> Result<(), UpdaterError> {
        if self.backup_retention_days < 1 {
            return Err(config_error("backup_retention_days must be at least 1"));
        }
        if self.pool_size < 1 {
            return Err(config_error("pool_size must be at least 1"));
        }
        if self.check_interval_hours < 1 {
            return Err(config_error("check_interval_hours must be at least 1"));
        }
        if self.request_timeout_secs == 0 || self.download_timeout_secs == 0 || self.io_timeout_secs == 0 {
            return Err(config_error("timeouts must be greater than zero"));
        }
        if self.archive_extensions.is_empty() {
            return Err(config_error("archive_extensions must not be empty"));
        }
        if self.source_priority.is_empty() {
            return Err(config_error("at least one source must be enabled"));
        }
        for id in &self.source_priority {
            if !sources::KNOWN_SOURCES.contains(&id.as_str()) {
                return Err(config_error(&format!("unknown source '{}'", id)));
            }
        }
        for (plugin, repo) in &self.github_repos {
            let valid = repo.split_once('/').map_or(false, |(owner, name)| {
                !owner.is_empty() && !name.is_empty() && !name.contains('/')
            });
            if !valid {
                return Err(config_error(&format!(
                    "github repo for '{}' must be 'owner/repo', got '{}'",
                    plugin, repo
                )));
            }
        }
        Ok(())
    }

    /// 비어 있는 키는 없는 것으로 취급
    pub fn api_key(&self, source: &str) -> Option<String> {
        self.api_keys
            .get(source)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    pub fn base_url(&self, source: &str) -> Option<&str> {
        self.base_urls.get(source).map(|s| s.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_hours as u64 * 3600)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.plugins_dir.join(BACKUP_DIR_NAME)
    }

    /// API 키를 가린 사본 (로그/IPC 출력용)
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for value in copy.api_keys.values_mut() {
            if !value.is_empty() {
                *value = "********".to_string();
            }
        }
        copy
    }
}

fn config_error(message: &str) -> UpdaterError {
    UpdaterError::Config {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = UpdateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backup_retention_days, 7);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.update_channel, UpdateChannel::Stable);
        assert!(!config.auto_download);
    }

    #[test]
    fn rejects_zero_retention_and_unknown_source() {
        let mut config = UpdateConfig::default();
        config.backup_retention_days = 0;
        assert!(matches!(config.validate(), Err(UpdaterError::Config { .. })));

        let mut config = UpdateConfig::default();
        config.source_priority = vec!["curseforge".into()];
        assert!(matches!(config.validate(), Err(UpdaterError::Config { .. })));
    }

    #[test]
    fn blank_api_key_is_absent() {
        let mut config = UpdateConfig::default();
        config.api_keys.insert("bukkit".into(), "   ".into());
        config.api_keys.insert("modrinth".into(), "mrp_abc".into());
        assert_eq!(config.api_key("bukkit"), None);
        assert_eq!(config.api_key("modrinth").as_deref(), Some("mrp_abc"));
        assert_eq!(config.redacted().api_keys["modrinth"], "********");
    }

    #[test]
    fn stable_channel_rejects_beta_candidates() {
        assert!(UpdateChannel::Stable.admits(UpdateChannel::Stable));
        assert!(!UpdateChannel::Stable.admits(UpdateChannel::Beta));
        assert!(UpdateChannel::Beta.admits(UpdateChannel::Stable));
        assert_eq!(UpdateChannel::parse("BETA"), Some(UpdateChannel::Beta));
    }

    #[test]
    fn checksum_compares_case_insensitively() {
        let bytes = b"plugin payload";
        let sha = Checksum::sha256(Checksum::sha256("").digest(bytes).to_uppercase());
        assert!(sha.matches(bytes));
        assert!(!sha.matches(b"other payload"));
    }
}
