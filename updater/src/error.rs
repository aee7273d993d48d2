//! 에러 분류 및 복구 로직
//!
//! ## 전파 정책
//! - 소스(레지스트리)/버전 파싱 에러: 플러그인 단위로 격리, 체크 전체를 중단하지 않음
//! - 파이프라인 에러(체크섬, 백업, 롤백): 해당 플러그인의 UpdateTask만 중단
//! - `Rollback`: 라이브 파일과 백업 모두 신뢰할 수 없는 상태, 반드시 보고

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 업데이터 에러 타입
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum UpdaterError {
    /// 스캔 대상 디렉터리가 없음
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: String },

    /// 파일 시스템 오류
    #[error("File system error during {operation} on '{path}': {message}")]
    FileSystem {
        operation: String,
        path: String,
        message: String,
    },

    /// 디렉터리에 플러그인 아카이브가 하나도 없음
    #[error("No plugin archives found in {path}")]
    NoArchives { path: String },

    /// 레지스트리 응답 실패 (다음 체크 사이클에 재시도)
    #[error("Source '{source_id}' unavailable: {message}")]
    SourceUnavailable { source_id: String, message: String },

    /// 레지스트리에 플러그인이 없음
    #[error("Plugin '{plugin}' was not found on any source")]
    NotFoundOnSource { plugin: String },

    /// API 키가 필요한 레지스트리
    #[error("Source '{source_id}' requires an API key")]
    AuthRequired { source_id: String },

    /// 버전 문자열 파싱 실패 ("Unknown"으로 대체됨)
    #[error("Could not parse version '{input}'")]
    VersionParse { input: String },

    /// 다운로드 실패
    #[error("Download failed for {plugin}: {message}")]
    Download { plugin: String, message: String },

    /// 다운로드 파일 해시 불일치
    #[error("Checksum mismatch for {plugin}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        plugin: String,
        expected: String,
        actual: String,
    },

    /// 다운로드 파일이 열 수 없는 아카이브
    #[error("Downloaded payload for {plugin} is not a valid archive: {message}")]
    InvalidArchive { plugin: String, message: String },

    /// 백업 생성/검증 실패
    #[error("Backup failed for {plugin}: {message}")]
    Backup { plugin: String, message: String },

    /// 존재하지 않는 백업 ID
    #[error("Backup '{backup_id}' not found")]
    BackupNotFound { backup_id: String },

    /// 이미 진행 중인 작업이 있는 플러그인
    #[error("Plugin '{plugin}' already has an active task")]
    Conflict { plugin: String },

    /// 롤백 실패: 라이브 아카이브와 백업 모두 의심스러운 상태
    #[error("Rollback failed for {plugin}: {message}")]
    Rollback { plugin: String, message: String },

    /// 타임아웃
    #[error("Timeout after {duration_secs}s: {operation}")]
    Timeout {
        operation: String,
        duration_secs: u64,
    },

    /// 협조적 취소
    #[error("Operation cancelled for {plugin}")]
    Cancelled { plugin: String },

    /// 인벤토리에 없는 플러그인
    #[error("Unknown plugin '{plugin}'")]
    UnknownPlugin { plugin: String },

    /// 상태 머신 위반
    #[error("Invalid transition for {plugin}: {from} -> {to}")]
    InvalidTransition {
        plugin: String,
        from: String,
        to: String,
    },

    /// 설정 오류
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// 내부 오류 (태스크 패닉 등)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl UpdaterError {
    /// 다음 체크 사이클에서 다시 시도할 수 있는 에러인지
    pub fn is_recoverable(&self) -> bool {
        match self {
            UpdaterError::SourceUnavailable { .. } => true,
            UpdaterError::Timeout { .. } => true,
            UpdaterError::Download { .. } => true,
            // 재해석(re-resolve) 후 재시도 가능
            UpdaterError::ChecksumMismatch { .. } => true,
            UpdaterError::InvalidArchive { .. } => true,
            UpdaterError::Conflict { .. } => true,
            UpdaterError::Cancelled { .. } => true,
            UpdaterError::NotFoundOnSource { .. } => true,
            UpdaterError::VersionParse { .. } => true,
            UpdaterError::DirectoryNotFound { .. }
            | UpdaterError::FileSystem { .. }
            | UpdaterError::NoArchives { .. }
            | UpdaterError::AuthRequired { .. }
            | UpdaterError::Backup { .. }
            | UpdaterError::BackupNotFound { .. }
            | UpdaterError::Rollback { .. }
            | UpdaterError::UnknownPlugin { .. }
            | UpdaterError::InvalidTransition { .. }
            | UpdaterError::Config { .. }
            | UpdaterError::Internal { .. } => false,
        }
    }

    /// 롤백 실패만 치명적. 별도로 보고해야 한다
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpdaterError::Rollback { .. })
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            UpdaterError::DirectoryNotFound { .. } => "DIRECTORY_NOT_FOUND",
            UpdaterError::FileSystem { .. } => "FILE_SYSTEM_ERROR",
            UpdaterError::NoArchives { .. } => "NO_ARCHIVES",
            UpdaterError::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            UpdaterError::NotFoundOnSource { .. } => "NOT_FOUND_ON_SOURCE",
            UpdaterError::AuthRequired { .. } => "AUTH_REQUIRED",
            UpdaterError::VersionParse { .. } => "VERSION_PARSE_ERROR",
            UpdaterError::Download { .. } => "DOWNLOAD_FAILED",
            UpdaterError::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            UpdaterError::InvalidArchive { .. } => "INVALID_ARCHIVE",
            UpdaterError::Backup { .. } => "BACKUP_ERROR",
            UpdaterError::BackupNotFound { .. } => "BACKUP_NOT_FOUND",
            UpdaterError::Conflict { .. } => "CONFLICT",
            UpdaterError::Rollback { .. } => "ROLLBACK_ERROR",
            UpdaterError::Timeout { .. } => "TIMEOUT",
            UpdaterError::Cancelled { .. } => "CANCELLED",
            UpdaterError::UnknownPlugin { .. } => "UNKNOWN_PLUGIN",
            UpdaterError::InvalidTransition { .. } => "INVALID_TRANSITION",
            UpdaterError::Config { .. } => "CONFIG_ERROR",
            UpdaterError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// 사용자에게 표시할 메시지
    pub fn user_message(&self) -> String {
        match self {
            UpdaterError::DirectoryNotFound { path } => {
                format!("플러그인 폴더를 찾을 수 없습니다: {}", path)
            }
            UpdaterError::FileSystem { .. } => {
                "파일 처리 중 오류가 발생했습니다. 권한과 디스크 공간을 확인해주세요.".to_string()
            }
            UpdaterError::NoArchives { .. } => {
                "폴더에 .jar 플러그인 파일이 없습니다.".to_string()
            }
            UpdaterError::SourceUnavailable { source_id, .. } => {
                format!("{} 서버에 연결할 수 없습니다. 다음 확인 때 다시 시도합니다.", source_id)
            }
            UpdaterError::NotFoundOnSource { .. } => {
                "등록된 저장소에서 플러그인을 찾지 못했습니다.".to_string()
            }
            UpdaterError::AuthRequired { source_id } => {
                format!("{} API 키가 필요합니다. 설정에서 키를 입력해주세요.", source_id)
            }
            UpdaterError::VersionParse { .. } => "버전 정보를 읽을 수 없습니다.".to_string(),
            UpdaterError::Download { .. } => {
                "다운로드가 실패했습니다. 잠시 후 다시 시도해주세요.".to_string()
            }
            UpdaterError::ChecksumMismatch { .. } => {
                "다운로드 파일 검증에 실패했습니다. 다시 확인 후 업데이트해주세요.".to_string()
            }
            UpdaterError::InvalidArchive { .. } => {
                "다운로드한 파일이 올바른 플러그인 아카이브가 아닙니다.".to_string()
            }
            UpdaterError::Backup { .. } => {
                "백업을 만들 수 없어 업데이트를 중단했습니다.".to_string()
            }
            UpdaterError::BackupNotFound { backup_id } => {
                format!("백업을 찾을 수 없습니다: {}", backup_id)
            }
            UpdaterError::Conflict { plugin } => {
                format!("{} 플러그인은 이미 작업 중입니다.", plugin)
            }
            UpdaterError::Rollback { plugin, .. } => {
                format!(
                    "{} 복구에 실패했습니다. 플러그인 파일과 백업을 직접 확인해주세요.",
                    plugin
                )
            }
            UpdaterError::Timeout { .. } => {
                "응답이 지연되고 있습니다. 잠시 후 다시 시도해주세요.".to_string()
            }
            UpdaterError::Cancelled { .. } => "작업이 취소되었습니다.".to_string(),
            UpdaterError::UnknownPlugin { plugin } => {
                format!("알 수 없는 플러그인입니다: {}", plugin)
            }
            UpdaterError::InvalidTransition { .. } => {
                "내부 상태 오류가 발생했습니다.".to_string()
            }
            UpdaterError::Config { message } => format!("설정 오류: {}", message),
            UpdaterError::Internal { message } => format!("오류가 발생했습니다: {}", message),
        }
    }

    /// IO 에러를 UpdaterError로 변환
    pub fn from_io(err: &std::io::Error, operation: &str, path: &std::path::Path) -> Self {
        UpdaterError::FileSystem {
            operation: operation.to_string(),
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// 요청 단위 재시도 예산 (어댑터 내부에서만 사용)
#[derive(Debug, Clone)]
pub struct RecoveryStrategy {
    /// 최대 재시도 횟수
    pub max_retries: u32,
    /// 현재 시도 횟수
    pub current_attempt: u32,
    /// 재시도 간 기본 대기 시간
    pub base_delay: Duration,
    /// 지수 백오프 사용 여부
    pub use_backoff: bool,
}

impl Default for RecoveryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            current_attempt: 0,
            base_delay: Duration::from_millis(500),
            use_backoff: true,
        }
    }
}

impl RecoveryStrategy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// 다음 시도 전 대기 시간 계산 (최대 10초)
    pub fn next_delay(&self) -> Duration {
        if self.use_backoff {
            let multiplier = 2u64.saturating_pow(self.current_attempt);
            let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(multiplier);
            Duration::from_millis(delay_ms.min(10_000))
        } else {
            self.base_delay
        }
    }

    pub fn can_retry(&self) -> bool {
        self.current_attempt < self.max_retries
    }

    pub fn increment(&mut self) {
        self.current_attempt += 1;
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// 에러 컨텍스트 (로깅용)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub timestamp: String,
    pub operation: String,
    pub plugin: Option<String>,
    pub error: UpdaterError,
}

impl ErrorContext {
    pub fn new(operation: &str, error: UpdaterError) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            operation: operation.to_string(),
            plugin: None,
            error,
        }
    }

    pub fn with_plugin(mut self, plugin: &str) -> Self {
        self.plugin = Some(plugin.to_string());
        self
    }

    /// 로그 출력. 롤백 실패는 항상 error 레벨
    pub fn log(&self) {
        let plugin = self.plugin.as_deref().unwrap_or("N/A");
        if self.error.is_fatal() {
            tracing::error!(
                "[Error] {} - {} (FATAL, manual recovery required): {}",
                self.operation,
                plugin,
                self.error
            );
        } else if self.error.is_recoverable() {
            tracing::warn!(
                "[Error] {} - {} (recoverable): {}",
                self.operation,
                plugin,
                self.error
            );
        } else {
            tracing::error!("[Error] {} - {}: {}", self.operation, plugin, self.error);
        }
    }
}
