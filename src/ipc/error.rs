//! IPC 에러 타입. 업데이터 에러 종류를 HTTP 상태 코드로 매핑합니다.

use axum::http::StatusCode;
use jarkeeper_updater_lib::UpdaterError;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Updater(#[from] UpdaterError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        let Self::Updater(err) = self else {
            return StatusCode::BAD_REQUEST;
        };
        match err {
            UpdaterError::UnknownPlugin { .. }
            | UpdaterError::BackupNotFound { .. }
            | UpdaterError::DirectoryNotFound { .. }
            | UpdaterError::NoArchives { .. } => StatusCode::NOT_FOUND,
            UpdaterError::Conflict { .. } | UpdaterError::Cancelled { .. } => StatusCode::CONFLICT,
            UpdaterError::Config { .. } | UpdaterError::VersionParse { .. } => StatusCode::BAD_REQUEST,
            UpdaterError::ChecksumMismatch { .. } | UpdaterError::InvalidArchive { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            UpdaterError::SourceUnavailable { .. }
            | UpdaterError::NotFoundOnSource { .. }
            | UpdaterError::AuthRequired { .. }
            | UpdaterError::Download { .. } => StatusCode::BAD_GATEWAY,
            UpdaterError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            UpdaterError::FileSystem { .. }
            | UpdaterError::Backup { .. }
            | UpdaterError::Rollback { .. }
            | UpdaterError::InvalidTransition { .. }
            | UpdaterError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Updater(err) => err.error_code(),
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }

    /// 에러 응답 본문
    pub fn to_json(&self) -> serde_json::Value {
        let message = match self {
            Self::Updater(err) => err.user_message(),
            Self::BadRequest(msg) => msg.clone(),
        };
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
            "message": message,
        })
    }
}

/// axum 핸들러에서 ApiError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("[IPC] {} ({})", self, self.error_code());
        }
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}
