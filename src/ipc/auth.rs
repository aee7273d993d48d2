//! IPC 토큰 기반 인증 미들웨어
//!
//! 데몬 시작 시 랜덤 토큰을 생성하여 파일에 저장합니다.
//! CLI나 다른 클라이언트는 이 파일을 읽어 `X-Jarkeeper-Token` 헤더에 포함시킵니다.
//! 토큰이 일치하지 않는 요청은 401 Unauthorized로 거부됩니다.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

pub const TOKEN_HEADER: &str = "X-Jarkeeper-Token";

/// 토큰 파일의 기본 경로
pub fn token_file_path() -> String {
    std::env::var("JARKEEPER_TOKEN_PATH").unwrap_or_else(|_| {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA")
                .map(|appdata| format!("{}\\jarkeeper\\.ipc_token", appdata))
                .unwrap_or_else(|_| "config/.ipc_token".to_string())
        }
        #[cfg(not(target_os = "windows"))]
        {
            std::env::var("HOME")
                .map(|home| format!("{}/.config/jarkeeper/.ipc_token", home))
                .unwrap_or_else(|_| "config/.ipc_token".to_string())
        }
    })
}

/// 데몬 시작 시 호출: 랜덤 토큰을 생성하고 파일에 저장
pub fn generate_and_save_token() -> anyhow::Result<Arc<String>> {
    let token = uuid::Uuid::new_v4().to_string();
    let path = token_file_path();

    if let Some(parent) = std::path::Path::new(&path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &token)?;

    // 파일 퍼미션 제한 (Unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("[IPC] Auth token saved to {}", path);
    Ok(Arc::new(token))
}

/// 토큰 파일에서 읽기 (클라이언트 측에서 사용)
pub fn read_token_from_file() -> Option<String> {
    std::fs::read_to_string(token_file_path())
        .ok()
        .map(|s| s.trim().to_string())
}

/// 인증 실패 로그 스팸을 억제하기 위한 rate-limiter
static AUTH_FAIL_LAST_LOG: std::sync::Mutex<Option<std::time::Instant>> = std::sync::Mutex::new(None);
static AUTH_FAIL_SUPPRESSED: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// axum 미들웨어: `X-Jarkeeper-Token` 헤더 검증
///
/// 상태가 `None`이거나 `JARKEEPER_AUTH_DISABLED=1`이면 모든 요청을 허용합니다.
pub async fn auth_middleware(
    State(expected): State<Option<Arc<String>>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if std::env::var("JARKEEPER_AUTH_DISABLED").unwrap_or_default() == "1" {
        return Ok(next.run(req).await);
    }
    let Some(expected) = expected else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided == expected.as_str() {
        return Ok(next.run(req).await);
    }

    // 30초당 최대 1번 경고, 억제된 횟수 함께 표시
    let should_log = {
        let mut last = AUTH_FAIL_LAST_LOG.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(t) if t.elapsed().as_secs() < 30 => false,
            _ => {
                *last = Some(std::time::Instant::now());
                true
            }
        }
    };
    if should_log {
        let suppressed = AUTH_FAIL_SUPPRESSED.swap(0, std::sync::atomic::Ordering::Relaxed);
        let provided_hint = if provided.is_empty() { "(empty)" } else { "(mismatch)" };
        if suppressed > 0 {
            tracing::warn!(
                "[IPC] Auth failed for {}: token {} (suppressed {} previous)",
                req.uri(),
                provided_hint,
                suppressed
            );
        } else {
            tracing::warn!("[IPC] Auth failed for {}: token {}", req.uri(), provided_hint);
        }
    } else {
        AUTH_FAIL_SUPPRESSED.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
    Err(StatusCode::UNAUTHORIZED)
}
