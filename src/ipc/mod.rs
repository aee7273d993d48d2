//! 데몬 IPC API (`/api/*`)
//!
//! ## 엔드포인트
//! - `GET  /api/plugins`                인벤토리 + 작업 상태
//! - `GET  /api/plugins/:id`            플러그인 하나
//! - `POST /api/plugins/scan`           플러그인 폴더 재스캔
//! - `POST /api/plugins/check`          업데이트 확인 (`background: true`면 run_id만 반환)
//! - `POST /api/plugins/update-all`     일괄 업데이트 (비어있으면 UpdateAvailable 전체)
//! - `POST /api/plugins/:id/update`     플러그인 하나 업데이트
//! - `POST /api/plugins/:id/cancel`     확인/다운로드 취소
//! - `GET  /api/tasks`                  작업 아레나
//! - `GET  /api/backups[?plugin=]`      백업 목록
//! - `POST /api/backups/:id/restore`    백업 복원
//! - `POST /api/backups/prune`          보존 기간 정리
//! - `GET  /api/config`                 설정 (API 키 가림)

pub mod auth;
pub mod error;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use jarkeeper_updater_lib::{UpdateManager, UpdaterError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
pub use error::ApiError;

// ═══════════════════════════════════════════════════════
// 공유 상태
// ═══════════════════════════════════════════════════════

#[derive(Clone)]
pub struct IpcState {
    pub manager: Arc<UpdateManager>,
    pub config: Arc<AppConfig>,
}

impl IpcState {
    pub fn new(manager: Arc<UpdateManager>, config: AppConfig) -> Self {
        Self {
            manager,
            config: Arc::new(config),
        }
    }
}

/// 라우터 생성. `token`이 `None`이면 인증 없이 동작
pub fn router(state: IpcState, token: Option<Arc<String>>) -> Router {
    Router::new()
        .route("/api/plugins", get(list_plugins))
        .route("/api/plugins/scan", post(scan_plugins))
        .route("/api/plugins/check", post(check_plugins))
        .route("/api/plugins/update-all", post(update_all))
        .route("/api/plugins/:id", get(get_plugin))
        .route("/api/plugins/:id/update", post(update_plugin))
        .route("/api/plugins/:id/cancel", post(cancel_plugin))
        .route("/api/tasks", get(list_tasks))
        .route("/api/backups", get(list_backups))
        .route("/api/backups/prune", post(prune_backups))
        .route("/api/backups/:id/restore", post(restore_backup))
        .route("/api/config", get(get_config))
        .with_state(state)
        .layer(middleware::from_fn_with_state(token, auth::auth_middleware))
        .layer(TraceLayer::new_for_http())
}

pub struct IpcServer {
    state: IpcState,
    listen_addr: String,
}

impl IpcServer {
    pub fn new(state: IpcState, listen_addr: &str) -> Self {
        Self {
            state,
            listen_addr: listen_addr.to_string(),
        }
    }

    pub async fn start(
        self,
        token: Option<Arc<String>>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = router(self.state, token);
        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("[IPC] Listening on http://{}", self.listen_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════
// 요청 본문
// ═══════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct CheckRequest {
    /// 비어있으면 인벤토리 전체
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub background: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAllRequest {
    #[serde(default)]
    pub plugins: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BackupQuery {
    pub plugin: Option<String>,
}

// ═══════════════════════════════════════════════════════
// 핸들러
// ═══════════════════════════════════════════════════════

fn plugin_entry(manager: &UpdateManager, plugin: jarkeeper_updater_lib::Plugin) -> Value {
    let task = manager.task(&plugin.id);
    json!({ "plugin": plugin, "task": task })
}

/// GET /api/plugins
async fn list_plugins(State(state): State<IpcState>) -> impl IntoResponse {
    let plugins: Vec<Value> = state
        .manager
        .plugins()
        .into_iter()
        .map(|p| plugin_entry(&state.manager, p))
        .collect();
    Json(json!({
        "success": true,
        "count": plugins.len(),
        "plugins": plugins,
    }))
}

/// GET /api/plugins/:id
async fn get_plugin(
    Path(id): Path<String>,
    State(state): State<IpcState>,
) -> Result<Json<Value>, ApiError> {
    let plugin = state
        .manager
        .plugin(&id)
        .ok_or(UpdaterError::UnknownPlugin { plugin: id })?;
    let mut body = plugin_entry(&state.manager, plugin);
    body["success"] = json!(true);
    Ok(Json(body))
}

/// POST /api/plugins/scan
async fn scan_plugins(State(state): State<IpcState>) -> Result<Json<Value>, ApiError> {
    let plugins = state.manager.scan(None).await?;
    Ok(Json(json!({
        "success": true,
        "count": plugins.len(),
        "plugins": plugins,
    })))
}

/// POST /api/plugins/check
///
/// Body: `{ "plugins": ["Vault"], "background": false }`
async fn check_plugins(
    State(state): State<IpcState>,
    Json(body): Json<CheckRequest>,
) -> Result<Response, ApiError> {
    let ids = if body.plugins.is_empty() {
        None
    } else {
        Some(body.plugins)
    };

    if body.background {
        let run_id = state.manager.start_check_all(ids);
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "success": true, "run_id": run_id })),
        )
            .into_response());
    }

    let report = state.manager.check_all(ids.as_deref()).await;
    Ok(Json(json!({
        "success": true,
        "updates_available": report.updates_available(),
        "unresolved": report.unresolved(),
        "errors": report.errors(),
        "report": report,
    }))
    .into_response())
}

/// POST /api/plugins/:id/update
async fn update_plugin(
    Path(id): Path<String>,
    State(state): State<IpcState>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.manager.update(&id).await?;
    Ok(Json(json!({
        "success": outcome.error.is_none(),
        "outcome": outcome,
    })))
}

/// POST /api/plugins/:id/cancel
async fn cancel_plugin(
    Path(id): Path<String>,
    State(state): State<IpcState>,
) -> Result<Json<Value>, ApiError> {
    let cancelled = state.manager.cancel(&id)?;
    Ok(Json(json!({ "success": true, "cancelled": cancelled })))
}

/// POST /api/plugins/update-all
///
/// Body: `{ "plugins": ["Vault", "LuckPerms"] }` (비어있으면 UpdateAvailable 전체)
async fn update_all(
    State(state): State<IpcState>,
    Json(body): Json<UpdateAllRequest>,
) -> impl IntoResponse {
    let report = if body.plugins.is_empty() {
        state.manager.update_available().await
    } else {
        state.manager.update_all(&body.plugins).await
    };
    Json(json!({
        "success": true,
        "succeeded": report.succeeded(),
        "failed": report.failed(),
        "report": report,
    }))
}

/// GET /api/tasks
async fn list_tasks(State(state): State<IpcState>) -> impl IntoResponse {
    Json(json!({ "success": true, "tasks": state.manager.tasks() }))
}

/// GET /api/backups[?plugin=]
async fn list_backups(
    State(state): State<IpcState>,
    Query(query): Query<BackupQuery>,
) -> Result<Json<Value>, ApiError> {
    let backups = match query.plugin.as_deref() {
        Some(plugin) if !plugin.is_empty() => state.manager.list_backups(plugin).await?,
        _ => state.manager.list_all_backups().await?,
    };
    Ok(Json(json!({
        "success": true,
        "count": backups.len(),
        "backups": backups,
    })))
}

/// POST /api/backups/:id/restore
async fn restore_backup(
    Path(id): Path<String>,
    State(state): State<IpcState>,
) -> Result<Json<Value>, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::BadRequest("backup id is empty".to_string()));
    }
    let plugin = state.manager.restore_backup(&id).await?;
    Ok(Json(json!({ "success": true, "plugin": plugin })))
}

/// POST /api/backups/prune
async fn prune_backups(State(state): State<IpcState>) -> Result<Json<Value>, ApiError> {
    let report = state.manager.prune_backups().await?;
    Ok(Json(json!({
        "success": true,
        "removed": report.removed,
        "retained": report.retained,
    })))
}

/// GET /api/config
async fn get_config(State(state): State<IpcState>) -> impl IntoResponse {
    Json(json!({ "success": true, "config": state.config.redacted() }))
}
