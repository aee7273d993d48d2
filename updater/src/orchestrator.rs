//! 업데이트 오케스트레이터
//!
//! 플러그인마다 하나의 [`UpdateTask`]를 아레나에 두고, 한 번에 하나의 워커만
//! 그 작업을 소유하게 합니다. 이미 작업 중인 플러그인에 대한 요청은 대기열에
//! 넣지 않고 `Conflict`로 거절합니다.
//!
//! ## 파이프라인
//! `UpdateAvailable → Downloading → Verifying → BackingUp → Installing → UpToDate`
//! - 실패하면 `Error`로 가며, 이번 시도에서 만든 백업이 있으면 먼저 복원
//! - 취소는 Checking/Downloading의 대기 지점에서만 반영
//! - 각 작업은 별도 태스크로 실행되므로 호출자가 future를 버려도 설치는 끝까지 진행
//!
//! ## 일괄 처리
//! 플러그인별 작업은 서로 독립적으로 끝까지 진행되고, 결과는 플러그인별로 집계됩니다.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backup::{Backup, BackupManager, PruneReport};
use crate::error::{ErrorContext, UpdaterError};
use crate::inventory::{is_intact_bytes, sha256_hex, Scanner};
use crate::sources::{build_sources, ResolveRequest, SourceError, VersionSource};
use crate::task::{TaskState, UpdateTask};
use crate::version::{resolve, Resolution, SourceReport};
use crate::worker::WorkerEvent;
use crate::{Plugin, UpdateConfig, VersionInfo};

const EVENT_CAPACITY: usize = 256;

/// 플러그인 하나의 작업 결과
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub plugin_id: String,
    pub state: TaskState,
    pub current_version: Option<String>,
    pub latest_version: Option<String>,
    pub source: Option<String>,
    /// 이번 실행에서 새 버전을 설치했는지
    pub updated: bool,
    pub error: Option<UpdaterError>,
    /// 롤백 실패. 라이브 파일과 백업을 직접 확인해야 함
    pub fatal: bool,
}

/// 전체 확인 결과 (플러그인별)
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<TaskOutcome>,
}

impl CheckReport {
    pub fn updates_available(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.updated || o.state == TaskState::UpdateAvailable)
            .count()
    }

    pub fn unresolved(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == TaskState::Unresolved)
            .count()
    }

    pub fn errors(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_some() && o.state != TaskState::Unresolved)
            .count()
    }
}

/// 일괄 업데이트 결과. 전체 성공/실패 플래그 없이 플러그인별로만 보고
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_none() && o.state == TaskState::UpToDate)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }

    pub fn outcome(&self, plugin_id: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.plugin_id == plugin_id)
    }
}

struct Inventory {
    dir: PathBuf,
    plugins: BTreeMap<String, Plugin>,
}

/// 아레나의 작업 소유권. Drop되면 슬롯이 풀린다
pub(crate) struct TaskSlot {
    manager: Arc<UpdateManager>,
    plugin_id: String,
    token: CancellationToken,
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        let mut arena = self.manager.arena();
        if let Some(task) = arena.get_mut(&self.plugin_id) {
            task.active = false;
            task.cancel = None;
        }
    }
}

pub struct UpdateManager {
    config: UpdateConfig,
    sources: Vec<Arc<dyn VersionSource>>,
    inventory: RwLock<Inventory>,
    tasks: Mutex<HashMap<String, UpdateTask>>,
    /// 동시 네트워크 작업 제한
    pool: Arc<Semaphore>,
    events: broadcast::Sender<WorkerEvent>,
    shutdown: CancellationToken,
    http: reqwest::Client,
}

impl UpdateManager {
    pub fn new(config: UpdateConfig) -> Result<Arc<Self>, UpdaterError> {
        config.validate()?;
        let sources = build_sources(&config)?;
        Self::with_sources(config, sources)
    }

    /// 어댑터를 직접 지정 (우선순위는 벡터 순서)
    pub fn with_sources(
        config: UpdateConfig,
        sources: Vec<Arc<dyn VersionSource>>,
    ) -> Result<Arc<Self>, UpdaterError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("jarkeeper/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| UpdaterError::Internal {
                message: format!("failed to create HTTP client: {}", e),
            })?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Arc::new(Self {
            pool: Arc::new(Semaphore::new(config.pool_size)),
            inventory: RwLock::new(Inventory {
                dir: config.plugins_dir.clone(),
                plugins: BTreeMap::new(),
            }),
            tasks: Mutex::new(HashMap::new()),
            events,
            shutdown: CancellationToken::new(),
            http,
            sources,
            config,
        }))
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// 진행 중인 모든 작업 취소 (설치 단계는 끝까지 진행)
    pub fn shutdown(&self) {
        tracing::info!("[Updater] Shutting down, cancelling in-flight checks and downloads");
        self.shutdown.cancel();
    }

    fn emit(&self, event: WorkerEvent) {
        // 구독자가 없으면 버림
        let _ = self.events.send(event);
    }

    fn arena(&self) -> MutexGuard<'_, HashMap<String, UpdateTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn inventory(&self) -> RwLockReadGuard<'_, Inventory> {
        self.inventory.read().unwrap_or_else(|e| e.into_inner())
    }

    fn inventory_mut(&self) -> RwLockWriteGuard<'_, Inventory> {
        self.inventory.write().unwrap_or_else(|e| e.into_inner())
    }

    fn backups(&self) -> BackupManager {
        BackupManager::new(self.inventory().dir.clone(), self.config.io_timeout())
    }

    fn priority(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id().to_string()).collect()
    }

    // ══════════════════════════════════════════════════════
    // 인벤토리
    // ══════════════════════════════════════════════════════

    /// 폴더 스캔 후 인벤토리 교체. `None`이면 마지막 폴더를 다시 스캔
    pub async fn scan(&self, path: Option<&Path>) -> Result<Vec<Plugin>, UpdaterError> {
        let dir = match path {
            Some(p) => p.to_path_buf(),
            None => self.inventory().dir.clone(),
        };
        let extensions = self.config.archive_extensions.clone();
        let scan_dir = dir.clone();
        let plugins = tokio::task::spawn_blocking(move || Scanner::new(&extensions).scan(&scan_dir))
            .await
            .map_err(|e| UpdaterError::Internal {
                message: format!("scan task failed: {}", e),
            })??;

        let canonical = dir.canonicalize().unwrap_or(dir);
        {
            let mut inventory = self.inventory_mut();
            inventory.dir = canonical;
            inventory.plugins = plugins.iter().map(|p| (p.id.clone(), p.clone())).collect();
        }
        {
            let mut arena = self.arena();
            arena.retain(|id, task| task.active || plugins.iter().any(|p| &p.id == id));
        }

        self.emit(WorkerEvent::ScanCompleted {
            plugins: plugins.len(),
        });
        Ok(plugins)
    }

    pub fn plugins(&self) -> Vec<Plugin> {
        self.inventory().plugins.values().cloned().collect()
    }

    pub fn plugin(&self, plugin_id: &str) -> Option<Plugin> {
        self.inventory().plugins.get(plugin_id).cloned()
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.inventory().dir.clone()
    }

    async fn inspect(&self, path: PathBuf) -> Result<Plugin, UpdaterError> {
        let extensions = self.config.archive_extensions.clone();
        tokio::task::spawn_blocking(move || Scanner::new(&extensions).inspect(&path))
            .await
            .map_err(|e| UpdaterError::Internal {
                message: format!("inspect task failed: {}", e),
            })?
    }

    // ══════════════════════════════════════════════════════
    // 작업 아레나
    // ══════════════════════════════════════════════════════

    pub fn tasks(&self) -> Vec<UpdateTask> {
        let mut tasks: Vec<UpdateTask> = self.arena().values().cloned().collect();
        tasks.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        tasks
    }

    pub fn task(&self, plugin_id: &str) -> Option<UpdateTask> {
        self.arena().get(plugin_id).cloned()
    }

    /// 플러그인 작업 소유권 획득. 이미 소유자가 있으면 Conflict
    pub(crate) fn acquire(self: &Arc<Self>, plugin_id: &str) -> Result<TaskSlot, UpdaterError> {
        let mut arena = self.arena();
        let task = arena
            .entry(plugin_id.to_string())
            .or_insert_with(|| UpdateTask::new(plugin_id));
        if task.active {
            tracing::warn!(
                "[Updater] Rejected request for {}: task already active ({})",
                plugin_id,
                task.state
            );
            return Err(UpdaterError::Conflict {
                plugin: plugin_id.to_string(),
            });
        }
        let token = self.shutdown.child_token();
        task.active = true;
        task.cancel = Some(token.clone());
        Ok(TaskSlot {
            manager: Arc::clone(self),
            plugin_id: plugin_id.to_string(),
            token,
        })
    }

    pub(crate) fn transition(&self, plugin_id: &str, to: TaskState) -> Result<(), UpdaterError> {
        let from = {
            let mut arena = self.arena();
            let task = arena
                .get_mut(plugin_id)
                .ok_or_else(|| UpdaterError::UnknownPlugin {
                    plugin: plugin_id.to_string(),
                })?;
            task.transition(to)?
        };
        self.emit(WorkerEvent::StateChanged {
            plugin_id: plugin_id.to_string(),
            from,
            to,
        });
        Ok(())
    }

    /// Error 상태로 전환하고 에러를 기록한 뒤 그대로 반환
    fn fail(&self, plugin_id: &str, error: UpdaterError) -> UpdaterError {
        let moved = {
            let mut arena = self.arena();
            match arena.get_mut(plugin_id) {
                Some(task) => {
                    task.last_error = Some(error.clone());
                    task.transition(TaskState::Error)
                }
                None => Err(UpdaterError::UnknownPlugin {
                    plugin: plugin_id.to_string(),
                }),
            }
        };
        match moved {
            Ok(from) => self.emit(WorkerEvent::StateChanged {
                plugin_id: plugin_id.to_string(),
                from,
                to: TaskState::Error,
            }),
            Err(e) => tracing::error!("[Updater] Could not record failure for {}: {}", plugin_id, e),
        }

        ErrorContext::new("update", error.clone())
            .with_plugin(plugin_id)
            .log();
        self.emit(WorkerEvent::TaskFailed {
            plugin_id: plugin_id.to_string(),
            error: error.clone(),
        });
        error
    }

    fn outcome(&self, plugin_id: &str, result: Result<bool, UpdaterError>) -> TaskOutcome {
        let current_version = self.plugin(plugin_id).map(|p| p.current_version);
        let (state, latest_version, source, last_error) = match self.task(plugin_id) {
            Some(task) => (task.state, task.latest_version, task.source, task.last_error),
            None => (TaskState::Idle, None, None, None),
        };
        let (updated, error) = match result {
            Ok(updated) => (updated, last_error),
            Err(e) => (false, Some(e)),
        };
        TaskOutcome {
            plugin_id: plugin_id.to_string(),
            state,
            current_version,
            latest_version,
            source,
            updated,
            fatal: error.as_ref().map_or(false, |e| e.is_fatal()),
            error,
        }
    }

    fn rejected(&self, plugin_id: &str, error: UpdaterError) -> TaskOutcome {
        self.outcome(plugin_id, Err(error))
    }

    // ══════════════════════════════════════════════════════
    // 확인
    // ══════════════════════════════════════════════════════

    async fn check_plugin(&self, plugin: &Plugin, token: &CancellationToken) -> Result<Resolution, UpdaterError> {
        self.transition(&plugin.id, TaskState::Checking)?;

        let channel = self.config.update_channel;
        let queries = self.sources.iter().map(|source| {
            let request = ResolveRequest {
                plugin_id: plugin.id.clone(),
                lookup_name: plugin.lookup_name().to_string(),
                channel,
                api_key: self.config.api_key(source.id()),
            };
            let pool = Arc::clone(&self.pool);
            let source = Arc::clone(source);
            async move {
                let result = match pool.acquire_owned().await {
                    Ok(_permit) => source.resolve_latest(&request).await,
                    Err(_) => Err(SourceError::Unavailable("worker pool closed".to_string())),
                };
                // 어댑터가 채널을 어겨도 여기서 걸러냄
                let result = result.and_then(|info| {
                    if channel.admits(info.channel) {
                        Ok(info)
                    } else {
                        Err(SourceError::NotFound)
                    }
                });
                SourceReport {
                    source: source.id().to_string(),
                    result,
                }
            }
        });

        let reports = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.transition(&plugin.id, TaskState::Idle)?;
                tracing::info!("[Updater] Check cancelled for {}", plugin.id);
                return Err(UpdaterError::Cancelled { plugin: plugin.id.clone() });
            }
            reports = join_all(queries) => reports,
        };

        for report in &reports {
            if let Err(e) = &report.result {
                tracing::debug!("[Updater] {} on {}: {}", plugin.id, report.source, e);
            }
        }

        let resolution = resolve(plugin, &reports, self.config.conflict_policy, &self.priority());
        let (state, error) = match &resolution {
            Resolution::UpToDate { .. } => (TaskState::UpToDate, None),
            Resolution::UpdateAvailable { .. } => (TaskState::UpdateAvailable, None),
            Resolution::Unresolved { .. } => (TaskState::Unresolved, Some(unresolved_error(plugin, &reports))),
        };

        {
            let mut arena = self.arena();
            if let Some(task) = arena.get_mut(&plugin.id) {
                task.latest_version = resolution.latest_version().map(str::to_string);
                task.source = match &resolution {
                    Resolution::UpdateAvailable { source, .. } => Some(source.clone()),
                    _ => None,
                };
                task.resolution = Some(resolution.clone());
                task.last_error = error;
            }
        }
        self.transition(&plugin.id, state)?;

        match &resolution {
            Resolution::UpdateAvailable {
                latest_version,
                source,
                ..
            } => {
                tracing::info!(
                    "[Updater] {} {} -> {} available on {}",
                    plugin.id,
                    plugin.current_version,
                    latest_version,
                    source
                );
                self.emit(WorkerEvent::UpdateAvailable {
                    plugin_id: plugin.id.clone(),
                    current_version: plugin.current_version.clone(),
                    latest_version: latest_version.clone(),
                    source: source.clone(),
                });
            }
            Resolution::Unresolved { reasons } => {
                tracing::warn!("[Updater] {} unresolved: {}", plugin.id, reasons.join("; "));
            }
            Resolution::UpToDate { .. } => {}
        }
        Ok(resolution)
    }

    async fn check_job(self: Arc<Self>, plugin: Plugin, slot: TaskSlot, auto_install: bool) -> TaskOutcome {
        let token = slot.token.clone();
        let result = match self.check_plugin(&plugin, &token).await {
            Ok(Resolution::UpdateAvailable { info, .. }) if auto_install => {
                self.install(&plugin, &info, &token).await.map(|_| true)
            }
            Ok(_) => Ok(false),
            Err(e) => Err(e),
        };
        let outcome = self.outcome(&plugin.id, result);
        drop(slot);
        outcome
    }

    /// 플러그인 하나 확인. auto_download가 켜져 있으면 바로 업데이트까지 진행
    pub async fn check(self: &Arc<Self>, plugin_id: &str) -> Result<TaskOutcome, UpdaterError> {
        let plugin = self.plugin(plugin_id).ok_or_else(|| UpdaterError::UnknownPlugin {
            plugin: plugin_id.to_string(),
        })?;
        let slot = self.acquire(plugin_id)?;
        let auto = self.config.auto_download;
        tokio::spawn(Arc::clone(self).check_job(plugin, slot, auto))
            .await
            .map_err(|e| join_error(plugin_id, e))
    }

    /// 여러 플러그인 동시 확인 (`None`이면 인벤토리 전체)
    pub async fn check_all(self: &Arc<Self>, ids: Option<&[String]>) -> CheckReport {
        self.run_check_all(uuid::Uuid::new_v4().to_string(), ids).await
    }

    /// 백그라운드에서 확인을 시작하고 run_id를 즉시 반환. 진행 상황은 이벤트로 관찰
    pub fn start_check_all(self: &Arc<Self>, ids: Option<Vec<String>>) -> String {
        let run_id = uuid::Uuid::new_v4().to_string();
        let manager = Arc::clone(self);
        let id = run_id.clone();
        tokio::spawn(async move {
            manager.run_check_all(id, ids.as_deref()).await;
        });
        run_id
    }

    async fn run_check_all(self: &Arc<Self>, run_id: String, ids: Option<&[String]>) -> CheckReport {
        let started_at = Utc::now();
        let targets = self.targets(ids);
        self.emit(WorkerEvent::CheckStarted {
            run_id: run_id.clone(),
            plugins: targets.len(),
        });
        tracing::info!("[Updater] Check {} started for {} plugin(s)", run_id, targets.len());

        let auto = self.config.auto_download;
        let outcomes = self
            .dispatch(targets, move |manager, plugin, slot| manager.check_job(plugin, slot, auto))
            .await;

        let report = CheckReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        self.emit(WorkerEvent::CheckCompleted {
            run_id: report.run_id.clone(),
            updates_available: report.updates_available(),
            unresolved: report.unresolved(),
            errors: report.errors(),
        });
        report
    }

    fn targets(&self, ids: Option<&[String]>) -> Vec<Result<Plugin, String>> {
        match ids {
            None => self.plugins().into_iter().map(Ok).collect(),
            Some(ids) => ids
                .iter()
                .map(|id| self.plugin(id).ok_or_else(|| id.clone()))
                .collect(),
        }
    }

    /// 플러그인별 작업을 독립적으로 실행하고 결과를 입력 순서대로 모음
    async fn dispatch<F, Fut>(self: &Arc<Self>, targets: Vec<Result<Plugin, String>>, job: F) -> Vec<TaskOutcome>
    where
        F: Fn(Arc<Self>, Plugin, TaskSlot) -> Fut,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        let mut pending: Vec<(String, Result<JoinHandle<TaskOutcome>, TaskOutcome>)> = Vec::new();
        for target in targets {
            match target {
                Err(id) => {
                    let error = UpdaterError::UnknownPlugin { plugin: id.clone() };
                    pending.push((id.clone(), Err(self.rejected(&id, error))));
                }
                Ok(plugin) => {
                    let id = plugin.id.clone();
                    match self.acquire(&id) {
                        Ok(slot) => {
                            let handle = tokio::spawn(job(Arc::clone(self), plugin, slot));
                            pending.push((id, Ok(handle)));
                        }
                        Err(e) => pending.push((id.clone(), Err(self.rejected(&id, e)))),
                    }
                }
            }
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (id, entry) in pending {
            let outcome = match entry {
                Ok(handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => self.rejected(&id, join_error(&id, e)),
                },
                Err(outcome) => outcome,
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    // ══════════════════════════════════════════════════════
    // 업데이트
    // ══════════════════════════════════════════════════════

    /// 플러그인 하나 업데이트. 최근 확인 결과가 UpdateAvailable이면 재확인 없이 진행
    pub async fn update(self: &Arc<Self>, plugin_id: &str) -> Result<TaskOutcome, UpdaterError> {
        let plugin = self.plugin(plugin_id).ok_or_else(|| UpdaterError::UnknownPlugin {
            plugin: plugin_id.to_string(),
        })?;
        let slot = self.acquire(plugin_id)?;
        tokio::spawn(Arc::clone(self).update_job(plugin, slot))
            .await
            .map_err(|e| join_error(plugin_id, e))
    }

    /// 일괄 업데이트. 한 플러그인의 실패는 다른 플러그인에 영향을 주지 않음
    pub async fn update_all(self: &Arc<Self>, ids: &[String]) -> BatchReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!("[Updater] Batch {} started for {} plugin(s)", run_id, ids.len());

        let outcomes = self
            .dispatch(self.targets(Some(ids)), |manager, plugin, slot| manager.update_job(plugin, slot))
            .await;
        let report = BatchReport { run_id, outcomes };

        tracing::info!(
            "[Updater] Batch {} finished: {} succeeded, {} failed",
            report.run_id,
            report.succeeded(),
            report.failed()
        );
        self.emit(WorkerEvent::BatchCompleted {
            run_id: report.run_id.clone(),
            succeeded: report.succeeded(),
            failed: report.failed(),
        });
        report
    }

    /// UpdateAvailable 상태인 모든 플러그인 업데이트
    pub async fn update_available(self: &Arc<Self>) -> BatchReport {
        let mut ids: Vec<String> = self
            .arena()
            .values()
            .filter(|t| t.state == TaskState::UpdateAvailable && !t.active)
            .map(|t| t.plugin_id.clone())
            .collect();
        ids.sort();
        self.update_all(&ids).await
    }

    async fn update_job(self: Arc<Self>, plugin: Plugin, slot: TaskSlot) -> TaskOutcome {
        let token = slot.token.clone();
        let cached = self.task(&plugin.id).and_then(|task| match (task.state, task.resolution) {
            (TaskState::UpdateAvailable, Some(Resolution::UpdateAvailable { info, .. })) => Some(info),
            _ => None,
        });

        let result = async {
            let info = match cached {
                Some(info) => info,
                None => match self.check_plugin(&plugin, &token).await? {
                    Resolution::UpdateAvailable { info, .. } => info,
                    _ => return Ok(false),
                },
            };
            self.install(&plugin, &info, &token).await.map(|_| true)
        }
        .await;

        let outcome = self.outcome(&plugin.id, result);
        drop(slot);
        outcome
    }

    /// 진행 중인 확인/다운로드 취소 요청. 취소 가능한 단계가 아니면 false
    pub fn cancel(&self, plugin_id: &str) -> Result<bool, UpdaterError> {
        let known = self.plugin(plugin_id).is_some();
        let arena = self.arena();
        match arena.get(plugin_id) {
            Some(task) if task.active && task.state.is_cancellable() => {
                if let Some(token) = &task.cancel {
                    token.cancel();
                }
                tracing::info!("[Updater] Cancellation requested for {} ({})", plugin_id, task.state);
                Ok(true)
            }
            Some(_) => Ok(false),
            None if known => Ok(false),
            None => Err(UpdaterError::UnknownPlugin {
                plugin: plugin_id.to_string(),
            }),
        }
    }

    /// Downloading → Verifying → BackingUp → Installing → UpToDate
    async fn install(&self, plugin: &Plugin, info: &VersionInfo, token: &CancellationToken) -> Result<Plugin, UpdaterError> {
        let id = plugin.id.as_str();

        self.transition(id, TaskState::Downloading)?;
        let payload = match self.download(plugin, &info.download_url, token).await {
            Ok(payload) => payload,
            Err(e @ UpdaterError::Cancelled { .. }) => {
                tracing::info!("[Updater] Download cancelled for {}", id);
                self.transition(id, TaskState::UpdateAvailable)?;
                return Err(e);
            }
            Err(e) => return Err(self.fail(id, e)),
        };
        self.emit(WorkerEvent::DownloadCompleted {
            plugin_id: id.to_string(),
            bytes: payload.len() as u64,
        });

        // 여기부터는 취소를 반영하지 않음
        self.transition(id, TaskState::Verifying)?;
        if let Some(checksum) = &info.checksum {
            let actual = checksum.digest(&payload);
            if !actual.eq_ignore_ascii_case(&checksum.value) {
                return Err(self.fail(
                    id,
                    UpdaterError::ChecksumMismatch {
                        plugin: id.to_string(),
                        expected: checksum.value.clone(),
                        actual,
                    },
                ));
            }
        }
        if !is_intact_bytes(&payload) {
            return Err(self.fail(
                id,
                UpdaterError::InvalidArchive {
                    plugin: id.to_string(),
                    message: format!("{} bytes from {}", payload.len(), info.download_url),
                },
            ));
        }

        self.transition(id, TaskState::BackingUp)?;
        let backups = self.backups();
        let backup = if tokio::fs::try_exists(&plugin.path).await.unwrap_or(false) {
            match backups.backup(plugin).await {
                Ok(backup) => {
                    self.emit(WorkerEvent::BackupCreated {
                        plugin_id: id.to_string(),
                        backup_id: backup.id.clone(),
                    });
                    Some(backup)
                }
                Err(e) => return Err(self.fail(id, e)),
            }
        } else {
            tracing::info!("[Updater] {} has no archive on disk, installing fresh", id);
            None
        };

        self.transition(id, TaskState::Installing)?;
        if let Err(e) = write_live(&backups, &plugin.path, &payload).await {
            return Err(self.roll_back(id, &backups, backup.as_ref(), e).await);
        }

        let mut installed = match self.inspect(plugin.path.clone()).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!("[Updater] Could not re-inspect {}: {}", id, e);
                let mut fallback = plugin.clone();
                fallback.content_hash = sha256_hex(&payload);
                fallback.size_bytes = payload.len() as u64;
                fallback
            }
        };
        installed.current_version = info.latest_version.clone();
        self.inventory_mut()
            .plugins
            .insert(installed.id.clone(), installed.clone());

        {
            let mut arena = self.arena();
            if let Some(task) = arena.get_mut(id) {
                task.latest_version = Some(info.latest_version.clone());
                task.source = Some(info.source.clone());
                task.resolution = Some(Resolution::UpToDate {
                    latest_version: Some(info.latest_version.clone()),
                });
            }
        }
        self.transition(id, TaskState::UpToDate)?;

        tracing::info!(
            "[Updater] Installed {} {} -> {} from {}",
            id,
            plugin.current_version,
            info.latest_version,
            info.source
        );
        self.emit(WorkerEvent::Installed {
            plugin_id: id.to_string(),
            version: info.latest_version.clone(),
        });
        Ok(installed)
    }

    /// 설치 실패 후 이번 시도의 백업으로 복원하고 Error로 전환.
    /// 복원까지 실패하면 Rollback (치명적)
    pub(crate) async fn roll_back(
        &self,
        plugin_id: &str,
        backups: &BackupManager,
        backup: Option<&Backup>,
        cause: UpdaterError,
    ) -> UpdaterError {
        let Some(backup) = backup else {
            return self.fail(plugin_id, cause);
        };

        match backups.restore(backup).await {
            Ok(()) => {
                tracing::warn!("[Updater] Install of {} failed, restored {}", plugin_id, backup.id);
                self.emit(WorkerEvent::RolledBack {
                    plugin_id: plugin_id.to_string(),
                    backup_id: backup.id.clone(),
                });
                if let Err(e) = backups.discard(backup).await {
                    tracing::warn!("[Updater] Could not discard {} after rollback: {}", backup.id, e);
                }
                self.fail(plugin_id, cause)
            }
            Err(restore_error) => self.fail(
                plugin_id,
                UpdaterError::Rollback {
                    plugin: plugin_id.to_string(),
                    message: format!(
                        "install failed ({}) and restore from {} failed ({})",
                        cause, backup.id, restore_error
                    ),
                },
            ),
        }
    }

    /// 풀 슬롯을 잡고 스트리밍 다운로드. 청크마다 취소/마감 확인
    async fn download(&self, plugin: &Plugin, url: &str, token: &CancellationToken) -> Result<Vec<u8>, UpdaterError> {
        let cancelled = || UpdaterError::Cancelled {
            plugin: plugin.id.clone(),
        };
        let failed = |message: String| UpdaterError::Download {
            plugin: plugin.id.clone(),
            message,
        };
        let limit = self.config.download_timeout();
        let timed_out = || UpdaterError::Timeout {
            operation: format!("download {}", url),
            duration_secs: limit.as_secs(),
        };

        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(cancelled()),
            permit = Arc::clone(&self.pool).acquire_owned() => permit.map_err(|_| UpdaterError::Internal {
                message: "worker pool closed".to_string(),
            })?,
        };

        let deadline = Instant::now() + limit;
        tracing::info!("[Updater] Downloading {} from {}", plugin.id, url);

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(cancelled()),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
            response = self.http.get(url).send() => response.map_err(|e| failed(e.to_string()))?,
        };
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        let mut stream = response.bytes_stream();
        let mut payload = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
                chunk = stream.next() => chunk,
            };
            match next {
                Some(Ok(chunk)) => payload.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(failed(e.to_string())),
                None => break,
            }
        }
        Ok(payload)
    }

    // ══════════════════════════════════════════════════════
    // 백업
    // ══════════════════════════════════════════════════════

    pub async fn list_backups(&self, plugin_id: &str) -> Result<Vec<Backup>, UpdaterError> {
        self.backups().list(plugin_id).await
    }

    pub async fn list_all_backups(&self) -> Result<Vec<Backup>, UpdaterError> {
        self.backups().list_all().await
    }

    /// 백업으로 라이브 아카이브 복원. 해당 플러그인이 작업 중이면 Conflict
    pub async fn restore_backup(self: &Arc<Self>, backup_id: &str) -> Result<Plugin, UpdaterError> {
        let backups = self.backups();
        let backup = backups.find(backup_id).await?;
        let slot = self.acquire(&backup.plugin_id)?;
        let manager = Arc::clone(self);
        let plugin_id = backup.plugin_id.clone();

        tokio::spawn(async move {
            let result = manager.restore_job(backups, backup).await;
            drop(slot);
            result
        })
        .await
        .map_err(|e| join_error(&plugin_id, e))?
    }

    async fn restore_job(&self, backups: BackupManager, backup: Backup) -> Result<Plugin, UpdaterError> {
        backups.restore(&backup).await?;
        let plugin = self.inspect(backup.original_path.clone()).await?;
        self.inventory_mut()
            .plugins
            .insert(plugin.id.clone(), plugin.clone());
        {
            let mut arena = self.arena();
            if let Some(task) = arena.get_mut(&backup.plugin_id) {
                task.reset();
            }
        }
        tracing::info!(
            "[Updater] Restored {} to {} from {}",
            plugin.id,
            plugin.current_version,
            backup.id
        );
        self.emit(WorkerEvent::RolledBack {
            plugin_id: plugin.id.clone(),
            backup_id: backup.id,
        });
        Ok(plugin)
    }

    pub async fn prune_backups(&self) -> Result<PruneReport, UpdaterError> {
        let report = self.backups().prune(self.config.backup_retention_days).await?;
        self.emit(WorkerEvent::BackupsPruned {
            removed: report.removed.len(),
            retained: report.retained.len(),
        });
        Ok(report)
    }
}

/// 원자적 교체 후 다시 읽어 해시 확인
async fn write_live(backups: &BackupManager, path: &Path, payload: &[u8]) -> Result<(), UpdaterError> {
    backups.atomic_write(path, payload).await?;
    let written = tokio::fs::read(path)
        .await
        .map_err(|e| UpdaterError::from_io(&e, "read", path))?;
    if sha256_hex(&written) != sha256_hex(payload) {
        return Err(UpdaterError::FileSystem {
            operation: "install".to_string(),
            path: path.display().to_string(),
            message: "installed archive does not match downloaded payload".to_string(),
        });
    }
    Ok(())
}

/// 모든 소스가 실패했을 때 대표 에러 선택 (인증 > 연결 > 파싱 > 없음)
fn unresolved_error(plugin: &Plugin, reports: &[SourceReport]) -> UpdaterError {
    let failure = |wanted: fn(&SourceError) -> bool| {
        reports
            .iter()
            .find(|r| matches!(&r.result, Err(e) if wanted(e)))
    };

    if let Some(report) = failure(|e| matches!(e, SourceError::AuthRequired)) {
        return UpdaterError::AuthRequired {
            source_id: report.source.clone(),
        };
    }
    if let Some(report) = failure(|e| matches!(e, SourceError::Unavailable(_))) {
        let message = match &report.result {
            Err(SourceError::Unavailable(message)) => message.clone(),
            _ => String::new(),
        };
        return UpdaterError::SourceUnavailable {
            source_id: report.source.clone(),
            message,
        };
    }
    if let Some(info) = reports.iter().find_map(|r| r.result.as_ref().ok()) {
        return UpdaterError::VersionParse {
            input: info.latest_version.clone(),
        };
    }
    UpdaterError::NotFoundOnSource {
        plugin: plugin.id.clone(),
    }
}

fn join_error(plugin_id: &str, e: tokio::task::JoinError) -> UpdaterError {
    UpdaterError::Internal {
        message: format!("task for {} failed: {}", plugin_id, e),
    }
}
