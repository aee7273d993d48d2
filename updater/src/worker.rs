//! 진행 이벤트와 자동 확인 스케줄러
//!
//! - `WorkerEvent`: 오케스트레이터가 상태 변화마다 브로드캐스트, GUI/CLI는 구독
//! - `AutoCheckScheduler`: 주기마다 재스캔 → 확인 → 백업 정리

use std::sync::Arc;

use serde::Serialize;

use crate::error::UpdaterError;
use crate::orchestrator::{CheckReport, UpdateManager};
use crate::task::TaskState;

/// 오케스트레이터 이벤트 (GUI/CLI에 브로드캐스트)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    ScanCompleted {
        plugins: usize,
    },
    CheckStarted {
        run_id: String,
        plugins: usize,
    },
    StateChanged {
        plugin_id: String,
        from: TaskState,
        to: TaskState,
    },
    UpdateAvailable {
        plugin_id: String,
        current_version: String,
        latest_version: String,
        source: String,
    },
    DownloadCompleted {
        plugin_id: String,
        bytes: u64,
    },
    BackupCreated {
        plugin_id: String,
        backup_id: String,
    },
    Installed {
        plugin_id: String,
        version: String,
    },
    TaskFailed {
        plugin_id: String,
        error: UpdaterError,
    },
    /// 실패한 설치를 백업으로 되돌림
    RolledBack {
        plugin_id: String,
        backup_id: String,
    },
    CheckCompleted {
        run_id: String,
        updates_available: usize,
        unresolved: usize,
        errors: usize,
    },
    BatchCompleted {
        run_id: String,
        succeeded: usize,
        failed: usize,
    },
    BackupsPruned {
        removed: usize,
        retained: usize,
    },
}

/// 체크 결과에 따른 프로세스 종료 코드.
/// 0 = 업데이트 있음, 1 = 오류, 2 = 할 일 없음
pub fn exit_code(report: &CheckReport) -> i32 {
    if report.updates_available() > 0 {
        0
    } else if report.errors() > 0 {
        1
    } else {
        2
    }
}

// ══════════════════════════════════════════════════════
// 자동 확인
// ══════════════════════════════════════════════════════

pub struct AutoCheckScheduler {
    manager: Arc<UpdateManager>,
    interval_hours: u32,
    enabled: bool,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl AutoCheckScheduler {
    pub fn new(manager: Arc<UpdateManager>, interval_hours: u32, enabled: bool) -> Self {
        Self {
            manager,
            interval_hours,
            enabled,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// 스케줄러 시작
    pub fn start(&mut self) {
        if !self.enabled || self.interval_hours == 0 {
            tracing::info!("[Scheduler] Auto-check disabled");
            return;
        }

        let manager = self.manager.clone();
        let interval = std::time::Duration::from_secs(self.interval_hours as u64 * 3600);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                tracing::info!("[Scheduler] Auto-check triggered");
                run_cycle(&manager).await;
            }
        });

        self.handle = Some(handle);
        tracing::info!("[Scheduler] Auto-check started (every {} hour(s))", self.interval_hours);
    }

    /// 스케줄러 중지
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::info!("[Scheduler] Auto-check stopped");
        }
    }

    /// 설정 업데이트
    pub fn update_config(&mut self, interval_hours: u32, enabled: bool) {
        self.stop();
        self.interval_hours = interval_hours;
        self.enabled = enabled;
        self.start();
    }
}

impl Drop for AutoCheckScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 재스캔 → 전체 확인 → 백업 정리. 실패는 로그만 남기고 다음 주기에 재시도
pub async fn run_cycle(manager: &Arc<UpdateManager>) {
    if let Err(e) = manager.scan(None).await {
        tracing::warn!("[Scheduler] Rescan failed: {}", e);
        return;
    }

    let report = manager.check_all(None).await;
    tracing::info!(
        "[Scheduler] Cycle {} done: {} update(s), {} unresolved, {} error(s)",
        report.run_id,
        report.updates_available(),
        report.unresolved(),
        report.errors()
    );

    if let Err(e) = manager.prune_backups().await {
        tracing::warn!("[Scheduler] Backup prune failed: {}", e);
    }
}
