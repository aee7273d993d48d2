//! 플러그인별 업데이트 상태 머신

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::UpdaterError;
use crate::version::Resolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Checking,
    UpToDate,
    UpdateAvailable,
    Unresolved,
    Downloading,
    Verifying,
    BackingUp,
    Installing,
    Error,
}

impl TaskState {
    pub fn can_transition(self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Idle, Checking)
                | (Checking, UpToDate)
                | (Checking, UpdateAvailable)
                | (Checking, Unresolved)
                | (Checking, Error)
                | (Checking, Idle)
                | (UpToDate, Checking)
                | (UpdateAvailable, Checking)
                | (Unresolved, Checking)
                | (Error, Checking)
                | (UpdateAvailable, Downloading)
                | (Downloading, Verifying)
                | (Downloading, UpdateAvailable)
                | (Downloading, Error)
                | (Verifying, BackingUp)
                | (Verifying, Error)
                | (BackingUp, Installing)
                | (BackingUp, Error)
                | (Installing, UpToDate)
                | (Installing, Error)
        )
    }

    /// 협조적 취소가 허용되는 상태
    pub fn is_cancellable(self) -> bool {
        matches!(self, TaskState::Checking | TaskState::Downloading)
    }

    /// 업데이트 파이프라인 단계
    pub fn in_pipeline(self) -> bool {
        matches!(
            self,
            TaskState::Downloading | TaskState::Verifying | TaskState::BackingUp | TaskState::Installing
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Idle => "idle",
            TaskState::Checking => "checking",
            TaskState::UpToDate => "up_to_date",
            TaskState::UpdateAvailable => "update_available",
            TaskState::Unresolved => "unresolved",
            TaskState::Downloading => "downloading",
            TaskState::Verifying => "verifying",
            TaskState::BackingUp => "backing_up",
            TaskState::Installing => "installing",
            TaskState::Error => "error",
        };
        f.write_str(name)
    }
}

/// 작업 아레나의 레코드 하나 (플러그인 ID로 색인)
#[derive(Debug, Clone, Serialize)]
pub struct UpdateTask {
    pub plugin_id: String,
    pub state: TaskState,
    /// 업데이트 시도 횟수 (Downloading 진입 횟수)
    pub attempts: u32,
    pub last_error: Option<UpdaterError>,
    pub latest_version: Option<String>,
    pub source: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// 이 작업을 소유한 워커가 있는지
    pub active: bool,
    #[serde(skip)]
    pub(crate) resolution: Option<Resolution>,
    #[serde(skip)]
    pub(crate) cancel: Option<CancellationToken>,
}

impl UpdateTask {
    pub fn new(plugin_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            state: TaskState::Idle,
            attempts: 0,
            last_error: None,
            latest_version: None,
            source: None,
            updated_at: Utc::now(),
            active: false,
            resolution: None,
            cancel: None,
        }
    }

    pub fn transition(&mut self, to: TaskState) -> Result<TaskState, UpdaterError> {
        let from = self.state;
        if !from.can_transition(to) {
            return Err(UpdaterError::InvalidTransition {
                plugin: self.plugin_id.clone(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!("[Task] {}: {} -> {}", self.plugin_id, from, to);
        self.state = to;
        self.updated_at = Utc::now();
        match to {
            TaskState::Downloading => self.attempts += 1,
            TaskState::UpToDate => self.last_error = None,
            _ => {}
        }
        Ok(from)
    }

    /// 상태 머신 밖에서 초기화 (수동 복원 후)
    pub(crate) fn reset(&mut self) {
        self.state = TaskState::Idle;
        self.last_error = None;
        self.latest_version = None;
        self.source = None;
        self.resolution = None;
        self.updated_at = Utc::now();
    }
}
