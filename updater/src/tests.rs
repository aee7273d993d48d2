//! 업데이터 시나리오 테스트
//!
//! ## 테스트 시나리오
//! 1. 정상 업데이트: 백업 1개 생성, 라이브 파일 교체
//! 2. 체크섬 불일치: 백업 없음, 라이브 파일 그대로
//! 3. 동시 요청: 같은 플러그인에 대한 두 번째 요청은 Conflict
//! 4. 취소: 확인/다운로드 중 취소
//! 5. 설치 실패: 백업으로 롤백, 롤백 실패는 치명적
//! 6. 일괄 처리: 플러그인별 결과가 서로 독립적

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::inventory::sha256_hex;
use crate::{
    exit_code, BackupManager, Checksum, ResolveRequest, SourceError, TaskState, UpdateChannel, UpdateConfig,
    UpdateManager, UpdaterError, VersionInfo, VersionSource, WorkerEvent,
};

// ═══════════════════════════════════════════════════════
// 픽스처
// ═══════════════════════════════════════════════════════

fn jar(name: &str, version: &str) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = zip::write::FileOptions::default();
        zip.start_file("plugin.yml", options).unwrap();
        write!(zip, "name: {}\nversion: '{}'\nmain: com.example.Main\n", name, version).unwrap();
        zip.start_file("com/example/Main.class", options).unwrap();
        zip.write_all(b"\xCA\xFE\xBA\xBE").unwrap();
        zip.finish().unwrap();
    }
    buf.into_inner()
}

struct FakeSource {
    id: &'static str,
    result: Result<VersionInfo, SourceError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeSource {
    fn new(id: &'static str, result: Result<VersionInfo, SourceError>) -> Self {
        Self {
            id,
            result,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl VersionSource for FakeSource {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn resolve_latest(&self, _request: &ResolveRequest) -> Result<VersionInfo, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

/// 플러그인별 응답을 돌려주는 소스
struct TableSource {
    table: HashMap<String, Result<VersionInfo, SourceError>>,
}

#[async_trait]
impl VersionSource for TableSource {
    fn id(&self) -> &'static str {
        "modrinth"
    }

    async fn resolve_latest(&self, request: &ResolveRequest) -> Result<VersionInfo, SourceError> {
        self.table
            .get(&request.plugin_id)
            .cloned()
            .unwrap_or(Err(SourceError::NotFound))
    }
}

fn info(source: &str, version: &str, url: String, checksum: Option<Checksum>) -> VersionInfo {
    VersionInfo {
        source: source.to_string(),
        latest_version: version.to_string(),
        download_url: url,
        checksum,
        channel: UpdateChannel::Stable,
        published_at: None,
    }
}

type Files = Arc<HashMap<String, Vec<u8>>>;

async fn file(State(files): State<Files>, UrlPath(name): UrlPath<String>) -> Response {
    match files.get(&name) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn slow_file(state: State<Files>, name: UrlPath<String>) -> Response {
    tokio::time::sleep(Duration::from_secs(30)).await;
    file(state, name).await
}

/// 다운로드용 로컬 서버. `/files/{name}`, `/slow/{name}`
async fn serve(files: Vec<(&str, Vec<u8>)>) -> String {
    let files: Files = Arc::new(files.into_iter().map(|(k, v)| (k.to_string(), v)).collect());
    let app = Router::new()
        .route("/files/:name", get(file))
        .route("/slow/:name", get(slow_file))
        .with_state(files);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(dir: &Path) -> UpdateConfig {
    UpdateConfig {
        plugins_dir: dir.to_path_buf(),
        request_timeout_secs: 5,
        download_timeout_secs: 10,
        io_timeout_secs: 5,
        ..UpdateConfig::default()
    }
}

async fn manager_with(
    dir: &Path,
    config: UpdateConfig,
    sources: Vec<Arc<dyn VersionSource>>,
) -> Arc<UpdateManager> {
    let manager = UpdateManager::with_sources(config, sources).unwrap();
    manager.scan(Some(dir)).await.unwrap();
    manager
}

async fn wait_for_state(manager: &UpdateManager, plugin_id: &str, state: TaskState) {
    for _ in 0..500 {
        if manager.task(plugin_id).map(|t| t.state) == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {}", plugin_id, state);
}

// ═══════════════════════════════════════════════════════
// 정상 경로
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn update_replaces_archive_and_keeps_one_backup() {
    let dir = tempfile::tempdir().unwrap();
    let old = jar("Essentials", "2.3.1");
    let new = jar("Essentials", "2.3.5");
    std::fs::write(dir.path().join("Essentials.jar"), &old).unwrap();

    let base = serve(vec![("Essentials.jar", new.clone())]).await;
    let checksum = Checksum::sha256(sha256_hex(&new));
    let source = FakeSource::new(
        "modrinth",
        Ok(info("modrinth", "2.3.5", format!("{}/files/Essentials.jar", base), Some(checksum))),
    );
    let manager = manager_with(dir.path(), config(dir.path()), vec![Arc::new(source)]).await;
    let mut events = manager.subscribe();

    let outcome = manager.update("Essentials").await.unwrap();
    assert_eq!(outcome.state, TaskState::UpToDate);
    assert!(outcome.updated);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.current_version.as_deref(), Some("2.3.5"));

    let live = std::fs::read(dir.path().join("Essentials.jar")).unwrap();
    assert_eq!(live, new);
    assert_eq!(manager.plugin("Essentials").unwrap().current_version, "2.3.5");

    let backups = manager.list_backups("Essentials").await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].content_hash, sha256_hex(&old));

    let task = manager.task("Essentials").unwrap();
    assert_eq!(task.attempts, 1);
    assert!(!task.active);

    let mut installed = false;
    while let Ok(event) = events.try_recv() {
        if let WorkerEvent::Installed { plugin_id, version } = event {
            assert_eq!(plugin_id, "Essentials");
            assert_eq!(version, "2.3.5");
            installed = true;
        }
    }
    assert!(installed);
}

#[tokio::test]
async fn update_reuses_recent_check_result() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Vault.jar"), jar("Vault", "1.7.2")).unwrap();
    let new = jar("Vault", "1.7.3");
    let base = serve(vec![("Vault.jar", new)]).await;

    let source = Arc::new(FakeSource::new(
        "spigot",
        Ok(info("spigot", "1.7.3", format!("{}/files/Vault.jar", base), None)),
    ));
    let manager = manager_with(dir.path(), config(dir.path()), vec![source.clone()]).await;

    let checked = manager.check("Vault").await.unwrap();
    assert_eq!(checked.state, TaskState::UpdateAvailable);
    assert_eq!(checked.latest_version.as_deref(), Some("1.7.3"));
    assert_eq!(checked.source.as_deref(), Some("spigot"));

    let outcome = manager.update("Vault").await.unwrap();
    assert_eq!(outcome.state, TaskState::UpToDate);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn auto_download_installs_during_check() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Vault.jar"), jar("Vault", "1.7.2")).unwrap();
    let base = serve(vec![("Vault.jar", jar("Vault", "1.7.3"))]).await;

    let source = FakeSource::new(
        "modrinth",
        Ok(info("modrinth", "1.7.3", format!("{}/files/Vault.jar", base), None)),
    );
    let mut cfg = config(dir.path());
    cfg.auto_download = true;
    let manager = manager_with(dir.path(), cfg, vec![Arc::new(source)]).await;

    let report = manager.check_all(None).await;
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.outcomes[0].updated);
    assert_eq!(report.outcomes[0].state, TaskState::UpToDate);
    assert_eq!(exit_code(&report), 0);
}

#[tokio::test]
async fn missing_live_file_installs_without_backup() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("Vault.jar");
    std::fs::write(&live, jar("Vault", "1.7.2")).unwrap();
    let new = jar("Vault", "1.7.3");
    let base = serve(vec![("Vault.jar", new.clone())]).await;

    let source = FakeSource::new(
        "modrinth",
        Ok(info("modrinth", "1.7.3", format!("{}/files/Vault.jar", base), None)),
    );
    let manager = manager_with(dir.path(), config(dir.path()), vec![Arc::new(source)]).await;
    std::fs::remove_file(&live).unwrap();

    let outcome = manager.update("Vault").await.unwrap();
    assert_eq!(outcome.state, TaskState::UpToDate);
    assert_eq!(std::fs::read(&live).unwrap(), new);
    assert!(manager.list_backups("Vault").await.unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════
// 확인 결과
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn unresolved_and_up_to_date_are_distinct() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Known.jar"), jar("Known", "1.0.0")).unwrap();
    std::fs::write(dir.path().join("Private.jar"), jar("Private", "0.1.0")).unwrap();

    let mut table = HashMap::new();
    table.insert(
        "Known".to_string(),
        Ok(info("modrinth", "1.0.0", "http://127.0.0.1:1/unused".into(), None)),
    );
    let manager = manager_with(
        dir.path(),
        config(dir.path()),
        vec![Arc::new(TableSource { table })],
    )
    .await;

    let report = manager.check_all(None).await;
    let known = report.outcomes.iter().find(|o| o.plugin_id == "Known").unwrap();
    let private = report.outcomes.iter().find(|o| o.plugin_id == "Private").unwrap();

    assert_eq!(known.state, TaskState::UpToDate);
    assert!(known.error.is_none());
    assert_eq!(private.state, TaskState::Unresolved);
    assert!(matches!(private.error, Some(UpdaterError::NotFoundOnSource { .. })));

    assert_eq!(report.updates_available(), 0);
    assert_eq!(report.unresolved(), 1);
    assert_eq!(report.errors(), 0);
    assert_eq!(exit_code(&report), 2);
}

#[tokio::test]
async fn missing_credentials_surface_as_auth_required() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("WorldEdit.jar"), jar("WorldEdit", "7.2.0")).unwrap();

    let manager = manager_with(
        dir.path(),
        config(dir.path()),
        vec![
            Arc::new(FakeSource::new("modrinth", Err(SourceError::NotFound))),
            Arc::new(FakeSource::new("bukkit", Err(SourceError::AuthRequired))),
        ],
    )
    .await;

    let outcome = manager.check("WorldEdit").await.unwrap();
    assert_eq!(outcome.state, TaskState::Unresolved);
    match outcome.error {
        Some(UpdaterError::AuthRequired { source_id }) => assert_eq!(source_id, "bukkit"),
        other => panic!("expected AuthRequired, got {:?}", other),
    }
}

#[tokio::test]
async fn beta_candidate_is_ignored_on_stable_channel() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Vault.jar"), jar("Vault", "1.7.2")).unwrap();

    let mut beta = info("modrinth", "1.8.0-beta.1", "http://127.0.0.1:1/unused".into(), None);
    beta.channel = UpdateChannel::Beta;
    let manager = manager_with(
        dir.path(),
        config(dir.path()),
        vec![Arc::new(FakeSource::new("modrinth", Ok(beta)))],
    )
    .await;

    let outcome = manager.check("Vault").await.unwrap();
    assert_eq!(outcome.state, TaskState::Unresolved);
    assert!(outcome.latest_version.is_none());
}

#[tokio::test]
async fn unknown_plugin_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Vault.jar"), jar("Vault", "1.7.2")).unwrap();
    let manager = manager_with(dir.path(), config(dir.path()), vec![]).await;

    assert!(matches!(
        manager.update("Ghost").await,
        Err(UpdaterError::UnknownPlugin { .. })
    ));
    assert!(matches!(manager.cancel("Ghost"), Err(UpdaterError::UnknownPlugin { .. })));
}

// ═══════════════════════════════════════════════════════
// 실패 경로
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn checksum_mismatch_leaves_live_file_and_no_backup() {
    let dir = tempfile::tempdir().unwrap();
    let old = jar("Essentials", "2.3.1");
    std::fs::write(dir.path().join("Essentials.jar"), &old).unwrap();
    let base = serve(vec![("Essentials.jar", jar("Essentials", "2.3.5"))]).await;

    let source = FakeSource::new(
        "modrinth",
        Ok(info(
            "modrinth",
            "2.3.5",
            format!("{}/files/Essentials.jar", base),
            Some(Checksum::sha256("00".repeat(32))),
        )),
    );
    let manager = manager_with(dir.path(), config(dir.path()), vec![Arc::new(source)]).await;

    let outcome = manager.update("Essentials").await.unwrap();
    assert_eq!(outcome.state, TaskState::Error);
    assert!(matches!(outcome.error, Some(UpdaterError::ChecksumMismatch { .. })));
    assert!(!outcome.fatal);

    assert_eq!(std::fs::read(dir.path().join("Essentials.jar")).unwrap(), old);
    assert!(manager.list_backups("Essentials").await.unwrap().is_empty());
    assert_eq!(manager.plugin("Essentials").unwrap().current_version, "2.3.1");
}

#[tokio::test]
async fn corrupt_download_is_rejected_before_backup() {
    let dir = tempfile::tempdir().unwrap();
    let old = jar("Vault", "1.7.2");
    std::fs::write(dir.path().join("Vault.jar"), &old).unwrap();
    let base = serve(vec![("Vault.jar", b"<html>rate limited</html>".to_vec())]).await;

    let source = FakeSource::new(
        "spigot",
        Ok(info("spigot", "1.7.3", format!("{}/files/Vault.jar", base), None)),
    );
    let manager = manager_with(dir.path(), config(dir.path()), vec![Arc::new(source)]).await;

    let outcome = manager.update("Vault").await.unwrap();
    assert!(matches!(outcome.error, Some(UpdaterError::InvalidArchive { .. })));
    assert_eq!(std::fs::read(dir.path().join("Vault.jar")).unwrap(), old);
    assert!(manager.list_backups("Vault").await.unwrap().is_empty());
}

#[tokio::test]
async fn blocked_install_restores_previous_archive() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("Essentials.jar");
    let old = jar("Essentials", "2.3.1");
    let new = jar("Essentials", "2.3.5");
    std::fs::write(&live, &old).unwrap();
    // 설치용 임시 경로를 폴더가 차지하고 있어서 교체 쓰기가 실패
    std::fs::create_dir(dir.path().join(".Essentials.jar.jk-tmp")).unwrap();

    let base = serve(vec![("Essentials.jar", new.clone())]).await;
    let source = FakeSource::new(
        "modrinth",
        Ok(info(
            "modrinth",
            "2.3.5",
            format!("{}/files/Essentials.jar", base),
            Some(Checksum::sha256(sha256_hex(&new))),
        )),
    );
    let manager = manager_with(dir.path(), config(dir.path()), vec![Arc::new(source)]).await;
    let mut events = manager.subscribe();

    let outcome = manager.update("Essentials").await.unwrap();
    assert_eq!(outcome.state, TaskState::Error);
    assert!(!outcome.updated);
    assert!(!outcome.fatal);
    assert!(matches!(outcome.error, Some(UpdaterError::FileSystem { .. })));

    assert_eq!(std::fs::read(&live).unwrap(), old);
    assert_eq!(manager.plugin("Essentials").unwrap().current_version, "2.3.1");
    assert!(manager.list_backups("Essentials").await.unwrap().is_empty());
    assert!(!dir.path().join(".Essentials.jar.jk-restore").exists());
    let task = manager.task("Essentials").unwrap();
    assert_eq!(task.state, TaskState::Error);
    assert!(!task.active);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            WorkerEvent::BackupCreated { .. } => seen.push("backup"),
            WorkerEvent::RolledBack { plugin_id, .. } => {
                assert_eq!(plugin_id, "Essentials");
                seen.push("rollback");
            }
            WorkerEvent::Installed { .. } => seen.push("installed"),
            _ => {}
        }
    }
    assert_eq!(seen, vec!["backup", "rollback"]);
}

#[tokio::test]
async fn failed_restore_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("Vault.jar");
    std::fs::write(&live, jar("Vault", "1.7.2")).unwrap();
    let manager = manager_with(dir.path(), config(dir.path()), vec![]).await;
    let plugin = manager.plugin("Vault").unwrap();

    let _slot = manager.acquire("Vault").unwrap();
    for state in [
        TaskState::Checking,
        TaskState::UpdateAvailable,
        TaskState::Downloading,
        TaskState::Verifying,
        TaskState::BackingUp,
        TaskState::Installing,
    ] {
        manager.transition("Vault", state).unwrap();
    }
    let backups = BackupManager::new(manager.plugins_dir(), Duration::from_secs(5));
    let backup = backups.backup(&plugin).await.unwrap();
    std::fs::write(&backup.backup_path, b"bit rot").unwrap();

    let cause = UpdaterError::Internal { message: "boom".into() };
    let error = manager.roll_back("Vault", &backups, Some(&backup), cause).await;

    assert!(matches!(error, UpdaterError::Rollback { .. }));
    assert!(error.is_fatal());
    assert_eq!(manager.task("Vault").unwrap().state, TaskState::Error);
}

// ═══════════════════════════════════════════════════════
// 동시성 / 취소
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn second_request_for_busy_plugin_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Vault.jar"), jar("Vault", "1.7.2")).unwrap();
    let source = FakeSource::new("modrinth", Err(SourceError::NotFound)).slow(Duration::from_millis(500));
    let manager = manager_with(dir.path(), config(dir.path()), vec![Arc::new(source)]).await;

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.update("Vault").await })
    };
    wait_for_state(&manager, "Vault", TaskState::Checking).await;

    assert!(matches!(
        manager.update("Vault").await,
        Err(UpdaterError::Conflict { .. })
    ));
    assert!(matches!(manager.check("Vault").await, Err(UpdaterError::Conflict { .. })));

    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.state, TaskState::Unresolved);
    assert!(!manager.task("Vault").unwrap().active);
}

#[tokio::test]
async fn restore_conflicts_with_running_update() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("Vault.jar");
    let old = jar("Vault", "1.7.1");
    std::fs::write(&live, &old).unwrap();

    let source = FakeSource::new("modrinth", Err(SourceError::NotFound)).slow(Duration::from_millis(500));
    let manager = manager_with(dir.path(), config(dir.path()), vec![Arc::new(source)]).await;
    let backups = BackupManager::new(manager.plugins_dir(), Duration::from_secs(5));
    let backup = backups.backup(&manager.plugin("Vault").unwrap()).await.unwrap();
    std::fs::write(&live, jar("Vault", "1.7.2")).unwrap();

    let running = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.check("Vault").await })
    };
    wait_for_state(&manager, "Vault", TaskState::Checking).await;
    assert!(matches!(
        manager.restore_backup(&backup.id).await,
        Err(UpdaterError::Conflict { .. })
    ));
    running.await.unwrap().unwrap();

    let restored = manager.restore_backup(&backup.id).await.unwrap();
    assert_eq!(restored.current_version, "1.7.1");
    assert_eq!(std::fs::read(&live).unwrap(), old);
    assert_eq!(manager.task("Vault").unwrap().state, TaskState::Idle);
}

#[tokio::test]
async fn cancel_during_check_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Vault.jar"), jar("Vault", "1.7.2")).unwrap();
    let source = FakeSource::new("modrinth", Err(SourceError::NotFound)).slow(Duration::from_secs(30));
    let manager = manager_with(dir.path(), config(dir.path()), vec![Arc::new(source)]).await;

    let running = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.check("Vault").await })
    };
    wait_for_state(&manager, "Vault", TaskState::Checking).await;
    assert!(manager.cancel("Vault").unwrap());

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.state, TaskState::Idle);
    assert!(matches!(outcome.error, Some(UpdaterError::Cancelled { .. })));
    assert!(!manager.task("Vault").unwrap().active);
}

#[tokio::test]
async fn cancel_during_download_keeps_update_available() {
    let dir = tempfile::tempdir().unwrap();
    let old = jar("Vault", "1.7.2");
    std::fs::write(dir.path().join("Vault.jar"), &old).unwrap();
    let base = serve(vec![("Vault.jar", jar("Vault", "1.7.3"))]).await;

    let source = FakeSource::new(
        "modrinth",
        Ok(info("modrinth", "1.7.3", format!("{}/slow/Vault.jar", base), None)),
    );
    let manager = manager_with(dir.path(), config(dir.path()), vec![Arc::new(source)]).await;

    let running = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.update("Vault").await })
    };
    wait_for_state(&manager, "Vault", TaskState::Downloading).await;
    assert!(manager.cancel("Vault").unwrap());

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.state, TaskState::UpdateAvailable);
    assert!(matches!(outcome.error, Some(UpdaterError::Cancelled { .. })));
    assert_eq!(std::fs::read(dir.path().join("Vault.jar")).unwrap(), old);
    assert!(manager.list_backups("Vault").await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_outside_cancellable_states_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Vault.jar"), jar("Vault", "1.7.2")).unwrap();
    let manager = manager_with(dir.path(), config(dir.path()), vec![]).await;

    assert!(!manager.cancel("Vault").unwrap());
}

#[tokio::test]
async fn shutdown_cancels_new_work() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Vault.jar"), jar("Vault", "1.7.2")).unwrap();
    let source = FakeSource::new("modrinth", Err(SourceError::NotFound)).slow(Duration::from_secs(30));
    let manager = manager_with(dir.path(), config(dir.path()), vec![Arc::new(source)]).await;

    manager.shutdown();
    let outcome = manager.check("Vault").await.unwrap();
    assert!(matches!(outcome.error, Some(UpdaterError::Cancelled { .. })));
}

// ═══════════════════════════════════════════════════════
// 일괄 처리
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn batch_failures_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let good_new = jar("Good", "2.0.0");
    let bad_old = jar("Bad", "1.0.0");
    std::fs::write(dir.path().join("Good.jar"), jar("Good", "1.0.0")).unwrap();
    std::fs::write(dir.path().join("Bad.jar"), &bad_old).unwrap();
    let base = serve(vec![
        ("Good.jar", good_new.clone()),
        ("Bad.jar", jar("Bad", "2.0.0")),
    ])
    .await;

    let mut table = HashMap::new();
    table.insert(
        "Good".to_string(),
        Ok(info("modrinth", "2.0.0", format!("{}/files/Good.jar", base), None)),
    );
    table.insert(
        "Bad".to_string(),
        Ok(info(
            "modrinth",
            "2.0.0",
            format!("{}/files/Bad.jar", base),
            Some(Checksum::sha256("ff".repeat(32))),
        )),
    );
    let manager = manager_with(
        dir.path(),
        config(dir.path()),
        vec![Arc::new(TableSource { table })],
    )
    .await;

    let ids = vec!["Good".to_string(), "Bad".to_string(), "Ghost".to_string()];
    let report = manager.update_all(&ids).await;

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 2);
    assert!(report.outcome("Good").unwrap().updated);
    assert!(matches!(
        report.outcome("Bad").unwrap().error,
        Some(UpdaterError::ChecksumMismatch { .. })
    ));
    assert!(matches!(
        report.outcome("Ghost").unwrap().error,
        Some(UpdaterError::UnknownPlugin { .. })
    ));

    assert_eq!(std::fs::read(dir.path().join("Good.jar")).unwrap(), good_new);
    assert_eq!(std::fs::read(dir.path().join("Bad.jar")).unwrap(), bad_old);
}

#[tokio::test]
async fn update_available_only_touches_flagged_plugins() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Old.jar"), jar("Old", "1.0.0")).unwrap();
    std::fs::write(dir.path().join("Current.jar"), jar("Current", "3.0.0")).unwrap();
    let base = serve(vec![("Old.jar", jar("Old", "1.1.0"))]).await;

    let mut table = HashMap::new();
    table.insert(
        "Old".to_string(),
        Ok(info("modrinth", "1.1.0", format!("{}/files/Old.jar", base), None)),
    );
    table.insert(
        "Current".to_string(),
        Ok(info("modrinth", "3.0.0", format!("{}/files/Current.jar", base), None)),
    );
    let manager = manager_with(
        dir.path(),
        config(dir.path()),
        vec![Arc::new(TableSource { table })],
    )
    .await;

    let checked = manager.check_all(None).await;
    assert_eq!(checked.updates_available(), 1);
    assert_eq!(exit_code(&checked), 0);

    let report = manager.update_available().await;
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].plugin_id, "Old");
    assert_eq!(report.succeeded(), 1);
}

#[tokio::test]
async fn rescan_drops_tasks_for_removed_plugins() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Keep.jar"), jar("Keep", "1.0.0")).unwrap();
    std::fs::write(dir.path().join("Gone.jar"), jar("Gone", "1.0.0")).unwrap();
    let manager = manager_with(
        dir.path(),
        config(dir.path()),
        vec![Arc::new(FakeSource::new("modrinth", Err(SourceError::NotFound)))],
    )
    .await;

    manager.check_all(None).await;
    assert_eq!(manager.tasks().len(), 2);

    std::fs::remove_file(dir.path().join("Gone.jar")).unwrap();
    let plugins = manager.scan(None).await.unwrap();
    assert_eq!(plugins.len(), 1);
    assert!(manager.task("Gone").is_none());
    assert!(manager.task("Keep").is_some());
}
