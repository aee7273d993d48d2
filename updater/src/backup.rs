//! 백업 관리자
//!
//! 플러그인 폴더 하위 `.backups/`에 아카이브 전체 사본을 보관합니다.
//! 파일 이름이 플러그인 ID와 생성 시각을 담고 있어 보존 기간 정리가 결정적입니다:
//! `<plugin>__<yyyyMMddTHHmmssSSS>Z.<ext>.bak` + `<backup>.sha256`
//!
//! 플러그인 폴더에 쓰는 모든 경로는 [`BackupManager::atomic_write`]를 거칩니다.
//! 임시 파일에 쓰고 fsync 후 rename하므로 외부에서 잘린 파일을 볼 일이 없습니다.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, DurationRound, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::UpdaterError;
use crate::inventory::{is_intact_bytes, sha256_hex};
use crate::{Plugin, BACKUP_DIR_NAME};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";
const BACKUP_SUFFIX: &str = ".bak";
const HASH_SUFFIX: &str = ".sha256";
const TEMP_SUFFIX: &str = ".jk-tmp";
const RESTORE_SUFFIX: &str = ".jk-restore";

/// 검증된 시점 사본 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    /// 백업 파일 이름 (결정적)
    pub id: String,
    pub plugin_id: String,
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
}

/// 보존 기간 정리 결과
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneReport {
    pub removed: Vec<Backup>,
    pub retained: Vec<Backup>,
}

pub struct BackupManager {
    plugins_dir: PathBuf,
    backup_dir: PathBuf,
    io_timeout: Duration,
}

impl BackupManager {
    pub fn new(plugins_dir: impl Into<PathBuf>, io_timeout: Duration) -> Self {
        let plugins_dir = plugins_dir.into();
        Self {
            backup_dir: plugins_dir.join(BACKUP_DIR_NAME),
            plugins_dir,
            io_timeout,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// 파일 작업 하나를 io_timeout으로 제한
    async fn bounded<T, F>(&self, operation: &str, path: &Path, fut: F) -> Result<T, UpdaterError>
    where
        F: Future<Output = io::Result<T>>,
    {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(UpdaterError::from_io(&e, operation, path)),
            Err(_) => Err(UpdaterError::Timeout {
                operation: format!("{} {}", operation, path.display()),
                duration_secs: self.io_timeout.as_secs(),
            }),
        }
    }

    // ══════════════════════════════════════════════════════
    // 생성
    // ══════════════════════════════════════════════════════

    /// 현재 아카이브의 검증된 사본 생성
    pub async fn backup(&self, plugin: &Plugin) -> Result<Backup, UpdaterError> {
        self.backup_at(plugin, Utc::now()).await
    }

    pub(crate) async fn backup_at(&self, plugin: &Plugin, at: DateTime<Utc>) -> Result<Backup, UpdaterError> {
        let backup_error = |message: String| UpdaterError::Backup {
            plugin: plugin.id.clone(),
            message,
        };

        self.bounded("create_dir", &self.backup_dir, tokio::fs::create_dir_all(&self.backup_dir))
            .await
            .map_err(|e| backup_error(e.to_string()))?;

        let source = self
            .bounded("read", &plugin.path, tokio::fs::read(&plugin.path))
            .await
            .map_err(|e| backup_error(e.to_string()))?;
        let expected = sha256_hex(&source);

        let extension = plugin
            .path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "jar".to_string());

        // 파일 이름 정밀도(ms)에 맞추고, 같은 밀리초에 이미 있으면 1ms씩 뒤로
        let mut created_at = at.duration_trunc(chrono::Duration::milliseconds(1)).unwrap_or(at);
        let mut id = backup_file_name(&plugin.id, created_at, &extension);
        while tokio::fs::try_exists(self.backup_dir.join(&id)).await.unwrap_or(false) {
            created_at += chrono::Duration::milliseconds(1);
            id = backup_file_name(&plugin.id, created_at, &extension);
        }
        let backup_path = self.backup_dir.join(&id);
        let temp_path = self.backup_dir.join(format!(".{}{}", id, TEMP_SUFFIX));

        let copied = async {
            self.write_synced(&temp_path, &source).await?;
            let written = self.bounded("read", &temp_path, tokio::fs::read(&temp_path)).await?;
            let actual = sha256_hex(&written);
            if actual != expected {
                return Err(backup_error(format!(
                    "copy verification failed: expected {}, got {}",
                    expected, actual
                )));
            }
            self.bounded("rename", &backup_path, tokio::fs::rename(&temp_path, &backup_path))
                .await?;
            let sidecar = hash_path(&backup_path);
            self.write_synced(&sidecar, format!("{}\n", expected).as_bytes()).await
        }
        .await;

        if let Err(e) = copied {
            let _ = tokio::fs::remove_file(&temp_path).await;
            let _ = tokio::fs::remove_file(&backup_path).await;
            return Err(match e {
                UpdaterError::Backup { .. } => e,
                other => backup_error(other.to_string()),
            });
        }

        tracing::info!("[Backup] Created {} for {}", id, plugin.id);
        Ok(Backup {
            id,
            plugin_id: plugin.id.clone(),
            original_path: plugin.path.clone(),
            backup_path,
            created_at,
            content_hash: expected,
        })
    }

    async fn write_synced(&self, path: &Path, bytes: &[u8]) -> Result<(), UpdaterError> {
        self.bounded("write", path, async {
            let mut file = tokio::fs::File::create(path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await
        })
        .await
    }

    // ══════════════════════════════════════════════════════
    // 원자적 교체 / 복원
    // ══════════════════════════════════════════════════════

    /// 같은 폴더의 숨김 임시 파일에 쓰고 rename으로 교체
    pub async fn atomic_write(&self, target: &Path, bytes: &[u8]) -> Result<(), UpdaterError> {
        self.replace_via(target, bytes, TEMP_SUFFIX).await
    }

    /// 복원용 임시 파일은 설치용과 이름이 다름 (남은 설치 임시 파일과 충돌하지 않음)
    async fn replace_via(&self, target: &Path, bytes: &[u8], suffix: &str) -> Result<(), UpdaterError> {
        let dir = target.parent().unwrap_or(&self.plugins_dir);
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "plugin".to_string());
        let temp_path = dir.join(format!(".{}{}", file_name, suffix));

        let result = async {
            self.write_synced(&temp_path, bytes).await?;
            self.bounded("rename", target, tokio::fs::rename(&temp_path, target)).await
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp_path).await;
        }
        result
    }

    /// 백업 해시를 확인한 뒤 라이브 아카이브를 원자적으로 교체
    pub async fn restore(&self, backup: &Backup) -> Result<(), UpdaterError> {
        let bytes = self
            .bounded("read", &backup.backup_path, tokio::fs::read(&backup.backup_path))
            .await?;
        let actual = sha256_hex(&bytes);
        if actual != backup.content_hash {
            return Err(UpdaterError::Backup {
                plugin: backup.plugin_id.clone(),
                message: format!(
                    "backup {} is corrupted: expected {}, got {}",
                    backup.id, backup.content_hash, actual
                ),
            });
        }

        self.replace_via(&backup.original_path, &bytes, RESTORE_SUFFIX).await?;
        tracing::info!(
            "[Backup] Restored {} from {}",
            backup.original_path.display(),
            backup.id
        );
        Ok(())
    }

    /// 사본을 다시 해시해서 사이드카와 비교
    pub async fn verify(&self, backup: &Backup) -> bool {
        if backup.content_hash.is_empty() {
            return false;
        }
        match self
            .bounded("read", &backup.backup_path, tokio::fs::read(&backup.backup_path))
            .await
        {
            Ok(bytes) => sha256_hex(&bytes) == backup.content_hash,
            Err(_) => false,
        }
    }

    /// 백업과 사이드카 삭제
    pub async fn discard(&self, backup: &Backup) -> Result<(), UpdaterError> {
        self.bounded("remove", &backup.backup_path, tokio::fs::remove_file(&backup.backup_path))
            .await?;
        let sidecar = hash_path(&backup.backup_path);
        if let Err(e) = tokio::fs::remove_file(&sidecar).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("[Backup] Could not remove {}: {}", sidecar.display(), e);
            }
        }
        tracing::debug!("[Backup] Discarded {}", backup.id);
        Ok(())
    }

    // ══════════════════════════════════════════════════════
    // 조회
    // ══════════════════════════════════════════════════════

    /// 모든 백업 (최신순)
    pub async fn list_all(&self) -> Result<Vec<Backup>, UpdaterError> {
        let mut entries = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(UpdaterError::from_io(&e, "read_dir", &self.backup_dir)),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| UpdaterError::from_io(&e, "read_dir", &self.backup_dir))?
        {
            let id = entry.file_name().to_string_lossy().to_string();
            if let Some(backup) = self.load(&id).await {
                backups.push(backup);
            }
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(backups)
    }

    /// 플러그인 하나의 백업 (최신순)
    pub async fn list(&self, plugin_id: &str) -> Result<Vec<Backup>, UpdaterError> {
        let all = self.list_all().await?;
        Ok(all.into_iter().filter(|b| b.plugin_id == plugin_id).collect())
    }

    /// ID로 백업 찾기. 경로 구분자가 들어간 ID는 거부
    pub async fn find(&self, backup_id: &str) -> Result<Backup, UpdaterError> {
        let not_found = || UpdaterError::BackupNotFound {
            backup_id: backup_id.to_string(),
        };
        if backup_id.contains(['/', '\\']) || backup_id.starts_with('.') {
            return Err(not_found());
        }
        self.load(backup_id).await.ok_or_else(not_found)
    }

    async fn load(&self, id: &str) -> Option<Backup> {
        let (plugin_id, created_at, extension) = parse_backup_file_name(id)?;
        let backup_path = self.backup_dir.join(id);
        if !tokio::fs::metadata(&backup_path).await.ok()?.is_file() {
            return None;
        }
        let content_hash = tokio::fs::read_to_string(hash_path(&backup_path))
            .await
            .ok()
            .and_then(|s| s.split_whitespace().next().map(str::to_string))
            .unwrap_or_default();

        Some(Backup {
            id: id.to_string(),
            original_path: self.plugins_dir.join(format!("{}.{}", plugin_id, extension)),
            plugin_id,
            backup_path,
            created_at,
            content_hash,
        })
    }

    // ══════════════════════════════════════════════════════
    // 보존 기간 정리
    // ══════════════════════════════════════════════════════

    pub async fn prune(&self, retention_days: u32) -> Result<PruneReport, UpdaterError> {
        self.prune_at(retention_days, Utc::now()).await
    }

    /// 플러그인별로 기간이 지난 백업 삭제.
    /// 가장 최신 백업은 항상 남기고, 라이브 아카이브가 손상된 경우
    /// 유효한 마지막 복구 지점은 만료되어도 남긴다.
    pub async fn prune_at(&self, retention_days: u32, now: DateTime<Utc>) -> Result<PruneReport, UpdaterError> {
        let cutoff = now - chrono::Duration::days(i64::from(retention_days.max(1)));
        let mut by_plugin: BTreeMap<String, Vec<Backup>> = BTreeMap::new();
        for backup in self.list_all().await? {
            by_plugin.entry(backup.plugin_id.clone()).or_default().push(backup);
        }

        let mut report = PruneReport::default();
        for (plugin_id, backups) in by_plugin {
            // 최신순
            let live = backups[0].original_path.clone();
            let live_ok = match tokio::fs::read(&live).await {
                Ok(bytes) => is_intact_bytes(&bytes),
                Err(_) => false,
            };

            let mut keep = vec![false; backups.len()];
            keep[0] = true;
            for (i, backup) in backups.iter().enumerate().skip(1) {
                keep[i] = backup.created_at >= cutoff;
            }

            if !live_ok {
                let mut has_valid = false;
                for (i, backup) in backups.iter().enumerate() {
                    if keep[i] && self.verify(backup).await {
                        has_valid = true;
                        break;
                    }
                }
                if !has_valid {
                    for (i, backup) in backups.iter().enumerate() {
                        if self.verify(backup).await {
                            keep[i] = true;
                            tracing::warn!(
                                "[Backup] Live archive for {} is unusable, keeping expired recovery point {}",
                                plugin_id,
                                backup.id
                            );
                            break;
                        }
                    }
                }
            }

            for (backup, keep) in backups.into_iter().zip(keep) {
                if keep {
                    report.retained.push(backup);
                    continue;
                }
                match self.discard(&backup).await {
                    Ok(()) => report.removed.push(backup),
                    Err(e) => {
                        tracing::warn!("[Backup] Failed to prune {}: {}", backup.id, e);
                        report.retained.push(backup);
                    }
                }
            }
        }

        if !report.removed.is_empty() {
            tracing::info!(
                "[Backup] Pruned {} backup(s), {} retained",
                report.removed.len(),
                report.retained.len()
            );
        }
        Ok(report)
    }
}

fn hash_path(backup_path: &Path) -> PathBuf {
    let mut name = backup_path.as_os_str().to_os_string();
    name.push(HASH_SUFFIX);
    PathBuf::from(name)
}

pub fn backup_file_name(plugin_id: &str, created_at: DateTime<Utc>, extension: &str) -> String {
    format!(
        "{}__{}.{}{}",
        plugin_id,
        created_at.format(TIMESTAMP_FORMAT),
        extension,
        BACKUP_SUFFIX
    )
}

/// `<plugin>__<timestamp>.<ext>.bak` → (plugin, created_at, ext)
pub fn parse_backup_file_name(name: &str) -> Option<(String, DateTime<Utc>, String)> {
    let stem = name.strip_suffix(BACKUP_SUFFIX)?;
    let (plugin_id, rest) = stem.rsplit_once("__")?;
    let (timestamp, extension) = rest.split_once('.')?;
    if plugin_id.is_empty() || extension.is_empty() {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some((plugin_id.to_string(), naive.and_utc(), extension.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Scanner;
    use std::io::{Cursor, Write};

    fn jar(version: &str) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("plugin.yml", zip::write::FileOptions::default()).unwrap();
            write!(zip, "name: Essentials\nversion: {}\n", version).unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    fn setup(version: &str) -> (tempfile::TempDir, BackupManager, Plugin) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("Essentials.jar");
        std::fs::write(&path, jar(version)).unwrap();
        let plugin = Scanner::new(&["jar".to_string()]).inspect(&path).unwrap();
        let manager = BackupManager::new(tmp.path(), Duration::from_secs(5));
        (tmp, manager, plugin)
    }

    #[test]
    fn file_name_round_trips() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T12:00:00.042Z").unwrap().with_timezone(&Utc);
        let name = backup_file_name("Essentials__Chat", at, "jar");
        assert_eq!(name, "Essentials__Chat__20240301T120000042Z.jar.bak");
        let (plugin, parsed, ext) = parse_backup_file_name(&name).unwrap();
        assert_eq!(plugin, "Essentials__Chat");
        assert_eq!(parsed, at);
        assert_eq!(ext, "jar");
        assert!(parse_backup_file_name("Essentials.jar").is_none());
        assert!(parse_backup_file_name("x__notatime.jar.bak").is_none());
    }

    #[tokio::test]
    async fn backup_is_verified_copy_with_sidecar() {
        let (_tmp, manager, plugin) = setup("2.3.1");
        let backup = manager.backup(&plugin).await.unwrap();

        assert_eq!(backup.content_hash, plugin.content_hash);
        assert!(backup.backup_path.exists());
        assert!(manager.verify(&backup).await);

        let listed = manager.list(&plugin.id).await.unwrap();
        assert_eq!(listed, vec![backup.clone()]);
        assert_eq!(manager.find(&backup.id).await.unwrap(), backup);
        assert!(manager.list("Other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restore_replaces_live_archive() {
        let (_tmp, manager, plugin) = setup("2.3.1");
        let backup = manager.backup(&plugin).await.unwrap();

        manager.atomic_write(&plugin.path, &jar("9.9.9")).await.unwrap();
        manager.restore(&backup).await.unwrap();

        let restored = std::fs::read(&plugin.path).unwrap();
        assert_eq!(sha256_hex(&restored), plugin.content_hash);
        // 임시 파일이 남지 않음
        let leftovers: Vec<_> = std::fs::read_dir(plugin.path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn corrupted_backup_is_not_restored() {
        let (_tmp, manager, plugin) = setup("2.3.1");
        let backup = manager.backup(&plugin).await.unwrap();
        std::fs::write(&backup.backup_path, b"garbage").unwrap();

        assert!(!manager.verify(&backup).await);
        let err = manager.restore(&backup).await.unwrap_err();
        assert!(matches!(err, UpdaterError::Backup { .. }));
        assert_eq!(sha256_hex(&std::fs::read(&plugin.path).unwrap()), plugin.content_hash);
    }

    #[tokio::test]
    async fn find_rejects_path_traversal() {
        let (_tmp, manager, _plugin) = setup("1.0.0");
        let err = manager.find("../Essentials.jar").await.unwrap_err();
        assert!(matches!(err, UpdaterError::BackupNotFound { .. }));
    }

    #[tokio::test]
    async fn prune_keeps_window_and_newest() {
        let (_tmp, manager, plugin) = setup("2.3.1");
        let now = Utc::now();
        for age in [1, 5, 10, 40] {
            manager
                .backup_at(&plugin, now - chrono::Duration::days(age))
                .await
                .unwrap();
        }

        let report = manager.prune_at(7, now).await.unwrap();
        assert_eq!(report.removed.len(), 2);

        let remaining = manager.list(&plugin.id).await.unwrap();
        let ages: Vec<i64> = remaining.iter().map(|b| (now - b.created_at).num_days()).collect();
        assert_eq!(ages, vec![1, 5]);
    }

    #[tokio::test]
    async fn prune_keeps_newest_when_all_expired() {
        let (_tmp, manager, plugin) = setup("2.3.1");
        let now = Utc::now();
        for age in [10, 40] {
            manager
                .backup_at(&plugin, now - chrono::Duration::days(age))
                .await
                .unwrap();
        }

        manager.prune_at(7, now).await.unwrap();
        let remaining = manager.list(&plugin.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!((now - remaining[0].created_at).num_days(), 10);
    }

    #[tokio::test]
    async fn prune_keeps_last_valid_point_when_live_is_corrupted() {
        let (_tmp, manager, plugin) = setup("2.3.1");
        let now = Utc::now();
        let older = manager
            .backup_at(&plugin, now - chrono::Duration::days(30))
            .await
            .unwrap();
        let newest = manager
            .backup_at(&plugin, now - chrono::Duration::days(20))
            .await
            .unwrap();
        // 최신 백업도 손상, 라이브도 손상
        std::fs::write(&newest.backup_path, b"broken").unwrap();
        std::fs::write(&plugin.path, b"broken").unwrap();

        let report = manager.prune_at(7, now).await.unwrap();
        assert!(report.removed.is_empty());
        let ids: Vec<_> = manager.list(&plugin.id).await.unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![newest.id, older.id]);
    }
}
