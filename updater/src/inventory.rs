//! 플러그인 폴더 스캐너
//!
//! 최상위 폴더의 아카이브만 대상으로 하며 하위 폴더(`.backups` 포함)는 무시합니다.
//! 스캔은 파일을 읽기만 하고 쓰지 않습니다.

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use zip::ZipArchive;

use crate::error::UpdaterError;
use crate::{Plugin, UNKNOWN_VERSION};

/// 버전/이름을 읽을 디스크립터 (앞쪽 우선)
const DESCRIPTOR_FILES: &[&str] = &["plugin.yml", "paper-plugin.yml", "bungee.yml"];

/// 디스크립터 최대 크기
const MAX_DESCRIPTOR_BYTES: u64 = 256 * 1024;

/// 아카이브에서 읽은 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    pub name: Option<String>,
    pub version: Option<String>,
}

pub struct Scanner {
    extensions: Vec<String>,
}

impl Scanner {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// 폴더를 스캔해 이름순으로 정렬된 플러그인 목록 반환
    pub fn scan(&self, dir: &Path) -> Result<Vec<Plugin>, UpdaterError> {
        if !dir.is_dir() {
            return Err(UpdaterError::DirectoryNotFound {
                path: dir.display().to_string(),
            });
        }
        let dir = dir
            .canonicalize()
            .map_err(|e| UpdaterError::from_io(&e, "canonicalize", dir))?;

        let entries = fs::read_dir(&dir).map_err(|e| UpdaterError::from_io(&e, "read_dir", &dir))?;

        let mut plugins = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("[Inventory] Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || !self.matches(&path) {
                continue;
            }

            match self.inspect(&path) {
                Ok(plugin) => {
                    tracing::debug!(
                        "[Inventory] Found {} v{} ({} bytes)",
                        plugin.name,
                        plugin.current_version,
                        plugin.size_bytes
                    );
                    plugins.push(plugin);
                }
                Err(e) => {
                    tracing::warn!("[Inventory] Failed to inspect {}: {}", path.display(), e);
                }
            }
        }

        if plugins.is_empty() {
            return Err(UpdaterError::NoArchives {
                path: dir.display().to_string(),
            });
        }

        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::info!("[Inventory] Scanned {}: {} plugin(s)", dir.display(), plugins.len());
        Ok(plugins)
    }

    /// 아카이브 하나를 읽어 Plugin 생성. 메타데이터 파싱 실패는 "Unknown"
    pub fn inspect(&self, path: &Path) -> Result<Plugin, UpdaterError> {
        let bytes = fs::read(path).map_err(|e| UpdaterError::from_io(&e, "read", path))?;
        let metadata = fs::metadata(path).map_err(|e| UpdaterError::from_io(&e, "metadata", path))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.clone());

        let descriptor = read_descriptor(&bytes).unwrap_or_default();
        if descriptor.version.is_none() {
            tracing::debug!("[Inventory] No readable version in {}", file_name);
        }

        let last_modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));

        Ok(Plugin {
            id: name.clone(),
            name,
            descriptor_name: descriptor.name,
            file_name,
            path: PathBuf::from(path),
            size_bytes: bytes.len() as u64,
            last_modified,
            current_version: descriptor.version.unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
            content_hash: sha256_hex(&bytes),
        })
    }

    fn matches(&self, path: &Path) -> bool {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        if hidden {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .map_or(false, |e| self.extensions.contains(&e))
    }
}

// ══════════════════════════════════════════════════════
// 디스크립터
// ══════════════════════════════════════════════════════

fn key_pattern(key: &str) -> Option<Regex> {
    // 들여쓰기 없는 최상위 키만
    Regex::new(&format!(r"(?m)^{}:[ \t]*(.*?)[ \t]*$", key)).ok()
}

fn name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| key_pattern("name")).as_ref()
}

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| key_pattern("version")).as_ref()
}

/// YAML 스칼라 정리: 주석, 따옴표 제거. 빌드 치환자(`${...}`)는 None
fn clean_scalar(raw: &str) -> Option<String> {
    let mut value = raw.trim();
    if let Some(stripped) = value.strip_prefix('"').and_then(|v| v.split('"').next()) {
        value = stripped;
    } else if let Some(stripped) = value.strip_prefix('\'').and_then(|v| v.split('\'').next()) {
        value = stripped;
    } else if let Some(idx) = value.find(" #") {
        value = &value[..idx];
    }
    let value = value.trim();
    if value.is_empty() || value.contains("${") {
        return None;
    }
    Some(value.to_string())
}

fn capture(pattern: Option<&Regex>, text: &str) -> Option<String> {
    pattern?
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| clean_scalar(m.as_str()))
}

pub fn parse_descriptor(text: &str) -> Descriptor {
    Descriptor {
        name: capture(name_pattern(), text),
        version: capture(version_pattern(), text),
    }
}

/// 아카이브 바이트에서 디스크립터 읽기. 아카이브가 아니면 None
pub fn read_descriptor(bytes: &[u8]) -> Option<Descriptor> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).ok()?;
    for file_name in DESCRIPTOR_FILES {
        let Ok(entry) = archive.by_name(file_name) else {
            continue;
        };
        let mut text = String::new();
        if entry.take(MAX_DESCRIPTOR_BYTES).read_to_string(&mut text).is_err() {
            continue;
        }
        let descriptor = parse_descriptor(&text);
        if descriptor.name.is_some() || descriptor.version.is_some() {
            return Some(descriptor);
        }
    }
    None
}

/// 아카이브를 zip으로 열고 모든 엔트리를 끝까지 읽을 수 있는지 (CRC 검증 포함)
pub fn is_intact_bytes(bytes: &[u8]) -> bool {
    let Ok(mut archive) = ZipArchive::new(Cursor::new(bytes)) else {
        return false;
    };
    if archive.len() == 0 {
        return false;
    }
    for i in 0..archive.len() {
        let Ok(mut entry) = archive.by_index(i) else {
            return false;
        };
        if std::io::copy(&mut entry, &mut std::io::sink()).is_err() {
            return false;
        }
    }
    true
}

pub fn is_intact(path: &Path) -> bool {
    fs::read(path).map(|bytes| is_intact_bytes(&bytes)).unwrap_or(false)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
