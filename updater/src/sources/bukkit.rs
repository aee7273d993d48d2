//! BukkitDev ServerMods API 어댑터
//!
//! API 키(`X-API-Key`)가 반드시 필요합니다. 키가 없으면 네트워크 요청 없이
//! `AuthRequired`를 반환합니다. 파일 목록은 오래된 순서이므로 뒤에서부터 찾습니다.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use super::{ResolveRequest, SourceError, SourceHttp, VersionSource};
use crate::{UpdateChannel, VersionInfo};

const DEFAULT_BASE_URL: &str = "https://servermods.forgesvc.net";

#[derive(Debug, Deserialize)]
struct ServerModsProject {
    id: u64,
    name: String,
    #[serde(default)]
    slug: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerModsFile {
    name: String,
    download_url: String,
    release_type: String,
}

pub struct BukkitSource {
    http: SourceHttp,
    base_url: String,
}

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)v?(\d+(?:\.[0-9a-z]+)+(?:-[0-9a-z.]+)?)").ok())
        .as_ref()
}

/// 파일 제목("WorldEdit 7.2.15", "Vault v1.7.3-b131")에서 버전 추출
fn extract_version(title: &str) -> String {
    version_pattern()
        .and_then(|re| re.captures(title))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| title.trim().to_string())
}

/// slug 또는 프로젝트 이름이 정확히 일치해야 함 (`needle`은 소문자)
fn matches_project(project: &ServerModsProject, needle: &str) -> bool {
    project.slug.eq_ignore_ascii_case(needle) || project.name.trim().eq_ignore_ascii_case(needle)
}

fn channel_of(release_type: &str) -> UpdateChannel {
    if release_type.eq_ignore_ascii_case("release") {
        UpdateChannel::Stable
    } else {
        UpdateChannel::Beta
    }
}

impl BukkitSource {
    pub fn new(http: SourceHttp, base_url: Option<&str>) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl VersionSource for BukkitSource {
    fn id(&self) -> &'static str {
        "bukkit"
    }

    async fn resolve_latest(&self, request: &ResolveRequest) -> Result<VersionInfo, SourceError> {
        let key = request.api_key.clone().ok_or(SourceError::AuthRequired)?;
        let headers = [("X-API-Key", key)];

        let needle = request.lookup_name.trim().to_lowercase();
        let search_url = reqwest::Url::parse_with_params(
            &format!("{}/servermods/projects", self.base_url),
            &[("search", needle.as_str())],
        )
        .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        let projects: Vec<ServerModsProject> = self.http.get_json(search_url.as_str(), &headers).await?;

        let project = projects
            .iter()
            .find(|p| matches_project(p, &needle))
            .ok_or(SourceError::NotFound)?;

        let files_url = format!("{}/servermods/files?projectIds={}", self.base_url, project.id);
        let files: Vec<ServerModsFile> = self.http.get_json(&files_url, &headers).await?;

        let file = files
            .into_iter()
            .rev()
            .find(|f| request.channel.admits(channel_of(&f.release_type)))
            .ok_or(SourceError::NotFound)?;

        Ok(VersionInfo {
            source: self.id().to_string(),
            latest_version: extract_version(&file.name),
            download_url: file.download_url,
            checksum: None,
            channel: channel_of(&file.release_type),
            published_at: None,
        })
    }
}
