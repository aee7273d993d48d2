//! Modrinth v2 API 어댑터
//!
//! `GET /v2/project/{slug}/version`: 최신 버전이 앞쪽에 옵니다.
//! 익명 접근 가능, 키가 있으면 `Authorization` 헤더로 전달합니다.

use async_trait::async_trait;
use serde::Deserialize;

use super::{encode_segment, parse_timestamp, ResolveRequest, SourceError, SourceHttp, VersionSource};
use crate::{Checksum, UpdateChannel, VersionInfo};

const DEFAULT_BASE_URL: &str = "https://api.modrinth.com";

/// 서버 플러그인 로더 (모드 로더 버전은 제외)
const PLUGIN_LOADERS: &[&str] = &["bukkit", "spigot", "paper", "purpur", "folia", "bungeecord", "velocity"];

#[derive(Debug, Deserialize)]
struct ModrinthVersion {
    version_number: String,
    version_type: String,
    #[serde(default)]
    date_published: Option<String>,
    #[serde(default)]
    loaders: Vec<String>,
    files: Vec<ModrinthFile>,
}

#[derive(Debug, Deserialize)]
struct ModrinthFile {
    url: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    hashes: ModrinthHashes,
}

#[derive(Debug, Default, Deserialize)]
struct ModrinthHashes {
    sha512: Option<String>,
}

pub struct ModrinthSource {
    http: SourceHttp,
    base_url: String,
}

impl ModrinthSource {
    pub fn new(http: SourceHttp, base_url: Option<&str>) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
        }
    }

    fn slug(name: &str) -> String {
        name.trim().to_lowercase().replace(' ', "-")
    }
}

fn channel_of(version_type: &str) -> UpdateChannel {
    if version_type == "release" {
        UpdateChannel::Stable
    } else {
        UpdateChannel::Beta
    }
}

#[async_trait]
impl VersionSource for ModrinthSource {
    fn id(&self) -> &'static str {
        "modrinth"
    }

    async fn resolve_latest(&self, request: &ResolveRequest) -> Result<VersionInfo, SourceError> {
        let url = format!(
            "{}/v2/project/{}/version",
            self.base_url,
            encode_segment(&Self::slug(&request.lookup_name))
        );
        let mut headers = Vec::new();
        if let Some(key) = &request.api_key {
            headers.push(("Authorization", key.clone()));
        }

        let versions: Vec<ModrinthVersion> = self.http.get_json(&url, &headers).await?;

        let version = versions
            .into_iter()
            .filter(|v| {
                v.loaders.is_empty()
                    || v.loaders.iter().any(|l| PLUGIN_LOADERS.contains(&l.as_str()))
            })
            .find(|v| request.channel.admits(channel_of(&v.version_type)))
            .ok_or(SourceError::NotFound)?;

        let channel = channel_of(&version.version_type);
        let published_at = version.date_published.as_deref().and_then(parse_timestamp);
        let mut files = version.files;
        let index = files.iter().position(|f| f.primary).unwrap_or(0);
        if files.is_empty() {
            return Err(SourceError::NotFound);
        }
        let file = files.swap_remove(index);

        Ok(VersionInfo {
            source: self.id().to_string(),
            latest_version: version.version_number,
            download_url: file.url,
            checksum: file.hashes.sha512.map(Checksum::sha512),
            channel,
            published_at,
        })
    }
}
