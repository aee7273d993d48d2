//! GitHub Release 어댑터
//!
//! 설정의 `[github.repos]`에 `owner/repo`가 매핑된 플러그인만 조회합니다.
//! 릴리스의 첫 번째 `.jar` 에셋을 사용하며, 같은 이름의 `.sha256` 에셋이 있으면
//! 체크섬으로 사용합니다.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::{parse_timestamp, ResolveRequest, SourceError, SourceHttp, VersionSource};
use crate::{Checksum, UpdateChannel, VersionInfo};

const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// GitHub Release 응답 (필요한 필드만)
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    pub prerelease: bool,
    pub draft: bool,
    pub published_at: Option<String>,
    pub assets: Vec<GitHubAsset>,
}

/// GitHub Release Asset
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl GitHubRelease {
    fn channel(&self) -> UpdateChannel {
        if self.prerelease {
            UpdateChannel::Beta
        } else {
            UpdateChannel::Stable
        }
    }

    fn jar_asset(&self) -> Option<&GitHubAsset> {
        self.assets
            .iter()
            .find(|a| a.name.to_ascii_lowercase().ends_with(".jar"))
    }

    fn checksum_asset(&self, jar: &GitHubAsset) -> Option<&GitHubAsset> {
        let wanted = format!("{}.sha256", jar.name);
        self.assets.iter().find(|a| a.name.eq_ignore_ascii_case(&wanted))
    }
}

pub struct GitHubSource {
    http: SourceHttp,
    base_url: String,
    /// 플러그인 이름 → "owner/repo"
    repos: HashMap<String, String>,
}

impl GitHubSource {
    pub fn new(http: SourceHttp, base_url: Option<&str>, repos: HashMap<String, String>) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            repos,
        }
    }

    fn repo_for(&self, request: &ResolveRequest) -> Option<&str> {
        self.repos
            .get(&request.plugin_id)
            .or_else(|| self.repos.get(&request.lookup_name))
            .map(String::as_str)
    }

    fn headers(request: &ResolveRequest) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Accept", "application/vnd.github+json".to_string())];
        if let Some(token) = &request.api_key {
            headers.push(("Authorization", format!("Bearer {}", token)));
        }
        headers
    }

    /// `<hash>  <file>` 또는 `<hash>` 형식.
    /// 에셋을 읽지 못하면 조회 전체가 Unavailable
    async fn fetch_checksum(
        &self,
        asset: &GitHubAsset,
        headers: &[(&'static str, String)],
    ) -> Result<Checksum, SourceError> {
        let body = self
            .http
            .get_text(&asset.browser_download_url, headers)
            .await
            .map_err(|e| {
                tracing::warn!("[GitHub] Could not fetch checksum asset {}: {}", asset.name, e);
                SourceError::Unavailable(format!("checksum asset {} unreadable: {}", asset.name, e))
            })?;
        parse_checksum(&body).ok_or_else(|| {
            tracing::warn!("[GitHub] Malformed checksum asset {}", asset.name);
            SourceError::Unavailable(format!("checksum asset {} is malformed", asset.name))
        })
    }
}

fn parse_checksum(body: &str) -> Option<Checksum> {
    let token = body.split_whitespace().next()?;
    if token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(Checksum::sha256(token))
    } else {
        None
    }
}

#[async_trait]
impl VersionSource for GitHubSource {
    fn id(&self) -> &'static str {
        "github"
    }

    async fn resolve_latest(&self, request: &ResolveRequest) -> Result<VersionInfo, SourceError> {
        let repo = self.repo_for(request).ok_or(SourceError::NotFound)?;
        let headers = Self::headers(request);
        let url = format!("{}/repos/{}/releases?per_page=10", self.base_url, repo);

        let releases: Vec<GitHubRelease> = self.http.get_json(&url, &headers).await?;

        // 최신 릴리스가 앞쪽
        let (release, jar) = releases
            .iter()
            .filter(|r| !r.draft && request.channel.admits(r.channel()))
            .find_map(|r| r.jar_asset().map(|jar| (r, jar)))
            .ok_or(SourceError::NotFound)?;

        let checksum = match release.checksum_asset(jar) {
            Some(asset) => Some(self.fetch_checksum(asset, &headers).await?),
            None => None,
        };

        Ok(VersionInfo {
            source: self.id().to_string(),
            latest_version: release.tag_name.clone(),
            download_url: jar.browser_download_url.clone(),
            checksum,
            channel: release.channel(),
            published_at: release.published_at.as_deref().and_then(parse_timestamp),
        })
    }
}
