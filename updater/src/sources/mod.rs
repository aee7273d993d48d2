//! 버전 레지스트리 어댑터
//!
//! 각 레지스트리는 [`VersionSource`] 구현 하나로 표현됩니다.
//! 오케스트레이터와 리졸버는 구현 종류를 알지 못하며,
//! 새 레지스트리는 구현을 추가하고 [`build_sources`]에 등록하면 됩니다.

pub mod bukkit;
pub mod github;
pub mod modrinth;
pub mod spigot;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{RecoveryStrategy, UpdaterError};
use crate::{UpdateChannel, UpdateConfig, VersionInfo};

pub use bukkit::BukkitSource;
pub use github::GitHubSource;
pub use modrinth::ModrinthSource;
pub use spigot::SpigotSource;

/// 등록 가능한 어댑터 식별자
pub const KNOWN_SOURCES: &[&str] = &["modrinth", "spigot", "bukkit", "github"];

const USER_AGENT: &str = concat!("jarkeeper/", env!("CARGO_PKG_VERSION"));

/// 어댑터 조회 실패
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum SourceError {
    #[error("not found on source")]
    NotFound,
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("API key required")]
    AuthRequired,
}

impl SourceError {
    pub fn into_updater_error(self, source_id: &str, plugin: &str) -> UpdaterError {
        match self {
            SourceError::NotFound => UpdaterError::NotFoundOnSource {
                plugin: plugin.to_string(),
            },
            SourceError::Unavailable(message) => UpdaterError::SourceUnavailable {
                source_id: source_id.to_string(),
                message,
            },
            SourceError::AuthRequired => UpdaterError::AuthRequired {
                source_id: source_id.to_string(),
            },
        }
    }
}

/// 어댑터에 전달되는 조회 요청
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub plugin_id: String,
    /// 레지스트리 검색 키 (디스크립터 이름 우선)
    pub lookup_name: String,
    pub channel: UpdateChannel,
    pub api_key: Option<String>,
}

/// 버전 레지스트리 하나
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// 설정/로그/VersionInfo에 쓰이는 식별자
    fn id(&self) -> &'static str;

    /// 최신 버전 조회. 추측값을 반환하지 않는다: 실패는 항상 `SourceError`
    async fn resolve_latest(&self, request: &ResolveRequest) -> Result<VersionInfo, SourceError>;
}

// ══════════════════════════════════════════════════════
// 공용 HTTP
// ══════════════════════════════════════════════════════

/// 어댑터 공용 HTTP 클라이언트 (타임아웃 + 요청 단위 재시도)
#[derive(Clone)]
pub struct SourceHttp {
    client: reqwest::Client,
    timeout: Duration,
    retries: u32,
}

impl SourceHttp {
    pub fn new(timeout: Duration, retries: u32) -> Result<Self, UpdaterError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| UpdaterError::Internal {
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            timeout,
            retries,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<T, SourceError> {
        let body = self.get_text(url, headers).await?;
        serde_json::from_str(&body)
            .map_err(|e| SourceError::Unavailable(format!("invalid response from {}: {}", url, e)))
    }

    /// 재시도는 `Unavailable`에만 적용
    pub async fn get_text(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<String, SourceError> {
        let mut strategy = RecoveryStrategy::new(self.retries);
        loop {
            match self.get_once(url, headers).await {
                Err(SourceError::Unavailable(message)) if strategy.can_retry() => {
                    let delay = strategy.next_delay();
                    tracing::debug!(
                        "[Sources] GET {} failed ({}), retrying in {:?}",
                        url,
                        message,
                        delay
                    );
                    strategy.increment();
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn get_once(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<String, SourceError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;
            let status = response.status();
            match status.as_u16() {
                403 if is_rate_limited(response.headers()) => {
                    return Err(SourceError::Unavailable(format!("HTTP {} (rate limited)", status)))
                }
                401 | 403 => return Err(SourceError::AuthRequired),
                404 => return Err(SourceError::NotFound),
                _ if !status.is_success() => {
                    return Err(SourceError::Unavailable(format!("HTTP {}", status)))
                }
                _ => {}
            }
            response
                .text()
                .await
                .map_err(|e| SourceError::Unavailable(e.to_string()))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Unavailable(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// 익명 요청 한도 초과로 거부된 403 (인증 실패와 구분)
fn is_rate_limited(headers: &reqwest::header::HeaderMap) -> bool {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.trim() == "0");
    exhausted || headers.contains_key(reqwest::header::RETRY_AFTER)
}

/// 설정의 우선순위 순서대로 어댑터 생성
pub fn build_sources(config: &UpdateConfig) -> Result<Vec<Arc<dyn VersionSource>>, UpdaterError> {
    let http = SourceHttp::new(config.request_timeout(), config.request_retries)?;
    let mut sources: Vec<Arc<dyn VersionSource>> = Vec::new();

    for id in &config.source_priority {
        let base_url = config.base_url(id);
        let source: Arc<dyn VersionSource> = match id.as_str() {
            "modrinth" => Arc::new(ModrinthSource::new(http.clone(), base_url)),
            "spigot" => Arc::new(SpigotSource::new(http.clone(), base_url)),
            "bukkit" => Arc::new(BukkitSource::new(http.clone(), base_url)),
            "github" => Arc::new(GitHubSource::new(
                http.clone(),
                base_url,
                config.github_repos.clone(),
            )),
            other => {
                return Err(UpdaterError::Config {
                    message: format!("unknown source '{}'", other),
                })
            }
        };
        sources.push(source);
    }

    tracing::info!(
        "[Sources] Enabled: {}",
        sources.iter().map(|s| s.id()).collect::<Vec<_>>().join(", ")
    );
    Ok(sources)
}

/// URL 경로 세그먼트용 최소 인코딩
pub(crate) fn encode_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

pub(crate) fn parse_timestamp(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_sources_in_priority_order() {
        let mut config = UpdateConfig::default();
        config.source_priority = vec!["github".into(), "modrinth".into()];
        let sources = build_sources(&config).unwrap();
        let ids: Vec<_> = sources.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["github", "modrinth"]);
    }

    #[test]
    fn unknown_source_is_config_error() {
        let mut config = UpdateConfig::default();
        config.source_priority = vec!["hangar".into()];
        assert!(matches!(build_sources(&config), Err(UpdaterError::Config { .. })));
    }

    #[test]
    fn encodes_path_segments() {
        assert_eq!(encode_segment("World Edit"), "World%20Edit");
        assert_eq!(encode_segment("Vault"), "Vault");
    }

    #[test]
    fn detects_rate_limit_headers() {
        use reqwest::header::{HeaderMap, HeaderValue};

        let mut headers = HeaderMap::new();
        assert!(!is_rate_limited(&headers));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("12"));
        assert!(!is_rate_limited(&headers));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert!(is_rate_limited(&headers));

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("60"));
        assert!(is_rate_limited(&headers));
    }

    #[test]
    fn maps_source_errors() {
        let err = SourceError::AuthRequired.into_updater_error("bukkit", "WorldGuard");
        assert_eq!(err.error_code(), "AUTH_REQUIRED");
        let err = SourceError::NotFound.into_updater_error("spigot", "WorldGuard");
        assert_eq!(err.error_code(), "NOT_FOUND_ON_SOURCE");
    }
}
