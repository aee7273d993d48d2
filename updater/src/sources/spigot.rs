//! SpigotMC 리소스 어댑터 (Spiget API)
//!
//! 이름으로 리소스를 검색한 뒤 최신 버전을 조회합니다.
//! 익명 전용이며 체크섬은 제공되지 않습니다.

use async_trait::async_trait;
use serde::Deserialize;

use super::{encode_segment, ResolveRequest, SourceError, SourceHttp, VersionSource};
use crate::{UpdateChannel, VersionInfo};

const DEFAULT_BASE_URL: &str = "https://api.spiget.org";

#[derive(Debug, Deserialize)]
struct SpigetResource {
    id: u64,
    name: String,
    #[serde(default)]
    premium: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpigetVersion {
    name: String,
    #[serde(default)]
    release_date: Option<i64>,
}

pub struct SpigotSource {
    http: SourceHttp,
    base_url: String,
}

impl SpigotSource {
    pub fn new(http: SourceHttp, base_url: Option<&str>) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
        }
    }

    /// 이름이 정확히 일치하는 무료 리소스만. 비슷한 이름은 다른 플러그인
    fn pick(resources: Vec<SpigetResource>, name: &str) -> Option<SpigetResource> {
        let name = name.trim();
        resources
            .into_iter()
            .find(|r| !r.premium && r.name.trim().eq_ignore_ascii_case(name))
    }
}

#[async_trait]
impl VersionSource for SpigotSource {
    fn id(&self) -> &'static str {
        "spigot"
    }

    async fn resolve_latest(&self, request: &ResolveRequest) -> Result<VersionInfo, SourceError> {
        let search_url = format!(
            "{}/v2/search/resources/{}?field=name&size=10",
            self.base_url,
            encode_segment(&request.lookup_name)
        );
        let resources: Vec<SpigetResource> = self.http.get_json(&search_url, &[]).await?;
        let resource = Self::pick(resources, &request.lookup_name).ok_or(SourceError::NotFound)?;

        let latest_url = format!("{}/v2/resources/{}/versions/latest", self.base_url, resource.id);
        let version: SpigetVersion = self.http.get_json(&latest_url, &[]).await?;

        Ok(VersionInfo {
            source: self.id().to_string(),
            latest_version: version.name,
            download_url: format!("{}/v2/resources/{}/download", self.base_url, resource.id),
            checksum: None,
            channel: UpdateChannel::Stable,
            published_at: version
                .release_date
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)),
        })
    }
}
