//! 버전 비교 및 후보 결정
//!
//! 플러그인 버전은 SemVer를 따르지 않는 경우가 많습니다 (`2.20.1-dev+45`, `v5.4`, `1.19-R0.1`).
//! 점으로 구분된 필드를 하나씩 비교하되, 양쪽이 모두 정수이면 숫자로,
//! 아니면 문자열로 비교합니다.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sources::SourceError;
use crate::{Plugin, VersionInfo};

/// 느슨한 버전 (dotted fields[-prerelease][+build])
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    fields: Vec<String>,
    prerelease: Option<Vec<String>>,
}

impl Version {
    /// "v1.2.3", "1.10", "2.0.0-beta.1", "5.4.102+build.7" 형식을 파싱.
    /// 빈 문자열과 "Unknown"은 None
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(crate::UNKNOWN_VERSION) {
            return None;
        }

        let mut body = trimmed;
        if let Some(rest) = body.strip_prefix(['v', 'V']) {
            if rest.starts_with(|c: char| c.is_ascii_digit()) {
                body = rest;
            }
        }
        // 빌드 메타데이터는 비교에 쓰지 않음
        if let Some(idx) = body.find('+') {
            body = &body[..idx];
        }

        let (core, prerelease) = match body.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (body, None),
        };
        if core.is_empty() {
            return None;
        }

        let fields = core.split('.').map(|f| f.trim().to_string()).collect();
        let prerelease = prerelease
            .filter(|p| !p.is_empty())
            .map(|p| p.split('.').map(|f| f.to_string()).collect());

        Some(Self {
            raw: trimmed.to_string(),
            fields,
            prerelease,
        })
    }

    /// 현재 버전보다 새로운 버전인지 확인
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self > other
    }

    /// 프리릴리스 여부
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn compare_field(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// 길이가 다르면 부족한 필드를 "0"으로 채워 비교
fn compare_fields(a: &[String], b: &[String]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).map(String::as_str).unwrap_or("0");
        let right = b.get(i).map(String::as_str).unwrap_or("0");
        match compare_field(left, right) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    Ordering::Equal
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match compare_fields(&self.fields, &other.fields) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // 프리릴리스가 있으면 정식 릴리스보다 낮음
        match (&self.prerelease, &other.prerelease) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => compare_fields(a, b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// `latest`가 `current`보다 새로운지.
/// 현재 버전을 알 수 없으면 파싱 가능한 최신 버전은 모두 업데이트로 취급
pub fn compare_versions(latest: &str, current: &str) -> bool {
    let Some(latest) = Version::parse(latest) else {
        return false;
    };
    match Version::parse(current) {
        Some(current) => latest.is_newer_than(&current),
        None => true,
    }
}

// ══════════════════════════════════════════════════════
// 후보 결정
// ══════════════════════════════════════════════════════

/// 여러 레지스트리가 서로 다른 최신 버전을 보고했을 때의 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// 가장 높은 버전 (동률이면 우선순위가 높은 소스)
    #[default]
    HighestVersion,
    /// 우선순위가 가장 높은 소스의 결과
    SourcePriority,
}

impl ConflictPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "highest_version" => Some(ConflictPolicy::HighestVersion),
            "source_priority" => Some(ConflictPolicy::SourcePriority),
            _ => None,
        }
    }
}

/// 어댑터 하나의 조회 결과
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: String,
    pub result: Result<VersionInfo, SourceError>,
}

/// 플러그인 하나에 대한 판정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    UpToDate {
        latest_version: Option<String>,
    },
    UpdateAvailable {
        latest_version: String,
        source: String,
        info: VersionInfo,
    },
    /// 모든 소스가 실패. UpToDate와 구분해서 보고해야 함
    Unresolved {
        reasons: Vec<String>,
    },
}

impl Resolution {
    pub fn latest_version(&self) -> Option<&str> {
        match self {
            Resolution::UpToDate { latest_version } => latest_version.as_deref(),
            Resolution::UpdateAvailable { latest_version, .. } => Some(latest_version),
            Resolution::Unresolved { .. } => None,
        }
    }
}

fn priority_rank(priority: &[String], source: &str) -> usize {
    priority
        .iter()
        .position(|p| p == source)
        .unwrap_or(priority.len())
}

/// 후보 목록에서 플러그인의 판정을 내림
pub fn resolve(
    plugin: &Plugin,
    reports: &[SourceReport],
    policy: ConflictPolicy,
    priority: &[String],
) -> Resolution {
    let mut reasons = Vec::new();
    let mut candidates: Vec<(usize, Version, &VersionInfo)> = Vec::new();

    for report in reports {
        match &report.result {
            Ok(info) => match Version::parse(&info.latest_version) {
                Some(version) => {
                    candidates.push((priority_rank(priority, &report.source), version, info))
                }
                None => reasons.push(format!(
                    "{}: unparsable version '{}'",
                    report.source, info.latest_version
                )),
            },
            Err(e) => reasons.push(format!("{}: {}", report.source, e)),
        }
    }

    // 안정 정렬: 우선순위가 같으면 입력 순서 유지
    candidates.sort_by_key(|(rank, _, _)| *rank);

    let winner = match policy {
        ConflictPolicy::SourcePriority => candidates.first(),
        ConflictPolicy::HighestVersion => candidates.iter().fold(None, |best, candidate| match best {
            None => Some(candidate),
            Some(current) if candidate.1 > current.1 => Some(candidate),
            Some(current) => Some(current),
        }),
    };

    let Some((_, latest, info)) = winner else {
        tracing::debug!("[Resolver] {} unresolved: {:?}", plugin.id, reasons);
        return Resolution::Unresolved { reasons };
    };

    let newer = match Version::parse(&plugin.current_version) {
        Some(current) => latest.is_newer_than(&current),
        None => true,
    };

    if newer {
        Resolution::UpdateAvailable {
            latest_version: info.latest_version.clone(),
            source: info.source.clone(),
            info: (*info).clone(),
        }
    } else {
        Resolution::UpToDate {
            latest_version: Some(info.latest_version.clone()),
        }
    }
}
