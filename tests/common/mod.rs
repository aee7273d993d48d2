//! 통합 테스트 공용 픽스처: Mock 레지스트리 서버, 테스트용 jar 생성

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;

use axum::Router;
use jarkeeper_updater_lib::{Checksum, UpdateConfig};

/// `plugin.yml`을 담은 최소 jar
pub fn jar(name: &str, version: &str) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = zip::write::FileOptions::default();
        zip.start_file("plugin.yml", options).unwrap();
        write!(zip, "name: {}\nversion: {}\nmain: com.example.{}\n", name, version, name).unwrap();
        zip.start_file("com/example/Main.class", options).unwrap();
        zip.write_all(b"\xCA\xFE\xBA\xBE").unwrap();
        zip.finish().unwrap();
    }
    buf.into_inner()
}

pub fn sha256(bytes: &[u8]) -> String {
    Checksum::sha256("").digest(bytes)
}

pub fn sha512(bytes: &[u8]) -> String {
    Checksum::sha512("").digest(bytes)
}

/// 임의 포트에 Mock 서버를 띄우고 base URL 반환.
/// 라우터 생성 시 자기 base URL을 알 수 있도록 클로저로 받는다.
pub async fn serve(build: impl FnOnce(String) -> Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = build(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

/// 빠른 테스트용 설정 (재시도 없음, 짧은 타임아웃)
pub fn config(dir: &Path, sources: &[&str]) -> UpdateConfig {
    UpdateConfig {
        plugins_dir: dir.to_path_buf(),
        source_priority: sources.iter().map(|s| s.to_string()).collect(),
        request_timeout_secs: 5,
        download_timeout_secs: 10,
        io_timeout_secs: 5,
        request_retries: 0,
        ..UpdateConfig::default()
    }
}
