//! jarkeeper 데몬/CLI
//!
//! 업데이터 라이브러리(`jarkeeper-updater-lib`) 위에 설정 로딩, IPC API, CLI를 얹습니다.

pub mod cli;
pub mod config;
pub mod ipc;
