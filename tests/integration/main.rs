// 統合テスト - 公開APIのみを使ったエンドツーエンドシナリオ

#[path = "../fixtures/mod.rs"]
mod fixtures;

#[cfg(unix)]
mod process_scenarios;
mod thread_scenarios;
