// ログ初期化 - バイナリからのみ呼ぶ

use tracing_subscriber::EnvFilter;

/// RUST_LOG を優先し、未設定なら info（quiet 時は warn）で tracing を初期化する
pub fn init_logging(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .try_init();
}
