// 設定管理
// エンジン設定の具象実装と検証

pub mod implementations;

// 公開API
pub use implementations::{validate, DefaultEngineConfig};
