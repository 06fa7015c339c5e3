// 計算レイヤー - 各タスクに注入される CNN パイプライン
// エンジンは ComputePipeline トレイト越しにのみ利用する

pub mod layers;
pub mod model;
pub mod pipeline;
pub mod sources;

pub use model::{CnnModel, ModelShape};
pub use pipeline::{CnnPipeline, IdentityPipeline};
pub use sources::{FnTaskSource, SpikeInputSource, UniformInputSource};
