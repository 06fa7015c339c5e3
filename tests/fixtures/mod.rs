// 統合テスト用のパイプラインとタスクソース
// 入力の先頭要素にタスクIDを書き込み、特定IDでだけ故障させる

use cnn_pool::compute::FnTaskSource;
use cnn_pool::core::{ComputePipeline, PipelineError, PipelineOutput, TaskId};
use std::sync::Mutex;

/// フォークを伴うテストを直列化する
pub static FORK_LOCK: Mutex<()> = Mutex::new(());

/// 対象タスクでの振る舞い
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    None,
    /// パイプラインエラーを返す
    Fail(TaskId),
    /// ワーカースレッドをパニックさせる
    Panic(TaskId),
    /// プロセスごと即座に終了させる
    Abort(TaskId),
}

/// 入力を2倍して返すパイプライン
#[derive(Debug, Clone, Copy)]
pub struct TaggedPipeline {
    len: usize,
    fault: Fault,
}

impl TaggedPipeline {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            fault: Fault::None,
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = fault;
        self
    }
}

impl ComputePipeline for TaggedPipeline {
    fn input_len(&self) -> usize {
        self.len
    }

    fn output_len(&self) -> usize {
        self.len
    }

    fn execute(&self, input: &[f64]) -> Result<PipelineOutput, PipelineError> {
        let id = input[0] as TaskId;
        match self.fault {
            Fault::Fail(target) if target == id => {
                return Err(PipelineError::Failed {
                    message: format!("task {id} rejected"),
                })
            }
            Fault::Panic(target) if target == id => panic!("task {id} panicked"),
            Fault::Abort(target) if target == id => std::process::abort(),
            _ => {}
        }
        Ok(PipelineOutput {
            stage_outputs: Vec::new(),
            final_outputs: input.iter().map(|v| v * 2.0).collect(),
        })
    }
}

/// 入力 `[id, id + 1, ...]` を生成するソース
pub fn tagged_source(count: usize) -> FnTaskSource<fn(TaskId, &mut [f64])> {
    FnTaskSource::new(count, fill_tagged as fn(TaskId, &mut [f64]))
}

fn fill_tagged(id: TaskId, buffer: &mut [f64]) {
    for (offset, value) in buffer.iter_mut().enumerate() {
        *value = (id + offset) as f64;
    }
}

/// `tagged_source` の入力に対する期待出力
pub fn expected_doubled(id: TaskId, len: usize) -> Vec<f64> {
    (0..len).map(|offset| ((id + offset) * 2) as f64).collect()
}
