// Task Pool - 総タスク数分を事前確保したタスク領域
// キューにはインデックスのみが流れ、タスク本体はここに留まる

use crate::core::{
    EngineError, EngineResult, PipelineError, PipelineOutput, Task, TaskId, TaskSource,
    TaskState,
};
use std::sync::{Mutex, MutexGuard};

/// 事前確保されたタスクプール（スレッドモード用）
#[derive(Debug)]
pub struct TaskPool {
    slots: Vec<Mutex<Task>>,
}

impl TaskPool {
    /// `count` 件のタスクを入力バッファ込みで確保
    pub fn new(count: usize, input_len: usize) -> Self {
        let slots = (0..count)
            .map(|id| Mutex::new(Task::new(id, input_len)))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, id: TaskId) -> EngineResult<MutexGuard<'_, Task>> {
        self.slots
            .get(id)
            .ok_or_else(|| EngineError::task_state(id, "タスクプール範囲外"))?
            .lock()
            .map_err(|_| EngineError::PoisonedError { what: "task slot" })
    }

    /// プロデューサーによる入力の初期化（Pending のタスクのみ）
    pub fn initialize<S>(&self, id: TaskId, source: &S) -> EngineResult<()>
    where
        S: TaskSource + ?Sized,
    {
        let mut task = self.slot(id)?;
        if task.state != TaskState::Pending {
            return Err(EngineError::task_state(id, "初期化は Pending のみ可能"));
        }
        source.fill_input(id, &mut task.input);
        Ok(())
    }

    /// Pending -> InProgress。このリースを持つワーカーだけがタスクを変更できる
    pub fn claim(&self, id: TaskId) -> EngineResult<TaskLease<'_>> {
        let mut task = self.slot(id)?;
        if task.state != TaskState::Pending {
            return Err(EngineError::task_state(
                id,
                format!("二重取得: 状態 {:?}", task.state),
            ));
        }
        task.state = TaskState::InProgress;
        Ok(TaskLease { task })
    }

    /// タスクの読み取り用コピー
    pub fn snapshot(&self, id: TaskId) -> EngineResult<Task> {
        Ok(self.slot(id)?.clone())
    }

    /// Done に到達していないタスクID一覧
    pub fn unfinished(&self) -> Vec<TaskId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.lock()
                    .map(|task| task.state != TaskState::Done)
                    .unwrap_or(true)
            })
            .map(|(id, _)| id)
            .collect()
    }
}

/// InProgress 中のタスクへの排他アクセス
pub struct TaskLease<'a> {
    task: MutexGuard<'a, Task>,
}

impl TaskLease<'_> {
    pub fn id(&self) -> TaskId {
        self.task.id
    }

    pub fn input(&self) -> &[f64] {
        &self.task.input
    }

    /// InProgress -> Done。パイプラインの結果を書き込み、最終出力とエラーを返す
    pub fn complete(
        mut self,
        result: Result<PipelineOutput, PipelineError>,
    ) -> (Vec<f64>, Option<String>) {
        match result {
            Ok(output) => {
                self.task.stage_outputs = output.stage_outputs;
                self.task.final_outputs = output.final_outputs;
                self.task.error = None;
            }
            Err(error) => {
                self.task.error = Some(error.to_string());
            }
        }
        self.task.state = TaskState::Done;
        (self.task.final_outputs.clone(), self.task.error.clone())
    }
}
