// 結果シンクの具象実装

use crate::core::{ResultSink, TaskId, TaskOutcome};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// ログ出力する最終出力の先頭要素数
const SAMPLE_LEN: usize = 5;

fn lock_poisoned() -> anyhow::Error {
    anyhow::anyhow!("結果バッファのロックが汚染されています")
}

/// メモリ内保存のシンク実装（テスト用および開発用）
#[derive(Debug, Clone, Default)]
pub struct MemoryResultSink {
    outcomes: Arc<Mutex<Vec<TaskOutcome>>>,
    finalized: Arc<Mutex<bool>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 受信順の結果
    pub fn outcomes(&self) -> Vec<TaskOutcome> {
        self.outcomes
            .lock()
            .map(|outcomes| outcomes.clone())
            .unwrap_or_default()
    }

    /// テスト用：ID 順にソートした結果
    pub fn sorted_outcomes(&self) -> Vec<TaskOutcome> {
        let mut outcomes = self.outcomes();
        outcomes.sort_by_key(|o| o.task_id);
        outcomes
    }

    /// テスト用：ID 順のタスクID一覧
    pub fn sorted_task_ids(&self) -> Vec<TaskId> {
        self.sorted_outcomes().iter().map(|o| o.task_id).collect()
    }

    /// テスト用：エラー付き結果の数
    pub fn error_count(&self) -> usize {
        self.outcomes().iter().filter(|o| o.is_error()).count()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// テスト用：完了状態を確認
    pub fn is_finalized(&self) -> bool {
        self.finalized.lock().map(|f| *f).unwrap_or(false)
    }
}

impl ResultSink for MemoryResultSink {
    fn emit(&self, outcome: TaskOutcome) -> Result<()> {
        self.outcomes
            .lock()
            .map_err(|_| lock_poisoned())?
            .push(outcome);
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        *self.finalized.lock().map_err(|_| lock_poisoned())? = true;
        Ok(())
    }
}

/// 実行情報
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub timestamp: String,
    pub total_outcomes: usize,
    pub error_count: usize,
}

/// JSON 出力フォーマット
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_info: RunInfo,
    pub outcomes: Vec<TaskOutcome>,
}

/// JSON形式でのシンク実装
///
/// 結果はメモリに溜め、finalize で ID 順に1つのドキュメントとして書き出す。
pub struct JsonResultSink {
    file_path: PathBuf,
    buffer: Mutex<Vec<TaskOutcome>>,
}

impl JsonResultSink {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl ResultSink for JsonResultSink {
    fn emit(&self, outcome: TaskOutcome) -> Result<()> {
        self.buffer
            .lock()
            .map_err(|_| lock_poisoned())?
            .push(outcome);
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        let mut outcomes = std::mem::take(&mut *self.buffer.lock().map_err(|_| lock_poisoned())?);
        outcomes.sort_by_key(|o| o.task_id);

        let report = RunReport {
            run_info: RunInfo {
                timestamp: chrono::Utc::now().to_rfc3339(),
                total_outcomes: outcomes.len(),
                error_count: outcomes.iter().filter(|o| o.is_error()).count(),
            },
            outcomes,
        };

        // 親ディレクトリが存在しない場合は作成
        if let Some(parent) = self.file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("ディレクトリ作成エラー: {}", parent.display()))?;
        }

        let file = File::create(&self.file_path)
            .with_context(|| format!("ファイル作成エラー: {}", self.file_path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &report).context("JSON変換エラー")?;
        writer.flush().context("フラッシュエラー")?;

        tracing::info!(
            path = %self.file_path.display(),
            outcomes = report.run_info.total_outcomes,
            "results written"
        );
        Ok(())
    }
}

/// 結果ごとに最終出力の先頭要素を tracing で出すシンク
#[derive(Debug, Default, Clone)]
pub struct LogResultSink;

impl LogResultSink {
    pub fn new() -> Self {
        Self
    }
}

impl ResultSink for LogResultSink {
    fn emit(&self, outcome: TaskOutcome) -> Result<()> {
        match &outcome.error {
            Some(error) => tracing::warn!(
                task_id = outcome.task_id,
                worker = %outcome.worker_id,
                error = %error,
                "task result"
            ),
            None => {
                let sample = &outcome.final_outputs[..outcome.final_outputs.len().min(SAMPLE_LEN)];
                tracing::info!(
                    task_id = outcome.task_id,
                    worker = %outcome.worker_id,
                    ?sample,
                    "task result"
                );
            }
        }
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        Ok(())
    }
}
