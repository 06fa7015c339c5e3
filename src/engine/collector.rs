// Collector - 結果収集と進捗報告
// ワーカーからの結果をシンクへ転送する。受信順は完了順であり ID 順ではない

use crate::core::{EngineError, EngineResult, ProgressReporter, ResultSink, TaskOutcome};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// コレクターの集計
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectorStats {
    pub received: usize,
    pub errors: usize,
}

/// 結果を順に受け取り、シンクと進捗報告へ転送する
///
/// シンクの失敗後も残りの結果は受け取り続け、最初のエラーを最後に返す。
pub fn drain_outcomes<I, R, K>(
    outcomes: I,
    total: usize,
    reporter: &R,
    sink: &K,
    report_progress: bool,
) -> EngineResult<CollectorStats>
where
    I: IntoIterator<Item = TaskOutcome>,
    R: ProgressReporter + ?Sized,
    K: ResultSink + ?Sized,
{
    let mut stats = CollectorStats::default();
    let mut first_failure: Option<anyhow::Error> = None;

    for outcome in outcomes {
        stats.received += 1;
        if let Some(error) = &outcome.error {
            stats.errors += 1;
            reporter.report_error(outcome.task_id, error);
        }

        if let Err(e) = sink.emit(outcome) {
            tracing::warn!(error = %e, "result sink rejected outcome");
            first_failure.get_or_insert(e);
        }

        if report_progress {
            reporter.report_progress(stats.received, total);
        }
    }

    match first_failure {
        Some(e) => Err(EngineError::sink(e)),
        None => Ok(stats),
    }
}

/// Collector を専用スレッドで起動
///
/// 全ての送信側が破棄されるとチャンネルが閉じ、スレッドは終了する。
pub fn spawn_result_collector<R, K>(
    result_rx: Receiver<TaskOutcome>,
    total: usize,
    reporter: Arc<R>,
    sink: Arc<K>,
    report_progress: bool,
) -> EngineResult<JoinHandle<EngineResult<CollectorStats>>>
where
    R: ProgressReporter + ?Sized + 'static,
    K: ResultSink + ?Sized + 'static,
{
    thread::Builder::new()
        .name("collector".to_string())
        .spawn(move || {
            drain_outcomes(
                result_rx,
                total,
                reporter.as_ref(),
                sink.as_ref(),
                report_progress,
            )
        })
        .map_err(|e| EngineError::spawn("result collector", e))
}
