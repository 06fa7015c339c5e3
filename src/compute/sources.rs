// タスクソース - 初期入力の決定的な生成

use super::model::ModelShape;
use crate::core::{TaskId, TaskSource};

/// タスク n の入力を全て n + 1 で埋める
#[derive(Debug, Clone, Copy)]
pub struct UniformInputSource {
    count: usize,
}

impl UniformInputSource {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl TaskSource for UniformInputSource {
    fn task_count(&self) -> usize {
        self.count
    }

    fn fill_input(&self, id: TaskId, buffer: &mut [f64]) {
        buffer.fill(id as f64 + 1.0);
    }
}

/// 全チャンネルの (1,1) に 9 * (id + 1) のスパイク、それ以外は 1.0
#[derive(Debug, Clone, Copy)]
pub struct SpikeInputSource {
    count: usize,
    size: usize,
    channels: usize,
}

impl SpikeInputSource {
    pub fn new(count: usize, shape: &ModelShape) -> Self {
        Self {
            count,
            size: shape.input_size,
            channels: shape.in_channels,
        }
    }
}

impl TaskSource for SpikeInputSource {
    fn task_count(&self) -> usize {
        self.count
    }

    fn fill_input(&self, id: TaskId, buffer: &mut [f64]) {
        buffer.fill(1.0);
        let plane = self.size * self.size;
        let spike = 9.0 * (id as f64 + 1.0);
        for c in 0..self.channels {
            if let Some(value) = buffer.get_mut(c * plane + self.size + 1) {
                *value = spike;
            }
        }
    }
}

/// クロージャで入力を生成するソース
pub struct FnTaskSource<F> {
    count: usize,
    fill: F,
}

impl<F> FnTaskSource<F>
where
    F: Fn(TaskId, &mut [f64]) + Send,
{
    pub fn new(count: usize, fill: F) -> Self {
        Self { count, fill }
    }
}

impl<F> TaskSource for FnTaskSource<F>
where
    F: Fn(TaskId, &mut [f64]) + Send,
{
    fn task_count(&self) -> usize {
        self.count
    }

    fn fill_input(&self, id: TaskId, buffer: &mut [f64]) {
        (self.fill)(id, buffer)
    }
}
