// CNN モデル形状とパラメータ

use crate::core::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// conv(3x3) -> relu -> maxpool(2x2) -> flatten -> fc1 -> fc2 の形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelShape {
    /// 入力の一辺
    pub input_size: usize,
    pub in_channels: usize,
    pub filters: usize,
    pub fc1_size: usize,
    pub fc2_size: usize,
}

impl Default for ModelShape {
    fn default() -> Self {
        Self {
            input_size: 128,
            in_channels: 3,
            filters: 16,
            fc1_size: 128,
            fc2_size: 20,
        }
    }
}

impl ModelShape {
    /// 入力サイズのみ変更した形状
    pub fn with_input_size(mut self, input_size: usize) -> Self {
        self.input_size = input_size;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.input_size < 4 {
            return Err(EngineError::configuration(
                "入力サイズは4以上である必要があります",
            ));
        }
        if self.in_channels == 0 || self.filters == 0 || self.fc1_size == 0 || self.fc2_size == 0
        {
            return Err(EngineError::configuration(
                "チャンネル数・フィルター数・全結合層サイズは1以上である必要があります",
            ));
        }
        Ok(())
    }

    /// 畳み込み後の一辺
    pub fn valid_size(&self) -> usize {
        self.input_size - 2
    }

    /// プーリング後の一辺
    pub fn pool_size(&self) -> usize {
        self.valid_size() / 2
    }

    pub fn input_len(&self) -> usize {
        self.in_channels * self.input_size * self.input_size
    }

    pub fn conv_len(&self) -> usize {
        self.filters * self.valid_size() * self.valid_size()
    }

    pub fn flatten_len(&self) -> usize {
        self.filters * self.pool_size() * self.pool_size()
    }
}

/// 構築後は読み取り専用のモデルパラメータ
#[derive(Debug, Clone)]
pub struct CnnModel {
    shape: ModelShape,
    /// [filter][channel][ki][kj]
    conv_weights: Vec<f64>,
    /// [flatten_len][fc1_size]
    fc1_weights: Vec<f64>,
    fc1_bias: Vec<f64>,
    /// [fc1_size][fc2_size]
    fc2_weights: Vec<f64>,
    fc2_bias: Vec<f64>,
}

impl CnnModel {
    /// 決定的なパターンで初期化したモデル
    ///
    /// 重みは偶数行が 0.5、奇数行が 0.0。バイアスは偶数列が 0.5。
    pub fn patterned(shape: ModelShape) -> EngineResult<Self> {
        shape.validate()?;
        let row_pattern = |row: usize| if row % 2 == 0 { 0.5 } else { 0.0 };

        let conv_weights = (0..shape.filters * shape.in_channels)
            .flat_map(|_| (0..3).flat_map(move |ki| [row_pattern(ki); 3]))
            .collect();
        let dense = |inputs: usize, outputs: usize| -> Vec<f64> {
            (0..inputs)
                .flat_map(|i| std::iter::repeat(row_pattern(i)).take(outputs))
                .collect()
        };
        let bias = |outputs: usize| -> Vec<f64> { (0..outputs).map(row_pattern).collect() };

        Ok(Self {
            shape,
            conv_weights,
            fc1_weights: dense(shape.flatten_len(), shape.fc1_size),
            fc1_bias: bias(shape.fc1_size),
            fc2_weights: dense(shape.fc1_size, shape.fc2_size),
            fc2_bias: bias(shape.fc2_size),
        })
    }

    pub fn shape(&self) -> &ModelShape {
        &self.shape
    }

    pub fn conv_weights(&self) -> &[f64] {
        &self.conv_weights
    }

    pub fn fc1(&self) -> (&[f64], &[f64]) {
        (&self.fc1_weights, &self.fc1_bias)
    }

    pub fn fc2(&self) -> (&[f64], &[f64]) {
        (&self.fc2_weights, &self.fc2_bias)
    }

    /// パラメータの総要素数
    pub fn parameter_count(&self) -> usize {
        self.conv_weights.len()
            + self.fc1_weights.len()
            + self.fc1_bias.len()
            + self.fc2_weights.len()
            + self.fc2_bias.len()
    }
}
