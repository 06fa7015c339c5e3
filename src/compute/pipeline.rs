// 計算パイプライン実装

use super::layers;
use super::model::{CnnModel, ModelShape};
use crate::core::{ComputePipeline, EngineResult, PipelineError, PipelineOutput};

/// スクラッチバッファの確保。失敗はタスク単位のエラーとして返す
fn scratch(elements: usize) -> Result<Vec<f64>, PipelineError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(elements)
        .map_err(|_| PipelineError::Allocation { elements })?;
    buffer.resize(elements, 0.0);
    Ok(buffer)
}

fn check_len(expected: usize, input: &[f64]) -> Result<(), PipelineError> {
    if input.len() == expected {
        Ok(())
    } else {
        Err(PipelineError::ShapeMismatch {
            expected,
            actual: input.len(),
        })
    }
}

/// conv -> relu -> maxpool -> flatten -> fc1 -> fc2
///
/// ステージ出力は活性化後の畳み込み、プーリング、平坦化、fc1、fc2 の順。
#[derive(Debug, Clone)]
pub struct CnnPipeline {
    model: CnnModel,
}

impl CnnPipeline {
    pub fn new(model: CnnModel) -> Self {
        Self { model }
    }

    /// 決定的パターンの重みでパイプラインを構築
    pub fn patterned(shape: ModelShape) -> EngineResult<Self> {
        Ok(Self::new(CnnModel::patterned(shape)?))
    }

    pub fn shape(&self) -> &ModelShape {
        self.model.shape()
    }
}

impl ComputePipeline for CnnPipeline {
    fn input_len(&self) -> usize {
        self.shape().input_len()
    }

    fn output_len(&self) -> usize {
        self.shape().fc2_size
    }

    fn execute(&self, input: &[f64]) -> Result<PipelineOutput, PipelineError> {
        let shape = *self.shape();
        check_len(shape.input_len(), input)?;

        let mut conv = scratch(shape.conv_len())?;
        layers::conv2d(
            input,
            self.model.conv_weights(),
            shape.in_channels,
            shape.input_size,
            shape.filters,
            &mut conv,
        );
        layers::relu(&mut conv);

        let mut pooled = scratch(shape.flatten_len())?;
        layers::maxpool2d(&conv, shape.filters, shape.valid_size(), &mut pooled);

        let mut flat = scratch(shape.flatten_len())?;
        layers::flatten(&pooled, &mut flat);

        let (fc1_weights, fc1_bias) = self.model.fc1();
        let mut fc1 = scratch(shape.fc1_size)?;
        layers::dense(&flat, fc1_weights, fc1_bias, &mut fc1);

        let (fc2_weights, fc2_bias) = self.model.fc2();
        let mut fc2 = scratch(shape.fc2_size)?;
        layers::dense(&fc1, fc2_weights, fc2_bias, &mut fc2);

        Ok(PipelineOutput {
            final_outputs: fc2.clone(),
            stage_outputs: vec![conv, pooled, flat, fc1, fc2],
        })
    }
}

/// 入力をそのまま最終出力とするパイプライン
#[derive(Debug, Clone, Copy)]
pub struct IdentityPipeline {
    len: usize,
}

impl IdentityPipeline {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl ComputePipeline for IdentityPipeline {
    fn input_len(&self) -> usize {
        self.len
    }

    fn output_len(&self) -> usize {
        self.len
    }

    fn execute(&self, input: &[f64]) -> Result<PipelineOutput, PipelineError> {
        check_len(self.len, input)?;
        Ok(PipelineOutput {
            stage_outputs: Vec::new(),
            final_outputs: input.to_vec(),
        })
    }
}
