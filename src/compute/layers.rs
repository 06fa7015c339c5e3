// CNN の各層
// 全てのバッファはチャンネル優先の行優先配置 [c][i][j]

/// 3x3 の valid 畳み込み（ストライド1、パディングなし）
///
/// `weights` は `[filter][channel][ki][kj]`、`output` は `filters * (size-2)^2`。
pub fn conv2d(
    input: &[f64],
    weights: &[f64],
    channels: usize,
    size: usize,
    filters: usize,
    output: &mut [f64],
) {
    let valid = size - 2;
    debug_assert_eq!(input.len(), channels * size * size);
    debug_assert_eq!(weights.len(), filters * channels * 9);
    debug_assert_eq!(output.len(), filters * valid * valid);

    for f in 0..filters {
        for i in 0..valid {
            for j in 0..valid {
                let mut sum = 0.0;
                for c in 0..channels {
                    let kernel = &weights[(f * channels + c) * 9..][..9];
                    let plane = &input[c * size * size..];
                    for ki in 0..3 {
                        let row = &plane[(i + ki) * size + j..][..3];
                        for kj in 0..3 {
                            sum += row[kj] * kernel[ki * 3 + kj];
                        }
                    }
                }
                output[(f * valid + i) * valid + j] = sum;
            }
        }
    }
}

pub fn relu(data: &mut [f64]) {
    for value in data.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
        }
    }
}

/// 2x2 ストライド2 の最大値プーリング（端数の行・列は捨てる）
pub fn maxpool2d(input: &[f64], filters: usize, size: usize, output: &mut [f64]) {
    let pooled = size / 2;
    debug_assert_eq!(output.len(), filters * pooled * pooled);

    for f in 0..filters {
        let plane = &input[f * size * size..];
        for i in 0..pooled {
            for j in 0..pooled {
                let (r, c) = (i * 2, j * 2);
                let max = plane[r * size + c]
                    .max(plane[(r + 1) * size + c])
                    .max(plane[r * size + c + 1])
                    .max(plane[(r + 1) * size + c + 1]);
                output[(f * pooled + i) * pooled + j] = max;
            }
        }
    }
}

/// [f][i][j] をそのままの順序で1次元へ
pub fn flatten(input: &[f64], output: &mut [f64]) {
    output.copy_from_slice(input);
}

/// 全結合層: output[j] = bias[j] + Σ input[i] * weights[i][j]
pub fn dense(input: &[f64], weights: &[f64], bias: &[f64], output: &mut [f64]) {
    let outputs = bias.len();
    debug_assert_eq!(weights.len(), input.len() * outputs);
    debug_assert_eq!(output.len(), outputs);

    output.copy_from_slice(bias);
    for (i, &x) in input.iter().enumerate() {
        if x == 0.0 {
            continue;
        }
        let row = &weights[i * outputs..][..outputs];
        for (out, &w) in output.iter_mut().zip(row) {
            *out += x * w;
        }
    }
}
