//! 灰度游程矩阵 (GLRLM). 游程只在 ROI 内延伸, 每个方向单独计算特征再求平均.

use super::matrix::SizeMatrix;
use super::roi::{step, Roi};

pub(super) const FEATURES: [&str; 16] = [
    "GrayLevelNonUniformity",
    "GrayLevelNonUniformityNormalized",
    "GrayLevelVariance",
    "HighGrayLevelRunEmphasis",
    "LongRunEmphasis",
    "LongRunHighGrayLevelEmphasis",
    "LongRunLowGrayLevelEmphasis",
    "LowGrayLevelRunEmphasis",
    "RunEntropy",
    "RunLengthNonUniformity",
    "RunLengthNonUniformityNormalized",
    "RunPercentage",
    "RunVariance",
    "ShortRunEmphasis",
    "ShortRunHighGrayLevelEmphasis",
    "ShortRunLowGrayLevelEmphasis",
];

/// 沿方向 `d` 的游程矩阵.
fn run_lengths(roi: &Roi, index: &[usize], d: &[isize; 3]) -> SizeMatrix {
    let back = [-d[0], -d[1], -d[2]];
    let levels = roi.levels();
    let mut m = SizeMatrix::new(roi.gray_levels(), roi.len());
    for &pos in roi.positions() {
        let level = levels[pos];
        // 只从游程起点开始计数.
        if roi.level_at(pos, &back) == Some(level) {
            continue;
        }
        let mut len = 1;
        let mut cur = pos;
        while roi.level_at(cur, d) == Some(level) {
            len += 1;
            // level_at 成功意味着 step 不越界.
            cur = step(cur, d, roi.shape()).unwrap_or(cur);
        }
        m.add(index[level as usize], len);
    }
    m
}

pub(super) fn compute(roi: &Roi) -> Vec<f64> {
    let index = roi.level_index();
    let per_direction: Vec<Vec<f64>> = roi
        .directions()
        .iter()
        .map(|d| {
            let f = run_lengths(roi, &index, d).features();
            vec![
                f.gray_level_non_uniformity,
                f.gray_level_non_uniformity_normalized,
                f.gray_level_variance,
                f.high_gray_level_emphasis,
                f.large_emphasis,
                f.large_high_gray_level_emphasis,
                f.large_low_gray_level_emphasis,
                f.low_gray_level_emphasis,
                f.entropy,
                f.size_non_uniformity,
                f.size_non_uniformity_normalized,
                f.percentage,
                f.size_variance,
                f.small_emphasis,
                f.small_high_gray_level_emphasis,
                f.small_low_gray_level_emphasis,
            ]
        })
        .collect();
    super::nan_mean(&per_direction, FEATURES.len())
}
