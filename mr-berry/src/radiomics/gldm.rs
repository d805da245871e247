//! 灰度相依矩阵 (GLDM).
//!
//! 体素的相依尺寸为 26 邻域中与其灰度差不超过 `alpha` 的 ROI 体素个数加一.

use super::matrix::SizeMatrix;
use super::roi::Roi;

pub(super) const FEATURES: [&str; 14] = [
    "DependenceEntropy",
    "DependenceNonUniformity",
    "DependenceNonUniformityNormalized",
    "DependenceVariance",
    "GrayLevelNonUniformity",
    "GrayLevelVariance",
    "HighGrayLevelEmphasis",
    "LargeDependenceEmphasis",
    "LargeDependenceHighGrayLevelEmphasis",
    "LargeDependenceLowGrayLevelEmphasis",
    "LowGrayLevelEmphasis",
    "SmallDependenceEmphasis",
    "SmallDependenceHighGrayLevelEmphasis",
    "SmallDependenceLowGrayLevelEmphasis",
];

fn dependence(roi: &Roi, alpha: f64) -> SizeMatrix {
    let index = roi.level_index();
    let levels = roi.levels();
    let mut m = SizeMatrix::new(roi.gray_levels(), roi.len());
    for &pos in roi.positions() {
        let level = levels[pos];
        let dependent = roi
            .directions()
            .iter()
            .flat_map(|d| [*d, [-d[0], -d[1], -d[2]]])
            .filter_map(|d| roi.level_at(pos, &d))
            .filter(|other| (*other as f64 - level as f64).abs() <= alpha)
            .count();
        m.add(index[level as usize], dependent + 1);
    }
    m
}

pub(super) fn compute(roi: &Roi, alpha: f64) -> Vec<f64> {
    let f = dependence(roi, alpha).features();
    vec![
        f.entropy,
        f.size_non_uniformity,
        f.size_non_uniformity_normalized,
        f.size_variance,
        f.gray_level_non_uniformity,
        f.gray_level_variance,
        f.high_gray_level_emphasis,
        f.large_emphasis,
        f.large_high_gray_level_emphasis,
        f.large_low_gray_level_emphasis,
        f.low_gray_level_emphasis,
        f.small_emphasis,
        f.small_high_gray_level_emphasis,
        f.small_low_gray_level_emphasis,
    ]
}
