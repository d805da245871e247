//! 灰度级 x 尺寸矩阵 (游程, 区域, 相依) 的公共特征.
//!
//! 记 `P(i, j)` 为灰度级 `i`, 尺寸 `j` 的计数, `N = sum P`, `Np` 为 ROI 体素数.

use std::collections::BTreeMap;

use crate::consts::EPS;

/// 稀疏的灰度级 x 尺寸计数矩阵. 行对应 ROI 中出现过的灰度级.
#[derive(Debug, Clone)]
pub(super) struct SizeMatrix {
    /// 每一行对应的灰度级数值.
    levels: Vec<f64>,
    /// `(行, 尺寸) -> 计数`.
    counts: BTreeMap<(usize, usize), f64>,
    voxels: f64,
}

/// [`SizeMatrix`] 上的 16 个公共特征.
#[derive(Debug, Clone, Copy)]
pub(super) struct MatrixFeatures {
    pub small_emphasis: f64,
    pub large_emphasis: f64,
    pub gray_level_non_uniformity: f64,
    pub gray_level_non_uniformity_normalized: f64,
    pub size_non_uniformity: f64,
    pub size_non_uniformity_normalized: f64,
    pub percentage: f64,
    pub gray_level_variance: f64,
    pub size_variance: f64,
    pub entropy: f64,
    pub low_gray_level_emphasis: f64,
    pub high_gray_level_emphasis: f64,
    pub small_low_gray_level_emphasis: f64,
    pub small_high_gray_level_emphasis: f64,
    pub large_low_gray_level_emphasis: f64,
    pub large_high_gray_level_emphasis: f64,
}

impl MatrixFeatures {
    const NAN: Self = Self {
        small_emphasis: f64::NAN,
        large_emphasis: f64::NAN,
        gray_level_non_uniformity: f64::NAN,
        gray_level_non_uniformity_normalized: f64::NAN,
        size_non_uniformity: f64::NAN,
        size_non_uniformity_normalized: f64::NAN,
        percentage: f64::NAN,
        gray_level_variance: f64::NAN,
        size_variance: f64::NAN,
        entropy: f64::NAN,
        low_gray_level_emphasis: f64::NAN,
        high_gray_level_emphasis: f64::NAN,
        small_low_gray_level_emphasis: f64::NAN,
        small_high_gray_level_emphasis: f64::NAN,
        large_low_gray_level_emphasis: f64::NAN,
        large_high_gray_level_emphasis: f64::NAN,
    };
}

impl SizeMatrix {
    /// 以 ROI 中出现过的灰度级和 ROI 体素数创建空矩阵.
    pub(super) fn new(gray_levels: &[u32], voxels: usize) -> Self {
        Self {
            levels: gray_levels.iter().map(|g| *g as f64).collect(),
            counts: BTreeMap::new(),
            voxels: voxels as f64,
        }
    }

    /// 第 `row` 个灰度级, 尺寸 `size` 的计数加一.
    #[inline]
    pub(super) fn add(&mut self, row: usize, size: usize) {
        *self.counts.entry((row, size)).or_insert(0.0) += 1.0;
    }

    /// 计数总和 `N`.
    pub(super) fn total(&self) -> f64 {
        self.counts.values().sum()
    }

    pub(super) fn features(&self) -> MatrixFeatures {
        let n = self.total();
        if n == 0.0 {
            return MatrixFeatures::NAN;
        }

        let mut per_level = vec![0.0; self.levels.len()];
        let mut per_size: BTreeMap<usize, f64> = BTreeMap::new();
        let (mut mu_i, mut mu_j) = (0.0, 0.0);
        for (&(row, size), &c) in &self.counts {
            per_level[row] += c;
            *per_size.entry(size).or_insert(0.0) += c;
            mu_i += c / n * self.levels[row];
            mu_j += c / n * size as f64;
        }

        let mut f = MatrixFeatures::NAN;
        let (mut se, mut le, mut gv, mut sv, mut ent) = (0.0, 0.0, 0.0, 0.0, 0.0);
        let (mut sl, mut sh, mut ll, mut lh) = (0.0, 0.0, 0.0, 0.0);
        for (&(row, size), &c) in &self.counts {
            let (i2, j2) = (self.levels[row].powi(2), (size as f64).powi(2));
            let p = c / n;
            se += c / j2;
            le += c * j2;
            gv += p * (self.levels[row] - mu_i).powi(2);
            sv += p * (size as f64 - mu_j).powi(2);
            ent -= p * (p + EPS).log2();
            sl += c / (i2 * j2);
            sh += c * i2 / j2;
            ll += c * j2 / i2;
            lh += c * i2 * j2;
        }
        let gln: f64 = per_level.iter().map(|v| v * v).sum();
        let sn: f64 = per_size.values().map(|v| v * v).sum();
        let (lo, hi) = per_level
            .iter()
            .zip(&self.levels)
            .fold((0.0, 0.0), |(lo, hi), (c, i)| (lo + c / (i * i), hi + c * i * i));

        f.small_emphasis = se / n;
        f.large_emphasis = le / n;
        f.gray_level_non_uniformity = gln / n;
        f.gray_level_non_uniformity_normalized = gln / (n * n);
        f.size_non_uniformity = sn / n;
        f.size_non_uniformity_normalized = sn / (n * n);
        f.percentage = n / self.voxels;
        f.gray_level_variance = gv;
        f.size_variance = sv;
        f.entropy = ent;
        f.low_gray_level_emphasis = lo / n;
        f.high_gray_level_emphasis = hi / n;
        f.small_low_gray_level_emphasis = sl / n;
        f.small_high_gray_level_emphasis = sh / n;
        f.large_low_gray_level_emphasis = ll / n;
        f.large_high_gray_level_emphasis = lh / n;
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_features() {
        // 灰度级 1: 尺寸 1 两次; 灰度级 2: 尺寸 2 一次. 共 4 个体素.
        let mut m = SizeMatrix::new(&[1, 2], 4);
        m.add(0, 1);
        m.add(0, 1);
        m.add(1, 2);
        assert_eq!(m.total(), 3.0);
        let f = m.features();
        assert!((f.small_emphasis - (2.0 + 0.25) / 3.0).abs() < 1e-12);
        assert!((f.large_emphasis - (2.0 + 4.0) / 3.0).abs() < 1e-12);
        assert!((f.gray_level_non_uniformity - (4.0 + 1.0) / 3.0).abs() < 1e-12);
        assert!((f.size_non_uniformity_normalized - 5.0 / 9.0).abs() < 1e-12);
        assert_eq!(f.percentage, 0.75);
        assert!((f.low_gray_level_emphasis - (2.0 + 0.25) / 3.0).abs() < 1e-12);
        assert!((f.large_high_gray_level_emphasis - (2.0 + 16.0) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_matrix_is_nan() {
        let f = SizeMatrix::new(&[1], 1).features();
        assert!(f.entropy.is_nan());
        assert!(f.percentage.is_nan());
    }
}
