//! 邻域灰度差矩阵 (NGTDM).
//!
//! 对每个至少有一个 ROI 邻居的体素, 计算其灰度级与 26 邻域内 ROI 体素平均灰度级之差的绝对值,
//! 并按灰度级累加为 `s_i`. 没有任何邻居的体素不参与计算.

use super::roi::Roi;

pub(super) const FEATURES: [&str; 5] = ["Busyness", "Coarseness", "Complexity", "Contrast", "Strength"];

/// 无变化时 Coarseness 的取值.
const MAX_COARSENESS: f64 = 1e6;

pub(super) fn compute(roi: &Roi) -> Vec<f64> {
    let index = roi.level_index();
    let levels = roi.levels();
    let ng = roi.gray_levels().len();
    let mut s = vec![0.0; ng];
    let mut n = vec![0.0; ng];
    let mut nvp = 0.0;
    for &pos in roi.positions() {
        let level = levels[pos] as f64;
        let (sum, count) = roi
            .directions()
            .iter()
            .flat_map(|d| [*d, [-d[0], -d[1], -d[2]]])
            .filter_map(|d| roi.level_at(pos, &d))
            .fold((0.0, 0usize), |(sum, count), g| (sum + g as f64, count + 1));
        if count == 0 {
            continue;
        }
        let k = index[levels[pos] as usize];
        s[k] += (level - sum / count as f64).abs();
        n[k] += 1.0;
        nvp += 1.0;
    }
    if nvp == 0.0 {
        return vec![f64::NAN; FEATURES.len()];
    }

    // 只保留出现过的灰度级.
    let present: Vec<(f64, f64, f64)> = roi
        .gray_levels()
        .iter()
        .enumerate()
        .filter(|(k, _)| n[*k] > 0.0)
        .map(|(k, g)| (*g as f64, n[k] / nvp, s[k]))
        .collect();
    let ngp = present.len() as f64;
    let sum_ps: f64 = present.iter().map(|(_, p, s)| p * s).sum();
    let sum_s: f64 = present.iter().map(|(_, _, s)| s).sum();

    let (mut contrast, mut busy_denom, mut complexity, mut strength) = (0.0, 0.0, 0.0, 0.0);
    for &(i, pi, si) in &present {
        for &(j, pj, sj) in &present {
            let d2 = (i - j).powi(2);
            contrast += pi * pj * d2;
            busy_denom += (i * pi - j * pj).abs();
            complexity += (i - j).abs() * (pi * si + pj * sj) / (pi + pj);
            strength += (pi + pj) * d2;
        }
    }

    let coarseness = if sum_ps == 0.0 { MAX_COARSENESS } else { 1.0 / sum_ps };
    let contrast = if ngp > 1.0 {
        contrast / (ngp * (ngp - 1.0)) * sum_s / nvp
    } else {
        0.0
    };
    let busyness = if busy_denom == 0.0 { 0.0 } else { sum_ps / busy_denom };
    let strength = if sum_s == 0.0 { 0.0 } else { strength / sum_s };
    vec![busyness, coarseness, complexity / nvp, contrast, strength]
}
