//! 一阶统计量. 除 Entropy 和 Uniformity 使用离散化后的灰度直方图外, 其余均基于原始强度.

use super::roi::Roi;
use super::Settings;
use crate::consts::EPS;
use crate::stats;

pub(super) const FEATURES: [&str; 18] = [
    "10Percentile",
    "90Percentile",
    "Energy",
    "Entropy",
    "InterquartileRange",
    "Kurtosis",
    "Maximum",
    "Mean",
    "MeanAbsoluteDeviation",
    "Median",
    "Minimum",
    "Range",
    "RobustMeanAbsoluteDeviation",
    "RootMeanSquared",
    "Skewness",
    "TotalEnergy",
    "Uniformity",
    "Variance",
];

/// 各阶中心矩 `(m2, m3, m4)`.
fn central_moments(values: &[f64], mean: f64) -> (f64, f64, f64) {
    let n = values.len() as f64;
    let (m2, m3, m4) = values.iter().fold((0.0, 0.0, 0.0), |(a, b, c), v| {
        let d = v - mean;
        let d2 = d * d;
        (a + d2, b + d2 * d, c + d2 * d2)
    });
    (m2 / n, m3 / n, m4 / n)
}

#[inline]
fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[inline]
fn mean_abs_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).abs()).sum::<f64>() / values.len() as f64
}

pub(super) fn compute(roi: &Roi, settings: &Settings) -> Vec<f64> {
    let values = roi.values();
    let n = values.len() as f64;
    let sorted = stats::sorted(values.iter().copied());
    let q = |p: f64| stats::percentile(&sorted, p);
    let (p10, p25, p50, p75, p90) = (q(10.0), q(25.0), q(50.0), q(75.0), q(90.0));
    let (min, max) = (sorted[0], sorted[sorted.len() - 1]);

    let shift = settings.voxel_array_shift;
    let energy: f64 = values.iter().map(|v| (v + shift).powi(2)).sum();
    let [sz, sy, sx] = roi.spacing_zyx();
    let total_energy = energy * sz * sy * sx;
    let rms = (energy / n).sqrt();

    let mu = mean(values);
    let (m2, m3, m4) = central_moments(values, mu);
    // 平坦区域上偏度和峰度定义为 0.
    let (skewness, kurtosis) = if m2 == 0.0 {
        (0.0, 0.0)
    } else {
        (m3 / m2.powf(1.5), m4 / (m2 * m2))
    };

    let robust: Vec<f64> = values.iter().copied().filter(|v| *v >= p10 && *v <= p90).collect();

    // 离散化灰度直方图.
    let levels = roi.levels();
    let mut hist = vec![0usize; roi.max_level() as usize + 1];
    for pos in roi.positions() {
        hist[levels[*pos] as usize] += 1;
    }
    let probs = hist.iter().filter(|c| **c > 0).map(|c| *c as f64 / n);
    let (entropy, uniformity) = probs.fold((0.0, 0.0), |(e, u), p| (e - p * (p + EPS).log2(), u + p * p));

    vec![
        p10,
        p90,
        energy,
        entropy,
        p75 - p25,
        kurtosis,
        max,
        mu,
        mean_abs_dev(values),
        p50,
        min,
        max - min,
        mean_abs_dev(&robust),
        rms,
        skewness,
        total_energy,
        uniformity,
        m2,
    ]
}
