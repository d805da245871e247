//! 灰度共生矩阵 (GLCM).
//!
//! 距离为 1, 对称计数. 每个方向单独归一化并计算特征, 再对非空方向求平均.
//! 矩阵只保留 ROI 中出现过的灰度级, 但特征计算使用灰度级的实际数值.
//!
//! 最大相关系数 (MCC) 为 `Q(i, j) = sum_k p(i, k) p(j, k) / (px(i) py(k))` 的第二大特征值的平方根.
//! `Q` 与对称半正定矩阵 `B B^T` 相似, 其中 `B(i, k) = p(i, k) / sqrt(px(i) py(k))`,
//! 所以用 Jacobi 方法求后者的特征值.

use ndarray::Array2;

use super::roi::Roi;
use crate::consts::EPS;

pub(super) const FEATURES: [&str; 23] = [
    "Autocorrelation",
    "ClusterProminence",
    "ClusterShade",
    "ClusterTendency",
    "Contrast",
    "Correlation",
    "DifferenceAverage",
    "DifferenceEntropy",
    "DifferenceVariance",
    "Id",
    "Idm",
    "Idmn",
    "Idn",
    "Imc1",
    "Imc2",
    "InverseVariance",
    "JointAverage",
    "JointEnergy",
    "JointEntropy",
    "MCC",
    "MaximumProbability",
    "SumEntropy",
    "SumSquares",
];

/// 沿方向 `d` 的对称共生矩阵 (未归一化).
fn cooccurrence(roi: &Roi, index: &[usize], d: &[isize; 3]) -> Array2<f64> {
    let ng = roi.gray_levels().len();
    let mut p = Array2::zeros((ng, ng));
    let levels = roi.levels();
    for &pos in roi.positions() {
        if let Some(b) = roi.level_at(pos, d) {
            let (i, j) = (index[levels[pos] as usize], index[b as usize]);
            p[(i, j)] += 1.0;
            p[(j, i)] += 1.0;
        }
    }
    p
}

/// 实对称矩阵的特征值 (循环 Jacobi 方法), 降序.
fn symmetric_eigenvalues(mut a: Array2<f64>) -> Vec<f64> {
    let n = a.nrows();
    for _ in 0..64 {
        let off: f64 = a
            .indexed_iter()
            .filter(|((i, j), _)| i != j)
            .map(|(_, v)| v * v)
            .sum();
        if off < 1e-24 {
            break;
        }
        for p in 0..n {
            for q in p + 1..n {
                let apq = a[(p, q)];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[(q, q)] - a[(p, p)]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let (akp, akq) = (a[(k, p)], a[(k, q)]);
                    a[(k, p)] = c * akp - s * akq;
                    a[(k, q)] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[(p, k)], a[(q, k)]);
                    a[(p, k)] = c * apk - s * aqk;
                    a[(q, k)] = s * apk + c * aqk;
                }
            }
        }
    }
    let mut eigenvalues = a.diag().to_vec();
    eigenvalues.sort_by(|x, y| y.total_cmp(x));
    eigenvalues
}

/// 最大相关系数. 只有一个灰度级时 (平坦区域) 为 1.
fn mcc(p: &Array2<f64>, px: &[f64], py: &[f64]) -> f64 {
    if px.len() < 2 {
        return 1.0;
    }
    // 该方向上没有邻居的灰度级对应 Q 的零行, 只贡献零特征值.
    let rows: Vec<usize> = (0..px.len()).filter(|i| px[*i] > 0.0).collect();
    let cols: Vec<usize> = (0..py.len()).filter(|k| py[*k] > 0.0).collect();
    if rows.len() < 2 {
        return 0.0;
    }
    let b = Array2::from_shape_fn((rows.len(), cols.len()), |(r, c)| {
        let (i, k) = (rows[r], cols[c]);
        p[(i, k)] / (px[i] * py[k]).sqrt()
    });
    let eigenvalues = symmetric_eigenvalues(b.dot(&b.t()));
    eigenvalues[1].max(0.0).sqrt()
}

#[inline]
fn entropy<'a, I: IntoIterator<Item = &'a f64>>(probs: I) -> f64 {
    -probs.into_iter().map(|p| p * (p + EPS).log2()).sum::<f64>()
}

/// 在归一化后的矩阵 `p` 上计算全部特征. `g` 为每行对应的灰度级, `ng` 为最大灰度级.
fn features(p: &Array2<f64>, g: &[f64], ng: f64) -> Vec<f64> {
    let n = g.len();
    let px: Vec<f64> = p.rows().into_iter().map(|r| r.sum()).collect();
    let py: Vec<f64> = p.columns().into_iter().map(|c| c.sum()).collect();
    let mu_x: f64 = px.iter().zip(g).map(|(p, i)| p * i).sum();
    let mu_y: f64 = py.iter().zip(g).map(|(p, j)| p * j).sum();
    let sigma_x = px.iter().zip(g).map(|(p, i)| p * (i - mu_x).powi(2)).sum::<f64>().sqrt();
    let sigma_y = py.iter().zip(g).map(|(p, j)| p * (j - mu_y).powi(2)).sum::<f64>().sqrt();

    // 灰度级为整数, 和与差都可以直接作为下标.
    let max_g = g.last().copied().unwrap_or(0.0) as usize;
    let mut p_sum = vec![0.0; 2 * max_g + 1];
    let mut p_diff = vec![0.0; max_g + 1];

    let (mut auto, mut prominence, mut shade, mut tendency, mut contrast) = (0.0, 0.0, 0.0, 0.0, 0.0);
    let (mut energy, mut hxy, mut hxy1, mut hxy2, mut max_p) = (0.0, 0.0, 0.0, 0.0, 0.0f64);
    for a in 0..n {
        for b in 0..n {
            let v = p[(a, b)];
            let (i, j) = (g[a], g[b]);
            let pxy = px[a] * py[b];
            hxy1 -= v * (pxy + EPS).log2();
            hxy2 -= pxy * (pxy + EPS).log2();
            if v == 0.0 {
                continue;
            }
            p_sum[(i + j) as usize] += v;
            p_diff[(i - j).abs() as usize] += v;
            let c = i + j - mu_x - mu_y;
            auto += v * i * j;
            prominence += v * c.powi(4);
            shade += v * c.powi(3);
            tendency += v * c.powi(2);
            contrast += v * (i - j).powi(2);
            energy += v * v;
            hxy -= v * (v + EPS).log2();
            max_p = max_p.max(v);
        }
    }

    let correlation = if sigma_x * sigma_y == 0.0 {
        // 平坦区域.
        1.0
    } else {
        (auto - mu_x * mu_y) / (sigma_x * sigma_y)
    };

    let diff_average: f64 = p_diff.iter().enumerate().map(|(k, v)| k as f64 * v).sum();
    let diff_variance: f64 = p_diff
        .iter()
        .enumerate()
        .map(|(k, v)| (k as f64 - diff_average).powi(2) * v)
        .sum();
    let weighted = |w: &dyn Fn(f64) -> f64| -> f64 {
        p_diff.iter().enumerate().map(|(k, v)| v * w(k as f64)).sum()
    };
    let id = weighted(&|k| 1.0 / (1.0 + k));
    let idm = weighted(&|k| 1.0 / (1.0 + k * k));
    let idmn = weighted(&|k| 1.0 / (1.0 + k * k / (ng * ng)));
    let idn = weighted(&|k| 1.0 / (1.0 + k / ng));
    let inverse_variance = weighted(&|k| if k == 0.0 { 0.0 } else { 1.0 / (k * k) });

    let hx = entropy(&px);
    let hy = entropy(&py);
    let imc1 = match hx.max(hy) {
        h if h == 0.0 => 0.0,
        h => (hxy - hxy1) / h,
    };
    let imc2 = (1.0 - (-2.0 * (hxy2 - hxy)).exp()).max(0.0).sqrt();
    let sum_squares: f64 = px.iter().zip(g).map(|(p, i)| p * (i - mu_x).powi(2)).sum();

    vec![
        auto,
        prominence,
        shade,
        tendency,
        contrast,
        correlation,
        diff_average,
        entropy(&p_diff),
        diff_variance,
        id,
        idm,
        idmn,
        idn,
        imc1,
        imc2,
        inverse_variance,
        mu_x,
        energy,
        hxy,
        mcc(p, &px, &py),
        max_p,
        entropy(&p_sum),
        sum_squares,
    ]
}

pub(super) fn compute(roi: &Roi) -> Vec<f64> {
    let index = roi.level_index();
    let g: Vec<f64> = roi.gray_levels().iter().map(|v| *v as f64).collect();
    let ng = roi.max_level() as f64;
    let per_direction: Vec<Vec<f64>> = roi
        .directions()
        .iter()
        .filter_map(|d| {
            let p = cooccurrence(roi, &index, d);
            let total = p.sum();
            (total > 0.0).then(|| features(&(p / total), &g, ng))
        })
        .collect();
    super::nan_mean(&per_direction, FEATURES.len())
}
