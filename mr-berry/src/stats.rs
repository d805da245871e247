//! 少量一维统计工具.

use ordered_float::OrderedFloat;

/// 收集并升序排序. `NaN` 排在最后.
pub(crate) fn sorted<I: IntoIterator<Item = f64>>(it: I) -> Vec<f64> {
    let mut v: Vec<OrderedFloat<f64>> = it.into_iter().map(OrderedFloat).collect();
    v.sort_unstable();
    v.into_iter().map(|x| x.0).collect()
}

/// 线性插值百分位数 (与 `numpy.percentile` 默认行为一致). `q` 取值 `[0, 100]`.
///
/// `sorted` 必须已升序排列. 空切片返回 `NaN`.
pub(crate) fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// 平均值与总体标准差 (ddof = 0). 空输入返回 `(NaN, NaN)`.
pub(crate) fn mean_std<I: IntoIterator<Item = f64>>(it: I) -> (f64, f64) {
    // Welford.
    let (mut n, mut mean, mut m2) = (0u64, 0.0, 0.0);
    for x in it {
        n += 1;
        let d = x - mean;
        mean += d / n as f64;
        m2 += d * (x - mean);
    }
    if n == 0 {
        (f64::NAN, f64::NAN)
    } else {
        (mean, (m2 / n as f64).sqrt())
    }
}
