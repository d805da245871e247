//! 一维三次 B 样条: 插值预滤波与求值.
//!
//! 预滤波把采样值转换为 B 样条系数, 使样条曲线严格经过所有采样点.
//! 边界使用镜像 (whole-sample symmetric) 延拓.

// ref: M. Unser, "Splines: a perfect fit for signal and image processing", 1999.

/// 三次 B 样条的极点 `sqrt(3) - 2`.
const POLE: f64 = -0.267_949_192_431_122_7;

/// 初始化因果滤波时的截断精度.
const TOLERANCE: f64 = 1e-12;

/// 镜像延拓下的合法下标.
#[inline]
pub(crate) fn mirror(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let i = i.rem_euclid(period);
    if i >= n as isize {
        (period - i) as usize
    } else {
        i as usize
    }
}

/// 三次 B 样条基函数 `beta3(x)`.
#[inline]
fn beta3(x: f64) -> f64 {
    let a = x.abs();
    if a < 1.0 {
        2.0 / 3.0 - a * a + a * a * a / 2.0
    } else if a < 2.0 {
        let b = 2.0 - a;
        b * b * b / 6.0
    } else {
        0.0
    }
}

/// 原地把采样值转换为插值 B 样条系数.
pub(crate) fn prefilter(c: &mut [f64]) {
    let n = c.len();
    if n < 2 {
        return;
    }
    let z = POLE;
    let gain = (1.0 - z) * (1.0 - 1.0 / z);
    c.iter_mut().for_each(|v| *v *= gain);

    c[0] = causal_init(c, z);
    for k in 1..n {
        c[k] += z * c[k - 1];
    }
    c[n - 1] = (z / (z * z - 1.0)) * (c[n - 1] + z * c[n - 2]);
    for k in (0..n - 1).rev() {
        c[k] = z * (c[k + 1] - c[k]);
    }
}

/// 镜像边界下因果滤波的初值.
fn causal_init(c: &[f64], z: f64) -> f64 {
    let n = c.len();
    let horizon = (TOLERANCE.ln() / z.abs().ln()).ceil() as usize;
    if horizon < n {
        // 截断求和即可达到精度.
        let mut zk = z;
        let mut sum = c[0];
        for v in &c[1..horizon] {
            sum += zk * v;
            zk *= z;
        }
        sum
    } else {
        let zn = z.powi(n as i32 - 1);
        let iz = 1.0 / z;
        let mut z2n = zn * zn * iz;
        let mut zk = z;
        let mut sum = c[0] + zn * c[n - 1];
        for v in &c[1..n - 1] {
            sum += (zk + z2n) * v;
            zk *= z;
            z2n *= iz;
        }
        sum / (1.0 - zn * zn)
    }
}

/// 在连续下标 `t` 处计算系数 `c` 定义的样条值.
pub(crate) fn evaluate(c: &[f64], t: f64) -> f64 {
    let n = c.len();
    let base = t.floor() as isize;
    (base - 1..=base + 2)
        .map(|i| c[mirror(i, n)] * beta3(t - i as f64))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror() {
        assert_eq!(mirror(-1, 4), 1);
        assert_eq!(mirror(-2, 4), 2);
        assert_eq!(mirror(4, 4), 2);
        assert_eq!(mirror(5, 4), 1);
        assert_eq!(mirror(6, 4), 0);
        assert_eq!(mirror(3, 1), 0);
    }

    #[test]
    fn test_interpolates_samples() {
        for samples in [
            vec![1.0, 4.0, 2.0, 8.0, 5.0, 7.0],
            (0..40).map(|i| ((i * 37) % 11) as f64).collect(),
        ] {
            let mut c = samples.clone();
            prefilter(&mut c);
            for (k, v) in samples.iter().enumerate() {
                assert!((evaluate(&c, k as f64) - v).abs() < 1e-9, "{k}");
            }
        }
    }

    #[test]
    fn test_reproduces_constants_and_lines() {
        let mut c = vec![3.0; 7];
        prefilter(&mut c);
        for t in [0.0, 0.3, 2.5, 5.9, 6.0] {
            assert!((evaluate(&c, t) - 3.0).abs() < 1e-9);
        }

        // 远离边界处直线被精确复现.
        let mut c: Vec<f64> = (0..41).map(|k| 2.0 * k as f64 + 1.0).collect();
        prefilter(&mut c);
        for t in [19.25, 20.5, 21.75] {
            assert!((evaluate(&c, t) - (2.0 * t + 1.0)).abs() < 1e-6);
        }
    }
}
