//! 强度归一化.
//!
//! 默认方法是分段线性直方图标准化 (Nyúl & Udupa): 以前景强度的若干百分位数为标志点,
//! 将其线性映射到模态相关的参考标志点上, 从而使不同设备、不同扫描参数下的强度分布对齐.

use serde::{Deserialize, Serialize};

use super::{Modality, PreprocessError};
use crate::data::{PixelType, Volume};
use crate::stats;

/// 标志点对应的百分位数.
pub const LANDMARK_PERCENTILES: [f64; 11] =
    [1.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 99.0];

/// 中位数标志点在 [`LANDMARK_PERCENTILES`] 中的下标.
const MEDIAN_LANDMARK: usize = 5;

/// T1 加权像的参考标志点 (标准尺度 `[0, 100]`).
pub const T1_REFERENCE: [f64; 11] = [0.0, 8.1, 15.4, 22.9, 30.8, 38.9, 47.6, 56.9, 67.2, 79.1, 100.0];

/// T2 加权像的参考标志点 (标准尺度 `[0, 100]`).
///
/// T2 像中液体等长 T2 组织高信号, 高百分位段被拉得更开.
pub const T2_REFERENCE: [f64; 11] = [0.0, 5.2, 11.3, 18.0, 25.6, 33.8, 42.9, 53.0, 64.7, 78.5, 100.0];

/// 归一化方法.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMethod {
    /// 分段线性映射到模态参考分布. 默认.
    #[default]
    ReferenceHistogram,

    /// 全体体素的 `(x - mean) / std`.
    GlobalZScore,

    /// 前景 (高于平均强度的体素) 统计量上的 `(x - mean_fg) / std_fg`, 作用于全体体素.
    ForegroundZScore,
}

/// 强度归一化器. 构建后不可变.
#[derive(Clone, Debug, PartialEq)]
pub struct Normalizer {
    method: NormalizeMethod,
    reference: Vec<f64>,
}

impl Normalizer {
    /// 以 `modality` 的默认参考标志点构建.
    pub fn new(modality: Modality, method: NormalizeMethod) -> Self {
        let reference = match modality {
            Modality::T1 => T1_REFERENCE,
            Modality::T2 => T2_REFERENCE,
        };
        Self {
            method,
            reference: reference.to_vec(),
        }
    }

    /// 使用自定义参考标志点构建.
    ///
    /// `reference` 长度必须与 [`LANDMARK_PERCENTILES`] 相同且严格递增.
    pub fn with_reference(method: NormalizeMethod, reference: Vec<f64>) -> Result<Self, PreprocessError> {
        let valid = reference.len() == LANDMARK_PERCENTILES.len()
            && reference.iter().all(|v| v.is_finite())
            && reference.windows(2).all(|w| w[0] < w[1]);
        if !valid {
            return Err(PreprocessError::InvalidReference(reference));
        }
        Ok(Self { method, reference })
    }

    /// 当前方法.
    #[inline]
    pub fn method(&self) -> NormalizeMethod {
        self.method
    }

    /// 参考标志点.
    #[inline]
    pub fn reference(&self) -> &[f64] {
        &self.reference
    }

    /// 归一化 `image`, 返回新的 `Float32` 扫描. `image` 保持不变.
    pub fn normalize(&self, image: &Volume) -> Volume {
        let data = match self.method {
            NormalizeMethod::ReferenceHistogram => {
                let map = self.landmark_map(image);
                image.data().mapv(|v| map.apply(v as f64) as f32)
            }
            NormalizeMethod::GlobalZScore => {
                let (mean, std) = stats::mean_std(image.data().iter().map(|v| *v as f64));
                z_score(image, mean, std)
            }
            NormalizeMethod::ForegroundZScore => {
                let (mean, std) = stats::mean_std(foreground(image));
                z_score(image, mean, std)
            }
        };
        image.with_data(PixelType::Float32, data)
    }

    /// 计算扫描前景的标志点并构造分段线性映射.
    fn landmark_map(&self, image: &Volume) -> PiecewiseLinear {
        let foreground = stats::sorted(foreground(image));
        let landmarks: Vec<f64> = LANDMARK_PERCENTILES
            .iter()
            .map(|q| stats::percentile(&foreground, *q))
            .collect();
        PiecewiseLinear::new(&landmarks, &self.reference, self.reference[MEDIAN_LANDMARK])
    }
}

/// 高于平均强度的体素. 常数图像没有这样的体素, 此时取全体体素.
fn foreground(image: &Volume) -> Vec<f64> {
    let data = image.data();
    let (mean, _) = stats::mean_std(data.iter().map(|v| *v as f64));
    let fg: Vec<f64> = data.iter().map(|v| *v as f64).filter(|v| *v > mean).collect();
    if fg.is_empty() {
        data.iter().map(|v| *v as f64).collect()
    } else {
        fg
    }
}

fn z_score(image: &Volume, mean: f64, std: f64) -> ndarray::Array3<f32> {
    if std > 0.0 {
        image.data().mapv(|v| ((v as f64 - mean) / std) as f32)
    } else {
        log::warn!("强度标准差为零, z-score 结果全部置零");
        image.data().mapv(|_| 0.0)
    }
}

/// 分段线性映射. 两端按最外侧线段线性外推.
#[derive(Debug)]
struct PiecewiseLinear {
    /// 严格递增的输入结点.
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// 输入结点退化为一个点时的输出.
    constant: f64,
}

impl PiecewiseLinear {
    fn new(xs: &[f64], ys: &[f64], constant: f64) -> Self {
        let mut kx = Vec::with_capacity(xs.len());
        let mut ky = Vec::with_capacity(ys.len());
        for (&x, &y) in xs.iter().zip(ys) {
            // 重复的标志点只保留第一个.
            if kx.last().map_or(true, |&last| x > last) {
                kx.push(x);
                ky.push(y);
            }
        }
        if kx.len() < 2 {
            log::warn!("前景强度分布退化为单点, 全部映射到参考中位数 {constant}");
        }
        Self {
            xs: kx,
            ys: ky,
            constant,
        }
    }

    fn apply(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if n < 2 {
            return self.constant;
        }
        // 第一个满足 xs[k + 1] > x 的线段, 两端夹紧到首尾线段.
        let k = self.xs[1..n - 1].partition_point(|&b| b <= x);
        let (x0, x1, y0, y1) = (self.xs[k], self.xs[k + 1], self.ys[k], self.ys[k + 1]);
        y0 + (x - x0) * (y1 - y0) / (x1 - x0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::VolumeAttr;

    #[test]
    fn test_piecewise_linear() {
        let f = PiecewiseLinear::new(&[0.0, 10.0, 20.0], &[0.0, 50.0, 100.0], -1.0);
        assert_eq!(f.apply(5.0), 25.0);
        assert_eq!(f.apply(10.0), 50.0);
        assert_eq!(f.apply(15.0), 75.0);
        // 外推.
        assert_eq!(f.apply(-2.0), -10.0);
        assert_eq!(f.apply(30.0), 150.0);

        let dup = PiecewiseLinear::new(&[1.0, 1.0, 1.0], &[0.0, 50.0, 100.0], 42.0);
        assert_eq!(dup.apply(1.0), 42.0);
        assert_eq!(dup.apply(-7.0), 42.0);
    }

    #[test]
    fn test_constant_volume_maps_to_reference_median() {
        let vol = test_support::constant_volume(10, 100.0);
        let out = Normalizer::new(Modality::T2, NormalizeMethod::ReferenceHistogram).normalize(&vol);
        assert_eq!(out.pixel_type(), PixelType::Float32);
        assert!(out.data().iter().all(|v| *v == T2_REFERENCE[MEDIAN_LANDMARK] as f32));
        // 输入不变.
        assert!(vol.data().iter().all(|v| *v == 100.0));
    }

    #[test]
    fn test_reference_histogram_is_monotone_and_hits_landmarks() {
        let vol = test_support::textured_volume((6, 7, 8), [1.0; 3]);
        let t1 = Normalizer::new(Modality::T1, NormalizeMethod::ReferenceHistogram);
        let out = t1.normalize(&vol);
        let pairs: Vec<(f32, f32)> = vol.data().iter().copied().zip(out.data().iter().copied()).collect();
        for (a, fa) in &pairs {
            for (b, fb) in &pairs {
                if a < b {
                    assert!(fa <= fb, "{a} -> {fa}, {b} -> {fb}");
                }
            }
        }
        // 模态决定参考分布.
        let t2 = Normalizer::new(Modality::T2, NormalizeMethod::ReferenceHistogram).normalize(&vol);
        assert_ne!(out, t2);
    }

    #[test]
    fn test_global_zscore() {
        let vol = test_support::textured_volume((4, 4, 4), [1.0; 3]);
        let out = Normalizer::new(Modality::T1, NormalizeMethod::GlobalZScore).normalize(&vol);
        let (m, s) = stats::mean_std(out.data().iter().map(|v| *v as f64));
        assert!(m.abs() < 1e-5);
        assert!((s - 1.0).abs() < 1e-5);

        let flat = test_support::constant_volume(3, 7.0);
        let out = Normalizer::new(Modality::T1, NormalizeMethod::GlobalZScore).normalize(&flat);
        assert!(out.data().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_foreground_zscore() {
        // 一半体素为 0 (背景), 另一半取 10 或 20.
        let mut vol = test_support::constant_volume(4, 0.0);
        for (i, v) in vol.data_mut().iter_mut().enumerate() {
            if i >= 32 {
                *v = if i % 2 == 0 { 10.0 } else { 20.0 };
            }
        }
        let out = Normalizer::new(Modality::T2, NormalizeMethod::ForegroundZScore).normalize(&vol);
        assert_eq!(out.pixel_type(), PixelType::Float32);
        // 前景均值 15, 标准差 5.
        let at = |i: usize| out.data().iter().nth(i).copied().unwrap();
        assert!((at(0) + 3.0).abs() < 1e-6);
        assert!((at(32) + 1.0).abs() < 1e-6);
        assert!((at(33) - 1.0).abs() < 1e-6);

        let fg = stats::mean_std(out.data().iter().skip(32).map(|v| *v as f64));
        assert!(fg.0.abs() < 1e-6 && (fg.1 - 1.0).abs() < 1e-6);

        let flat = test_support::constant_volume(3, 7.0);
        let out = Normalizer::new(Modality::T1, NormalizeMethod::ForegroundZScore).normalize(&flat);
        assert!(out.data().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_custom_reference_validation() {
        assert!(Normalizer::with_reference(NormalizeMethod::ReferenceHistogram, vec![0.0, 1.0]).is_err());
        let mut r = T1_REFERENCE.to_vec();
        r.swap(1, 2);
        assert!(Normalizer::with_reference(NormalizeMethod::ReferenceHistogram, r).is_err());
        assert!(Normalizer::with_reference(NormalizeMethod::ReferenceHistogram, T2_REFERENCE.to_vec()).is_ok());
    }
}
