//! 重采样到目标体素间距.
//!
//! 原点与方向保持不变, 每个轴的新尺寸见 [`Geometry::resampled`].
//! 三个轴依次做一维重采样 (可分离), 超出原始物理范围的体素取 0.

use ndarray::{Array3, ArrayView1, ArrayView3, ArrayViewMut1, Axis, Zip};
use serde::{Deserialize, Serialize};

use super::bspline;
use crate::consts::label::{BACKGROUND, LESION};
use crate::data::{Geometry, Mask, PixelType, Volume, VolumeAttr};

/// 标注的插值方式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskInterpolation {
    /// 最近邻. 默认, 保留所有标签值.
    #[default]
    Nearest,

    /// 对病灶指示函数做线性插值, 再以 0.5 为阈值重新二值化. 结果只含 0 和 1.
    LinearThreshold,
}

/// 一维插值核.
#[derive(Copy, Clone, Debug)]
enum Kernel {
    Nearest,
    Linear,
    BSpline,
}

/// 输出下标 `i` 在输入轴上对应的连续下标. 超出范围时返回 `None`.
#[inline]
fn source_index(i: usize, scale: f64, n: usize) -> Option<f64> {
    let t = i as f64 * scale;
    (t <= n as f64 - 0.5).then_some(t)
}

fn resample_lane(input: ArrayView1<'_, f32>, mut output: ArrayViewMut1<'_, f32>, scale: f64, kernel: Kernel) {
    let n = input.len();
    match kernel {
        Kernel::Nearest => {
            for (i, o) in output.iter_mut().enumerate() {
                *o = source_index(i, scale, n)
                    .map_or(0.0, |t| input[((t + 0.5).floor() as usize).min(n - 1)]);
            }
        }
        Kernel::Linear => {
            for (i, o) in output.iter_mut().enumerate() {
                *o = source_index(i, scale, n).map_or(0.0, |t| {
                    let i0 = (t.floor() as usize).min(n - 1);
                    let i1 = (i0 + 1).min(n - 1);
                    let frac = (t - i0 as f64) as f32;
                    input[i0] * (1.0 - frac) + input[i1] * frac
                });
            }
        }
        Kernel::BSpline => {
            let mut coef: Vec<f64> = input.iter().map(|v| *v as f64).collect();
            bspline::prefilter(&mut coef);
            for (i, o) in output.iter_mut().enumerate() {
                *o = source_index(i, scale, n).map_or(0.0, |t| bspline::evaluate(&coef, t) as f32);
            }
        }
    }
}

/// 沿数组轴 `axis` 重采样到长度 `len`.
fn resample_axis(input: ArrayView3<'_, f32>, axis: Axis, len: usize, scale: f64, kernel: Kernel) -> Array3<f32> {
    let mut dim = input.raw_dim();
    dim[axis.index()] = len;
    let mut output = Array3::zeros(dim);
    let zip = Zip::from(output.lanes_mut(axis)).and(input.lanes(axis));
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            zip.par_for_each(|o, i| resample_lane(i, o, scale, kernel));
        } else {
            zip.for_each(|o, i| resample_lane(i, o, scale, kernel));
        }
    }
    output
}

/// 把 `(z, y, x)` 组织的 `data` 从 `from` 重采样到 `to`.
fn resample_data(data: ArrayView3<'_, f32>, from: &Geometry, to: &Geometry, kernel: Kernel) -> Array3<f32> {
    let mut current = data.to_owned();
    // 几何向量按 (x, y, z) 存储, 对应数组轴 2, 1, 0.
    for g in 0..3 {
        let axis = Axis(2 - g);
        let (n, m) = (from.size()[g], to.size()[g]);
        let scale = to.spacing()[g] / from.spacing()[g];
        if n == m && scale == 1.0 {
            continue;
        }
        current = resample_axis(current.view(), axis, m, scale, kernel);
    }
    current
}

/// 以三次 B 样条插值重采样扫描. 输出体素类型为 `Float32`.
pub fn resample_image(image: &Volume, spacing: [f64; 3]) -> Volume {
    let target = image.geometry().resampled(spacing);
    let data = resample_data(image.data(), image.geometry(), &target, Kernel::BSpline);
    Volume::from_parts(target, PixelType::Float32, data)
}

/// 重采样标注. 不改变体素类型.
pub fn resample_mask(mask: &Mask, spacing: [f64; 3], interpolation: MaskInterpolation) -> Mask {
    let target = mask.geometry().resampled(spacing);
    let data = match interpolation {
        MaskInterpolation::Nearest => {
            let labels = mask.data().mapv(|v| v as f32);
            resample_data(labels.view(), mask.geometry(), &target, Kernel::Nearest).mapv(|v| v as u8)
        }
        MaskInterpolation::LinearThreshold => {
            let indicator = mask.data().mapv(|v| if v == LESION { 1.0 } else { 0.0 });
            resample_data(indicator.view(), mask.geometry(), &target, Kernel::Linear)
                .mapv(|v| if v >= 0.5 { LESION } else { BACKGROUND })
        }
    };
    Mask::from_parts(target, mask.pixel_type(), data)
}
