//! 感兴趣区域 (ROI): 裁剪, 离散化, 邻域.

use std::collections::VecDeque;

use ndarray::{s, Array3};

use super::params::{Discretization, Settings};
use super::RoiError;
use crate::data::{Mask, Volume, VolumeAttr};
use crate::Idx3d;

/// 三维空间中互不相反的 13 个单位步长方向 `(dz, dy, dx)`.
pub(crate) const DIRECTIONS_13: [[isize; 3]; 13] = [
    [0, 0, 1],
    [0, 1, -1],
    [0, 1, 0],
    [0, 1, 1],
    [1, -1, -1],
    [1, -1, 0],
    [1, -1, 1],
    [1, 0, -1],
    [1, 0, 0],
    [1, 0, 1],
    [1, 1, -1],
    [1, 1, 0],
    [1, 1, 1],
];

/// 6 邻域 (面相邻).
const FACE_NEIGHBORS: [[isize; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

/// `pos + d`, 越界返回 `None`.
#[inline]
pub(crate) fn step((z, y, x): Idx3d, d: &[isize; 3], (nz, ny, nx): Idx3d) -> Option<Idx3d> {
    let z = z.checked_add_signed(d[0])?;
    let y = y.checked_add_signed(d[1])?;
    let x = x.checked_add_signed(d[2])?;
    (z < nz && y < ny && x < nx).then_some((z, y, x))
}

/// 裁剪到包围盒的 ROI.
#[derive(Debug)]
pub(crate) struct Roi {
    /// 包围盒内的灰度级, 从 1 开始; 0 表示不属于 ROI.
    levels: Array3<u32>,
    /// ROI 内体素的原始强度, 行优先.
    values: Vec<f64>,
    /// ROI 内体素在包围盒中的下标, 与 `values` 一一对应.
    positions: Vec<Idx3d>,
    /// 出现过的灰度级, 升序.
    gray_levels: Vec<u32>,
    /// 在包围盒内不会立即越界的方向, 取自 [`DIRECTIONS_13`].
    directions: Vec<[isize; 3]>,
    spacing: [f64; 3],
}

/// 标签为 `label` 的体素的包围盒 `[lo, hi)`. 不存在时返回 `None`.
fn bounding_box(mask: &Mask, label: u8) -> Option<(Idx3d, Idx3d)> {
    let mut lo = (usize::MAX, usize::MAX, usize::MAX);
    let mut hi = (0, 0, 0);
    let mut found = false;
    for ((z, y, x), &p) in mask.data().indexed_iter() {
        if p != label {
            continue;
        }
        found = true;
        lo = (lo.0.min(z), lo.1.min(y), lo.2.min(x));
        hi = (hi.0.max(z + 1), hi.1.max(y + 1), hi.2.max(x + 1));
    }
    found.then_some((lo, hi))
}

impl Roi {
    /// 从配准一致的扫描和标注中提取 ROI 并离散化.
    pub(crate) fn new(image: &Volume, mask: &Mask, settings: &Settings) -> Result<Self, RoiError> {
        assert_eq!(image.shape(), mask.shape(), "扫描与标注必须配准");
        let label = settings.label;
        let (lo, hi) = bounding_box(mask, label).ok_or(RoiError::Empty(label))?;
        let image_box = image.data().slice_move(s![lo.0..hi.0, lo.1..hi.1, lo.2..hi.2]);
        let mask_box = mask.data().slice_move(s![lo.0..hi.0, lo.1..hi.1, lo.2..hi.2]);

        let mut values = Vec::new();
        let mut positions = Vec::new();
        for (pos, &p) in mask_box.indexed_iter() {
            if p == label {
                positions.push(pos);
                values.push(image_box[pos] as f64);
            }
        }

        if let Some(minimum) = settings.minimum_roi_size {
            if values.len() < minimum {
                return Err(RoiError::TooSmall {
                    actual: values.len(),
                    minimum,
                });
            }
        }
        let shape = mask_box.dim();
        if let Some(minimum) = settings.minimum_roi_dimensions {
            let dims = [shape.0, shape.1, shape.2].iter().filter(|n| **n > 1).count();
            if dims < minimum {
                return Err(RoiError::TooFewDimensions { actual: dims, minimum });
            }
        }

        let discrete = discretize(&values, &settings.discretization);
        let mut levels = Array3::zeros(shape);
        for (pos, level) in positions.iter().zip(&discrete) {
            levels[*pos] = *level;
        }
        let mut gray_levels = discrete;
        gray_levels.sort_unstable();
        gray_levels.dedup();

        let directions = DIRECTIONS_13
            .iter()
            .filter(|d| d[0].unsigned_abs() < shape.0 && d[1].unsigned_abs() < shape.1 && d[2].unsigned_abs() < shape.2)
            .copied()
            .collect();

        let [sx, sy, sz] = image.spacing();
        Ok(Self {
            levels,
            values,
            positions,
            gray_levels,
            directions,
            spacing: [sz, sy, sx],
        })
    }

    /// ROI 体素个数.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    /// ROI 内体素的原始强度.
    #[inline]
    pub(crate) fn values(&self) -> &[f64] {
        &self.values
    }

    /// ROI 内体素在包围盒中的下标.
    #[inline]
    pub(crate) fn positions(&self) -> &[Idx3d] {
        &self.positions
    }

    /// 包围盒内的灰度级数组.
    #[inline]
    pub(crate) fn levels(&self) -> &Array3<u32> {
        &self.levels
    }

    /// 包围盒形状 `(z, y, x)`.
    #[inline]
    pub(crate) fn shape(&self) -> Idx3d {
        self.levels.dim()
    }

    /// 出现过的灰度级, 升序.
    #[inline]
    pub(crate) fn gray_levels(&self) -> &[u32] {
        &self.gray_levels
    }

    /// 最大灰度级.
    #[inline]
    pub(crate) fn max_level(&self) -> u32 {
        self.gray_levels.last().copied().unwrap_or(0)
    }

    /// 纹理矩阵使用的方向.
    #[inline]
    pub(crate) fn directions(&self) -> &[[isize; 3]] {
        &self.directions
    }

    /// `(z, y, x)` 顺序的体素间距.
    #[inline]
    pub(crate) fn spacing_zyx(&self) -> [f64; 3] {
        self.spacing
    }

    /// `pos + d` 处的灰度级; 越界或不属于 ROI 时返回 `None`.
    #[inline]
    pub(crate) fn level_at(&self, pos: Idx3d, d: &[isize; 3]) -> Option<u32> {
        let p = step(pos, d, self.shape())?;
        let level = self.levels[p];
        (level != 0).then_some(level)
    }

    /// 包围盒坐标 `(z, y, x)` 处的体素是否属于 ROI. 包围盒以外 (含负坐标) 总是 `false`.
    #[inline]
    pub(crate) fn contains(&self, z: i64, y: i64, x: i64) -> bool {
        let (nz, ny, nx) = self.shape();
        match (usize::try_from(z), usize::try_from(y), usize::try_from(x)) {
            (Ok(z), Ok(y), Ok(x)) if z < nz && y < ny && x < nx => self.levels[(z, y, x)] != 0,
            _ => false,
        }
    }

    /// 每个出现过的灰度级在 `gray_levels` 中的下标, 以灰度级为索引.
    pub(crate) fn level_index(&self) -> Vec<usize> {
        let mut index = vec![usize::MAX; self.max_level() as usize + 1];
        for (k, g) in self.gray_levels.iter().enumerate() {
            index[*g as usize] = k;
        }
        index
    }
}

/// 把强度离散化为从 1 开始的灰度级.
pub(crate) fn discretize(values: &[f64], rule: &Discretization) -> Vec<u32> {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    match *rule {
        Discretization::BinWidth(width) => {
            let low = min - min.rem_euclid(width);
            values
                .iter()
                .map(|v| ((v - low) / width).floor() as u32 + 1)
                .collect()
        }
        Discretization::BinCount(count) => {
            let (low, high) = if max > min { (min, max) } else { (min - 0.5, max + 0.5) };
            let width = (high - low) / count as f64;
            values
                .iter()
                .map(|v| (((v - low) / width).floor() as u32 + 1).min(count))
                .collect()
        }
    }
}

/// 6 连通意义下 ROI 的连通分量个数.
pub(crate) fn count_components(mask: &Mask, label: u8) -> usize {
    let data = mask.data();
    let shape = data.dim();
    let mut seen = Array3::from_elem(shape, false);
    let mut queue = VecDeque::new();
    let mut count = 0;
    for (pos, &p) in data.indexed_iter() {
        if p != label || seen[pos] {
            continue;
        }
        count += 1;
        seen[pos] = true;
        queue.push_back(pos);
        while let Some(cur) = queue.pop_front() {
            for d in &FACE_NEIGHBORS {
                if let Some(next) = step(cur, d, shape) {
                    if data[next] == label && !seen[next] {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Geometry, PixelType};
    use crate::test_support;

    #[test]
    fn test_discretize_bin_width() {
        // lowBound = 7 - 7 % 5 = 5
        assert_eq!(discretize(&[7.0, 9.9, 10.0, 26.0], &Discretization::BinWidth(5.0)), vec![1, 1, 2, 5]);
        // 负数取 floored 模.
        assert_eq!(discretize(&[-3.0, 0.0, 2.0], &Discretization::BinWidth(2.0)), vec![1, 3, 4]);
        assert_eq!(discretize(&[100.0], &Discretization::BinWidth(25.0)), vec![1]);
    }

    #[test]
    fn test_discretize_bin_count() {
        assert_eq!(discretize(&[0.0, 1.0, 2.0, 4.0], &Discretization::BinCount(4)), vec![1, 2, 3, 4]);
        assert_eq!(discretize(&[3.0, 3.0], &Discretization::BinCount(4)), vec![3, 3]);
    }

    #[test]
    fn test_roi_crop() {
        let vol = test_support::textured_volume((8, 8, 8), [1.0; 3]);
        let mask = test_support::block_mask((8, 8, 8), [1.0; 3]);
        let roi = Roi::new(&vol, &mask, &Settings::default()).unwrap();
        assert_eq!(roi.shape(), (4, 4, 4));
        assert_eq!(roi.len(), 64);
        assert_eq!(roi.directions().len(), 13);
        assert_eq!(roi.values()[0], vol[(2, 2, 2)] as f64);
        assert!(roi.gray_levels().windows(2).all(|w| w[0] < w[1]));
        assert_eq!(roi.level_index()[roi.gray_levels()[0] as usize], 0);
        assert!(roi.contains(0, 0, 0) && roi.contains(3, 3, 3));
        assert!(!roi.contains(-1, 0, 0) && !roi.contains(0, 4, 0));
    }

    #[test]
    fn test_roi_errors() {
        let vol = test_support::constant_volume(4, 1.0);
        let empty = Mask::from_parts(Geometry::identity([4, 4, 4]), PixelType::Uint8, Array3::zeros((4, 4, 4)));
        assert!(matches!(Roi::new(&vol, &empty, &Settings::default()), Err(RoiError::Empty(1))));

        let mask = test_support::center_voxel_mask(4);
        let settings = Settings {
            minimum_roi_size: Some(2),
            ..Settings::default()
        };
        assert!(matches!(
            Roi::new(&vol, &mask, &settings),
            Err(RoiError::TooSmall { actual: 1, minimum: 2 })
        ));
        let roi = Roi::new(&vol, &mask, &Settings::default()).unwrap();
        assert!(roi.directions().is_empty());
    }

    #[test]
    fn test_count_components() {
        let mut data = Array3::zeros((3, 3, 3));
        data[(0, 0, 0)] = 1;
        data[(1, 1, 1)] = 1; // 只有角相邻.
        data[(2, 2, 2)] = 1;
        data[(2, 2, 1)] = 1;
        let mask = Mask::from_parts(Geometry::identity([3, 3, 3]), PixelType::Uint8, data);
        assert_eq!(count_components(&mask, 1), 3);
        assert_eq!(count_components(&mask, 2), 0);
    }
}
