//! 体数据: MRI 扫描 [`Volume`] 与分割标注 [`Mask`], 以及它们共享的几何信息.

use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayView2, ArrayView3, ArrayViewMut3, Axis};

use crate::consts::label::LESION;
use crate::Idx3d;

mod geometry;
/// NIfTI / NRRD 读写.
pub mod io;
/// 强度到 8-bit 灰度的映射.
pub mod window;

pub use geometry::{Direction, Geometry, GeometryMismatch, PixelType, IDENTITY_DIRECTION};
pub use io::VolumeError;
pub use window::GrayWindow;

/// 三维 MRI 扫描: 几何信息 + 强度数据. 强度统一以 `f32` 保存, 按 `(z, y, x)` 访问.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    geometry: Geometry,
    pixel_type: PixelType,
    data: Array3<f32>,
}

/// 三维分割标注: 几何信息 + 非负整数标签. 标签以 `u8` 保存, 按 `(z, y, x)` 访问.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    geometry: Geometry,
    pixel_type: PixelType,
    data: Array3<u8>,
}

/// 三维体数据的共用几何属性和部分通用操作.
pub trait VolumeAttr {
    /// 获取几何信息.
    fn geometry(&self) -> &Geometry;

    /// 获取文件中的原始体素类型.
    fn pixel_type(&self) -> PixelType;

    /// 获取数据形状大小 `(z, y, x)`.
    #[inline]
    fn shape(&self) -> Idx3d {
        self.geometry().shape()
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        self.geometry().len()
    }

    /// 获取 `(x, y, z)` 顺序的体素分辨率, 以毫米为单位.
    #[inline]
    fn spacing(&self) -> [f64; 3] {
        self.geometry().spacing()
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.geometry().voxel_volume()
    }

    /// 检查与 `other` 是否配准一致 (尺寸, 间距, 原点, 方向).
    #[inline]
    fn check_co_registered<T: VolumeAttr>(
        &self,
        other: &T,
        tolerance: f64,
    ) -> Result<(), GeometryMismatch> {
        self.geometry()
            .check_co_registered(other.geometry(), tolerance)
    }
}

/// 保证数组按 `geometry` 给出的 `(z, y, x)` 形状存储.
#[inline]
fn assert_shape<T>(geometry: &Geometry, data: &Array3<T>) {
    let (z, y, x) = geometry.shape();
    assert_eq!(data.dim(), (z, y, x), "数据形状与几何信息不一致");
}

impl VolumeAttr for Volume {
    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[inline]
    fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for Volume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl Volume {
    /// 打开 NIfTI (`.nii`, `.nii.gz`) 或 NRRD (`.nrrd`, `.nhdr`) 格式的三维扫描.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let raw = io::read_volume(path.as_ref())?;
        Ok(Self::from_parts(raw.geometry, raw.pixel_type, raw.data))
    }

    /// 根据几何信息和 `(z, y, x)` 组织的强度数据直接创建扫描.
    ///
    /// 若数据形状与几何信息不一致, 则程序 panic.
    pub fn from_parts(geometry: Geometry, pixel_type: PixelType, data: Array3<f32>) -> Self {
        assert_shape(&geometry, &data);
        Self {
            geometry,
            pixel_type,
            data,
        }
    }

    /// 以相同几何信息替换强度数据, 得到新的扫描. `self` 保持不变.
    #[inline]
    pub fn with_data(&self, pixel_type: PixelType, data: Array3<f32>) -> Self {
        Self::from_parts(self.geometry.clone(), pixel_type, data)
    }

    /// 以 NIfTI 格式保存到 `path`. 体素以 `f32` 写出.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeError> {
        io::write_nifti_f32(path.as_ref(), &self.geometry, self.data.view())
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, f32> {
        self.data.view_mut()
    }

    /// 取出底层数组.
    #[inline]
    pub fn into_data(self) -> Array3<f32> {
        self.data
    }

    /// 获取 z 空间的第 `z_index` 层切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), z_index)
    }
}

impl VolumeAttr for Mask {
    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[inline]
    fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }
}

impl Index<Idx3d> for Mask {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for Mask {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl Mask {
    /// 打开 NIfTI 或 NRRD 格式的三维标注. 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    ///
    /// 标注中只允许出现 `0..=255` 的整数, 否则返回 [`VolumeError::InvalidLabel`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let raw = io::read_volume(path.as_ref())?;
        if let Some(&bad) = raw
            .data
            .iter()
            .find(|v| !(v.fract() == 0.0 && (0.0..=255.0).contains(*v)))
        {
            return Err(VolumeError::InvalidLabel(bad));
        }
        let data = raw.data.mapv(|v| v as u8);
        Ok(Self::from_parts(raw.geometry, raw.pixel_type, data))
    }

    /// 根据几何信息和 `(z, y, x)` 组织的标签数据直接创建标注.
    ///
    /// 若数据形状与几何信息不一致, 则程序 panic.
    pub fn from_parts(geometry: Geometry, pixel_type: PixelType, data: Array3<u8>) -> Self {
        assert_shape(&geometry, &data);
        Self {
            geometry,
            pixel_type,
            data,
        }
    }

    /// 以 NIfTI 格式保存到 `path`. 标签以 `u8` 写出.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeError> {
        io::write_nifti_u8(path.as_ref(), &self.geometry, self.data.view())
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, u8> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, u8> {
        self.data.view_mut()
    }

    /// 获取 z 空间的第 `z_index` 层切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView2<'_, u8> {
        self.data.index_axis(Axis(0), z_index)
    }

    /// 获取值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 获取病灶体素个数.
    #[inline]
    pub fn lesion_count(&self) -> usize {
        self.count(LESION)
    }

    /// 标注中出现过的所有标签值, 升序.
    pub fn labels(&self) -> Vec<u8> {
        let mut seen = [false; 256];
        self.data.iter().for_each(|&p| seen[p as usize] = true);
        (0..=255u8).filter(|&l| seen[l as usize]).collect()
    }

    /// 以标签值为权重的质心 `(z, y, x)`. 标注全为背景时返回 `None`.
    pub fn center_of_mass(&self) -> Option<[f64; 3]> {
        let mut total = 0.0;
        let mut acc = [0.0; 3];
        for ((z, y, x), &p) in self.data.indexed_iter() {
            if p == 0 {
                continue;
            }
            let w = p as f64;
            total += w;
            acc[0] += w * z as f64;
            acc[1] += w * y as f64;
            acc[2] += w * x as f64;
        }
        (total > 0.0).then(|| acc.map(|v| v / total))
    }
}
