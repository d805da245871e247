//! NIfTI-1 读写. 方向由 sform (优先) 或 qform 给出, 统一转换到 LPS.

use std::path::Path;

use ::nifti::writer::WriterOptions;
use ::nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use ndarray::{Array3, ArrayView3, Axis, Ix3};

use super::{RawVolume, VolumeError};
use crate::data::{Direction, Geometry, PixelType, IDENTITY_DIRECTION};

/// RAS <-> LPS: x, y 两个轴取反.
const RAS_TO_LPS: [f64; 3] = [-1.0, -1.0, 1.0];

pub(super) fn read(path: &Path) -> Result<RawVolume, VolumeError> {
    let obj = ReaderOptions::new().read_file(path)?;
    let header = obj.header().clone();
    let pixel_type = PixelType::from_nifti_code(header.datatype)
        .ok_or_else(|| VolumeError::UnsupportedPixelType(format!("NIfTI datatype {}", header.datatype)))?;

    let mut data = obj.into_volume().into_ndarray::<f32>()?;
    // 允许 [W, H, z, 1, ...] 形式的伪四维数据.
    while data.ndim() > 3 && data.len_of(Axis(data.ndim() - 1)) == 1 {
        let last = Axis(data.ndim() - 1);
        data = data.index_axis_move(last, 0);
    }
    let shape = data.shape().to_vec();
    if shape.contains(&0) {
        return Err(VolumeError::NotThreeDimensional(shape));
    }
    let data = data
        .into_dimensionality::<Ix3>()
        .map_err(|_| VolumeError::NotThreeDimensional(shape))?;

    // [W, H, z] -> [z, H, W].
    let (w, h, z) = data.dim();
    let data = data.permuted_axes([2, 1, 0]);
    let data = if data.is_standard_layout() {
        data
    } else {
        data.as_standard_layout().to_owned()
    };
    // The nature of nifti data field layout.
    debug_assert!(data.is_standard_layout());

    let geometry = geometry_from_header(&header, [w, h, z]);
    Ok(RawVolume {
        geometry,
        pixel_type,
        data,
    })
}

/// 从 header 获取几何信息. 间距取自 `pixdim`, 方向与原点取自 sform 或 qform.
fn geometry_from_header(header: &NiftiHeader, size: [usize; 3]) -> Geometry {
    let mut spacing = [0.0; 3];
    for (a, s) in spacing.iter_mut().enumerate() {
        let v = header.pixdim[a + 1].abs() as f64;
        *s = if v.is_finite() && v > 0.0 { v } else { 1.0 };
    }

    let (ras_direction, ras_origin) = if header.sform_code > 0 {
        sform_direction(header)
    } else if header.qform_code > 0 {
        qform_direction(header)
    } else {
        (IDENTITY_DIRECTION, [0.0; 3])
    };

    let mut direction = ras_direction;
    let mut origin = ras_origin;
    for r in 0..3 {
        direction[r].iter_mut().for_each(|v| *v *= RAS_TO_LPS[r]);
        origin[r] *= RAS_TO_LPS[r];
    }
    Geometry::new(size, spacing, origin, direction)
}

/// 按列归一化 sform 仿射矩阵.
fn sform_direction(header: &NiftiHeader) -> (Direction, [f64; 3]) {
    let rows = [header.srow_x, header.srow_y, header.srow_z];
    let mut direction = [[0.0; 3]; 3];
    for c in 0..3 {
        let norm = rows
            .iter()
            .map(|r| (r[c] as f64).powi(2))
            .sum::<f64>()
            .sqrt();
        for r in 0..3 {
            direction[r][c] = if norm > 0.0 {
                rows[r][c] as f64 / norm
            } else {
                IDENTITY_DIRECTION[r][c]
            };
        }
    }
    let origin = [rows[0][3] as f64, rows[1][3] as f64, rows[2][3] as f64];
    (direction, origin)
}

/// 四元数转旋转矩阵, 第三列乘以 qfac.
fn qform_direction(header: &NiftiHeader) -> (Direction, [f64; 3]) {
    let (b, c, d) = (
        header.quatern_b as f64,
        header.quatern_c as f64,
        header.quatern_d as f64,
    );
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let direction = [
        [
            a * a + b * b - c * c - d * d,
            2.0 * (b * c - a * d),
            2.0 * (b * d + a * c) * qfac,
        ],
        [
            2.0 * (b * c + a * d),
            a * a + c * c - b * b - d * d,
            2.0 * (c * d - a * b) * qfac,
        ],
        [
            2.0 * (b * d - a * c),
            2.0 * (c * d + a * b),
            (a * a + d * d - c * c - b * b) * qfac,
        ],
    ];
    let origin = [
        header.quatern_x as f64,
        header.quatern_y as f64,
        header.quatern_z as f64,
    ];
    (direction, origin)
}

/// 根据几何信息构造 header. 只写 sform.
fn header_for(geometry: &Geometry) -> NiftiHeader {
    let mut header = NiftiHeader::default();
    let [w, h, z] = geometry.size();
    header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];

    let spacing = geometry.spacing();
    header.pixdim = [
        1.0,
        spacing[0] as f32,
        spacing[1] as f32,
        spacing[2] as f32,
        1.0,
        1.0,
        1.0,
        1.0,
    ];
    // NIFTI_UNITS_MM
    header.xyzt_units = 2;
    header.qform_code = 0;
    header.sform_code = 1;

    let direction = geometry.direction();
    let origin = geometry.origin();
    let mut rows = [[0f32; 4]; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        for c in 0..3 {
            row[c] = (RAS_TO_LPS[r] * direction[r][c] * spacing[c]) as f32;
        }
        row[3] = (RAS_TO_LPS[r] * origin[r]) as f32;
    }
    [header.srow_x, header.srow_y, header.srow_z] = rows;
    header
}

macro_rules! impl_nifti_write {
    ($($name: ident => $elem: ty),+) => {
        $(
            /// 将 `(z, y, x)` 组织的数据以 NIfTI 格式写出. 扩展名为 `.nii.gz` 时自动压缩.
            pub(crate) fn $name(
                path: &Path,
                geometry: &Geometry,
                data: ArrayView3<'_, $elem>,
            ) -> Result<(), VolumeError> {
                let header = header_for(geometry);
                // [z, H, W] -> [W, H, z].
                let data: Array3<$elem> = data.permuted_axes([2, 1, 0]).to_owned();
                WriterOptions::new(path)
                    .reference_header(&header)
                    .write_nifti(&data)?;
                Ok(())
            }
        )+
    };
}

impl_nifti_write!(write_nifti_f32 => f32, write_nifti_u8 => u8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_geometry_roundtrip() {
        let direction = [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let g = Geometry::new([3, 4, 5], [0.8, 0.9, 3.0], [12.5, -7.0, 40.0], direction);
        let header = header_for(&g);
        let back = geometry_from_header(&header, g.size());
        assert!(back.check_co_registered(&g, 1e-6).is_ok(), "{back:?}");
    }

    #[test]
    fn test_qform_identity_quaternion() {
        let mut header = NiftiHeader::default();
        header.qform_code = 1;
        header.sform_code = 0;
        header.pixdim = [1.0, 2.0, 2.0, 4.0, 1.0, 1.0, 1.0, 1.0];
        header.quatern_x = 10.0;
        header.quatern_y = 20.0;
        header.quatern_z = 30.0;
        let g = geometry_from_header(&header, [2, 2, 2]);
        assert_eq!(g.spacing(), [2.0, 2.0, 4.0]);
        // RAS 单位阵 -> LPS 下 x, y 取反.
        assert_eq!(
            g.direction(),
            &[[-1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, 1.0]]
        );
        assert_eq!(g.origin(), [-10.0, -20.0, 30.0]);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.nii.gz");
        let g = Geometry::new([3, 2, 2], [0.5, 0.5, 2.0], [-10.0, -20.0, 30.0], IDENTITY_DIRECTION);
        let data = Array3::from_shape_fn((2, 2, 3), |(z, y, x)| (z * 6 + y * 3 + x) as f32);
        write_nifti_f32(&path, &g, data.view()).unwrap();

        let vol = read(&path).unwrap();
        assert_eq!(vol.pixel_type, PixelType::Float32);
        assert!(vol.geometry.check_co_registered(&g, 1e-5).is_ok());
        assert_eq!(vol.data, data);
    }

    #[test]
    fn test_trailing_singleton_axes_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.nii");
        // [W, H, z, 1, 1]
        let data = ndarray::Array::from_shape_fn((3, 2, 2, 1, 1), |(x, y, z, _, _)| {
            (z * 6 + y * 3 + x) as f32
        });
        WriterOptions::new(&path).write_nifti(&data).unwrap();

        let vol = read(&path).unwrap();
        assert_eq!(vol.geometry.size(), [3, 2, 2]);
        assert_eq!(vol.data.dim(), (2, 2, 3));
        assert_eq!(vol.data[(1, 1, 2)], 11.0);
        assert_eq!(vol.data[(0, 1, 0)], 3.0);
    }

    #[test]
    fn test_rejects_four_dimensional_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.nii");
        let data = ndarray::Array4::<f32>::zeros((3, 2, 2, 2));
        WriterOptions::new(&path).write_nifti(&data).unwrap();
        assert!(matches!(
            read(&path),
            Err(VolumeError::NotThreeDimensional(shape)) if shape == vec![3, 2, 2, 2]
        ));
    }
}
