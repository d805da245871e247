//! 体数据几何信息: 尺寸, 体素间距, 原点, 方向余弦.
//!
//! 所有向量均以 `(x, y, z)` 顺序存储 (即文件中的 "最快变化轴" 在前),
//! 物理坐标统一使用 LPS 坐标系. 注意这与体素数组的 `(z, y, x)` 访问顺序相反.

use crate::Idx3d;

/// 3x3 方向矩阵, 行优先. 第 `c` 列是第 `c` 个体素轴在物理空间中的单位方向.
pub type Direction = [[f64; 3]; 3];

/// 单位方向矩阵.
pub const IDENTITY_DIRECTION: Direction = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// 体数据几何信息.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    size: [usize; 3],
    spacing: [f64; 3],
    origin: [f64; 3],
    direction: Direction,
}

/// 两个体数据不满足配准一致性 (co-registered).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryMismatch {
    /// 体素网格尺寸不一致.
    #[error("体素网格尺寸不一致: {0:?} != {1:?}")]
    Size([usize; 3], [usize; 3]),

    /// 体素间距不一致.
    #[error("体素间距不一致: {0:?} != {1:?}")]
    Spacing([f64; 3], [f64; 3]),

    /// 原点不一致.
    #[error("原点不一致: {0:?} != {1:?}")]
    Origin([f64; 3], [f64; 3]),

    /// 方向矩阵不一致.
    #[error("方向矩阵不一致: {0:?} != {1:?}")]
    Direction(Direction, Direction),
}

#[inline]
fn close(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance * (1.0 + a.abs().max(b.abs()))
}

#[inline]
fn close3(a: &[f64; 3], b: &[f64; 3], tolerance: f64) -> bool {
    a.iter().zip(b).all(|(p, q)| close(*p, *q, tolerance))
}

impl Geometry {
    /// 构建几何信息.
    ///
    /// `spacing` 的分量必须为有限正数, `size` 的分量必须非零, 否则程序 panic.
    pub fn new(size: [usize; 3], spacing: [f64; 3], origin: [f64; 3], direction: Direction) -> Self {
        assert!(size.iter().all(|&n| n > 0), "体素网格尺寸不能为零: {size:?}");
        assert!(
            spacing.iter().all(|s| s.is_finite() && *s > 0.0),
            "体素间距必须为正数: {spacing:?}"
        );
        Self {
            size,
            spacing,
            origin,
            direction,
        }
    }

    /// 单位间距, 零原点, 单位方向的几何信息.
    #[inline]
    pub fn identity(size: [usize; 3]) -> Self {
        Self::new(size, [1.0; 3], [0.0; 3], IDENTITY_DIRECTION)
    }

    /// 以 `(x, y, z)` 顺序给出的体素个数.
    #[inline]
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// 以 `(x, y, z)` 顺序给出的体素间距, 以毫米为单位.
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 第一个体素中心的物理坐标.
    #[inline]
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// 方向余弦矩阵.
    #[inline]
    pub fn direction(&self) -> &Direction {
        &self.direction
    }

    /// 数组形状 `(z, y, x)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let [x, y, z] = self.size;
        (z, y, x)
    }

    /// 体素总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.size.iter().product()
    }

    /// 几何信息总是描述非空网格.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// 单个体素的实际体积, 以立方毫米为单位.
    #[inline]
    pub fn voxel_volume(&self) -> f64 {
        self.spacing.iter().product()
    }

    /// 体素索引 `(z, y, x)` 对应的物理坐标.
    pub fn index_to_physical(&self, (z, y, x): Idx3d) -> [f64; 3] {
        let scaled = [
            x as f64 * self.spacing[0],
            y as f64 * self.spacing[1],
            z as f64 * self.spacing[2],
        ];
        let mut p = self.origin;
        for (r, pr) in p.iter_mut().enumerate() {
            *pr += (0..3).map(|c| self.direction[r][c] * scaled[c]).sum::<f64>();
        }
        p
    }

    /// 以相同物理范围、相同原点与方向, 重采样到 `spacing` 后的几何信息.
    ///
    /// 每个轴的新尺寸为 `round(size * old_spacing / spacing)`, 且至少为 1.
    pub fn resampled(&self, spacing: [f64; 3]) -> Self {
        let mut size = [0usize; 3];
        for (a, n) in size.iter_mut().enumerate() {
            *n = ((self.size[a] as f64 * self.spacing[a] / spacing[a]).round() as usize).max(1);
        }
        Self::new(size, spacing, self.origin, self.direction)
    }

    /// 检查 `self` 与 `other` 是否配准一致.
    ///
    /// 尺寸必须完全相同; 间距、原点和方向允许 `tolerance` 的相对误差.
    pub fn check_co_registered(&self, other: &Self, tolerance: f64) -> Result<(), GeometryMismatch> {
        if self.size != other.size {
            return Err(GeometryMismatch::Size(self.size, other.size));
        }
        if !close3(&self.spacing, &other.spacing, tolerance) {
            return Err(GeometryMismatch::Spacing(self.spacing, other.spacing));
        }
        if !close3(&self.origin, &other.origin, tolerance) {
            return Err(GeometryMismatch::Origin(self.origin, other.origin));
        }
        let same_direction = self
            .direction
            .iter()
            .zip(other.direction.iter())
            .all(|(a, b)| close3(a, b, tolerance));
        if !same_direction {
            return Err(GeometryMismatch::Direction(self.direction, other.direction));
        }
        Ok(())
    }
}

/// 体素在文件中的原始数值类型.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PixelType {
    /// `u8`.
    Uint8,
    /// `i8`.
    Int8,
    /// `u16`.
    Uint16,
    /// `i16`.
    Int16,
    /// `u32`.
    Uint32,
    /// `i32`.
    Int32,
    /// `u64`.
    Uint64,
    /// `i64`.
    Int64,
    /// `f32`.
    Float32,
    /// `f64`.
    Float64,
}

impl PixelType {
    /// 从 NIfTI `datatype` 编码解析. 不支持的编码 (复数, RGB 等) 返回 `None`.
    pub fn from_nifti_code(code: i16) -> Option<Self> {
        Some(match code {
            2 => Self::Uint8,
            4 => Self::Int16,
            8 => Self::Int32,
            16 => Self::Float32,
            64 => Self::Float64,
            256 => Self::Int8,
            512 => Self::Uint16,
            768 => Self::Uint32,
            1024 => Self::Int64,
            1280 => Self::Uint64,
            _ => return None,
        })
    }

    /// 从 NRRD `type` 字段解析.
    pub fn from_nrrd_name(name: &str) -> Option<Self> {
        Some(match name.trim() {
            "signed char" | "int8" | "int8_t" => Self::Int8,
            "uchar" | "unsigned char" | "uint8" | "uint8_t" => Self::Uint8,
            "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
                Self::Int16
            }
            "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
                Self::Uint16
            }
            "int" | "signed int" | "int32" | "int32_t" => Self::Int32,
            "uint" | "unsigned int" | "uint32" | "uint32_t" => Self::Uint32,
            "longlong" | "long long" | "long long int" | "signed long long"
            | "signed long long int" | "int64" | "int64_t" => Self::Int64,
            "ulonglong" | "unsigned long long" | "unsigned long long int" | "uint64"
            | "uint64_t" => Self::Uint64,
            "float" => Self::Float32,
            "double" => Self::Float64,
            _ => return None,
        })
    }

    /// 单个体素占用的字节数.
    #[inline]
    pub const fn byte_size(&self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Uint64 | Self::Int64 | Self::Float64 => 8,
        }
    }

    /// 是否为浮点类型.
    #[inline]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}
