//! 体数据读写. 按扩展名分派到 NIfTI 或 NRRD 解析器.

use std::path::{Path, PathBuf};

use ndarray::Array3;

use super::{Geometry, PixelType};

mod nifti;
mod nrrd;

pub(crate) use self::nifti::{write_nifti_f32, write_nifti_u8};
pub use self::nrrd::NrrdError;

/// 体数据读写错误.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    /// 文件扩展名不属于支持的格式.
    #[error("无法识别的体数据格式: {0}")]
    UnsupportedFormat(PathBuf),

    /// NIfTI 底层错误.
    #[error("NIfTI 读写错误: {0}")]
    Nifti(#[from] ::nifti::NiftiError),

    /// NRRD 解析错误.
    #[error("NRRD 解析错误: {0}")]
    Nrrd(#[from] NrrdError),

    /// 其他底层 I/O 错误.
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 体素类型不受支持 (复数, RGB 等).
    #[error("不支持的体素类型: {0}")]
    UnsupportedPixelType(String),

    /// 数据不是三维的.
    #[error("仅支持三维体数据, 实际形状为 {0:?}")]
    NotThreeDimensional(Vec<usize>),

    /// 标注中存在负数、非整数或超过 255 的值.
    #[error("标注中存在非法标签值 {0}: 标签必须为 0..=255 的整数")]
    InvalidLabel(f32),
}

/// 支持的体数据文件格式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VolumeFormat {
    /// `.nii` 或 `.nii.gz`.
    Nifti,

    /// `.nrrd` (数据内嵌) 或 `.nhdr` (数据分离).
    Nrrd,
}

impl VolumeFormat {
    /// 根据扩展名 (不区分大小写) 判断格式.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            Some(Self::Nifti)
        } else if name.ends_with(".nrrd") || name.ends_with(".nhdr") {
            Some(Self::Nrrd)
        } else {
            None
        }
    }
}

/// 读取后的体数据, 尚未区分扫描和标注.
#[derive(Debug)]
pub(crate) struct RawVolume {
    pub geometry: Geometry,
    pub pixel_type: PixelType,
    /// `(z, y, x)`, standard layout.
    pub data: Array3<f32>,
}

/// 读取 `path` 处的体数据.
pub(crate) fn read_volume(path: &Path) -> Result<RawVolume, VolumeError> {
    match VolumeFormat::from_path(path) {
        Some(VolumeFormat::Nifti) => nifti::read(path),
        Some(VolumeFormat::Nrrd) => nrrd::read(path),
        None => Err(VolumeError::UnsupportedFormat(path.to_owned())),
    }
}
