//! 预处理: 加载扫描与标注, 对扫描做强度归一化, 对两者做重采样.
//!
//! # 注意
//!
//! 1. 两个输入路径会在读取任何数据 **之前** 检查. 任一失败则返回
//!   [`PreprocessError::InputNotFound`], 且不会写出任何文件.
//! 2. 归一化只作用于扫描, 标注永远不会被归一化.
//! 3. 输入的 [`Volume`] / [`Mask`] 不会被修改, 每一步都返回新的对象.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::data::{Mask, Volume, VolumeError};

mod bspline;
pub mod normalize;
pub mod resample;

pub use normalize::{NormalizeMethod, Normalizer};
pub use resample::{resample_image, resample_mask, MaskInterpolation};

/// MRI 序列模态. 在 [`Preprocessor`] 构建时确定.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Modality {
    /// T1 加权像.
    T1,
    /// T2 加权像.
    T2,
}

/// 无法识别的模态名称.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("无效的模态 {0:?}, 只能选择 \"T1\" 或 \"T2\"")]
pub struct UnknownModality(pub String);

impl FromStr for Modality {
    type Err = UnknownModality;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "T1" => Ok(Self::T1),
            "T2" => Ok(Self::T2),
            other => Err(UnknownModality(other.to_string())),
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::T1 => "T1",
            Self::T2 => "T2",
        })
    }
}

/// 预处理选项. 所有字段都有默认值, 可以从配置文件中部分给出.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    /// 归一化方法.
    pub normalize_method: NormalizeMethod,

    /// 标注重采样方式.
    pub mask_interpolation: MaskInterpolation,

    /// 重采样目标体素间距 `(x, y, z)`, 默认 1 毫米各向同性.
    pub target_spacing: [f64; 3],

    /// 覆盖模态默认的参考标志点.
    pub reference_landmarks: Option<Vec<f64>>,

    /// 若给出, 则把预处理结果以时间戳命名保存到该目录.
    pub save_dir: Option<PathBuf>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            normalize_method: NormalizeMethod::default(),
            mask_interpolation: MaskInterpolation::default(),
            target_spacing: [1.0; 3],
            reference_landmarks: None,
            save_dir: None,
        }
    }
}

/// 输入文件的具体问题.
#[derive(Debug, thiserror::Error)]
pub enum InputProblem {
    /// 路径不存在, 或不是普通文件.
    #[error("文件不存在")]
    Missing,

    /// 文件存在但无法解码为体数据.
    #[error("无法解码为体数据")]
    Unreadable(#[source] VolumeError),
}

/// 预处理错误.
#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    /// 输入文件缺失或不可读.
    #[error("输入文件 {path:?} 无法使用")]
    InputNotFound {
        /// 出错的路径.
        path: PathBuf,
        /// 原因.
        #[source]
        problem: InputProblem,
    },

    /// 自定义参考标志点数量不对或不严格递增.
    #[error("参考标志点无效: {0:?}")]
    InvalidReference(Vec<f64>),

    /// 目标体素间距不是有限正数.
    #[error("目标体素间距无效: {0:?}")]
    InvalidSpacing([f64; 3]),

    /// 保存预处理结果失败.
    #[error("无法保存预处理结果到 {path:?}")]
    Save {
        /// 目标文件.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: VolumeError,
    },
}

/// 检查输入路径指向一个已存在的普通文件.
fn check_input(path: &Path) -> Result<(), PreprocessError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PreprocessError::InputNotFound {
            path: path.to_path_buf(),
            problem: InputProblem::Missing,
        })
    }
}

#[inline]
fn unreadable(path: &Path) -> impl FnOnce(VolumeError) -> PreprocessError + '_ {
    move |e| PreprocessError::InputNotFound {
        path: path.to_path_buf(),
        problem: InputProblem::Unreadable(e),
    }
}

/// 本进程内保存结果的序号, 保证同一毫秒内的多次保存不会相互覆盖.
static SAVE_SEQ: AtomicU64 = AtomicU64::new(0);

/// 预处理器. 构建后不可变, 可跨线程共享.
#[derive(Clone, Debug)]
pub struct Preprocessor {
    modality: Modality,
    options: PreprocessOptions,
    normalizer: Normalizer,
}

impl Preprocessor {
    /// 以默认选项构建.
    pub fn new(modality: Modality) -> Self {
        Self {
            modality,
            options: PreprocessOptions::default(),
            normalizer: Normalizer::new(modality, NormalizeMethod::default()),
        }
    }

    /// 以自定义选项构建. 参考标志点或目标间距无效时返回 `Err`.
    pub fn with_options(modality: Modality, options: PreprocessOptions) -> Result<Self, PreprocessError> {
        if !options.target_spacing.iter().all(|s| s.is_finite() && *s > 0.0) {
            return Err(PreprocessError::InvalidSpacing(options.target_spacing));
        }
        let normalizer = match &options.reference_landmarks {
            Some(reference) => Normalizer::with_reference(options.normalize_method, reference.clone())?,
            None => Normalizer::new(modality, options.normalize_method),
        };
        Ok(Self {
            modality,
            options,
            normalizer,
        })
    }

    /// 模态.
    #[inline]
    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// 选项.
    #[inline]
    pub fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    /// 加载扫描和标注. 两个路径都在读取前检查.
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        image_path: P,
        mask_path: Q,
    ) -> Result<(Volume, Mask), PreprocessError> {
        let (image_path, mask_path) = (image_path.as_ref(), mask_path.as_ref());
        check_input(image_path)?;
        check_input(mask_path)?;

        log::info!("加载扫描 {image_path:?}");
        let image = Volume::open(image_path).map_err(unreadable(image_path))?;
        log::info!("加载标注 {mask_path:?}");
        let mask = Mask::open(mask_path).map_err(unreadable(mask_path))?;
        Ok((image, mask))
    }

    /// 对扫描做强度归一化.
    #[inline]
    pub fn normalize_image(&self, image: &Volume) -> Volume {
        log::info!("{} 扫描强度归一化 ({:?})", self.modality, self.normalizer.method());
        self.normalizer.normalize(image)
    }

    /// 把扫描和标注重采样到目标体素间距.
    pub fn resample_pair(&self, image: &Volume, mask: &Mask) -> (Volume, Mask) {
        let spacing = self.options.target_spacing;
        log::info!("重采样到 {spacing:?}");
        (
            resample_image(image, spacing),
            resample_mask(mask, spacing, self.options.mask_interpolation),
        )
    }

    /// 若配置了 `save_dir`, 则保存预处理结果并返回写出的两个路径.
    ///
    /// 文件名形如 `image_<YYYY_mm_dd_HH_MM_SS_fff>_<序号>.nii`.
    pub fn persist(&self, image: &Volume, mask: &Mask) -> Result<Option<(PathBuf, PathBuf)>, PreprocessError> {
        let Some(dir) = &self.options.save_dir else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir).map_err(|e| PreprocessError::Save {
            path: dir.clone(),
            source: e.into(),
        })?;
        let seq = SAVE_SEQ.fetch_add(1, Ordering::Relaxed);
        let stamp = format!("{}_{seq}", chrono::Local::now().format("%Y_%m_%d_%H_%M_%S_%3f"));
        let image_path = dir.join(format!("image_{stamp}.nii"));
        let mask_path = dir.join(format!("mask_{stamp}.nii"));
        image.save(&image_path).map_err(|source| PreprocessError::Save {
            path: image_path.clone(),
            source,
        })?;
        mask.save(&mask_path).map_err(|source| PreprocessError::Save {
            path: mask_path.clone(),
            source,
        })?;
        log::debug!("预处理结果已保存到 {image_path:?}, {mask_path:?}");
        Ok(Some((image_path, mask_path)))
    }

    /// 完整预处理: 加载, 可选归一化, 可选重采样, 可选保存.
    ///
    /// # 返回值
    ///
    /// 配准一致的 `(扫描, 标注)`. 归一化后扫描的体素类型为 `Float32`.
    pub fn preprocess<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        image_path: P,
        mask_path: Q,
        normalize: bool,
        resample: bool,
    ) -> Result<(Volume, Mask), PreprocessError> {
        let (mut image, mut mask) = self.load(image_path, mask_path)?;
        if normalize {
            image = self.normalize_image(&image);
        }
        if resample {
            (image, mask) = self.resample_pair(&image, &mask);
        }
        self.persist(&image, &mask)?;
        Ok((image, mask))
    }
}
