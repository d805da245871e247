//! 影像组学特征计算引擎.
//!
//! 特征命名, 参数文件格式以及各特征的定义与 PyRadiomics 保持一致, 因此由 PyRadiomics
//! 训练得到的模型可以直接使用本引擎的输出. 只支持原始图像 (`Original`).
//!
//! # 注意
//!
//! 1. 对当前 ROI 没有定义的特征 (例如单个体素的纹理特征) 输出 `NaN`, 不会报错.
//! 2. 输出顺序固定: 诊断信息, `shape` (若启用), 其余特征类按参数文件中的顺序.
//!   每个特征类内部按参数文件中列出的顺序; 未列出时按特征名的字典序.
//! 3. 启用 `rayon` 时各特征类并行计算, 结果顺序不受影响.

use crate::data::{Mask, Volume};

mod firstorder;
mod glcm;
mod gldm;
mod glrlm;
mod glszm;
mod matrix;
mod mesh;
mod ngtdm;
pub mod params;
mod roi;
mod shape;

pub use params::{Discretization, Params, Settings};

/// 参数文件错误.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    /// 无法读取参数文件.
    #[error("无法读取参数文件: {0}")]
    Io(#[from] std::io::Error),

    /// YAML 语法错误或存在未知字段.
    #[error("参数文件格式错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 不支持的图像类型.
    #[error("不支持的图像类型 {0}, 只支持 Original")]
    UnsupportedImageType(String),

    /// 未知的特征类.
    #[error("未知的特征类 {0:?}")]
    UnknownClass(String),

    /// 特征类中没有该特征.
    #[error("特征类 {class} 中没有特征 {feature:?}")]
    UnknownFeature {
        /// 特征类.
        class: &'static str,
        /// 特征名.
        feature: String,
    },

    /// 设置的取值不受支持.
    #[error("设置 {key} 的取值 {value} 不受支持")]
    UnsupportedSetting {
        /// 设置名.
        key: &'static str,
        /// 取值.
        value: String,
    },
}

/// ROI 不满足计算条件.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoiError {
    /// 标注中没有该标签.
    #[error("标注中没有标签为 {0} 的体素")]
    Empty(u8),

    /// 体素个数少于 `minimumROISize`.
    #[error("ROI 只有 {actual} 个体素, 少于 {minimum}")]
    TooSmall {
        /// 实际体素个数.
        actual: usize,
        /// 要求的最少个数.
        minimum: usize,
    },

    /// 包围盒维度少于 `minimumROIDimensions`.
    #[error("ROI 只有 {actual} 个维度, 少于 {minimum}")]
    TooFewDimensions {
        /// 实际维度.
        actual: usize,
        /// 要求的最少维度.
        minimum: usize,
    },
}

/// 特征类.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FeatureClass {
    /// 一阶统计量.
    FirstOrder,
    /// 三维形状特征.
    Shape,
    /// 灰度共生矩阵.
    Glcm,
    /// 灰度游程矩阵.
    Glrlm,
    /// 灰度区域大小矩阵.
    Glszm,
    /// 灰度相依矩阵.
    Gldm,
    /// 邻域灰度差矩阵.
    Ngtdm,
}

impl FeatureClass {
    /// 全部特征类, 即参数文件省略 `featureClass` 时的启用顺序.
    pub const ALL: [Self; 7] = [
        Self::FirstOrder,
        Self::Shape,
        Self::Glcm,
        Self::Glrlm,
        Self::Glszm,
        Self::Gldm,
        Self::Ngtdm,
    ];

    /// 参数文件及特征名中使用的名称.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FirstOrder => "firstorder",
            Self::Shape => "shape",
            Self::Glcm => "glcm",
            Self::Glrlm => "glrlm",
            Self::Glszm => "glszm",
            Self::Gldm => "gldm",
            Self::Ngtdm => "ngtdm",
        }
    }

    /// 根据名称查找.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// 该类支持的全部特征, 按字典序.
    pub fn feature_names(&self) -> &'static [&'static str] {
        match self {
            Self::FirstOrder => &firstorder::FEATURES,
            Self::Shape => &shape::FEATURES,
            Self::Glcm => &glcm::FEATURES,
            Self::Glrlm => &glrlm::FEATURES,
            Self::Glszm => &glszm::FEATURES,
            Self::Gldm => &gldm::FEATURES,
            Self::Ngtdm => &ngtdm::FEATURES,
        }
    }

    /// 参数文件未列出具体特征时启用的特征, 即去掉已弃用特征后的 [`Self::feature_names`].
    pub fn default_features(&self) -> Vec<&'static str> {
        let deprecated: &[&str] = match self {
            Self::Shape => &shape::DEPRECATED,
            _ => &[],
        };
        self.feature_names()
            .iter()
            .filter(|f| !deprecated.contains(f))
            .copied()
            .collect()
    }

    /// 计算该类全部特征, 与 [`Self::feature_names`] 一一对应.
    fn compute(&self, roi: &roi::Roi, settings: &Settings) -> Vec<f64> {
        match self {
            Self::FirstOrder => firstorder::compute(roi, settings),
            Self::Shape => shape::compute(roi),
            Self::Glcm => glcm::compute(roi),
            Self::Glrlm => glrlm::compute(roi),
            Self::Glszm => glszm::compute(roi),
            Self::Gldm => gldm::compute(roi, settings.gldm_alpha),
            Self::Ngtdm => ngtdm::compute(roi),
        }
    }
}

/// 按列求忽略 `NaN` 的平均值. 某列全为 `NaN` (或没有行) 时结果为 `NaN`.
fn nan_mean(rows: &[Vec<f64>], width: usize) -> Vec<f64> {
    (0..width)
        .map(|c| {
            let (sum, n) = rows
                .iter()
                .map(|r| r[c])
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 {
                f64::NAN
            } else {
                sum / n as f64
            }
        })
        .collect()
}

/// 特征计算引擎. 构建后不可变, 可跨线程共享.
#[derive(Clone, Debug)]
pub struct Engine {
    enabled: Vec<(FeatureClass, Vec<&'static str>)>,
    settings: Settings,
}

impl Engine {
    /// 由解析好的参数构建.
    pub fn new(params: Params) -> Self {
        let mut enabled = params.enabled;
        // shape 总是最先计算.
        enabled.sort_by_key(|(c, _)| *c != FeatureClass::Shape);
        Self {
            enabled,
            settings: params.settings,
        }
    }

    /// 从 YAML 文本构建.
    pub fn from_yaml_str(text: &str) -> Result<Self, ParamsError> {
        Params::from_yaml_str(text).map(Self::new)
    }

    /// 提取设置.
    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// 输出的全部特征名 (不含诊断信息), 按输出顺序.
    pub fn feature_names(&self) -> Vec<String> {
        self.enabled
            .iter()
            .flat_map(|(class, names)| names.iter().map(move |n| feature_name(*class, n)))
            .collect()
    }

    /// 在配准一致的扫描和标注上计算特征.
    ///
    /// # 返回值
    ///
    /// 有序的 `(特征名, 值)` 列表, 以诊断信息开头.
    ///
    /// # 注意
    ///
    /// 扫描与标注的数组形状不一致时程序 panic. 调用方应先检查配准一致性.
    pub fn execute(&self, image: &Volume, mask: &Mask) -> Result<Vec<(String, f64)>, RoiError> {
        let roi = roi::Roi::new(image, mask, &self.settings)?;
        let mut out = diagnostics(image, mask, &roi, self.settings.label);

        let compute = |(class, _): &(FeatureClass, Vec<&'static str>)| class.compute(&roi, &self.settings);
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                use rayon::prelude::*;
                let results: Vec<Vec<f64>> = self.enabled.par_iter().map(compute).collect();
            } else {
                let results: Vec<Vec<f64>> = self.enabled.iter().map(compute).collect();
            }
        }

        for ((class, names), values) in self.enabled.iter().zip(results) {
            let all = class.feature_names();
            for name in names {
                // 构建时已保证特征名合法.
                if let Some(k) = all.iter().position(|f| f == name) {
                    out.push((feature_name(*class, name), values[k]));
                }
            }
        }
        log::debug!("计算得到 {} 个特征 (含诊断信息)", out.len());
        Ok(out)
    }
}

#[inline]
fn feature_name(class: FeatureClass, feature: &str) -> String {
    format!("{}_{}_{}", crate::consts::names::ORIGINAL, class.name(), feature)
}

/// 数值型诊断信息.
fn diagnostics(image: &Volume, mask: &Mask, roi: &roi::Roi, label: u8) -> Vec<(String, f64)> {
    let (mean, _) = crate::stats::mean_std(image.data().iter().map(|v| *v as f64));
    let (min, max) = image
        .data()
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v as f64), hi.max(*v as f64))
        });
    let prefix = crate::consts::names::DIAGNOSTICS;
    vec![
        (format!("{prefix}_Image-original_Mean"), mean),
        (format!("{prefix}_Image-original_Minimum"), min),
        (format!("{prefix}_Image-original_Maximum"), max),
        (format!("{prefix}_Mask-original_VoxelNum"), roi.len() as f64),
        (format!("{prefix}_Mask-original_VolumeNum"), roi::count_components(mask, label) as f64),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_feature_lists_are_sorted_and_complete() {
        let counts: Vec<usize> = FeatureClass::ALL.iter().map(|c| c.feature_names().len()).collect();
        assert_eq!(counts, vec![18, 17, 23, 16, 16, 14, 5]);
        assert_eq!(FeatureClass::Shape.default_features().len(), 14);
        assert!(!FeatureClass::Shape.default_features().contains(&"Compactness1"));
        assert_eq!(FeatureClass::Glcm.default_features().len(), 23);
        for class in FeatureClass::ALL {
            let names = class.feature_names();
            assert!(names.windows(2).all(|w| w[0] < w[1]), "{}", class.name());
            assert_eq!(FeatureClass::from_name(class.name()), Some(class));
        }
    }

    #[test]
    fn test_nan_mean() {
        let rows = vec![vec![1.0, f64::NAN, f64::NAN], vec![3.0, 2.0, f64::NAN]];
        let m = nan_mean(&rows, 3);
        assert_eq!(&m[..2], &[2.0, 2.0]);
        assert!(m[2].is_nan());
        assert!(nan_mean(&[], 2).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_execute_full_params() {
        let engine = Engine::from_yaml_str(test_support::FULL_PARAMS).unwrap();
        let vol = test_support::textured_volume((8, 8, 8), [1.0; 3]);
        let mask = test_support::block_mask((8, 8, 8), [1.0; 3]);
        let out = engine.execute(&vol, &mask).unwrap();

        assert_eq!(out.len(), 5 + 18 + 14 + 23 + 16 + 16 + 14 + 5);
        assert_eq!(out[0].0, "diagnostics_Image-original_Mean");
        assert_eq!(out[3], ("diagnostics_Mask-original_VoxelNum".to_string(), 64.0));
        assert_eq!(out[4], ("diagnostics_Mask-original_VolumeNum".to_string(), 1.0));
        // shape 排在最前.
        assert_eq!(out[5].0, "original_shape_Elongation");
        assert_eq!(out[19].0, "original_firstorder_10Percentile");
        assert_eq!(
            out.iter().skip(5).map(|(n, _)| n.clone()).collect::<Vec<_>>(),
            engine.feature_names()
        );
        // 64 个体素的立方体纹理上, 所有特征都有定义.
        for (name, value) in &out {
            assert!(value.is_finite(), "{name} = {value}");
        }
        let voxel_volume = out.iter().find(|(n, _)| n == "original_shape_VoxelVolume").unwrap().1;
        assert_eq!(voxel_volume, 64.0);
        let mesh_volume = out.iter().find(|(n, _)| n == "original_shape_MeshVolume").unwrap().1;
        assert!((mesh_volume - (64.0 - 4.5 - 5.0 / 6.0)).abs() < 1e-9);

        // 确定性.
        assert_eq!(engine.execute(&vol, &mask).unwrap(), out);
    }

    #[test]
    fn test_single_voxel_roi() {
        let engine = Engine::from_yaml_str(test_support::FULL_PARAMS).unwrap();
        let vol = test_support::constant_volume(10, 100.0);
        let mask = test_support::center_voxel_mask(10);
        let out = engine.execute(&vol, &mask).unwrap();
        let get = |n: &str| out.iter().find(|(k, _)| k == n).unwrap().1;
        assert_eq!(get("original_firstorder_Mean"), 100.0);
        assert_eq!(get("original_firstorder_Variance"), 0.0);
        assert_eq!(get("original_shape_VoxelVolume"), 1.0);
        assert!(get("original_shape_Sphericity").is_finite());
        assert!(get("original_shape_Elongation").is_nan());
        assert!(get("original_glcm_MCC").is_nan());
        assert!(get("original_glcm_Contrast").is_nan());
        assert!(get("original_glrlm_RunPercentage").is_nan());
        assert!(get("original_ngtdm_Coarseness").is_nan());
        assert_eq!(get("original_glszm_ZonePercentage"), 1.0);
    }

    #[test]
    fn test_empty_roi() {
        let engine = Engine::from_yaml_str("setting:\n  label: 3\n").unwrap();
        let vol = test_support::textured_volume((4, 4, 4), [1.0; 3]);
        let mask = test_support::block_mask((4, 4, 4), [1.0; 3]);
        assert_eq!(engine.execute(&vol, &mask), Err(RoiError::Empty(3)));
    }
}
