//! 特征提取参数文件 (与 PyRadiomics 的 YAML 格式兼容的子集).
//!
//! ```yaml
//! imageType:
//!   Original: {}
//! featureClass:
//!   firstorder: []
//!   glcm: [Contrast, Correlation]
//! setting:
//!   binWidth: 25
//!   label: 1
//! ```
//!
//! 缺少 `featureClass` 时启用全部特征类; 特征列表为空或 `null` 时启用该类全部特征.

use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;

use super::{FeatureClass, ParamsError};
use crate::consts::{label::LESION, GEOMETRY_TOLERANCE};

/// 强度离散化规则.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Discretization {
    /// 固定箱宽.
    BinWidth(f64),
    /// 固定箱数.
    BinCount(u32),
}

/// 提取设置.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// ROI 标签.
    pub label: u8,
    /// 离散化规则.
    pub discretization: Discretization,
    /// 计算 Energy, TotalEnergy, RootMeanSquared 前加到强度上的偏移.
    pub voxel_array_shift: f64,
    /// 配准检查的相对容差.
    pub geometry_tolerance: f64,
    /// ROI 最少体素个数.
    pub minimum_roi_size: Option<usize>,
    /// ROI 包围盒中长度大于 1 的维度的最少个数.
    pub minimum_roi_dimensions: Option<usize>,
    /// gldm 中灰度级 "相依" 的最大差值.
    pub gldm_alpha: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            label: LESION,
            discretization: Discretization::BinWidth(25.0),
            voxel_array_shift: 0.0,
            geometry_tolerance: GEOMETRY_TOLERANCE,
            minimum_roi_size: None,
            minimum_roi_dimensions: None,
            gldm_alpha: 0.0,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawParams {
    #[serde(rename = "imageType", default)]
    image_type: Option<serde_yaml::Mapping>,
    #[serde(rename = "featureClass", default)]
    feature_class: Option<serde_yaml::Mapping>,
    #[serde(default)]
    setting: Option<RawSettings>,
    /// 体素级特征图的设置, 不影响全局特征.
    #[serde(rename = "voxelSetting", default)]
    _voxel_setting: Option<Value>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawSettings {
    label: Option<u8>,
    bin_width: Option<f64>,
    bin_count: Option<u32>,
    voxel_array_shift: Option<f64>,
    geometry_tolerance: Option<f64>,
    #[serde(rename = "minimumROISize")]
    minimum_roi_size: Option<usize>,
    #[serde(rename = "minimumROIDimensions")]
    minimum_roi_dimensions: Option<usize>,
    #[serde(rename = "gldm_a")]
    gldm_a: Option<f64>,

    // 以下设置只接受与本实现行为一致的取值.
    normalize: Option<bool>,
    resampled_pixel_spacing: Option<Value>,
    #[serde(rename = "force2D")]
    force_2d: Option<bool>,
    distances: Option<Vec<u32>>,
    #[serde(rename = "symmetricalGLCM")]
    symmetrical_glcm: Option<bool>,
    weighting_norm: Option<Value>,

    // 以下设置被忽略.
    additional_info: Option<Value>,
    enable_c_extensions: Option<Value>,
    pre_crop: Option<Value>,
    pad_distance: Option<Value>,
    correct_mask: Option<Value>,
    interpolator: Option<Value>,
    #[serde(rename = "label_channel")]
    label_channel: Option<Value>,
}

#[inline]
fn unsupported(key: &'static str, value: impl std::fmt::Debug) -> ParamsError {
    ParamsError::UnsupportedSetting {
        key,
        value: format!("{value:?}"),
    }
}

impl RawSettings {
    fn into_settings(self) -> Result<Settings, ParamsError> {
        if self.normalize == Some(true) {
            return Err(unsupported("normalize", true));
        }
        if self.force_2d == Some(true) {
            return Err(unsupported("force2D", true));
        }
        if self.symmetrical_glcm == Some(false) {
            return Err(unsupported("symmetricalGLCM", false));
        }
        if let Some(d) = self.distances.filter(|d| d.as_slice() != [1]) {
            return Err(unsupported("distances", d));
        }
        if let Some(v) = self.resampled_pixel_spacing.filter(|v| !v.is_null()) {
            return Err(unsupported("resampledPixelSpacing", v));
        }
        if let Some(v) = self.weighting_norm.filter(|v| !v.is_null()) {
            return Err(unsupported("weightingNorm", v));
        }
        let ignored = [
            ("additionalInfo", &self.additional_info),
            ("enableCExtensions", &self.enable_c_extensions),
            ("preCrop", &self.pre_crop),
            ("padDistance", &self.pad_distance),
            ("correctMask", &self.correct_mask),
            ("interpolator", &self.interpolator),
            ("label_channel", &self.label_channel),
        ];
        for (key, value) in ignored {
            if let Some(v) = value {
                log::debug!("忽略设置 {key}: {v:?}");
            }
        }

        let mut settings = Settings::default();
        if let Some(label) = self.label {
            settings.label = label;
        }
        // 同时给出时箱数优先.
        match (self.bin_count, self.bin_width) {
            (Some(0), _) => return Err(unsupported("binCount", 0)),
            (Some(n), _) => settings.discretization = Discretization::BinCount(n),
            (None, Some(w)) if !(w.is_finite() && w > 0.0) => return Err(unsupported("binWidth", w)),
            (None, Some(w)) => settings.discretization = Discretization::BinWidth(w),
            (None, None) => {}
        }
        if let Some(shift) = self.voxel_array_shift {
            settings.voxel_array_shift = shift;
        }
        if let Some(tol) = self.geometry_tolerance {
            if !(tol.is_finite() && tol >= 0.0) {
                return Err(unsupported("geometryTolerance", tol));
            }
            settings.geometry_tolerance = tol;
        }
        settings.minimum_roi_size = self.minimum_roi_size;
        settings.minimum_roi_dimensions = self.minimum_roi_dimensions;
        if let Some(alpha) = self.gldm_a {
            if !(alpha.is_finite() && alpha >= 0.0) {
                return Err(unsupported("gldm_a", alpha));
            }
            settings.gldm_alpha = alpha;
        }
        Ok(settings)
    }
}

/// 解析并校验后的参数.
#[derive(Clone, Debug, PartialEq)]
pub struct Params {
    /// 启用的特征类与特征, 保持参数文件中的顺序.
    pub(crate) enabled: Vec<(FeatureClass, Vec<&'static str>)>,
    /// 提取设置.
    pub settings: Settings,
}

impl Params {
    /// 从文件读取.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ParamsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// 从 YAML 文本解析.
    pub fn from_yaml_str(text: &str) -> Result<Self, ParamsError> {
        // 空文件等价于全部默认值.
        let raw = serde_yaml::from_str::<Option<RawParams>>(text)?.unwrap_or_default();

        if let Some(image_types) = &raw.image_type {
            for key in image_types.keys() {
                match key.as_str() {
                    Some("Original") => {}
                    _ => return Err(ParamsError::UnsupportedImageType(format!("{key:?}"))),
                }
            }
        }

        let enabled = match &raw.feature_class {
            None => FeatureClass::ALL
                .iter()
                .map(|c| (*c, c.default_features()))
                .collect(),
            Some(classes) => {
                let mut enabled: Vec<(FeatureClass, Vec<&'static str>)> = Vec::with_capacity(classes.len());
                for (key, value) in classes {
                    let name = key.as_str().ok_or_else(|| ParamsError::UnknownClass(format!("{key:?}")))?;
                    let class = FeatureClass::from_name(name).ok_or_else(|| ParamsError::UnknownClass(name.to_string()))?;
                    let features = class.select(value)?;
                    if enabled.iter().any(|(c, _)| *c == class) {
                        continue;
                    }
                    enabled.push((class, features));
                }
                enabled
            }
        };

        let settings = raw.setting.unwrap_or_default().into_settings()?;
        Ok(Self { enabled, settings })
    }
}

impl FeatureClass {
    /// 解析参数文件中某个特征类下的特征列表.
    fn select(&self, value: &Value) -> Result<Vec<&'static str>, ParamsError> {
        let requested: Vec<&str> = match value {
            Value::Null => return Ok(self.default_features()),
            Value::Sequence(seq) if seq.is_empty() => return Ok(self.default_features()),
            Value::Sequence(seq) => seq
                .iter()
                .map(|v| v.as_str().ok_or_else(|| self.unknown(format!("{v:?}"))))
                .collect::<Result<_, _>>()?,
            Value::String(s) => vec![s.as_str()],
            other => return Err(self.unknown(format!("{other:?}"))),
        };
        let mut out: Vec<&'static str> = Vec::with_capacity(requested.len());
        for name in requested {
            let known: &'static str = *self
                .feature_names()
                .iter()
                .find(|f| **f == name)
                .ok_or_else(|| self.unknown(name.to_string()))?;
            if !out.contains(&known) {
                out.push(known);
            }
        }
        Ok(out)
    }

    fn unknown(&self, feature: String) -> ParamsError {
        ParamsError::UnknownFeature {
            class: self.name(),
            feature,
        }
    }
}
