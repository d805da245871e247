//! 特征提取: 在配准一致的扫描和标注上运行影像组学引擎, 再按策略整理输出.

use serde::{Deserialize, Serialize};

use crate::artifact::{ModelArtifacts, ModelNotFound};
use crate::consts::names::DIAGNOSTICS;
use crate::data::{GeometryMismatch, Mask, Volume, VolumeAttr};
use crate::radiomics::{Engine, RoiError};

/// 有序的 `(特征名, 值)` 列表.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FeatureVector(Vec<(String, f64)>);

impl FeatureVector {
    /// 由有序列表直接构建.
    #[inline]
    pub fn new(items: Vec<(String, f64)>) -> Self {
        Self(items)
    }

    /// 特征个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 按名称取值.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// 是否含有该名称?
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }

    /// 按顺序遍历特征名.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    /// 按顺序遍历 `(特征名, 值)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// 取出底层列表.
    #[inline]
    pub fn into_inner(self) -> Vec<(String, f64)> {
        self.0
    }
}

impl FromIterator<(String, f64)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// 特征整理策略. 每个特征提取器只使用其中一种.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPolicy {
    /// 丢弃名称中含有 `diagnostics` 的项, 其余保持引擎输出顺序.
    #[default]
    Filtered,
    /// 只保留规范特征顺序文件中列出的项, 按文件中的顺序; 缺少的项被静默跳过.
    Ordered,
}

/// 特征提取错误.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractError {
    /// 扫描和标注不满足配准一致性.
    #[error("扫描与标注配准不一致")]
    Geometry(#[from] GeometryMismatch),

    /// 标注中没有 ROI 标签.
    #[error("标注中没有标签为 {0} 的体素")]
    EmptyRoi(u8),

    /// ROI 不满足最小尺寸要求.
    #[error("ROI 过小")]
    RoiTooSmall(#[source] RoiError),
}

impl From<RoiError> for ExtractError {
    fn from(e: RoiError) -> Self {
        match e {
            RoiError::Empty(label) => Self::EmptyRoi(label),
            other => Self::RoiTooSmall(other),
        }
    }
}

/// 特征提取器. 构建后不可变, 可跨线程共享.
#[derive(Clone, Debug)]
pub struct FeatureExtractor {
    engine: Engine,
    order: Option<Vec<String>>,
}

impl FeatureExtractor {
    /// 从模型制品构建. [`OrderPolicy::Ordered`] 时额外读取规范特征顺序文件.
    pub fn new(artifacts: &ModelArtifacts, policy: OrderPolicy) -> Result<Self, ModelNotFound> {
        let engine = Engine::new(artifacts.load_params()?);
        let order = match policy {
            OrderPolicy::Filtered => None,
            OrderPolicy::Ordered => Some(artifacts.load_order()?),
        };
        Ok(Self::from_parts(engine, order))
    }

    /// 由引擎和可选的规范顺序直接构建. `order` 为 `None` 时使用过滤策略.
    pub fn from_parts(engine: Engine, order: Option<Vec<String>>) -> Self {
        if let Some(order) = &order {
            let produced = engine.feature_names();
            let absent: Vec<&str> = order
                .iter()
                .filter(|n| !produced.contains(*n))
                .map(String::as_str)
                .collect();
            if !absent.is_empty() {
                log::warn!("规范特征顺序中有 {} 项不会被计算: {absent:?}", absent.len());
            }
        }
        Self { engine, order }
    }

    /// 使用中的策略.
    pub fn policy(&self) -> OrderPolicy {
        match self.order {
            Some(_) => OrderPolicy::Ordered,
            None => OrderPolicy::Filtered,
        }
    }

    /// 底层计算引擎.
    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// 提取特征. 先检查配准一致性, 再对整个 ROI 计算一次, 最后按策略整理.
    pub fn extract(&self, image: &Volume, mask: &Mask) -> Result<FeatureVector, ExtractError> {
        image.check_co_registered(mask, self.engine.settings().geometry_tolerance)?;
        let raw = self.engine.execute(image, mask)?;
        let out: FeatureVector = match &self.order {
            None => raw.into_iter().filter(|(n, _)| !n.contains(DIAGNOSTICS)).collect(),
            Some(order) => order
                .iter()
                .filter_map(|name| {
                    raw.iter()
                        .find(|(n, _)| n == name)
                        .map(|(n, v)| (n.clone(), *v))
                })
                .collect(),
        };
        log::debug!("提取了 {} 个特征", out.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ModelId;
    use crate::data::Geometry;
    use crate::test_support;

    fn artifacts(order: Option<&[&str]>) -> (tempfile::TempDir, ModelArtifacts) {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_params(dir.path(), "m", test_support::FULL_PARAMS, order);
        let artifacts = ModelArtifacts::locate(dir.path(), ModelId::new("m").unwrap());
        (dir, artifacts)
    }

    #[test]
    fn test_filtered_policy_drops_diagnostics() {
        let (_dir, artifacts) = artifacts(None);
        let extractor = FeatureExtractor::new(&artifacts, OrderPolicy::Filtered).unwrap();
        assert_eq!(extractor.policy(), OrderPolicy::Filtered);
        let vol = test_support::textured_volume((6, 6, 6), [1.0; 3]);
        let mask = test_support::block_mask((6, 6, 6), [1.0; 3]);
        let features = extractor.extract(&vol, &mask).unwrap();
        assert!(features.names().all(|n| !n.contains("diagnostics")));
        assert_eq!(features.names().map(String::from).collect::<Vec<_>>(), extractor.engine().feature_names());
    }

    #[test]
    fn test_ordered_policy_follows_list() {
        let order = [
            "original_glcm_Contrast",
            "original_firstorder_Mean",
            "original_shape_Compactness1",
            "diagnostics_Mask-original_VoxelNum",
        ];
        let (_dir, artifacts) = artifacts(Some(&order));
        let extractor = FeatureExtractor::new(&artifacts, OrderPolicy::Ordered).unwrap();
        let vol = test_support::textured_volume((6, 6, 6), [1.0; 3]);
        let mask = test_support::block_mask((6, 6, 6), [1.0; 3]);
        let features = extractor.extract(&vol, &mask).unwrap();
        // 已弃用的 Compactness1 未在参数中显式启用, 静默跳过; 列表显式要求的诊断项保留.
        assert_eq!(
            features.names().collect::<Vec<_>>(),
            vec![
                "original_glcm_Contrast",
                "original_firstorder_Mean",
                "diagnostics_Mask-original_VoxelNum"
            ]
        );
        assert_eq!(features.get("diagnostics_Mask-original_VoxelNum"), Some(64.0));
    }

    #[test]
    fn test_ordered_policy_requires_order_file() {
        let (_dir, artifacts) = artifacts(None);
        assert!(matches!(
            FeatureExtractor::new(&artifacts, OrderPolicy::Ordered),
            Err(ModelNotFound::Missing { .. })
        ));
    }

    #[test]
    fn test_geometry_checked_first() {
        let (_dir, artifacts) = artifacts(None);
        let extractor = FeatureExtractor::new(&artifacts, OrderPolicy::Filtered).unwrap();
        let vol = test_support::constant_volume(4, 1.0);
        let mask = test_support::center_voxel_mask(5);
        assert!(matches!(
            extractor.extract(&vol, &mask),
            Err(ExtractError::Geometry(GeometryMismatch::Size(..)))
        ));

        let shifted = Mask::from_parts(
            Geometry::new([4, 4, 4], [1.0; 3], [0.5, 0.0, 0.0], crate::data::IDENTITY_DIRECTION),
            crate::data::PixelType::Uint8,
            ndarray::Array3::ones((4, 4, 4)),
        );
        assert!(matches!(
            extractor.extract(&vol, &shifted),
            Err(ExtractError::Geometry(GeometryMismatch::Origin(..)))
        ));
    }

    #[test]
    fn test_roi_errors() {
        let dir = tempfile::tempdir().unwrap();
        let params = "setting:\n  label: 1\n  minimumROISize: 2\n";
        test_support::write_params(dir.path(), "m", params, None);
        let artifacts = ModelArtifacts::locate(dir.path(), ModelId::new("m").unwrap());
        let extractor = FeatureExtractor::new(&artifacts, OrderPolicy::Filtered).unwrap();

        let vol = test_support::constant_volume(5, 1.0);
        let mask = test_support::center_voxel_mask(5);
        assert!(matches!(
            extractor.extract(&vol, &mask),
            Err(ExtractError::RoiTooSmall(RoiError::TooSmall { actual: 1, minimum: 2 }))
        ));

        let mut empty = mask.clone();
        empty.data_mut().fill(0);
        assert_eq!(extractor.extract(&vol, &empty), Err(ExtractError::EmptyRoi(1)));
    }
}
