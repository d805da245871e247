//! 单元测试共用的合成数据与制品.

use std::fs;
use std::path::Path;

use ndarray::Array3;

use crate::consts::layout::*;
use crate::data::{Geometry, Mask, PixelType, Volume};

/// `n x n x n` 的常数扫描, 单位间距.
pub fn constant_volume(n: usize, value: f32) -> Volume {
    Volume::from_parts(
        Geometry::identity([n, n, n]),
        PixelType::Float32,
        Array3::from_elem((n, n, n), value),
    )
}

/// `n x n x n` 的标注, 仅中心体素为 1.
pub fn center_voxel_mask(n: usize) -> Mask {
    let mut data = Array3::zeros((n, n, n));
    data[(n / 2, n / 2, n / 2)] = 1;
    Mask::from_parts(Geometry::identity([n, n, n]), PixelType::Uint8, data)
}

/// 带有纹理的扫描: 强度随位置周期变化.
pub fn textured_volume(shape: (usize, usize, usize), spacing: [f64; 3]) -> Volume {
    let (z, y, x) = shape;
    let data = Array3::from_shape_fn(shape, |(k, j, i)| {
        (((i * 7 + j * 13 + k * 29) % 17) as f32) * 10.0 + (i + j + k) as f32
    });
    Volume::from_parts(
        Geometry::new([x, y, z], spacing, [0.0; 3], crate::data::IDENTITY_DIRECTION),
        PixelType::Int16,
        data,
    )
}

/// 与 `textured_volume` 配准的标注: 中间的立方体为 1, 另有一个标签 2 的角落.
pub fn block_mask(shape: (usize, usize, usize), spacing: [f64; 3]) -> Mask {
    let (z, y, x) = shape;
    let data = Array3::from_shape_fn(shape, |(k, j, i)| {
        let inside = |v: usize, n: usize| v >= n / 4 && v < n - n / 4;
        if inside(k, z) && inside(j, y) && inside(i, x) {
            1
        } else if k == 0 && j == 0 && i == 0 {
            2
        } else {
            0
        }
    });
    Mask::from_parts(
        Geometry::new([x, y, z], spacing, [0.0; 3], crate::data::IDENTITY_DIRECTION),
        PixelType::Uint8,
        data,
    )
}

/// 包含全部特征类的参数文件.
pub const FULL_PARAMS: &str = "\
imageType:
  Original: {}
featureClass:
  shape:
  firstorder: []
  glcm:
  glrlm:
  glszm:
  gldm:
  ngtdm:
setting:
  binWidth: 25
  label: 1
";

/// 在 `root` 下写出模型 `model` 的参数文件; `order` 非空时写出特征顺序文件.
pub fn write_params(root: &Path, model: &str, params: &str, order: Option<&[&str]>) {
    let dir = root.join(PARAMS_DIR);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{model}{PARAMS_SUFFIX}")), params).unwrap();
    if let Some(order) = order {
        let json = serde_json::to_string(order).unwrap();
        fs::write(dir.join(format!("{model}{ORDER_SUFFIX}")), json).unwrap();
    }
}

/// 在 `root` 下写出模型 `model` 的分类器文件.
pub fn write_classifier(root: &Path, model: &str, json: &str) {
    let dir = root.join(MODELS_DIR);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{model}{CLASSIFIER_SUFFIX}")), json).unwrap();
}

/// 仅依赖 `original_firstorder_Mean` 和临床属性的单棵树分类器.
///
/// `Mean < 0.5` 且 `sex == F` 时为良性, 否则为恶性.
pub const STUMP_CLASSIFIER: &str = r#"{
  "kind": "tree_ensemble",
  "feature_names": ["original_firstorder_Mean", "age", "sex", "manufacturer"],
  "categories": {
    "sex": ["F", "M"],
    "manufacturer": ["GE", "Philips", "Siemens"]
  },
  "base_score": 0.0,
  "trees": [
    {
      "nodes": [
        {"split": 0, "threshold": 0.5, "yes": 1, "no": 2, "missing": 2},
        {"split": 2, "threshold": 0.5, "yes": 3, "no": 2, "missing": 2},
        {"leaf": 2.0},
        {"leaf": -2.0}
      ]
    }
  ]
}"#;

/// 初始化测试日志. 重复调用无副作用.
pub fn init_logger() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();
}
