#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 给定肝脏 MRI 体数据、病灶分割标注和少量临床属性,
//! 输出局灶性肝脏病灶的良恶性二分类结果.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 模型训练、特征筛选不在本 crate 范围内. 训练好的分类器和特征提取配置文件
//!   被视为运行时加载的不透明制品 (artifact), 参见 [`artifact`].
//! 2. 上传表单、文件持久化和页面布局属于外部调用方. 本 crate 只读取调用方给出的路径,
//!   **不会** 删除它们.
//!
//! # 流程
//!
//! 原始文件 -> [`data::io`] -> [`preprocess`] (归一化 + 可选重采样)
//! -> 配准一致性检查 -> [`extract`] -> 与临床属性合并 -> [`predict`] -> 标签.
//!
//! 整个流程由 [`pipeline::Pipeline`] 编排, 任一阶段失败则立即中止.
//!
//! # 开发计划
//!
//! ### NIfTI / NRRD 体数据读取 ✅
//!
//! 携带 spacing, origin, direction 几何信息. 方向统一转换到 LPS 坐标系.
//!
//! 实现位于 `mr-berry/src/data`.
//!
//! ### 强度归一化 ✅
//!
//! 默认使用模态相关的参考分布 (分段线性直方图标准化), 也可选择全局 z-score.
//!
//! 实现位于 `mr-berry/src/preprocess/normalize.rs`.
//!
//! ### 各向同性重采样 ✅
//!
//! 扫描使用三次 B 样条插值, 标注使用最近邻插值 (或线性插值后按 0.5 重新二值化).
//!
//! 实现位于 `mr-berry/src/preprocess/resample.rs`.
//!
//! ### 影像组学特征 ✅
//!
//! firstorder, shape, glcm, glrlm, glszm, gldm, ngtdm 七类特征.
//! 特征命名与参数文件格式和 PyRadiomics 保持一致.
//!
//! 实现位于 `mr-berry/src/radiomics`.
//!
//! ### 表格模型预测 ✅
//!
//! 梯度提升树集成 / 逻辑回归, 按列名严格对齐.
//!
//! 实现位于 `mr-berry/src/predict`.
//!
//! ### 制品缓存 ✅
//!
//! 按模型标识惰性加载, 每个标识最多加载一次, 只读共享.
//!
//! 实现位于 `mr-berry/src/artifact.rs`.
//!
//! ### 病灶切片预览 ✅
//!
//! 在病灶质心所在切片上叠加半透明红色标注.
//!
//! 实现位于 `mr-berry/src/preview.rs`.

/// 三维索引 `(z, y, x)`, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 三维体数据结构和读写.
pub mod data;

pub use data::{Geometry, GeometryMismatch, Mask, PixelType, Volume, VolumeAttr};

pub mod consts;

pub mod preprocess;

pub mod radiomics;

pub mod extract;

pub mod predict;

pub mod artifact;

pub mod pipeline;

pub mod preview;

pub mod prelude;

mod stats;

#[cfg(test)]
mod test_support;
