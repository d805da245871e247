//! 序列化分类器 (`models/<model>_model.json`).
//!
//! ```json
//! {
//!   "kind": "tree_ensemble",
//!   "feature_names": ["original_firstorder_Mean", "age", "sex", "manufacturer"],
//!   "categories": {"sex": ["F", "M"]},
//!   "base_score": 0.0,
//!   "trees": [{"nodes": [{"split": 0, "threshold": 0.5, "yes": 1, "no": 2, "missing": 2},
//!                        {"leaf": -1.0}, {"leaf": 1.0}]}]
//! }
//! ```
//!
//! 或 `"kind": "logistic"`, 带 `coefficients`, `intercept` 和可选的 `scaler`.
//! 类别列按 `categories` 中的下标编码为数值.

use std::collections::BTreeMap;

use serde::Deserialize;

#[inline]
fn default_threshold() -> f64 {
    0.5
}

/// 分类器文件的完整内容.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Classifier {
    /// 训练时的列顺序.
    pub feature_names: Vec<String>,
    /// 类别列的取值表.
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
    /// 正类概率的判定阈值.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(flatten)]
    pub model: Model,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Model {
    TreeEnsemble {
        #[serde(default)]
        base_score: f64,
        trees: Vec<Tree>,
    },
    Logistic {
        #[serde(default)]
        scaler: Option<Scaler>,
        coefficients: Vec<f64>,
        intercept: f64,
    },
}

/// 标准化: `(x - mean) / scale`.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Scaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Node {
    /// `x < threshold` 走 `yes`, 否则走 `no`; `x` 缺失 (`NaN`) 时走 `missing`.
    Split {
        split: usize,
        threshold: f64,
        yes: usize,
        no: usize,
        missing: usize,
    },
    Leaf {
        leaf: f64,
    },
}

/// 分类器文件内容不自洽.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierError {
    /// 列名重复.
    #[error("列 {0:?} 重复")]
    DuplicateColumn(String),

    /// 类别表指向不存在的列.
    #[error("类别表中的列 {0:?} 不在 feature_names 中")]
    UnknownCategoryColumn(String),

    /// 系数或标准化参数个数与列数不一致.
    #[error("{what} 的长度 {actual} 与列数 {expected} 不一致")]
    Length {
        /// 出错的字段.
        what: &'static str,
        /// 实际长度.
        actual: usize,
        /// 期望长度.
        expected: usize,
    },

    /// 决策树结构无效.
    #[error("第 {tree} 棵树的第 {node} 个节点无效")]
    InvalidNode {
        /// 树下标.
        tree: usize,
        /// 节点下标.
        node: usize,
    },

    /// 判定阈值不在 `(0, 1)` 内.
    #[error("判定阈值 {0} 无效")]
    Threshold(f64),
}

impl Tree {
    /// 检查节点下标. 子节点下标必须大于父节点, 从而保证遍历终止.
    fn validate(&self, tree: usize, columns: usize) -> Result<(), ClassifierError> {
        if self.nodes.is_empty() {
            return Err(ClassifierError::InvalidNode { tree, node: 0 });
        }
        let n = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                split,
                threshold,
                yes,
                no,
                missing,
            } = node
            {
                let child_ok = |c: &usize| *c > i && *c < n;
                if *split >= columns || threshold.is_nan() || ![yes, no, missing].into_iter().all(child_ok) {
                    return Err(ClassifierError::InvalidNode { tree, node: i });
                }
            }
        }
        Ok(())
    }

    fn leaf_value(&self, x: &[f64]) -> f64 {
        let mut i = 0;
        loop {
            match self.nodes[i] {
                Node::Leaf { leaf } => return leaf,
                Node::Split {
                    split,
                    threshold,
                    yes,
                    no,
                    missing,
                } => {
                    let v = x[split];
                    i = if v.is_nan() {
                        missing
                    } else if v < threshold {
                        yes
                    } else {
                        no
                    };
                }
            }
        }
    }
}

#[inline]
fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Classifier {
    /// 检查文件内容是否自洽.
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let columns = self.feature_names.len();
        for (i, name) in self.feature_names.iter().enumerate() {
            if self.feature_names[..i].contains(name) {
                return Err(ClassifierError::DuplicateColumn(name.clone()));
            }
        }
        if let Some(name) = self.categories.keys().find(|k| !self.feature_names.contains(k)) {
            return Err(ClassifierError::UnknownCategoryColumn(name.clone()));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(ClassifierError::Threshold(self.threshold));
        }
        let check_len = |what, actual| {
            if actual == columns {
                Ok(())
            } else {
                Err(ClassifierError::Length {
                    what,
                    actual,
                    expected: columns,
                })
            }
        };
        match &self.model {
            Model::TreeEnsemble { trees, .. } => trees
                .iter()
                .enumerate()
                .try_for_each(|(k, t)| t.validate(k, columns)),
            Model::Logistic {
                scaler, coefficients, ..
            } => {
                check_len("coefficients", coefficients.len())?;
                if let Some(s) = scaler {
                    check_len("scaler.mean", s.mean.len())?;
                    check_len("scaler.scale", s.scale.len())?;
                }
                Ok(())
            }
        }
    }

    /// 模型能否处理缺失值 (`NaN`). 只有决策树带有缺失分支.
    pub fn handles_missing(&self) -> bool {
        matches!(self.model, Model::TreeEnsemble { .. })
    }

    /// 在按训练列顺序排列的数值行 `x` 上计算正类概率.
    pub fn probability(&self, x: &[f64]) -> f64 {
        match &self.model {
            Model::TreeEnsemble { base_score, trees } => {
                sigmoid(base_score + trees.iter().map(|t| t.leaf_value(x)).sum::<f64>())
            }
            Model::Logistic {
                scaler,
                coefficients,
                intercept,
            } => {
                let z: f64 = x
                    .iter()
                    .enumerate()
                    .map(|(k, v)| {
                        let v = match scaler {
                            // scale 为 0 的列视为 1.
                            Some(s) if s.scale[k] != 0.0 => (v - s.mean[k]) / s.scale[k],
                            Some(s) => v - s.mean[k],
                            None => *v,
                        };
                        v * coefficients[k]
                    })
                    .sum();
                sigmoid(z + intercept)
            }
        }
    }
}
