//! 表格模型预测.
//!
//! # 注意
//!
//! 1. 输入列按 **名称** 与训练时的列对齐, 与输入顺序无关.
//! 2. 缺少训练列, 或出现训练时没有的列, 都是致命错误. 预测器不会静默补零或丢弃列.
//! 3. 未定义的特征 (`NaN`) 只有决策树模型能处理 (走缺失分支). 线性模型遇到非有限值时报错.

use std::fmt;

use serde::Serialize;

use crate::artifact::{ModelArtifacts, ModelNotFound};

mod classifier;
pub mod record;

pub use classifier::ClassifierError;
pub use record::{Cell, ClinicalRecord, CollisionError, Manufacturer, PredictionInput, Sex};

use classifier::Classifier;

/// 二分类标签.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[repr(u8)]
pub enum Label {
    /// 良性, 0.
    Benign = 0,
    /// 恶性, 1.
    Malignant = 1,
}

impl Label {
    /// 整数形式.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// 预测结果.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    /// 标签.
    pub label: Label,
    /// 正类 (恶性) 概率.
    pub probability: f64,
}

/// 预测错误.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictError {
    /// 缺少训练时的列.
    #[error("缺少列 {0:?}")]
    MissingColumn(String),

    /// 出现了训练时没有的列.
    #[error("模型没有见过列 {0:?}")]
    UnexpectedColumn(String),

    /// 类别列的取值不在训练时的类别表中.
    #[error("列 {column:?} 的取值 {value:?} 未知")]
    UnknownCategory {
        /// 列名.
        column: String,
        /// 取值.
        value: String,
    },

    /// 模型无法处理的非有限值.
    #[error("列 {0:?} 的取值不是有限数, 当前模型不支持缺失值")]
    NonFinite(String),
}

/// 预测器. 构建后不可变, 可跨线程共享.
#[derive(Clone, Debug)]
pub struct Predictor {
    classifier: Classifier,
}

impl Predictor {
    /// 从模型制品加载分类器.
    pub fn new(artifacts: &ModelArtifacts) -> Result<Self, ModelNotFound> {
        let path = artifacts.classifier_path();
        let classifier: Classifier = artifacts.load_json(path)?;
        classifier
            .validate()
            .map_err(|e| artifacts.invalid(path, e))?;
        log::debug!(
            "分类器 {} 共 {} 列",
            artifacts.id(),
            classifier.feature_names.len()
        );
        Ok(Self { classifier })
    }

    /// 训练时的列顺序.
    pub fn feature_names(&self) -> &[String] {
        &self.classifier.feature_names
    }

    /// 将输入按训练列顺序排列为数值行.
    fn encode(&self, input: &PredictionInput) -> Result<Vec<f64>, PredictError> {
        let names = &self.classifier.feature_names;
        let mut row = vec![None; names.len()];
        for (name, cell) in input.columns() {
            let k = names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| PredictError::UnexpectedColumn(name.to_string()))?;
            let value = match (cell, self.classifier.categories.get(name)) {
                (Cell::Number(v), _) => v,
                (Cell::Category(c), Some(table)) => table
                    .iter()
                    .position(|t| t == c)
                    .map(|code| code as f64)
                    .ok_or_else(|| PredictError::UnknownCategory {
                        column: name.to_string(),
                        value: c.to_string(),
                    })?,
                (Cell::Category(c), None) => {
                    return Err(PredictError::UnknownCategory {
                        column: name.to_string(),
                        value: c.to_string(),
                    })
                }
            };
            row[k] = Some(value);
        }
        row.into_iter()
            .zip(names)
            .map(|(v, n)| v.ok_or_else(|| PredictError::MissingColumn(n.clone())))
            .collect()
    }

    /// 预测标签和正类概率.
    pub fn predict_proba(&self, input: &PredictionInput) -> Result<Prediction, PredictError> {
        let row = self.encode(input)?;
        if !self.classifier.handles_missing() {
            if let Some(k) = row.iter().position(|v| !v.is_finite()) {
                return Err(PredictError::NonFinite(self.classifier.feature_names[k].clone()));
            }
        }
        let probability = self.classifier.probability(&row);
        let label = if probability >= self.classifier.threshold {
            Label::Malignant
        } else {
            Label::Benign
        };
        Ok(Prediction { label, probability })
    }

    /// 预测标签.
    #[inline]
    pub fn predict(&self, input: &PredictionInput) -> Result<Label, PredictError> {
        self.predict_proba(input).map(|p| p.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ModelId;
    use crate::extract::FeatureVector;
    use crate::test_support;

    fn predictor(json: &str) -> (tempfile::TempDir, Result<Predictor, ModelNotFound>) {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_classifier(dir.path(), "m", json);
        let artifacts = ModelArtifacts::locate(dir.path(), ModelId::new("m").unwrap());
        let p = Predictor::new(&artifacts);
        (dir, p)
    }

    fn input(mean: f64, sex: Sex) -> PredictionInput {
        let record = ClinicalRecord {
            age: 50,
            sex,
            manufacturer: Manufacturer::Siemens,
        };
        let features = FeatureVector::new(vec![("original_firstorder_Mean".into(), mean)]);
        PredictionInput::new(record, features).unwrap()
    }

    #[test]
    fn test_predict_stump() {
        let (_dir, p) = predictor(test_support::STUMP_CLASSIFIER);
        let p = p.unwrap();
        assert_eq!(p.predict(&input(0.0, Sex::F)), Ok(Label::Benign));
        assert_eq!(p.predict(&input(0.0, Sex::M)), Ok(Label::Malignant));
        assert_eq!(p.predict(&input(7.0, Sex::F)), Ok(Label::Malignant));
        let proba = p.predict_proba(&input(0.0, Sex::F)).unwrap();
        assert!(proba.probability < 0.5);
        assert_eq!(Label::Malignant.to_string(), "1");
    }

    #[test]
    fn test_column_contract() {
        let (_dir, p) = predictor(test_support::STUMP_CLASSIFIER);
        let p = p.unwrap();
        let record = ClinicalRecord {
            age: 50,
            sex: Sex::F,
            manufacturer: Manufacturer::Ge,
        };

        let missing = PredictionInput::new(record, FeatureVector::default()).unwrap();
        assert_eq!(
            p.predict(&missing),
            Err(PredictError::MissingColumn("original_firstorder_Mean".into()))
        );

        let extra = FeatureVector::new(vec![
            ("original_firstorder_Mean".into(), 0.0),
            ("original_glcm_Contrast".into(), 1.0),
        ]);
        let extra = PredictionInput::new(record, extra).unwrap();
        assert_eq!(
            p.predict(&extra),
            Err(PredictError::UnexpectedColumn("original_glcm_Contrast".into()))
        );
    }

    #[test]
    fn test_unknown_category() {
        let json = test_support::STUMP_CLASSIFIER.replace(r#""GE", "#, "");
        let (_dir, p) = predictor(&json);
        let p = p.unwrap();
        let record = ClinicalRecord {
            age: 50,
            sex: Sex::F,
            manufacturer: Manufacturer::Ge,
        };
        let features = FeatureVector::new(vec![("original_firstorder_Mean".into(), 0.0)]);
        let input = PredictionInput::new(record, features).unwrap();
        assert_eq!(
            p.predict(&input),
            Err(PredictError::UnknownCategory {
                column: "manufacturer".into(),
                value: "GE".into()
            })
        );
    }

    #[test]
    fn test_logistic_rejects_undefined_feature() {
        let json = r#"{
            "kind": "logistic",
            "feature_names": ["original_glcm_Correlation", "age", "sex", "manufacturer"],
            "categories": {"sex": ["F", "M"], "manufacturer": ["GE", "Philips", "Siemens"]},
            "coefficients": [5.0, 1.0, 1.0, 1.0],
            "intercept": 0.0
        }"#;
        let (_dir, p) = predictor(json);
        let p = p.unwrap();
        let record = ClinicalRecord {
            age: 50,
            sex: Sex::F,
            manufacturer: Manufacturer::Siemens,
        };
        let features = |v: f64| FeatureVector::new(vec![("original_glcm_Correlation".into(), v)]);

        let undefined = PredictionInput::new(record, features(f64::NAN)).unwrap();
        assert_eq!(
            p.predict_proba(&undefined),
            Err(PredictError::NonFinite("original_glcm_Correlation".into()))
        );
        let infinite = PredictionInput::new(record, features(f64::INFINITY)).unwrap();
        assert!(matches!(p.predict(&infinite), Err(PredictError::NonFinite(_))));

        let defined = PredictionInput::new(record, features(1.0)).unwrap();
        assert_eq!(p.predict(&defined), Ok(Label::Malignant));
    }

    #[test]
    fn test_tree_accepts_undefined_feature() {
        let (_dir, p) = predictor(test_support::STUMP_CLASSIFIER);
        let p = p.unwrap();
        // Mean 缺失时走 missing 分支, 得到恶性.
        assert_eq!(p.predict(&input(f64::NAN, Sex::F)), Ok(Label::Malignant));
    }

    #[test]
    fn test_load_errors() {
        let (_dir, p) = predictor("not json");
        assert!(matches!(p, Err(ModelNotFound::Invalid { .. })));

        let dir = tempfile::tempdir().unwrap();
        let artifacts = ModelArtifacts::locate(dir.path(), ModelId::new("m").unwrap());
        assert!(matches!(Predictor::new(&artifacts), Err(ModelNotFound::Missing { .. })));
    }
}
