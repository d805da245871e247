//! 临床属性与预测输入.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::names::{AGE, CLINICAL, MANUFACTURER, SEX};
use crate::extract::FeatureVector;

/// 无法识别的临床属性取值.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} 不能取值 {value:?}")]
pub struct InvalidClinicalValue {
    /// 属性名.
    pub field: &'static str,
    /// 取值.
    pub value: String,
}

/// 性别.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Sex {
    /// 男性.
    M,
    /// 女性.
    F,
}

impl Sex {
    /// 分类器中使用的类别名.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::M => "M",
            Self::F => "F",
        }
    }
}

impl FromStr for Sex {
    type Err = InvalidClinicalValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M" => Ok(Self::M),
            "F" => Ok(Self::F),
            other => Err(InvalidClinicalValue {
                field: SEX,
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MRI 设备厂商.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Manufacturer {
    /// Siemens.
    Siemens,
    /// Philips.
    Philips,
    /// GE.
    #[serde(rename = "GE")]
    Ge,
}

impl Manufacturer {
    /// 分类器中使用的类别名.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Siemens => "Siemens",
            Self::Philips => "Philips",
            Self::Ge => "GE",
        }
    }
}

impl FromStr for Manufacturer {
    type Err = InvalidClinicalValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Siemens" => Ok(Self::Siemens),
            "Philips" => Ok(Self::Philips),
            "GE" => Ok(Self::Ge),
            other => Err(InvalidClinicalValue {
                field: MANUFACTURER,
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 临床属性. 由调用方保证可信, 不做范围检查.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ClinicalRecord {
    /// 年龄.
    pub age: u32,
    /// 性别.
    pub sex: Sex,
    /// 设备厂商.
    pub manufacturer: Manufacturer,
}

/// 单元格取值.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Cell<'a> {
    /// 数值列.
    Number(f64),
    /// 类别列.
    Category(&'a str),
}

/// 特征向量中出现了与临床属性同名的项.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("特征 {0:?} 与临床属性同名")]
pub struct CollisionError(pub String);

/// 预测输入: 影像组学特征 + 临床属性.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionInput {
    features: FeatureVector,
    clinical: ClinicalRecord,
}

impl PredictionInput {
    /// 合并特征和临床属性. 特征名与 `age`, `sex`, `manufacturer` 重复时失败.
    pub fn new(clinical: ClinicalRecord, features: FeatureVector) -> Result<Self, CollisionError> {
        if let Some(name) = features.names().find(|n| CLINICAL.contains(n)) {
            return Err(CollisionError(name.to_string()));
        }
        Ok(Self { features, clinical })
    }

    /// 影像组学特征.
    #[inline]
    pub fn features(&self) -> &FeatureVector {
        &self.features
    }

    /// 临床属性.
    #[inline]
    pub fn clinical(&self) -> &ClinicalRecord {
        &self.clinical
    }

    /// 全部列: 先是特征 (保持顺序), 然后是 `age`, `sex`, `manufacturer`.
    pub fn columns(&self) -> impl Iterator<Item = (&str, Cell<'_>)> {
        let clinical = [
            (AGE, Cell::Number(self.clinical.age as f64)),
            (SEX, Cell::Category(self.clinical.sex.as_str())),
            (MANUFACTURER, Cell::Category(self.clinical.manufacturer.as_str())),
        ];
        self.features
            .iter()
            .map(|(n, v)| (n, Cell::Number(v)))
            .chain(clinical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ClinicalRecord {
        ClinicalRecord {
            age: 45,
            sex: Sex::F,
            manufacturer: Manufacturer::Ge,
        }
    }

    #[test]
    fn test_parse_clinical_values() {
        assert_eq!("M".parse::<Sex>(), Ok(Sex::M));
        assert_eq!("GE".parse::<Manufacturer>(), Ok(Manufacturer::Ge));
        assert!("Male".parse::<Sex>().is_err());
        assert_eq!(
            "Toshiba".parse::<Manufacturer>().unwrap_err().field,
            "manufacturer"
        );
        let r: ClinicalRecord =
            serde_yaml::from_str("{age: 60, sex: M, manufacturer: GE}").unwrap();
        assert_eq!(r.manufacturer, Manufacturer::Ge);
    }

    #[test]
    fn test_collision_rejected() {
        let features = FeatureVector::new(vec![("original_firstorder_Mean".into(), 1.0), ("sex".into(), 0.0)]);
        assert_eq!(
            PredictionInput::new(record(), features),
            Err(CollisionError("sex".into()))
        );
    }

    #[test]
    fn test_columns() {
        let features = FeatureVector::new(vec![("b".into(), 2.0), ("a".into(), 1.0)]);
        let input = PredictionInput::new(record(), features).unwrap();
        let columns: Vec<_> = input.columns().collect();
        assert_eq!(
            columns,
            vec![
                ("b", Cell::Number(2.0)),
                ("a", Cell::Number(1.0)),
                ("age", Cell::Number(45.0)),
                ("sex", Cell::Category("F")),
                ("manufacturer", Cell::Category("GE")),
            ]
        );
    }
}
