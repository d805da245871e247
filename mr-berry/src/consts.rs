//! 通用常量.

/// 标注像素值.
pub mod label {
    /// 背景的像素值.
    pub const BACKGROUND: u8 = 0;

    /// 病灶 (感兴趣区域) 的像素值.
    pub const LESION: u8 = 1;

    /// 像素是否是病灶?
    #[inline]
    pub const fn is_lesion(p: u8) -> bool {
        matches!(p, LESION)
    }
}

/// 特征命名.
pub mod names {
    /// 诊断信息命名空间标记. 含有该子串的特征名在过滤策略下被丢弃.
    pub const DIAGNOSTICS: &str = "diagnostics";

    /// 原始图像类型前缀.
    pub const ORIGINAL: &str = "original";

    /// 临床属性: 年龄.
    pub const AGE: &str = "age";

    /// 临床属性: 性别.
    pub const SEX: &str = "sex";

    /// 临床属性: 设备厂商.
    pub const MANUFACTURER: &str = "manufacturer";

    /// 全部临床属性名.
    pub const CLINICAL: [&str; 3] = [AGE, SEX, MANUFACTURER];
}

/// 制品目录布局.
pub mod layout {
    /// 特征提取参数等配置文件所在子目录.
    pub const PARAMS_DIR: &str = "params";

    /// 序列化分类器所在子目录.
    pub const MODELS_DIR: &str = "models";

    /// `params/<model>_extracting_params.yaml`.
    pub const PARAMS_SUFFIX: &str = "_extracting_params.yaml";

    /// `params/<model>_features.json`.
    pub const ORDER_SUFFIX: &str = "_features.json";

    /// `models/<model>_model.json`.
    pub const CLASSIFIER_SUFFIX: &str = "_model.json";

    /// 制品根目录环境变量.
    pub const ARTIFACT_DIR_ENV: &str = "MR_BERRY_ARTIFACT_DIR";
}

/// 未指定模型时使用的模型标识.
pub const DEFAULT_MODEL: &str = "liver_t2w_xgboost";

/// 默认的配准一致性容差.
pub const GEOMETRY_TOLERANCE: f64 = 1e-6;

/// `np.spacing(1)`, 熵计算中防止 `log(0)`.
pub const EPS: f64 = f64::EPSILON;
