//! 流程编排: 加载 -> 归一化 -> 重采样 -> 特征提取 -> 预测.
//!
//! 各阶段严格顺序执行. 关闭归一化或重采样时跳过对应阶段. 任一阶段失败则整个流程失败,
//! 不返回部分结果. 每次状态转移都以 `debug` 级别记录.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::artifact::{self, ArtifactCache, LoadedModel, ModelId, ModelNotFound, ModelRegistry};
use crate::extract::{ExtractError, FeatureVector, OrderPolicy};
use crate::predict::{ClinicalRecord, CollisionError, Label, PredictError, PredictionInput};
use crate::preprocess::{Modality, PreprocessError, PreprocessOptions, Preprocessor};
use crate::preview::{self, PreviewError};

/// 流程状态.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum Stage {
    /// 尚未开始.
    Idle,
    /// 扫描和标注已加载.
    Loaded,
    /// 扫描已归一化.
    Normalized,
    /// 扫描和标注已重采样.
    Resampled,
    /// 特征已提取.
    FeatureExtracted,
    /// 已得到预测结果.
    Predicted,
    /// 全部完成.
    Done,
    /// 失败.
    Failed,
}

/// 流程配置. 所有字段都有默认值, 可以从 YAML 文件中部分给出.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 制品根目录. 未给出时使用 [`artifact::default_root`].
    pub artifact_root: Option<PathBuf>,
    /// 请求未指定模型时使用的模型.
    pub model: ModelId,
    /// MRI 模态.
    pub modality: Modality,
    /// 是否归一化.
    pub normalize: bool,
    /// 是否重采样.
    pub resample: bool,
    /// 预处理选项.
    pub preprocess: PreprocessOptions,
    /// 特征整理策略.
    pub order_policy: OrderPolicy,
    /// 日志级别. 由调用方负责初始化日志.
    pub log_level: log::LevelFilter,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifact_root: None,
            model: ModelId::default(),
            modality: Modality::T2,
            normalize: true,
            resample: false,
            preprocess: PreprocessOptions::default(),
            order_policy: OrderPolicy::default(),
            log_level: log::LevelFilter::Info,
        }
    }
}

/// 一次分类请求.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// 扫描文件.
    pub image: PathBuf,
    /// 标注文件.
    pub mask: PathBuf,
    /// 临床属性.
    pub clinical: ClinicalRecord,
    /// 模型. `None` 时使用配置中的模型.
    pub model: Option<ModelId>,
    /// 若给出, 则把病灶切片预览保存到该路径.
    pub preview: Option<PathBuf>,
}

/// 分类结果.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Outcome {
    /// 标签.
    pub label: Label,
    /// 恶性概率.
    pub probability: f64,
    /// 送入模型的影像组学特征.
    pub features: FeatureVector,
    /// 依次经过的状态.
    pub trace: Vec<Stage>,
}

/// 导致流程失败的原因.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    /// 模型制品不可用.
    #[error(transparent)]
    Model(#[from] ModelNotFound),

    /// 预处理失败.
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    /// 特征提取失败.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// 特征与临床属性同名.
    #[error(transparent)]
    Collision(#[from] CollisionError),

    /// 预测失败.
    #[error(transparent)]
    Predict(#[from] PredictError),

    /// 预览生成失败.
    #[error(transparent)]
    Preview(#[from] PreviewError),
}

/// 流程错误: 失败原因及失败时正在进入的阶段.
#[derive(Debug, thiserror::Error)]
#[error("流程在进入 {stage:?} 阶段时失败")]
pub struct PipelineError {
    stage: Stage,
    #[source]
    failure: Failure,
}

impl PipelineError {
    /// 失败时正在进入的阶段. 制品加载失败时为 [`Stage::Idle`].
    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// 失败原因.
    #[inline]
    pub fn failure(&self) -> &Failure {
        &self.failure
    }

    /// 取出失败原因.
    #[inline]
    pub fn into_failure(self) -> Failure {
        self.failure
    }
}

/// 记录状态转移.
struct Tracker {
    trace: Vec<Stage>,
}

impl Tracker {
    fn new() -> Self {
        Self {
            trace: vec![Stage::Idle],
        }
    }

    fn current(&self) -> Stage {
        self.trace.last().copied().unwrap_or(Stage::Idle)
    }

    fn enter(&mut self, stage: Stage) {
        log::debug!("{:?} -> {stage:?}", self.current());
        self.trace.push(stage);
    }

    fn fail<E: Into<Failure>>(&self, stage: Stage, e: E) -> PipelineError {
        let failure = e.into();
        log::debug!("{:?} -> {:?}: {failure}", self.current(), Stage::Failed);
        PipelineError { stage, failure }
    }
}

/// 长期存活的分类流程. 持有预处理器和制品缓存, 可跨线程共享.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    preprocessor: Preprocessor,
    cache: ArtifactCache,
}

impl Pipeline {
    /// 根据配置构建. 预处理选项无效时失败.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let preprocessor = Preprocessor::with_options(config.modality, config.preprocess.clone())
            .map_err(|e| Tracker::new().fail(Stage::Idle, e))?;
        let root = config
            .artifact_root
            .clone()
            .or_else(artifact::default_root)
            .unwrap_or_default();
        log::info!("制品根目录: {root:?}");
        let cache = ArtifactCache::new(ModelRegistry::open(root), config.order_policy);
        Ok(Self {
            config,
            preprocessor,
            cache,
        })
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 制品缓存.
    #[inline]
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// 获取 (必要时加载) 模型.
    pub fn model(&self, id: &ModelId) -> Result<Arc<LoadedModel>, ModelNotFound> {
        self.cache.get(id)
    }

    /// 执行一次完整的分类.
    pub fn run(&self, request: &Request) -> Result<Outcome, PipelineError> {
        let mut t = Tracker::new();
        let id = request.model.as_ref().unwrap_or(&self.config.model);
        let model = self.cache.get(id).map_err(|e| t.fail(Stage::Idle, e))?;

        log::info!("加载输入");
        let (mut image, mut mask) = self
            .preprocessor
            .load(&request.image, &request.mask)
            .map_err(|e| t.fail(Stage::Loaded, e))?;
        t.enter(Stage::Loaded);

        if self.config.normalize {
            image = self.preprocessor.normalize_image(&image);
            t.enter(Stage::Normalized);
        }
        if self.config.resample {
            (image, mask) = self.preprocessor.resample_pair(&image, &mask);
            t.enter(Stage::Resampled);
        }
        // 保存属于最后一个已完成的预处理阶段.
        self.preprocessor
            .persist(&image, &mask)
            .map_err(|e| t.fail(t.current(), e))?;

        log::info!("提取特征 (模型 {id})");
        let features = model
            .extractor()
            .extract(&image, &mask)
            .map_err(|e| t.fail(Stage::FeatureExtracted, e))?;
        t.enter(Stage::FeatureExtracted);

        log::info!("预测");
        let input = PredictionInput::new(request.clinical, features).map_err(|e| t.fail(Stage::Predicted, e))?;
        let prediction = model
            .predictor()
            .predict_proba(&input)
            .map_err(|e| t.fail(Stage::Predicted, e))?;
        t.enter(Stage::Predicted);

        if let Some(path) = &request.preview {
            log::info!("生成预览 {path:?}");
            preview::save(&image, &mask, path).map_err(|e| t.fail(Stage::Done, e))?;
        }
        t.enter(Stage::Done);
        log::info!("分类结果: {} (p = {:.4})", prediction.label, prediction.probability);

        Ok(Outcome {
            label: prediction.label,
            probability: prediction.probability,
            features: input.features().clone(),
            trace: t.trace,
        })
    }
}
