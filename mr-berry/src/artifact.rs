//! 模型制品: 标识, 目录布局, 注册表与进程内缓存.
//!
//! 制品根目录的布局为
//!
//! ```text
//! <root>/params/<model>_extracting_params.yaml
//! <root>/params/<model>_features.json        (可选, 规范特征顺序)
//! <root>/models/<model>_model.json
//! ```
//!
//! [`ModelRegistry`] 在启动时扫描根目录, 只有同时具备参数文件和分类器文件的模型才会被注册.
//! [`ArtifactCache`] 按 [`ModelId`] 惰性加载, 每个标识在进程内最多加载一次, 之后只读共享.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::consts::layout::*;
use crate::extract::{FeatureExtractor, OrderPolicy};
use crate::predict::Predictor;
use crate::radiomics::{Params, ParamsError};

/// 反序列化或校验制品内容时产生的错误.
pub type FormatError = Box<dyn std::error::Error + Send + Sync>;

/// 模型制品无法使用.
#[derive(Debug, thiserror::Error)]
pub enum ModelNotFound {
    /// 标识不合法.
    #[error("无效的模型标识 {0:?}")]
    InvalidId(String),

    /// 注册表中没有该模型.
    #[error("模型 {0} 未注册")]
    Unregistered(ModelId),

    /// 制品文件不存在.
    #[error("模型 {id} 缺少制品文件 {path:?}")]
    Missing {
        /// 模型标识.
        id: ModelId,
        /// 缺失的文件.
        path: PathBuf,
    },

    /// 制品文件无法读取.
    #[error("模型 {id} 的制品文件 {path:?} 无法读取")]
    Unreadable {
        /// 模型标识.
        id: ModelId,
        /// 出错的文件.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// 制品文件内容无效.
    #[error("模型 {id} 的制品文件 {path:?} 内容无效")]
    Invalid {
        /// 模型标识.
        id: ModelId,
        /// 出错的文件.
        path: PathBuf,
        /// 具体原因.
        #[source]
        source: FormatError,
    },
}

/// 模型标识. 非空, 只包含 ASCII 字母, 数字以及 `_`, `-`, `.`, 且不以 `.` 开头.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(String);

impl ModelId {
    /// 校验并构建标识.
    pub fn new<S: Into<String>>(id: S) -> Result<Self, ModelNotFound> {
        let id = id.into();
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
        if valid {
            Ok(Self(id))
        } else {
            Err(ModelNotFound::InvalidId(id))
        }
    }

    /// 字符串形式.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self(crate::consts::DEFAULT_MODEL.to_string())
    }
}

impl FromStr for ModelId {
    type Err = ModelNotFound;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ModelId {
    type Error = ModelNotFound;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 某个模型的全部制品路径.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelArtifacts {
    id: ModelId,
    params: PathBuf,
    order: PathBuf,
    classifier: PathBuf,
}

impl ModelArtifacts {
    /// 按目录布局拼接 `root` 下模型 `id` 的制品路径. 不检查文件是否存在.
    pub fn locate<P: AsRef<Path>>(root: P, id: ModelId) -> Self {
        let root = root.as_ref();
        let params_dir = root.join(PARAMS_DIR);
        Self {
            params: params_dir.join(format!("{id}{PARAMS_SUFFIX}")),
            order: params_dir.join(format!("{id}{ORDER_SUFFIX}")),
            classifier: root.join(MODELS_DIR).join(format!("{id}{CLASSIFIER_SUFFIX}")),
            id,
        }
    }

    /// 模型标识.
    #[inline]
    pub fn id(&self) -> &ModelId {
        &self.id
    }

    /// 特征提取参数文件.
    #[inline]
    pub fn params_path(&self) -> &Path {
        &self.params
    }

    /// 规范特征顺序文件. 该文件可能不存在.
    #[inline]
    pub fn order_path(&self) -> &Path {
        &self.order
    }

    /// 分类器文件.
    #[inline]
    pub fn classifier_path(&self) -> &Path {
        &self.classifier
    }

    /// 参数文件和分类器文件是否都存在?
    pub fn is_complete(&self) -> bool {
        self.params.is_file() && self.classifier.is_file()
    }

    fn missing(&self, path: &Path) -> ModelNotFound {
        ModelNotFound::Missing {
            id: self.id.clone(),
            path: path.to_path_buf(),
        }
    }

    pub(crate) fn invalid<E: Into<FormatError>>(&self, path: &Path, e: E) -> ModelNotFound {
        ModelNotFound::Invalid {
            id: self.id.clone(),
            path: path.to_path_buf(),
            source: e.into(),
        }
    }

    fn read_text(&self, path: &Path) -> Result<String, ModelNotFound> {
        if !path.is_file() {
            return Err(self.missing(path));
        }
        fs::read_to_string(path).map_err(|source| ModelNotFound::Unreadable {
            id: self.id.clone(),
            path: path.to_path_buf(),
            source,
        })
    }

    /// 读取并解析特征提取参数文件.
    pub fn load_params(&self) -> Result<Params, ModelNotFound> {
        if !self.params.is_file() {
            return Err(self.missing(&self.params));
        }
        Params::open(&self.params).map_err(|e| match e {
            ParamsError::Io(source) => ModelNotFound::Unreadable {
                id: self.id.clone(),
                path: self.params.clone(),
                source,
            },
            other => self.invalid(&self.params, other),
        })
    }

    /// 读取规范特征顺序 (JSON 字符串数组).
    pub fn load_order(&self) -> Result<Vec<String>, ModelNotFound> {
        self.load_json(&self.order)
    }

    /// 读取 `path` 处的 JSON 制品.
    pub(crate) fn load_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, ModelNotFound> {
        let text = self.read_text(path)?;
        serde_json::from_str(&text).map_err(|e| self.invalid(path, e))
    }
}

/// 默认的制品根目录.
///
/// 1. 若环境变量 `$MR_BERRY_ARTIFACT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `{用户主目录}/mr-berry`;
/// 3. 无法确定用户主目录时返回 `None`.
pub fn default_root() -> Option<PathBuf> {
    match std::env::var(ARTIFACT_DIR_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => {
            let mut ans = dirs::home_dir()?;
            ans.push("mr-berry");
            Some(ans)
        }
    }
}

/// 模型注册表: 启动时从制品根目录发现的全部完整模型.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    root: PathBuf,
    models: BTreeMap<ModelId, ModelArtifacts>,
}

impl ModelRegistry {
    /// 扫描 `root/params` 目录, 注册所有同时具有参数文件和分类器文件的模型.
    ///
    /// 目录不存在或无法读取时得到空注册表 (会打印警告).
    pub fn open<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        let mut models = BTreeMap::new();
        let entries = match fs::read_dir(root.join(PARAMS_DIR)) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("无法读取制品目录 {root:?}: {e}");
                return Self { root, models };
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(PARAMS_SUFFIX)) else {
                continue;
            };
            let id = match ModelId::new(id) {
                Ok(id) => id,
                Err(e) => {
                    log::warn!("忽略制品 {name:?}: {e}");
                    continue;
                }
            };
            let artifacts = ModelArtifacts::locate(&root, id.clone());
            if artifacts.is_complete() {
                models.insert(id, artifacts);
            } else {
                log::warn!("模型 {id} 缺少分类器文件, 不予注册");
            }
        }
        log::debug!("在 {root:?} 下注册了 {} 个模型", models.len());
        Self { root, models }
    }

    /// 制品根目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 已注册的全部模型标识, 按字典序.
    pub fn ids(&self) -> impl Iterator<Item = &ModelId> {
        self.models.keys()
    }

    /// 已注册模型个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// 注册表是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// 查找已注册的模型.
    pub fn resolve(&self, id: &ModelId) -> Result<&ModelArtifacts, ModelNotFound> {
        self.models
            .get(id)
            .ok_or_else(|| ModelNotFound::Unregistered(id.clone()))
    }
}

/// 加载完成的模型: 特征提取器 + 预测器.
#[derive(Debug)]
pub struct LoadedModel {
    id: ModelId,
    extractor: FeatureExtractor,
    predictor: Predictor,
}

impl LoadedModel {
    /// 从制品加载.
    pub fn load(artifacts: &ModelArtifacts, policy: OrderPolicy) -> Result<Self, ModelNotFound> {
        Ok(Self {
            id: artifacts.id().clone(),
            extractor: FeatureExtractor::new(artifacts, policy)?,
            predictor: Predictor::new(artifacts)?,
        })
    }

    /// 模型标识.
    #[inline]
    pub fn id(&self) -> &ModelId {
        &self.id
    }

    /// 特征提取器.
    #[inline]
    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// 预测器.
    #[inline]
    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }
}

type Slot = Arc<OnceCell<Arc<LoadedModel>>>;

/// 进程内制品缓存.
///
/// 每个模型标识对应一个 `OnceCell`, 并发请求同一标识时只有一个线程执行加载,
/// 其余线程阻塞等待并共享结果. 加载失败不会被缓存, 下次请求会重试. 缓存不会失效.
#[derive(Debug)]
pub struct ArtifactCache {
    registry: ModelRegistry,
    policy: OrderPolicy,
    slots: Mutex<HashMap<ModelId, Slot>>,
    loads: AtomicUsize,
}

impl ArtifactCache {
    /// 以注册表和特征顺序策略构建空缓存.
    pub fn new(registry: ModelRegistry, policy: OrderPolicy) -> Self {
        Self {
            registry,
            policy,
            slots: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// 注册表.
    #[inline]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// 获取模型, 必要时加载.
    pub fn get(&self, id: &ModelId) -> Result<Arc<LoadedModel>, ModelNotFound> {
        let artifacts = self.registry.resolve(id)?;
        let slot = {
            // 只在查找槽位时持锁, 加载过程不持锁.
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(id.clone()).or_default())
        };
        slot.get_or_try_init(|| {
            log::debug!("加载模型 {id} 的制品");
            self.loads.fetch_add(1, Ordering::Relaxed);
            LoadedModel::load(artifacts, self.policy).map(Arc::new)
        })
        .cloned()
    }

    /// 实际执行过的加载次数 (含失败的加载).
    #[inline]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn populated_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_params(dir.path(), "liver_t2w", test_support::FULL_PARAMS, None);
        test_support::write_classifier(dir.path(), "liver_t2w", test_support::STUMP_CLASSIFIER);
        // 只有参数文件, 不会被注册.
        test_support::write_params(dir.path(), "orphan", test_support::FULL_PARAMS, None);
        dir
    }

    #[test]
    fn test_model_id_validation() {
        assert!(ModelId::new("liver_t2w_xgboost").is_ok());
        assert!(ModelId::new("v1.2-rc").is_ok());
        for bad in ["", "../etc", "a/b", ".hidden", "模型", "a b"] {
            assert!(
                matches!(ModelId::new(bad), Err(ModelNotFound::InvalidId(s)) if s == bad),
                "{bad:?}"
            );
        }
        let id: ModelId = serde_yaml::from_str("liver").unwrap();
        assert_eq!(id.as_str(), "liver");
        assert!(serde_yaml::from_str::<ModelId>("../x").is_err());
    }

    #[test]
    fn test_registry_discovers_complete_models() {
        let dir = populated_root();
        let registry = ModelRegistry::open(dir.path());
        assert_eq!(registry.len(), 1);
        let id = ModelId::new("liver_t2w").unwrap();
        let artifacts = registry.resolve(&id).unwrap();
        assert_eq!(artifacts.params_path(), dir.path().join("params/liver_t2w_extracting_params.yaml"));
        assert_eq!(artifacts.classifier_path(), dir.path().join("models/liver_t2w_model.json"));

        let orphan = ModelId::new("orphan").unwrap();
        assert!(matches!(registry.resolve(&orphan), Err(ModelNotFound::Unregistered(_))));

        let empty = ModelRegistry::open(dir.path().join("nowhere"));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_artifact_errors() {
        let dir = populated_root();
        let id = ModelId::new("orphan").unwrap();
        let artifacts = ModelArtifacts::locate(dir.path(), id);
        assert!(artifacts.load_params().is_ok());
        assert!(matches!(artifacts.load_order(), Err(ModelNotFound::Missing { .. })));

        std::fs::write(artifacts.order_path(), "{not json").unwrap();
        assert!(matches!(artifacts.load_order(), Err(ModelNotFound::Invalid { .. })));

        std::fs::write(artifacts.params_path(), "featureClass:\n  wavelet:\n").unwrap();
        assert!(matches!(artifacts.load_params(), Err(ModelNotFound::Invalid { .. })));
    }

    #[test]
    fn test_cache_loads_once_under_contention() {
        test_support::init_logger();
        let dir = populated_root();
        let cache = Arc::new(ArtifactCache::new(ModelRegistry::open(dir.path()), OrderPolicy::Filtered));
        let id = ModelId::new("liver_t2w").unwrap();

        let pool = threadpool::ThreadPool::new(8);
        let (tx, rx) = std::sync::mpsc::channel();
        for _ in 0..32 {
            let (cache, id, tx) = (Arc::clone(&cache), id.clone(), tx.clone());
            pool.execute(move || {
                let model = cache.get(&id).unwrap();
                tx.send(Arc::as_ptr(&model) as usize).unwrap();
            });
        }
        drop(tx);
        let ptrs: Vec<usize> = rx.iter().collect();
        assert_eq!(ptrs.len(), 32);
        assert!(ptrs.iter().all(|p| *p == ptrs[0]));
        assert_eq!(cache.load_count(), 1);

        let missing = ModelId::new("nope").unwrap();
        assert!(matches!(cache.get(&missing), Err(ModelNotFound::Unregistered(_))));
        assert_eq!(cache.load_count(), 1);
    }
}
