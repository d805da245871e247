//! 流程配置的加载.

use std::env;
use std::path::{Path, PathBuf};

use mr_berry::pipeline::PipelineConfig;

/// 配置文件路径环境变量.
pub const CONFIG_ENV: &str = "MR_BERRY_CONFIG";

/// 配置加载错误.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 无法读取配置文件.
    #[error("无法读取配置文件 {0:?}")]
    Io(PathBuf, #[source] std::io::Error),

    /// 配置文件格式错误.
    #[error("配置文件 {0:?} 格式错误")]
    Yaml(PathBuf, #[source] serde_yaml::Error),
}

/// 获取配置文件路径.
///
/// 1. 若命令行给出 `--config`, 则返回其值;
/// 2. 若环境变量 `$MR_BERRY_CONFIG` 非空, 则返回其值;
/// 3. 否则, 若 `{用户主目录}/mr-berry/config.yaml` 存在, 则返回它;
/// 4. 否则返回 `None`, 使用默认配置.
pub fn config_path_from_env_or_home(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    match env::var(CONFIG_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => {
            let mut p = dirs::home_dir()?;
            p.extend(["mr-berry", "config.yaml"]);
            p.is_file().then_some(p)
        }
    }
}

/// 从 YAML 文件加载配置. 文件中缺省的字段取默认值.
pub fn load(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    // 空文件等价于默认配置.
    let config = serde_yaml::from_str::<Option<PipelineConfig>>(&text)
        .map_err(|e| ConfigError::Yaml(path.to_path_buf(), e))?
        .unwrap_or_default();
    Ok(config)
}

/// 按优先级查找并加载配置.
pub fn load_from_env_or_home(explicit: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    match config_path_from_env_or_home(explicit) {
        Some(p) => load(&p),
        None => Ok(PipelineConfig::default()),
    }
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}
