use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use crate::AutomationConfig;

pub const DEFAULT_CONFIG_FILE: &str = "automation.toml";

/// 配置加载器
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    /// 加载配置：文件（可选）+ `FLUX_` 前缀的环境变量
    pub fn load(&self) -> Result<AutomationConfig> {
        let path = self
            .config_path
            .to_str()
            .ok_or_else(|| anyhow!("Invalid config path"))?;

        let config = Config::builder()
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix("FLUX").separator("__"))
            .build()?;

        let loaded: AutomationConfig = config.try_deserialize()?;
        Self::validate(&loaded)?;
        Ok(loaded)
    }

    /// 验证配置
    pub fn validate(config: &AutomationConfig) -> Result<()> {
        if config.scheduler.worker_threads == 0 {
            return Err(anyhow!("scheduler.worker_threads must be greater than 0"));
        }

        if config.engine.event_bus_capacity == 0 {
            return Err(anyhow!("engine.event_bus_capacity must be greater than 0"));
        }

        if config.engine.execution_history_limit == 0 {
            return Err(anyhow!("engine.execution_history_limit must be greater than 0"));
        }

        Ok(())
    }

    /// 写出默认配置文件
    pub fn write_default(&self) -> Result<()> {
        let content = toml::to_string_pretty(&AutomationConfig::default())?;
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }
}
