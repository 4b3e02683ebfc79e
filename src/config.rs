//! shell配置，从JSON文件加载

use crate::parser::ParseMode;
use crate::sql::SqlConfig;
use crate::token::TokenKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 默认配置文件名，在当前工作目录下查找
pub const DEFAULT_CONFIG_FILE: &str = "task_dsl.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid highlight style \"{style}\" for \"{name}\" (expected SGR parameters such as \"1;34\")")]
    InvalidStyle { name: String, style: String },
}

/// 交互式shell的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// shell启动时的解析模式
    pub mode: ParseMode,
    pub prompt: String,
    pub history_file: Option<PathBuf>,
    /// `selected`、`it`、`this`、`that` 对应的任务
    pub selected_task_id: Option<u64>,
    /// token名称到ANSI SGR参数的映射，覆盖内置配色
    pub highlight: HashMap<String, String>,
    pub sql: SqlConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            mode: ParseMode::Auto,
            prompt: "task> ".to_string(),
            history_file: None,
            selected_task_id: None,
            highlight: HashMap::new(),
            sql: SqlConfig::default(),
        }
    }
}

impl ShellConfig {
    /// 从JSON文件加载配置并校验
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ShellConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// 与 [`ShellConfig::from_json_file`] 相同，但文件不存在时返回默认配置。
    /// 返回的标志表示是否读取了文件
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<(Self, bool), ConfigError> {
        match Self::from_json_file(path) {
            Ok(config) => Ok((config, true)),
            Err(ConfigError::NotFound { .. }) => Ok((Self::default(), false)),
            Err(e) => Err(e),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, style) in &self.highlight {
            let valid = !style.is_empty()
                && style
                    .split(';')
                    .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
            if !valid {
                return Err(ConfigError::InvalidStyle {
                    name: name.clone(),
                    style: style.clone(),
                });
            }
        }
        Ok(())
    }

    /// key不是token名称的高亮配置项，这些配置项会被忽略
    pub fn unknown_highlight_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .highlight
            .keys()
            .map(String::as_str)
            .filter(|name| TokenKind::from_name(name).is_none())
            .collect();
        names.sort_unstable();
        names
    }
}
