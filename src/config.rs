// 该文件是 Liangce （量测） 项目的一部分。
// src/config.rs - 配置文件
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! TOML 配置文件。所有字段都有默认值，文件中只需写出需要修改的部分：
//!
//! ```toml
//! source = "rtsp://192.168.1.100:8554/stream"
//! model = "yolo26:///opt/models/box.rknn"
//!
//! [pipeline]
//! skip_interval = 10
//!
//! [detection]
//! labels = ["box"]
//! pixels_per_unit = 58.7
//! ```

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
  measure::{Calibration, CalibrationError, DEFAULT_PIXELS_PER_UNIT},
  pipeline::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SKIP_INTERVAL, DetectionSettings, PipelineSettings,
  },
};

/// 指定配置文件路径的环境变量
pub const CONFIG_ENV: &str = "LIANGCE_CONFIG";

const DEFAULT_SOURCE: &str = "synthetic://?frames=0&fps=25";
const DEFAULT_MODEL: &str = "fixed://";
const DEFAULT_BIND: &str = "0.0.0.0:8088";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("标定参数错误: {0}")]
  Calibration(#[from] CalibrationError),
  #[error("配置项 {field} 无效: {reason}")]
  Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
  ConfigError::Invalid {
    field,
    reason: reason.into(),
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
  /// 视频来源 URI
  pub source: String,
  /// 检测模型 URI
  pub model: String,
  pub pipeline: PipelineConfig,
  pub detection: DetectionConfig,
  pub display: DisplayConfig,
  pub http: HttpConfig,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      source: DEFAULT_SOURCE.to_string(),
      model: DEFAULT_MODEL.to_string(),
      pipeline: PipelineConfig::default(),
      detection: DetectionConfig::default(),
      display: DisplayConfig::default(),
      http: HttpConfig::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
  pub skip_interval: u64,
  pub queue_capacity: usize,
  pub poll_interval_ms: u64,
  pub drain_timeout_ms: u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      skip_interval: DEFAULT_SKIP_INTERVAL,
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
      poll_interval_ms: 100,
      drain_timeout_ms: 5000,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
  pub labels: Vec<String>,
  pub pixels_per_unit: f64,
  pub unit: String,
  pub show_confidence: bool,
  pub font: Option<PathBuf>,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      labels: vec!["box".to_string()],
      pixels_per_unit: DEFAULT_PIXELS_PER_UNIT,
      unit: "cm".to_string(),
      show_confidence: false,
      font: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
  pub enabled: bool,
  pub width: usize,
  pub height: usize,
}

impl Default for DisplayConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      width: 640,
      height: 480,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
  pub bind: String,
  pub jpeg_quality: u8,
  pub stream_interval_ms: u64,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      bind: DEFAULT_BIND.to_string(),
      jpeg_quality: 80,
      stream_interval_ms: 33,
    }
  }
}

impl AppConfig {
  /// 从文件读取配置；未指定路径时使用默认配置
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let Some(path) = path else {
      info!("未指定配置文件，使用默认配置");
      return Ok(Self::default());
    };

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config = Self::from_toml_str(&text)?;
    info!("已读取配置文件 {}", path.display());
    Ok(config)
  }

  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.source.trim().is_empty() {
      return Err(invalid("source", "不能为空"));
    }
    if self.model.trim().is_empty() {
      return Err(invalid("model", "不能为空"));
    }
    if self.pipeline.queue_capacity == 0 {
      return Err(invalid("pipeline.queue_capacity", "必须大于 0"));
    }
    if self.pipeline.poll_interval_ms == 0 {
      return Err(invalid("pipeline.poll_interval_ms", "必须大于 0"));
    }
    Calibration::new(self.detection.pixels_per_unit)?;
    if self.display.width == 0 || self.display.height == 0 {
      return Err(invalid(
        "display",
        format!("窗口尺寸 {}x{} 无效", self.display.width, self.display.height),
      ));
    }
    if !(1..=100).contains(&self.http.jpeg_quality) {
      return Err(invalid(
        "http.jpeg_quality",
        format!("必须在 1 到 100 之间, 实际为 {}", self.http.jpeg_quality),
      ));
    }
    if self.http.bind.trim().is_empty() {
      return Err(invalid("http.bind", "不能为空"));
    }
    Ok(())
  }

  pub fn pipeline_settings(&self) -> PipelineSettings {
    PipelineSettings {
      skip_interval: self.pipeline.skip_interval,
      queue_capacity: self.pipeline.queue_capacity,
      poll_interval: Duration::from_millis(self.pipeline.poll_interval_ms),
      drain_timeout: Duration::from_millis(self.pipeline.drain_timeout_ms),
    }
  }

  pub fn detection_settings(&self) -> Result<DetectionSettings, ConfigError> {
    Ok(DetectionSettings {
      labels: self.detection.labels.clone(),
      calibration: Calibration::new(self.detection.pixels_per_unit)?,
      unit: self.detection.unit.clone(),
      show_confidence: self.detection.show_confidence,
    })
  }

  pub fn stream_interval(&self) -> Duration {
    Duration::from_millis(self.http.stream_interval_ms)
  }
}
