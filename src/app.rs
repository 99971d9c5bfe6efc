// 该文件是 Liangce （量测） 项目的一部分。
// src/app.rs - 按配置组装流水线
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

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl,
  config::{AppConfig, ConfigError},
  model::{ModelError, ModelWrapper},
  output::{
    FrameFeed,
    draw::{Draw, DrawError},
  },
  pipeline::Controller,
};

#[derive(Error, Debug)]
pub enum AppError {
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("模型 URI 无效: {0}")]
  InvalidModelUri(#[from] url::ParseError),
  #[error("模型加载失败: {0}")]
  ModelError(#[from] ModelError),
  #[error("字体加载失败: {0}")]
  DrawError(#[from] DrawError),
}

/// 加载模型与字体，创建控制器并注册配置中启用的输出
pub fn build_controller(config: &AppConfig) -> Result<Controller<ModelWrapper>, AppError> {
  info!("加载模型: {}", config.model);
  let model = ModelWrapper::from_url(&Url::parse(&config.model)?)?;
  let draw = Draw::load(config.detection.font.as_deref())?;

  let controller = Controller::new(
    model,
    config.pipeline_settings(),
    config.detection_settings()?,
    draw,
  )
  .with_feed(FrameFeed::new(config.http.jpeg_quality));

  if config.display.enabled {
    #[cfg(feature = "display_window")]
    {
      use std::sync::Arc;

      use crate::output::DisplayWindow;

      return Ok(controller.with_sink(Arc::new(DisplayWindow::new(
        "Liangce",
        config.display.width,
        config.display.height,
      ))));
    }
    #[cfg(not(feature = "display_window"))]
    tracing::warn!("未启用 display_window 特性，忽略显示窗口配置");
  }

  Ok(controller)
}
