// 该文件是 Liangce （量测） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::{fs::OpenOptions, path::PathBuf, sync::Mutex};

use clap::Args;
use tracing::{Level, Subscriber};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

use crate::config::{AppConfig, CONFIG_ENV, ConfigError};

/// 两个程序共用的参数，命令行中给出的值覆盖配置文件
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
  /// 配置文件路径
  #[arg(long, value_name = "FILE", env = CONFIG_ENV)]
  pub config: Option<PathBuf>,

  /// 视频来源
  /// 支持格式:
  /// - 合成: synthetic://?frames=0&fps=25
  /// - 图片: image:///path/to/frame.jpg?repeat=30, folder:///path/to/frames
  /// - 视频流: rtsp://..., http://..., file:///path/to/video.mp4
  /// - 摄像头: gst://camera/dev/video0?width=1280&height=720
  #[arg(long, value_name = "SOURCE")]
  pub source: Option<String>,

  /// 检测模型，例如 yolo26:///path/to/model.rknn 或 fixed:///path/to/detections.json
  #[arg(long, value_name = "MODEL")]
  pub model: Option<String>,

  /// 抽帧间隔
  #[arg(long, value_name = "FRAMES")]
  pub skip_interval: Option<u64>,

  /// 标定常数（每个单位的像素数）
  #[arg(long, value_name = "PIXELS")]
  pub pixels_per_unit: Option<f64>,

  /// 打开本地显示窗口
  #[arg(long)]
  pub display: bool,

  /// 日志级别
  #[arg(long, value_name = "LEVEL", default_value = "info")]
  pub log_level: Level,

  /// 日志同时追加写入此文件
  #[arg(long, value_name = "FILE")]
  pub log_file: Option<PathBuf>,
}

impl CommonArgs {
  pub fn init_logging(&self) -> std::io::Result<()> {
    self.log_subscriber()?.init();
    Ok(())
  }

  /// 终端输出，指定 `--log-file` 时再加一份不带颜色的文件输出
  fn log_subscriber(&self) -> std::io::Result<impl Subscriber + Send + Sync + 'static> {
    let level = LevelFilter::from_level(self.log_level);
    let file_layer = match &self.log_file {
      Some(path) => {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Some(
          fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(level),
        )
      }
      None => None,
    };

    Ok(
      tracing_subscriber::registry()
        .with(fmt::layer().with_filter(level))
        .with(file_layer),
    )
  }

  pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::load(self.config.as_deref())?;

    if let Some(source) = &self.source {
      config.source = source.clone();
    }
    if let Some(model) = &self.model {
      config.model = model.clone();
    }
    if let Some(skip_interval) = self.skip_interval {
      config.pipeline.skip_interval = skip_interval;
    }
    if let Some(pixels_per_unit) = self.pixels_per_unit {
      config.detection.pixels_per_unit = pixels_per_unit;
    }
    if self.display {
      config.display.enabled = true;
    }

    config.validate()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use clap::Parser;

  use super::*;

  #[derive(Parser)]
  struct TestCli {
    #[command(flatten)]
    common: CommonArgs,
  }

  #[test]
  fn command_line_overrides_defaults() {
    let cli = TestCli::parse_from([
      "liangce",
      "--source",
      "synthetic://?frames=30",
      "--skip-interval",
      "3",
      "--pixels-per-unit",
      "10",
      "--log-level",
      "debug",
    ]);
    let config = cli.common.load_config().unwrap();

    assert_eq!(config.source, "synthetic://?frames=30");
    assert_eq!(config.pipeline.skip_interval, 3);
    assert_eq!(config.detection.pixels_per_unit, 10.0);
    assert_eq!(config.model, "fixed://");
    assert_eq!(cli.common.log_level, Level::DEBUG);
  }

  #[test]
  fn invalid_override_is_rejected() {
    let cli = TestCli::parse_from(["liangce", "--pixels-per-unit=-1"]);
    assert!(cli.common.load_config().is_err());
  }

  #[test]
  fn config_path_can_come_from_environment() {
    use clap::CommandFactory;

    let command = TestCli::command();
    let config = command
      .get_arguments()
      .find(|arg| arg.get_id() == "config")
      .unwrap();
    assert_eq!(config.get_env(), Some(std::ffi::OsStr::new(CONFIG_ENV)));
  }

  #[test]
  fn log_file_receives_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    let cli = TestCli::parse_from([
      "liangce",
      "--log-level",
      "info",
      "--log-file",
      path.to_str().unwrap(),
    ]);

    let subscriber = cli.common.log_subscriber().unwrap();
    tracing::subscriber::with_default(subscriber, || {
      tracing::info!("流水线已启动: synthetic");
      tracing::debug!("不应写入的调试日志");
    });

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("流水线已启动: synthetic"));
    assert!(!text.contains("不应写入"));
    assert!(!text.contains('\u{1b}'));
  }
}
