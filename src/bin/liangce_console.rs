// 该文件是 Liangce （量测） 项目的一部分。
// src/bin/liangce_console.rs - 命令行程序
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

use std::{
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use liangce::{app::build_controller, args::CommonArgs};

/// Liangce 命令行程序：运行流水线直到流结束或收到 Ctrl+C
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub common: CommonArgs,

  /// 最长运行时间（秒），0 表示不限制
  #[arg(long, value_name = "SECONDS", default_value_t = 0)]
  pub duration: u64,
}

fn main() -> Result<()> {
  let args = Args::parse();
  args.common.init_logging().context("无法打开日志文件")?;

  let config = args.common.load_config().context("加载配置失败")?;
  info!("视频来源: {}", config.source);
  info!("检测模型: {}", config.model);
  info!(
    "抽帧间隔: {}, 标定常数: {} 像素/{}",
    config.pipeline.skip_interval, config.detection.pixels_per_unit, config.detection.unit
  );

  let controller = Arc::new(build_controller(&config).context("创建流水线失败")?);

  let handler = controller.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    handler.stop();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl+C 处理函数")?;

  controller
    .start(&config.source)
    .with_context(|| format!("无法启动流水线: {}", config.source))?;

  let started = Instant::now();
  let limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));
  while !controller.wait_idle(Duration::from_millis(500)) {
    if limit.is_some_and(|limit| started.elapsed() >= limit) {
      warn!("达到运行时间上限 {}s，停止流水线", args.duration);
      controller.stop();
      if !controller.wait_idle(controller.settings().drain_timeout) {
        warn!("流水线未能按时停止");
      }
      break;
    }
  }

  let status = controller.status();
  info!(
    "任务完成: 采集 {} 帧, 处理 {} 帧, 标注 {} 帧, 检测失败 {} 次",
    status.stats.captured, status.stats.processed, status.stats.annotated, status.stats.detection_failures
  );
  Ok(())
}
