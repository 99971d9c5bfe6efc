// 该文件是 Liangce （量测） 项目的一部分。
// src/bin/liangce_server.rs - HTTP 控制服务程序
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

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use liangce::{
  app::build_controller,
  args::CommonArgs,
  server::{ControlSurface, ServerSettings, serve},
};

/// Liangce HTTP 服务：网页控制启停，并以 multipart 推送标注后的画面
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub common: CommonArgs,

  /// 监听地址，覆盖配置文件中的 http.bind
  #[arg(long, value_name = "ADDR")]
  pub bind: Option<String>,

  /// 启动服务后立即开始处理配置中的视频来源
  #[arg(long)]
  pub autostart: bool,
}

fn main() -> Result<()> {
  let args = Args::parse();
  args.common.init_logging().context("无法打开日志文件")?;

  let mut config = args.common.load_config().context("加载配置失败")?;
  if let Some(bind) = &args.bind {
    config.http.bind = bind.clone();
  }

  let controller = Arc::new(build_controller(&config).context("创建流水线失败")?);

  if args.autostart {
    controller
      .start(&config.source)
      .with_context(|| format!("无法启动流水线: {}", config.source))?;
  }

  let control: Arc<dyn ControlSurface> = controller.clone();
  let result = actix_web::rt::System::new().block_on(serve(control, ServerSettings::from_config(&config)));

  info!("HTTP 服务已退出，停止流水线");
  controller.stop();
  if !controller.wait_idle(controller.settings().drain_timeout) {
    warn!("流水线未能按时停止");
  }

  result.context("HTTP 服务异常退出")
}
