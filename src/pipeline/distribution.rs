// 该文件是 Liangce （量测） 项目的一部分。
// src/pipeline/distribution.rs - 输出分发阶段
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

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
  frame::AnnotatedFrame,
  output::FrameSink,
  pipeline::{RunFlag, stats::PipelineStats},
};

/// 分发线程主循环：把每一帧交给所有输出
///
/// 出错的输出被移除，其余输出继续接收。返回输出队列的接收端，由监督线程清空。
pub(crate) fn run_distribution(
  rx: Receiver<AnnotatedFrame>,
  mut sinks: Vec<Box<dyn FrameSink>>,
  flag: RunFlag,
  stats: &PipelineStats,
  poll_interval: Duration,
) -> Receiver<AnnotatedFrame> {
  info!("分发线程启动，共 {} 个输出", sinks.len());

  loop {
    let frame = match rx.recv_timeout(poll_interval) {
      Ok(frame) => Arc::new(frame),
      Err(RecvTimeoutError::Timeout) => {
        if flag.is_running() {
          continue;
        }
        break;
      }
      Err(RecvTimeoutError::Disconnected) => break,
    };
    if !flag.is_running() {
      break;
    }

    sinks.retain_mut(|sink| match sink.deliver(&frame) {
      Ok(()) => true,
      Err(e) => {
        warn!("输出 {} 出错，本次运行不再使用: {}", sink.name(), e);
        sink.finish();
        false
      }
    });
    stats.frame_delivered();
    debug!(
      "第 {} 帧分发完成，距采集 {} ms",
      frame.seq(),
      (Utc::now() - frame.captured_at()).num_milliseconds()
    );
  }

  for sink in sinks.iter_mut() {
    sink.finish();
  }
  info!("分发线程退出");
  rx
}
