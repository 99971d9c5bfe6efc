// 该文件是 Liangce （量测） 项目的一部分。
// src/pipeline/sampler.rs - 采集与抽帧
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

use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, error, info};

use crate::{
  frame::Frame,
  input::FrameSource,
  pipeline::{PushOutcome, RunFlag, push_bounded, stats::PipelineStats},
};

/// 按固定间隔抽帧：只保留序号为间隔整数倍的帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipSampler {
  interval: u64,
}

impl SkipSampler {
  /// 间隔为 0 或 1 时保留每一帧
  pub fn new(interval: u64) -> Self {
    Self {
      interval: interval.max(1),
    }
  }

  pub fn interval(&self) -> u64 {
    self.interval
  }

  pub fn accepts(&self, seq: u64) -> bool {
    seq % self.interval == 0
  }
}

/// 采集线程主循环
///
/// 序号从 0 开始分配给每一帧（包括被丢弃的帧）。遇到停止标志、流结束或读取失败时退出，
/// 退出时丢弃发送端，下游在取完队列后结束。
pub(crate) fn run_capture<S: FrameSource>(
  mut source: S,
  sampler: SkipSampler,
  tx: Sender<Frame>,
  flag: RunFlag,
  stats: &PipelineStats,
  poll_interval: Duration,
) {
  info!("采集线程启动，抽帧间隔 {}", sampler.interval());
  let mut seq: u64 = 0;

  while flag.is_running() {
    let image = match source.read() {
      Ok(Some(image)) => image,
      Ok(None) => {
        info!("视频流结束，共采集 {} 帧", seq);
        break;
      }
      Err(e) => {
        error!("读取视频帧失败: {}", e);
        break;
      }
    };
    stats.frame_captured();

    if sampler.accepts(seq) {
      stats.frame_sampled();
      debug!("第 {} 帧进入检测队列", seq);
      match push_bounded(&tx, Frame::new(seq, image), &flag, poll_interval) {
        PushOutcome::Sent => {}
        PushOutcome::Stopped => break,
        PushOutcome::Disconnected => {
          error!("检测队列已断开，停止采集");
          break;
        }
      }
    }
    seq += 1;
  }

  info!("采集线程退出");
}
