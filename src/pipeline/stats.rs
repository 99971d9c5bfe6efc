// 该文件是 Liangce （量测） 项目的一部分。
// src/pipeline/stats.rs - 运行计数
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
  sync::atomic::{AtomicU64, Ordering},
  time::Duration,
};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineStats {
  captured: AtomicU64,
  sampled: AtomicU64,
  processed: AtomicU64,
  annotated: AtomicU64,
  detection_failures: AtomicU64,
  delivered: AtomicU64,
  last_inference_us: AtomicU64,
}

/// 某一时刻的计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
  pub captured: u64,
  pub sampled: u64,
  pub processed: u64,
  pub annotated: u64,
  pub detection_failures: u64,
  pub delivered: u64,
  /// 最近一次模型推理耗时（微秒）
  pub last_inference_us: u64,
}

impl PipelineStats {
  pub(crate) fn frame_captured(&self) {
    self.captured.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn frame_sampled(&self) {
    self.sampled.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn frame_processed(&self, annotated: bool) {
    self.processed.fetch_add(1, Ordering::Relaxed);
    if annotated {
      self.annotated.fetch_add(1, Ordering::Relaxed);
    }
  }

  pub(crate) fn detection_failed(&self) {
    self.detection_failures.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn inference_finished(&self, elapsed: Duration) {
    let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
    self.last_inference_us.store(micros, Ordering::Relaxed);
  }

  pub(crate) fn frame_delivered(&self) {
    self.delivered.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn reset(&self) {
    for counter in [
      &self.captured,
      &self.sampled,
      &self.processed,
      &self.annotated,
      &self.detection_failures,
      &self.delivered,
      &self.last_inference_us,
    ] {
      counter.store(0, Ordering::Relaxed);
    }
  }

  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      captured: self.captured.load(Ordering::Relaxed),
      sampled: self.sampled.load(Ordering::Relaxed),
      processed: self.processed.load(Ordering::Relaxed),
      annotated: self.annotated.load(Ordering::Relaxed),
      detection_failures: self.detection_failures.load(Ordering::Relaxed),
      delivered: self.delivered.load(Ordering::Relaxed),
      last_inference_us: self.last_inference_us.load(Ordering::Relaxed),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counters_accumulate_and_reset() {
    let stats = PipelineStats::default();
    stats.frame_captured();
    stats.frame_captured();
    stats.frame_sampled();
    stats.frame_processed(true);
    stats.frame_processed(false);
    stats.detection_failed();
    stats.frame_delivered();
    stats.inference_finished(Duration::from_millis(12));

    assert_eq!(
      stats.snapshot(),
      StatsSnapshot {
        captured: 2,
        sampled: 1,
        processed: 2,
        annotated: 1,
        detection_failures: 1,
        delivered: 1,
        last_inference_us: 12_000,
      }
    );

    stats.reset();
    assert_eq!(stats.snapshot(), StatsSnapshot::default());
  }
}
