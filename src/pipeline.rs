// 该文件是 Liangce （量测） 项目的一部分。
// src/pipeline.rs - 帧处理流水线
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

//! # 帧处理流水线
//!
//! 来源 → 采样 → 检测 → 分发 → 输出，每个阶段一个线程，阶段之间用有界队列连接。
//!
//! - 队列满时生产者阻塞（背压），阻塞是分段等待的，每个轮询周期重新检查运行标志；
//! - 出队同样是分段等待的，停止请求最多在一个轮询周期内被观察到；
//! - 每个队列只有一个消费者，帧的先后顺序保持不变。

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use crossbeam_channel::{SendTimeoutError, Sender};

use crate::input::CloseHandle;

pub mod controller;
pub mod detection;
pub mod distribution;
pub mod sampler;
pub mod stats;

pub use self::controller::{ControlError, ControlReply, Controller, ControllerStatus, Phase};
pub use self::detection::{DetectionInvocationFailed, DetectionSettings, DetectionStage};
pub use self::sampler::SkipSampler;
pub use self::stats::{PipelineStats, StatsSnapshot};

pub const DEFAULT_SKIP_INTERVAL: u64 = 10;
/// 三个工作线程，每个两帧
pub const DEFAULT_QUEUE_CAPACITY: usize = 6;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(5000);

/// 流水线运行参数
#[derive(Debug, Clone)]
pub struct PipelineSettings {
  pub skip_interval: u64,
  pub queue_capacity: usize,
  pub poll_interval: Duration,
  pub drain_timeout: Duration,
}

impl Default for PipelineSettings {
  fn default() -> Self {
    Self {
      skip_interval: DEFAULT_SKIP_INTERVAL,
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
      poll_interval: DEFAULT_POLL_INTERVAL,
      drain_timeout: DEFAULT_DRAIN_TIMEOUT,
    }
  }
}

/// 流水线的运行标志，由控制器持有，启动时交给每个工作线程
#[derive(Debug, Clone, Default)]
pub struct RunFlag {
  running: Arc<AtomicBool>,
}

impl RunFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  pub(crate) fn raise(&self) {
    self.running.store(true, Ordering::SeqCst);
  }

  pub fn lower(&self) {
    self.running.store(false, Ordering::SeqCst);
  }
}

/// 交给输出的停止句柄：清除运行标志并关闭来源
#[derive(Debug, Clone)]
pub struct StopHandle {
  flag: RunFlag,
  source: CloseHandle,
}

impl StopHandle {
  pub fn new(flag: RunFlag, source: CloseHandle) -> Self {
    Self { flag, source }
  }

  pub fn request_stop(&self) {
    self.flag.lower();
    self.source.close();
  }

  pub fn is_stop_requested(&self) -> bool {
    !self.flag.is_running()
  }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PushOutcome {
  Sent,
  Stopped,
  Disconnected,
}

/// 分段等待的入队：队列满时阻塞，每个轮询周期检查一次运行标志
pub(crate) fn push_bounded<T>(
  tx: &Sender<T>,
  mut item: T,
  flag: &RunFlag,
  poll_interval: Duration,
) -> PushOutcome {
  loop {
    match tx.send_timeout(item, poll_interval) {
      Ok(()) => return PushOutcome::Sent,
      Err(SendTimeoutError::Timeout(back)) => {
        if !flag.is_running() {
          return PushOutcome::Stopped;
        }
        item = back;
      }
      Err(SendTimeoutError::Disconnected(_)) => return PushOutcome::Disconnected,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{thread, time::Instant};

  use super::*;

  #[test]
  fn push_blocks_until_space_is_available() {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let flag = RunFlag::new();
    flag.raise();
    tx.send(0).unwrap();

    let consumer = thread::spawn(move || {
      thread::sleep(Duration::from_millis(30));
      (rx.recv().unwrap(), rx.recv().unwrap())
    });

    let outcome = push_bounded(&tx, 1, &flag, Duration::from_millis(5));
    assert_eq!(outcome, PushOutcome::Sent);
    assert_eq!(consumer.join().unwrap(), (0, 1));
  }

  #[test]
  fn push_gives_up_once_stopped() {
    let (tx, _rx) = crossbeam_channel::bounded(1);
    let flag = RunFlag::new();
    tx.send(0).unwrap();

    let start = Instant::now();
    let outcome = push_bounded(&tx, 1, &flag, Duration::from_millis(10));
    assert_eq!(outcome, PushOutcome::Stopped);
    assert!(start.elapsed() < Duration::from_secs(1));
  }

  #[test]
  fn push_reports_disconnected_consumer() {
    let (tx, rx) = crossbeam_channel::bounded::<u32>(1);
    drop(rx);
    let flag = RunFlag::new();
    flag.raise();
    assert_eq!(
      push_bounded(&tx, 1, &flag, Duration::from_millis(10)),
      PushOutcome::Disconnected
    );
  }

  #[test]
  fn stop_handle_lowers_flag_and_closes_source() {
    let flag = RunFlag::new();
    flag.raise();
    let source = CloseHandle::new();
    let stop = StopHandle::new(flag.clone(), source.clone());

    stop.request_stop();
    assert!(!flag.is_running());
    assert!(source.is_closed());
    assert!(stop.is_stop_requested());
  }
}
