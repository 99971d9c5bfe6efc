// 该文件是 Liangce （量测） 项目的一部分。
// src/pipeline/controller.rs - 流水线生命周期控制
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

//! # 生命周期控制
//!
//! 状态：`Idle → Starting → Running → Stopping → Idle`。
//!
//! - `start` 只在 `Idle` 时进入 `Starting`，在锁外打开来源，随后启动采集、检测、
//!   分发三个工作线程和一个监督线程；打开来源期间 `status` 与 `stop` 不会被阻塞，
//!   期间收到的停止请求会在来源打开后立即关闭它并回到 `Idle`；
//! - `stop` 清除运行标志并关闭来源，不等待线程退出，可以重复调用；
//! - 监督线程等待所有工作线程结束、清空队列、复位运行标志，然后回到 `Idle`。
//!   流结束、来源出错或工作线程崩溃时同样走这条路径。

use std::{
  fmt::Display,
  sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
  thread::{self, JoinHandle},
  time::Duration,
};

use crossbeam_channel::Receiver;
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  frame::{AnnotatedFrame, Frame},
  input::{CloseHandle, FrameSource, InputError, InputWrapper},
  model::{DetectResult, Model},
  output::{FrameFeed, FrameSink, SinkFactory, draw::Draw},
  pipeline::{
    PipelineSettings, RunFlag, StopHandle,
    detection::{DetectionSettings, DetectionStage},
    distribution::run_distribution,
    sampler::{SkipSampler, run_capture},
    stats::{PipelineStats, StatsSnapshot},
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  Idle,
  Starting,
  Running,
  Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlReply {
  Started,
  Stopped,
}

impl Display for ControlReply {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ControlReply::Started => write!(f, "Started"),
      ControlReply::Stopped => write!(f, "Stopped"),
    }
  }
}

#[derive(Error, Debug)]
pub enum ControlError {
  #[error("AlreadyRunning")]
  AlreadyRunning,
  #[error("SourceUnavailable: {0}")]
  SourceUnavailable(#[from] InputError),
  #[error("启动过程中收到停止请求")]
  Cancelled,
  #[error("无法启动工作线程: {0}")]
  WorkerSpawnFailed(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
  pub phase: Phase,
  pub source: Option<String>,
  pub stats: StatsSnapshot,
}

struct Lifecycle {
  phase: Phase,
  source: Option<String>,
  close: Option<CloseHandle>,
}

struct Shared {
  lifecycle: Mutex<Lifecycle>,
  idle: Condvar,
  flag: RunFlag,
  stats: PipelineStats,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, Lifecycle> {
    self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 运行中但标志已被清除（例如显示窗口请求停止）也视为停止中
  fn phase_of(&self, lifecycle: &Lifecycle) -> Phase {
    match lifecycle.phase {
      Phase::Running if !self.flag.is_running() => Phase::Stopping,
      phase => phase,
    }
  }
}

struct Workers {
  capture: JoinHandle<()>,
  detection: JoinHandle<Receiver<Frame>>,
  distribution: JoinHandle<Receiver<AnnotatedFrame>>,
}

pub struct Controller<M> {
  stage: DetectionStage<M>,
  settings: PipelineSettings,
  feed: FrameFeed,
  sinks: Vec<Arc<dyn SinkFactory>>,
  shared: Arc<Shared>,
}

impl<M> Controller<M>
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: Display,
{
  pub fn new(model: M, settings: PipelineSettings, detection: DetectionSettings, draw: Draw) -> Self {
    Self {
      stage: DetectionStage::new(Arc::new(model), Arc::new(draw), Arc::new(detection)),
      settings,
      feed: FrameFeed::default(),
      sinks: Vec::new(),
      shared: Arc::new(Shared {
        lifecycle: Mutex::new(Lifecycle {
          phase: Phase::Idle,
          source: None,
          close: None,
        }),
        idle: Condvar::new(),
        flag: RunFlag::new(),
        stats: PipelineStats::default(),
      }),
    }
  }

  pub fn with_feed(mut self, feed: FrameFeed) -> Self {
    self.feed = feed;
    self
  }

  /// 追加一个输出，推流槽总是存在，不需要注册
  pub fn with_sink(mut self, factory: Arc<dyn SinkFactory>) -> Self {
    self.sinks.push(factory);
    self
  }

  pub fn feed(&self) -> &FrameFeed {
    &self.feed
  }

  pub fn settings(&self) -> &PipelineSettings {
    &self.settings
  }

  /// 打开 `source_uri` 并启动流水线
  pub fn start(&self, source_uri: &str) -> Result<ControlReply, ControlError> {
    self.start_with(source_uri, || {
      let url = Url::parse(source_uri)?;
      InputWrapper::from_url(&url)
    })
  }

  /// 使用已经打开的来源启动流水线
  pub fn start_with_source<S>(&self, name: &str, source: S) -> Result<ControlReply, ControlError>
  where
    S: FrameSource + 'static,
  {
    self.start_with(name, move || Ok(source))
  }

  fn start_with<S, F>(&self, name: &str, open: F) -> Result<ControlReply, ControlError>
  where
    S: FrameSource + 'static,
    F: FnOnce() -> Result<S, InputError>,
  {
    let lifecycle = self.shared.lock();
    let (mut lifecycle, _) = self
      .shared
      .idle
      .wait_timeout_while(lifecycle, self.settings.drain_timeout, |lifecycle| {
        self.shared.phase_of(lifecycle) == Phase::Stopping
      })
      .unwrap_or_else(PoisonError::into_inner);

    if lifecycle.phase != Phase::Idle {
      warn!("流水线已在运行，忽略启动请求: {}", name);
      return Err(ControlError::AlreadyRunning);
    }
    lifecycle.phase = Phase::Starting;
    lifecycle.source = Some(name.to_string());
    lifecycle.close = None;
    drop(lifecycle);

    // 打开来源可能耗时较长，不持有锁
    let opened = open();

    let mut lifecycle = self.shared.lock();
    let source = match opened {
      Ok(source) => source,
      Err(e) => {
        error!("无法打开视频来源 {}: {}", name, e);
        self.settle_idle(lifecycle);
        return Err(ControlError::SourceUnavailable(e));
      }
    };
    let close = source.close_handle();

    if lifecycle.phase != Phase::Starting {
      info!("启动过程中收到停止请求，关闭来源: {}", name);
      close.close();
      drop(source);
      self.settle_idle(lifecycle);
      return Err(ControlError::Cancelled);
    }

    let workers = match self.launch(source, close.clone()) {
      Ok(workers) => workers,
      Err(e) => {
        self.settle_idle(lifecycle);
        return Err(e);
      }
    };
    let shared = self.shared.clone();
    if let Err(e) = thread::Builder::new()
      .name("liangce-supervisor".into())
      .spawn(move || supervise(shared, workers))
    {
      // 工作线程已经启动，让它们自行退出
      self.shared.flag.lower();
      close.close();
      self.settle_idle(lifecycle);
      return Err(ControlError::WorkerSpawnFailed(e));
    }

    lifecycle.phase = Phase::Running;
    lifecycle.close = Some(close);
    info!("流水线已启动: {}", name);
    Ok(ControlReply::Started)
  }

  /// 启动未完成时回到 `Idle` 并唤醒等待者
  fn settle_idle(&self, mut lifecycle: MutexGuard<'_, Lifecycle>) {
    lifecycle.phase = Phase::Idle;
    lifecycle.close = None;
    drop(lifecycle);
    self.shared.idle.notify_all();
  }

  fn launch<S>(&self, source: S, close: CloseHandle) -> Result<Workers, ControlError>
  where
    S: FrameSource + 'static,
  {
    let shared = &self.shared;
    let poll_interval = self.settings.poll_interval;
    let capacity = self.settings.queue_capacity.max(1);

    shared.stats.reset();
    self.feed.reset();
    shared.flag.raise();

    let stop = StopHandle::new(shared.flag.clone(), close.clone());
    let mut factories: Vec<&dyn SinkFactory> = vec![&self.feed];
    for factory in self.sinks.iter() {
      factories.push(factory.as_ref());
    }
    let sinks: Vec<Box<dyn FrameSink>> = factories
      .into_iter()
      .filter_map(|factory| match factory.create(stop.clone()) {
        Ok(sink) => Some(sink),
        Err(e) => {
          warn!("无法创建输出，本次运行跳过: {}", e);
          None
        }
      })
      .collect();

    let (ingest_tx, ingest_rx) = crossbeam_channel::bounded::<Frame>(capacity);
    let (output_tx, output_rx) = crossbeam_channel::bounded::<AnnotatedFrame>(capacity);

    let abort = |e: std::io::Error| {
      shared.flag.lower();
      close.close();
      ControlError::WorkerSpawnFailed(e)
    };

    let capture = {
      let shared = shared.clone();
      let sampler = SkipSampler::new(self.settings.skip_interval);
      thread::Builder::new()
        .name("liangce-capture".into())
        .spawn(move || {
          run_capture(
            source,
            sampler,
            ingest_tx,
            shared.flag.clone(),
            &shared.stats,
            poll_interval,
          )
        })
        .map_err(abort)?
    };

    let detection = {
      let shared = shared.clone();
      let stage = self.stage.clone();
      thread::Builder::new()
        .name("liangce-detection".into())
        .spawn(move || {
          stage.run(
            ingest_rx,
            output_tx,
            shared.flag.clone(),
            &shared.stats,
            poll_interval,
          )
        })
        .map_err(abort)?
    };

    let distribution = {
      let shared = shared.clone();
      thread::Builder::new()
        .name("liangce-distribution".into())
        .spawn(move || {
          run_distribution(
            output_rx,
            sinks,
            shared.flag.clone(),
            &shared.stats,
            poll_interval,
          )
        })
        .map_err(abort)?
    };

    Ok(Workers {
      capture,
      detection,
      distribution,
    })
  }

  /// 请求停止，立即返回
  pub fn stop(&self) -> ControlReply {
    let mut lifecycle = self.shared.lock();
    if lifecycle.phase == Phase::Starting {
      info!("来源尚在打开，打开后立即关闭");
      lifecycle.phase = Phase::Stopping;
    } else if lifecycle.phase == Phase::Running {
      info!("正在停止流水线");
      self.shared.flag.lower();
      if let Some(close) = lifecycle.close.take() {
        close.close();
      }
      lifecycle.phase = Phase::Stopping;
    } else {
      debug!("流水线未在运行，停止请求无需处理");
    }
    ControlReply::Stopped
  }

  /// 等待流水线回到 `Idle`，超时返回 `false`
  pub fn wait_idle(&self, timeout: Duration) -> bool {
    let lifecycle = self.shared.lock();
    let (lifecycle, _) = self
      .shared
      .idle
      .wait_timeout_while(lifecycle, timeout, |lifecycle| {
        lifecycle.phase != Phase::Idle
      })
      .unwrap_or_else(PoisonError::into_inner);
    lifecycle.phase == Phase::Idle
  }

  pub fn status(&self) -> ControllerStatus {
    let lifecycle = self.shared.lock();
    ControllerStatus {
      phase: self.shared.phase_of(&lifecycle),
      source: lifecycle.source.clone(),
      stats: self.shared.stats.snapshot(),
    }
  }
}

impl<M> Drop for Controller<M> {
  fn drop(&mut self) {
    let mut lifecycle = self.shared.lock();
    if lifecycle.phase == Phase::Idle {
      return;
    }
    self.shared.flag.lower();
    if let Some(close) = lifecycle.close.take() {
      close.close();
    }
    let (lifecycle, _) = self
      .shared
      .idle
      .wait_timeout_while(lifecycle, self.settings.drain_timeout, |lifecycle| {
        lifecycle.phase != Phase::Idle
      })
      .unwrap_or_else(PoisonError::into_inner);
    if lifecycle.phase != Phase::Idle {
      warn!("流水线未能在 {:?} 内停止", self.settings.drain_timeout);
    }
  }
}

/// 监督线程：等待工作线程结束，清空队列并回到 `Idle`
fn supervise(shared: Arc<Shared>, workers: Workers) {
  if workers.capture.join().is_err() {
    error!("采集线程异常退出");
  }
  let ingest_rest = workers.detection.join().map_err(|_| {
    error!("检测线程异常退出");
  });
  let output_rest = workers.distribution.join().map_err(|_| {
    error!("分发线程异常退出");
  });

  shared.flag.lower();

  let discarded = ingest_rest.map(|rx| rx.try_iter().count()).unwrap_or(0)
    + output_rest.map(|rx| rx.try_iter().count()).unwrap_or(0);
  if discarded > 0 {
    info!("清空队列，丢弃 {} 帧", discarded);
  }

  let mut lifecycle = shared.lock();
  lifecycle.phase = Phase::Idle;
  lifecycle.close = None;
  drop(lifecycle);
  shared.idle.notify_all();

  let stats = shared.stats.snapshot();
  info!(
    "流水线已停止: 采集 {} 帧, 抽样 {} 帧, 处理 {} 帧, 标注 {} 帧, 检测失败 {} 次, 分发 {} 帧",
    stats.captured,
    stats.sampled,
    stats.processed,
    stats.annotated,
    stats.detection_failures,
    stats.delivered
  );
}

#[cfg(test)]
mod tests {
  use std::time::Instant;

  use super::*;
  use crate::{input::SyntheticInput, model::FixedModel};

  const SLOW_OPEN: Duration = Duration::from_millis(500);

  fn controller() -> Controller<FixedModel> {
    Controller::new(
      FixedModel::default(),
      PipelineSettings {
        poll_interval: Duration::from_millis(10),
        ..PipelineSettings::default()
      },
      DetectionSettings::default(),
      Draw::default(),
    )
  }

  #[test]
  fn stop_when_idle_is_a_no_op() {
    let controller = controller();
    assert_eq!(controller.stop(), ControlReply::Stopped);
    assert_eq!(controller.stop(), ControlReply::Stopped);
    assert_eq!(controller.status().phase, Phase::Idle);
  }

  #[test]
  fn unparsable_uri_is_source_unavailable() {
    let controller = controller();
    assert!(matches!(
      controller.start("not a uri"),
      Err(ControlError::SourceUnavailable(InputError::InvalidUri(_)))
    ));
    assert_eq!(controller.status().phase, Phase::Idle);
  }

  #[test]
  fn finite_source_returns_to_idle_by_itself() {
    let controller = controller();
    controller
      .start_with_source("synthetic", SyntheticInput::new(20, 8, 8))
      .unwrap();
    assert!(controller.wait_idle(Duration::from_secs(10)));

    let status = controller.status();
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(status.source.as_deref(), Some("synthetic"));
    assert_eq!(status.stats.captured, 20);
    assert_eq!(status.stats.sampled, 2);
    assert_eq!(status.stats.delivered, 2);
  }

  #[test]
  fn sink_stop_request_is_reported_as_stopping() {
    let controller = controller();
    controller
      .start_with_source("endless", SyntheticInput::endless(8, 8).with_fps(50))
      .unwrap();
    controller.shared.flag.lower();
    assert_ne!(controller.status().phase, Phase::Running);
    assert!(controller.wait_idle(Duration::from_secs(10)));
  }

  #[test]
  fn status_and_stop_do_not_wait_for_slow_open() {
    let controller = Arc::new(controller());
    let source = SyntheticInput::endless(8, 8);
    let close = source.close_handle();

    let starter = {
      let controller = controller.clone();
      thread::spawn(move || {
        controller.start_with("slow", move || {
          thread::sleep(SLOW_OPEN);
          Ok(source)
        })
      })
    };
    thread::sleep(Duration::from_millis(50));

    let begin = Instant::now();
    assert_eq!(controller.status().phase, Phase::Starting);
    assert!(matches!(
      controller.start_with_source("second", SyntheticInput::new(1, 8, 8)),
      Err(ControlError::AlreadyRunning)
    ));
    assert_eq!(controller.stop(), ControlReply::Stopped);
    assert_eq!(controller.status().phase, Phase::Stopping);
    assert!(begin.elapsed() < SLOW_OPEN / 2);

    assert!(matches!(starter.join().unwrap(), Err(ControlError::Cancelled)));
    assert!(close.is_closed());
    assert_eq!(controller.status().phase, Phase::Idle);
  }

  #[test]
  fn slow_open_moves_from_starting_to_running() {
    let controller = Arc::new(controller());
    let starter = {
      let controller = controller.clone();
      thread::spawn(move || {
        controller.start_with("slow", || {
          thread::sleep(SLOW_OPEN);
          Ok(SyntheticInput::endless(8, 8).with_fps(50))
        })
      })
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(controller.status().phase, Phase::Starting);

    assert_eq!(starter.join().unwrap().unwrap(), ControlReply::Started);
    assert_eq!(controller.status().phase, Phase::Running);
    controller.stop();
    assert!(controller.wait_idle(Duration::from_secs(10)));
  }

  #[test]
  fn failed_open_returns_to_idle() {
    let controller = controller();
    let result = controller.start_with("broken", || {
      Err::<SyntheticInput, _>(InputError::InvalidUri(url::ParseError::EmptyHost))
    });
    assert!(matches!(result, Err(ControlError::SourceUnavailable(_))));
    assert_eq!(controller.status().phase, Phase::Idle);
  }
}
