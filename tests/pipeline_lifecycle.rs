// 该文件是 Liangce （量测） 项目的一部分。
// tests/pipeline_lifecycle.rs - 流水线生命周期测试
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
  sync::{Arc, Mutex},
  thread,
  time::Duration,
};

use image::RgbImage;

use liangce::{
  frame::AnnotatedFrame,
  input::SyntheticInput,
  model::{DetectResult, Detection, Model},
  output::{FrameSink, OutputError, SinkFactory, draw::Draw},
  pipeline::{
    ControlError, ControlReply, Controller, DetectionSettings, Phase, PipelineSettings, StopHandle,
  },
};

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// 对每一帧返回同样的检测结果，可选地模拟推理耗时或失败
#[derive(Default)]
struct ScriptedModel {
  detections: Vec<Detection>,
  delay: Duration,
  fail: bool,
}

impl Model for ScriptedModel {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = String;

  fn infer(&self, _input: &RgbImage) -> Result<DetectResult, String> {
    if !self.delay.is_zero() {
      thread::sleep(self.delay);
    }
    if self.fail {
      return Err("inference failed".to_string());
    }
    Ok(self.detections.clone().into())
  }
}

#[derive(Clone, Default)]
struct Recorder {
  frames: Arc<Mutex<Vec<Arc<AnnotatedFrame>>>>,
}

impl Recorder {
  fn seqs(&self) -> Vec<u64> {
    self.frames.lock().unwrap().iter().map(|f| f.seq()).collect()
  }

  fn frames(&self) -> Vec<Arc<AnnotatedFrame>> {
    self.frames.lock().unwrap().clone()
  }

  fn clear(&self) {
    self.frames.lock().unwrap().clear();
  }
}

struct RecordingSink(Recorder);

impl FrameSink for RecordingSink {
  fn name(&self) -> &str {
    "recorder"
  }

  fn deliver(&mut self, frame: &Arc<AnnotatedFrame>) -> Result<(), OutputError> {
    self.0.frames.lock().unwrap().push(frame.clone());
    Ok(())
  }
}

impl SinkFactory for Recorder {
  fn create(&self, _stop: StopHandle) -> Result<Box<dyn FrameSink>, OutputError> {
    Ok(Box::new(RecordingSink(self.clone())))
  }
}

fn settings(skip_interval: u64) -> PipelineSettings {
  PipelineSettings {
    skip_interval,
    poll_interval: Duration::from_millis(10),
    ..PipelineSettings::default()
  }
}

fn controller(model: ScriptedModel, skip_interval: u64) -> (Controller<ScriptedModel>, Recorder) {
  let recorder = Recorder::default();
  let controller = Controller::new(
    model,
    settings(skip_interval),
    DetectionSettings::default(),
    Draw::default(),
  )
  .with_sink(Arc::new(recorder.clone()));
  (controller, recorder)
}

fn detection(label: &str, bbox: [f32; 4]) -> Detection {
  Detection {
    label: label.to_string(),
    confidence: 0.8,
    bbox: bbox.into(),
  }
}

#[test]
fn thirty_frames_with_interval_ten_yield_three_outputs() {
  let (controller, recorder) = controller(ScriptedModel::default(), 10);

  let reply = controller
    .start_with_source("synthetic", SyntheticInput::new(30, 32, 24))
    .unwrap();
  assert_eq!(reply, ControlReply::Started);
  assert!(controller.wait_idle(IDLE_TIMEOUT));

  assert_eq!(recorder.seqs(), vec![0, 10, 20]);
  let status = controller.status();
  assert_eq!(status.stats.captured, 30);
  assert_eq!(status.stats.sampled, 3);
  assert_eq!(status.stats.processed, 3);
  assert_eq!(status.stats.delivered, 3);
}

#[test]
fn frames_without_detections_pass_through_unchanged() {
  let (controller, recorder) = controller(ScriptedModel::default(), 5);

  controller
    .start_with_source("synthetic", SyntheticInput::new(20, 16, 12))
    .unwrap();
  assert!(controller.wait_idle(IDLE_TIMEOUT));

  let frames = recorder.frames();
  assert_eq!(frames.len(), 4);
  for frame in frames {
    assert!(!frame.is_annotated());
    assert_eq!(frame.image(), &SyntheticInput::pattern(frame.seq(), 16, 12));
  }
  assert_eq!(controller.status().stats.annotated, 0);
}

#[test]
fn only_allowed_labels_are_measured() {
  let model = ScriptedModel {
    detections: vec![
      detection("person", [5.0, 5.0, 95.0, 95.0]),
      detection("box", [10.0, 10.0, 70.0, 70.0]),
    ],
    ..ScriptedModel::default()
  };
  let (controller, recorder) = controller(model, 1);

  controller
    .start_with_source("synthetic", SyntheticInput::new(3, 100, 100))
    .unwrap();
  assert!(controller.wait_idle(IDLE_TIMEOUT));

  let frames = recorder.frames();
  assert_eq!(frames.len(), 3);
  for frame in frames {
    let detections = frame.detections();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].detection.label, "box");
    assert_eq!(detections[0].measurement.length, 1.02);
    assert_eq!(detections[0].measurement.width, 1.02);
  }
  assert_eq!(controller.status().stats.annotated, 3);
}

#[test]
fn detection_failures_are_counted_and_frames_still_delivered() {
  let model = ScriptedModel {
    fail: true,
    ..ScriptedModel::default()
  };
  let (controller, recorder) = controller(model, 2);

  controller
    .start_with_source("synthetic", SyntheticInput::new(10, 8, 8))
    .unwrap();
  assert!(controller.wait_idle(IDLE_TIMEOUT));

  assert_eq!(recorder.seqs(), vec![0, 2, 4, 6, 8]);
  assert_eq!(controller.status().stats.detection_failures, 5);
}

#[test]
fn queued_frames_are_processed_after_end_of_stream() {
  let model = ScriptedModel {
    delay: Duration::from_millis(15),
    ..ScriptedModel::default()
  };
  let (controller, recorder) = controller(model, 1);

  controller
    .start_with_source("synthetic", SyntheticInput::new(20, 8, 8))
    .unwrap();
  assert!(controller.wait_idle(IDLE_TIMEOUT));

  assert_eq!(recorder.seqs(), (0..20).collect::<Vec<_>>());
}

#[test]
fn start_while_running_is_rejected() {
  let (controller, _recorder) = controller(ScriptedModel::default(), 1);

  controller
    .start_with_source("first", SyntheticInput::endless(8, 8).with_fps(100))
    .unwrap();
  let second = controller.start_with_source("second", SyntheticInput::new(5, 8, 8));
  assert!(matches!(second, Err(ControlError::AlreadyRunning)));

  let status = controller.status();
  assert_eq!(status.phase, Phase::Running);
  assert_eq!(status.source.as_deref(), Some("first"));

  // 原有的运行不受影响
  let before = controller.status().stats.captured;
  thread::sleep(Duration::from_millis(100));
  assert!(controller.status().stats.captured > before);

  controller.stop();
  assert!(controller.wait_idle(IDLE_TIMEOUT));
}

#[test]
fn stop_twice_returns_stopped_both_times() {
  let (controller, _recorder) = controller(ScriptedModel::default(), 1);

  controller
    .start_with_source("endless", SyntheticInput::endless(8, 8).with_fps(100))
    .unwrap();
  thread::sleep(Duration::from_millis(50));

  assert_eq!(controller.stop(), ControlReply::Stopped);
  assert_eq!(controller.stop(), ControlReply::Stopped);
  assert!(controller.wait_idle(IDLE_TIMEOUT));
  assert_eq!(controller.stop(), ControlReply::Stopped);
  assert_eq!(controller.status().phase, Phase::Idle);
}

#[test]
fn restart_after_stop_numbers_frames_from_zero() {
  let (controller, recorder) = controller(ScriptedModel::default(), 1);

  controller
    .start_with_source("first", SyntheticInput::endless(8, 8).with_fps(200))
    .unwrap();
  thread::sleep(Duration::from_millis(100));
  controller.stop();
  assert!(controller.wait_idle(IDLE_TIMEOUT));
  assert!(!recorder.seqs().is_empty());
  assert!(controller.feed().latest().is_some());

  recorder.clear();
  controller
    .start_with_source("second", SyntheticInput::new(3, 8, 8))
    .unwrap();
  assert!(controller.wait_idle(IDLE_TIMEOUT));

  assert_eq!(recorder.seqs(), vec![0, 1, 2]);
  assert_eq!(controller.status().stats.captured, 3);
}

#[test]
fn start_right_after_stop_waits_for_idle() {
  let (controller, recorder) = controller(ScriptedModel::default(), 1);

  controller
    .start_with_source("first", SyntheticInput::endless(8, 8).with_fps(200))
    .unwrap();
  thread::sleep(Duration::from_millis(50));
  controller.stop();

  // 上一次运行仍在停止中，启动请求等待其回到空闲后再执行
  let reply = controller
    .start_with_source("second", SyntheticInput::new(2, 8, 8))
    .unwrap();
  assert_eq!(reply, ControlReply::Started);
  assert!(controller.wait_idle(IDLE_TIMEOUT));
  assert_eq!(controller.status().source.as_deref(), Some("second"));
  assert_eq!(recorder.seqs().iter().rev().take(2).collect::<Vec<_>>(), vec![&1, &0]);
}

#[test]
fn feed_serves_latest_frame_as_jpeg() {
  let (controller, _recorder) = controller(ScriptedModel::default(), 10);

  controller
    .start_with_source("synthetic", SyntheticInput::new(25, 32, 24))
    .unwrap();
  assert!(controller.wait_idle(IDLE_TIMEOUT));

  let encoded = controller
    .feed()
    .next_encoded_frame(Duration::from_millis(100))
    .unwrap();
  assert_eq!(encoded.seq, 20);
  assert_eq!(&encoded.jpeg[..2], &[0xFF, 0xD8]);
}
