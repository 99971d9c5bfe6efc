// 该文件是 Liangce （量测） 项目的一部分。
// src/pipeline/detection.rs - 检测阶段
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
  fmt::Display,
  sync::Arc,
  time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{AnnotatedFrame, Frame},
  measure::{Calibration, MeasuredDetection},
  model::{DetectResult, Model},
  output::draw::Draw,
  pipeline::{PushOutcome, RunFlag, push_bounded, stats::PipelineStats},
};

/// 检测阶段的参数
#[derive(Debug, Clone)]
pub struct DetectionSettings {
  /// 保留的标签，为空时保留全部
  pub labels: Vec<String>,
  pub calibration: Calibration,
  pub unit: String,
  pub show_confidence: bool,
}

impl Default for DetectionSettings {
  fn default() -> Self {
    Self {
      labels: vec!["box".to_string()],
      calibration: Calibration::default(),
      unit: "cm".to_string(),
      show_confidence: false,
    }
  }
}

impl DetectionSettings {
  pub fn allows(&self, label: &str) -> bool {
    self.labels.is_empty() || self.labels.iter().any(|l| l == label)
  }

  /// 绘制在检测框上方的文字，例如 `Length: 1.02 cm, width: 1.02 cm`
  pub fn label_text(&self, item: &MeasuredDetection) -> String {
    let measurement = format!(
      "Length: {:.2} {unit}, width: {:.2} {unit}",
      item.measurement.length,
      item.measurement.width,
      unit = self.unit
    );
    if self.show_confidence {
      format!(
        "{} {:.2} | {}",
        item.detection.label, item.detection.confidence, measurement
      )
    } else {
      measurement
    }
  }
}

#[derive(Error, Debug)]
#[error("DetectionInvocationFailed: 第 {seq} 帧检测失败: {message}")]
pub struct DetectionInvocationFailed {
  pub seq: u64,
  pub message: String,
}

/// 持有模型的检测阶段，整个运行期间只有一个实例
pub struct DetectionStage<M> {
  model: Arc<M>,
  draw: Arc<Draw>,
  settings: Arc<DetectionSettings>,
}

impl<M> Clone for DetectionStage<M> {
  fn clone(&self) -> Self {
    Self {
      model: self.model.clone(),
      draw: self.draw.clone(),
      settings: self.settings.clone(),
    }
  }
}

impl<M> DetectionStage<M>
where
  M: Model<Input = RgbImage, Output = DetectResult>,
  M::Error: Display,
{
  pub fn new(model: Arc<M>, draw: Arc<Draw>, settings: Arc<DetectionSettings>) -> Self {
    Self {
      model,
      draw,
      settings,
    }
  }

  pub fn settings(&self) -> &DetectionSettings {
    &self.settings
  }

  /// 检测、过滤、测量并绘制一帧
  ///
  /// 模型调用失败时原样交还帧，由调用方决定如何转发。
  pub fn process(&self, frame: Frame) -> Result<AnnotatedFrame, (Frame, DetectionInvocationFailed)> {
    self.process_timed(frame).map(|(annotated, _)| annotated)
  }

  /// 同 `process`，额外返回模型推理耗时
  fn process_timed(
    &self,
    frame: Frame,
  ) -> Result<(AnnotatedFrame, Duration), (Frame, DetectionInvocationFailed)> {
    let start_time = Instant::now();
    let result = match self.model.infer(frame.image()) {
      Ok(result) => result,
      Err(e) => {
        let failure = DetectionInvocationFailed {
          seq: frame.seq(),
          message: e.to_string(),
        };
        return Err((frame, failure));
      }
    };
    let inference_time = start_time.elapsed();
    debug!("第 {} 帧推理完成，耗时: {:.2?}", frame.seq(), inference_time);

    let detections: Vec<MeasuredDetection> = result
      .items
      .iter()
      .filter(|d| self.settings.allows(&d.label))
      .map(|d| MeasuredDetection {
        detection: d.clone(),
        measurement: self.settings.calibration.measure(&d.bbox),
      })
      .collect();

    debug!(
      "第 {} 帧: 模型输出 {} 个目标，保留 {} 个",
      frame.seq(),
      result.len(),
      detections.len()
    );

    if detections.is_empty() {
      return Ok((AnnotatedFrame::unannotated(frame), inference_time));
    }

    let render_start = Instant::now();
    let mut frame = frame;
    for item in detections.iter() {
      let text = self.settings.label_text(item);
      self
        .draw
        .draw_bbox_with_label(frame.image_mut(), &item.detection.bbox, &text);
    }
    debug!("第 {} 帧渲染完成，耗时: {:.2?}", frame.seq(), render_start.elapsed());

    Ok((AnnotatedFrame::new(frame, detections), inference_time))
  }

  /// 检测线程主循环
  ///
  /// 停止标志清除后在一个轮询周期内退出；上游断开时先处理完队列中剩余的帧。
  /// 返回输入队列的接收端，由监督线程清空。
  pub(crate) fn run(
    &self,
    rx: Receiver<Frame>,
    tx: Sender<AnnotatedFrame>,
    flag: RunFlag,
    stats: &PipelineStats,
    poll_interval: Duration,
  ) -> Receiver<Frame> {
    info!("检测线程启动");

    loop {
      let frame = match rx.recv_timeout(poll_interval) {
        Ok(frame) => frame,
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

      let annotated = match self.process_timed(frame) {
        Ok((annotated, inference_time)) => {
          stats.inference_finished(inference_time);
          annotated
        }
        Err((frame, failure)) => {
          warn!("{}", failure);
          stats.detection_failed();
          AnnotatedFrame::unannotated(frame)
        }
      };
      stats.frame_processed(annotated.is_annotated());

      match push_bounded(&tx, annotated, &flag, poll_interval) {
        PushOutcome::Sent => {}
        PushOutcome::Stopped => break,
        PushOutcome::Disconnected => {
          error!("输出队列已断开，停止检测");
          break;
        }
      }
    }

    info!("检测线程退出");
    rx
  }
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;
  use crate::model::{BoundingBox, Detection};

  struct StubModel {
    detections: Vec<Detection>,
  }

  impl Model for StubModel {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = String;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, String> {
      Ok(self.detections.clone().into())
    }
  }

  struct FailingModel;

  impl Model for FailingModel {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = String;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, String> {
      Err("NPU busy".to_string())
    }
  }

  struct SlowModel(Duration);

  impl Model for SlowModel {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = String;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, String> {
      std::thread::sleep(self.0);
      Ok(DetectResult::default())
    }
  }

  fn detection(label: &str, bbox: [f32; 4]) -> Detection {
    Detection {
      label: label.to_string(),
      confidence: 0.9,
      bbox: bbox.into(),
    }
  }

  fn stage<M>(model: M) -> DetectionStage<M>
  where
    M: Model<Input = RgbImage, Output = DetectResult>,
    M::Error: Display,
  {
    DetectionStage::new(
      Arc::new(model),
      Arc::new(Draw::default()),
      Arc::new(DetectionSettings::default()),
    )
  }

  fn gray_frame(seq: u64) -> Frame {
    Frame::new(seq, RgbImage::from_pixel(100, 100, Rgb([40, 40, 40])))
  }

  #[test]
  fn only_allowed_labels_are_measured_and_drawn() {
    let stage = stage(StubModel {
      detections: vec![
        detection("person", [20.0, 20.0, 90.0, 90.0]),
        detection("box", [10.0, 10.0, 70.0, 70.0]),
      ],
    });

    let annotated = stage.process(gray_frame(0)).unwrap();
    assert_eq!(annotated.detections().len(), 1);

    let item = &annotated.detections()[0];
    assert_eq!(item.detection.label, "box");
    assert_eq!(item.measurement.length, 1.02);
    assert_eq!(item.measurement.width, 1.02);
    assert_eq!(
      stage.settings().label_text(item),
      "Length: 1.02 cm, width: 1.02 cm"
    );

    // 只绘制了 box 的边框
    assert_eq!(annotated.image().get_pixel(10, 40), &Rgb([255, 0, 255]));
    assert_eq!(annotated.image().get_pixel(90, 80), &Rgb([40, 40, 40]));
  }

  #[test]
  fn frame_without_detections_is_forwarded_untouched() {
    let stage = stage(StubModel { detections: vec![] });
    let frame = gray_frame(7);
    let original = frame.image().clone();

    let annotated = stage.process(frame).unwrap();
    assert_eq!(annotated.seq(), 7);
    assert!(!annotated.is_annotated());
    assert_eq!(annotated.image(), &original);
  }

  #[test]
  fn empty_allow_list_keeps_every_label() {
    let mut settings = DetectionSettings::default();
    settings.labels.clear();
    settings.show_confidence = true;
    let stage = DetectionStage::new(
      Arc::new(StubModel {
        detections: vec![
          detection("person", [0.0, 0.0, 58.7, 10.0]),
          detection("box", [10.0, 10.0, 70.0, 70.0]),
        ],
      }),
      Arc::new(Draw::default()),
      Arc::new(settings),
    );

    let annotated = stage.process(gray_frame(0)).unwrap();
    assert_eq!(annotated.detections().len(), 2);
    assert!(
      stage
        .settings()
        .label_text(&annotated.detections()[0])
        .starts_with("person 0.90 | Length: ")
    );
  }

  #[test]
  fn degenerate_box_is_measured_as_zero() {
    let stage = stage(StubModel {
      detections: vec![detection("box", [40.0, 10.0, 40.0, 70.0])],
    });

    let annotated = stage.process(gray_frame(0)).unwrap();
    let measurement = annotated.detections()[0].measurement;
    assert_eq!(measurement.length, 0.0);
    assert_eq!(measurement.width, 1.02);
  }

  #[test]
  fn model_failure_returns_the_frame() {
    let stage = stage(FailingModel);
    let (frame, failure) = stage.process(gray_frame(3)).unwrap_err();
    assert_eq!(frame.seq(), 3);
    assert_eq!(failure.seq, 3);
    assert!(failure.to_string().contains("NPU busy"));
  }

  #[test]
  fn worker_forwards_failed_frames_unannotated() {
    let (in_tx, in_rx) = crossbeam_channel::bounded(4);
    let (out_tx, out_rx) = crossbeam_channel::bounded(4);
    let flag = RunFlag::new();
    flag.raise();
    let stats = PipelineStats::default();

    in_tx.send(gray_frame(0)).unwrap();
    in_tx.send(gray_frame(10)).unwrap();
    drop(in_tx);

    let rest = stage(FailingModel).run(in_rx, out_tx, flag, &stats, Duration::from_millis(10));
    assert!(rest.is_empty());

    let seqs: Vec<u64> = out_rx.iter().map(|f| f.seq()).collect();
    assert_eq!(seqs, vec![0, 10]);
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.processed, 2);
    assert_eq!(snapshot.detection_failures, 2);
    assert_eq!(snapshot.annotated, 0);
  }

  #[test]
  fn worker_records_inference_time() {
    let (in_tx, in_rx) = crossbeam_channel::bounded(2);
    let (out_tx, out_rx) = crossbeam_channel::bounded(2);
    let flag = RunFlag::new();
    flag.raise();
    let stats = PipelineStats::default();

    in_tx.send(gray_frame(0)).unwrap();
    drop(in_tx);

    stage(SlowModel(Duration::from_millis(20))).run(
      in_rx,
      out_tx,
      flag,
      &stats,
      Duration::from_millis(10),
    );
    assert_eq!(out_rx.iter().count(), 1);
    assert!(stats.snapshot().last_inference_us >= 20_000);
  }
}
