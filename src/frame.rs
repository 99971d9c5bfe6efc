// 该文件是 Liangce （量测） 项目的一部分。
// src/frame.rs - 帧定义
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

use chrono::{DateTime, Utc};
use image::RgbImage;

use crate::measure::MeasuredDetection;

/// 采集到的一帧图像
///
/// 序号在采集时分配，每次运行从 0 开始单调递增。帧在各个阶段之间按值移动，
/// 不会被多个阶段同时持有。
#[derive(Debug, Clone)]
pub struct Frame {
  seq: u64,
  captured_at: DateTime<Utc>,
  image: RgbImage,
}

impl Frame {
  pub fn new(seq: u64, image: RgbImage) -> Self {
    Self {
      seq,
      captured_at: Utc::now(),
      image,
    }
  }

  pub fn seq(&self) -> u64 {
    self.seq
  }

  pub fn captured_at(&self) -> DateTime<Utc> {
    self.captured_at
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub(crate) fn image_mut(&mut self) -> &mut RgbImage {
    &mut self.image
  }
}

/// 已标注的帧
///
/// 检测框与测量文字已经绘制到图像上；`detections` 记录绘制了哪些检测结果。
/// 产生之后不会再被修改，分发阶段通过 `Arc` 共享给所有输出。
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
  frame: Frame,
  detections: Vec<MeasuredDetection>,
}

impl AnnotatedFrame {
  pub fn new(frame: Frame, detections: Vec<MeasuredDetection>) -> Self {
    Self { frame, detections }
  }

  /// 未检测到目标（或检测失败）时原样转发的帧
  pub fn unannotated(frame: Frame) -> Self {
    Self {
      frame,
      detections: Vec::new(),
    }
  }

  pub fn seq(&self) -> u64 {
    self.frame.seq()
  }

  pub fn captured_at(&self) -> DateTime<Utc> {
    self.frame.captured_at()
  }

  pub fn image(&self) -> &RgbImage {
    self.frame.image()
  }

  pub fn detections(&self) -> &[MeasuredDetection] {
    &self.detections
  }

  pub fn is_annotated(&self) -> bool {
    !self.detections.is_empty()
  }
}
