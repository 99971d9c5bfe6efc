// 该文件是 Liangce （量测） 项目的一部分。
// src/measure.rs - 尺寸测量
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

use serde::Serialize;
use thiserror::Error;

use crate::model::{BoundingBox, Detection};

/// 默认标定常数：每个物理单位对应的像素数
pub const DEFAULT_PIXELS_PER_UNIT: f64 = 58.7;

#[derive(Error, Debug, PartialEq)]
pub enum CalibrationError {
  #[error("标定常数必须为正数, 实际为 {0}")]
  InvalidPixelsPerUnit(f64),
}

/// 像素到物理单位的固定标定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
  pixels_per_unit: f64,
}

impl Default for Calibration {
  fn default() -> Self {
    Self {
      pixels_per_unit: DEFAULT_PIXELS_PER_UNIT,
    }
  }
}

impl Calibration {
  pub fn new(pixels_per_unit: f64) -> Result<Self, CalibrationError> {
    if !pixels_per_unit.is_finite() || pixels_per_unit <= 0.0 {
      return Err(CalibrationError::InvalidPixelsPerUnit(pixels_per_unit));
    }
    Ok(Self { pixels_per_unit })
  }

  pub fn pixels_per_unit(&self) -> f64 {
    self.pixels_per_unit
  }

  /// 由检测框计算长和宽。坐标先截断为整像素，长对应水平跨度，宽对应垂直跨度。
  pub fn measure(&self, bbox: &BoundingBox) -> Measurement {
    let extent_x = pixel_extent(bbox.x1, bbox.x2);
    let extent_y = pixel_extent(bbox.y1, bbox.y2);

    Measurement {
      length: round2(extent_x / self.pixels_per_unit),
      width: round2(extent_y / self.pixels_per_unit),
    }
  }
}

fn pixel_extent(start: f32, end: f32) -> f64 {
  let extent = (end as f64).trunc() - (start as f64).trunc();
  if extent.is_finite() { extent.max(0.0) } else { 0.0 }
}

fn round2(value: f64) -> f64 {
  (value * 100.0).round() / 100.0
}

/// 物理单位下的长与宽，均不为负
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
  pub length: f64,
  pub width: f64,
}

/// 通过标签过滤并完成测量的检测结果
#[derive(Debug, Clone)]
pub struct MeasuredDetection {
  pub detection: Detection,
  pub measurement: Measurement,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn box_of_sixty_pixels_measures_1_02_units() {
    let calibration = Calibration::default();
    let m = calibration.measure(&BoundingBox::new(10.0, 10.0, 70.0, 70.0));
    assert_eq!(m.length, 1.02);
    assert_eq!(m.width, 1.02);
  }

  #[test]
  fn degenerate_axis_measures_zero() {
    let calibration = Calibration::default();

    let flat = calibration.measure(&BoundingBox::new(10.0, 30.0, 70.0, 30.0));
    assert_eq!(flat.width, 0.0);
    assert_eq!(flat.length, 1.02);

    let thin = calibration.measure(&BoundingBox::new(40.0, 10.0, 40.0, 70.0));
    assert_eq!(thin.length, 0.0);
    assert_eq!(thin.width, 1.02);
  }

  #[test]
  fn reversed_or_invalid_box_never_goes_negative() {
    let calibration = Calibration::new(10.0).unwrap();
    let m = calibration.measure(&BoundingBox::new(50.0, 50.0, 10.0, f32::NAN));
    assert_eq!(m.length, 0.0);
    assert_eq!(m.width, 0.0);
  }

  #[test]
  fn coordinates_are_truncated_to_whole_pixels() {
    let calibration = Calibration::new(10.0).unwrap();
    let m = calibration.measure(&BoundingBox::new(10.9, 0.0, 30.2, 5.0));
    assert_eq!(m.length, 2.0);
    assert_eq!(m.width, 0.5);
  }

  #[test]
  fn calibration_rejects_non_positive_scale() {
    assert!(Calibration::new(0.0).is_err());
    assert!(Calibration::new(-58.7).is_err());
    assert!(Calibration::new(f64::NAN).is_err());
  }
}
