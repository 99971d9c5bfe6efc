// 该文件是 Liangce （量测） 项目的一部分。
// src/output/draw.rs - 检测框与测量结果绘制
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

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::BoundingBox;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_OFFSET: i32 = 10;
const BOX_THICKNESS: i32 = 4;
const BOX_COLOR: [u8; 3] = [255, 0, 255]; // 品红
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

/// 未指定字体时依次尝试的系统字体
const FONT_CANDIDATES: [&str; 4] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体文件失败 {path}: {source}")]
  FontIo {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法解析字体文件: {0}")]
  InvalidFont(PathBuf),
}

pub struct Draw {
  font_size: f32,
  label_text_vertical_padding: i32,
  thickness: i32,
  box_color: [u8; 3],
  text_color: [u8; 3],
  font: Option<FontVec>,
}

impl Default for Draw {
  /// 不带字体，只绘制检测框
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      thickness: BOX_THICKNESS,
      box_color: BOX_COLOR,
      text_color: TEXT_COLOR,
      font: None,
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontVec) -> Self {
    self.font = Some(font);
    self
  }

  /// 加载字体。指定的字体文件无法使用时报错；未指定时尝试常见的系统字体，
  /// 都找不到则只绘制检测框。
  pub fn load(font_path: Option<&Path>) -> Result<Self, DrawError> {
    if let Some(path) = font_path {
      return Ok(Self::default().with_font(read_font(path)?));
    }

    for candidate in FONT_CANDIDATES {
      let path = Path::new(candidate);
      if !path.exists() {
        continue;
      }
      match read_font(path) {
        Ok(font) => {
          info!("使用字体 {}", candidate);
          return Ok(Self::default().with_font(font));
        }
        Err(e) => warn!("{}", e),
      }
    }

    warn!("未找到可用字体，标注中将不包含文字");
    Ok(Self::default())
  }

  /// 绘制一个检测框，并在框的左上方绘制文字。坐标为像素坐标。
  pub fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &BoundingBox, label: &str) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }
    let (w, h) = (image.width() as i32, image.height() as i32);

    let x_min = to_pixel(bbox.x1).clamp(0, w - 1);
    let y_min = to_pixel(bbox.y1).clamp(0, h - 1);
    let x_max = to_pixel(bbox.x2).clamp(0, w - 1);
    let y_max = to_pixel(bbox.y2).clamp(0, h - 1);

    if x_min <= x_max && y_min <= y_max {
      self.draw_border(image, (x_min, y_min, x_max, y_max));
    }

    if !label.is_empty() {
      // 文字位置取原始坐标，与框是否退化无关
      let label_x = to_pixel(bbox.x1).max(0);
      let label_y = (to_pixel(bbox.y1) - LABEL_OFFSET).max(LABEL_OFFSET);
      self.draw_label(image, label_x, label_y, label);
    }
  }

  fn draw_border(&self, image: &mut RgbImage, (x_min, y_min, x_max, y_max): (i32, i32, i32, i32)) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let color = Rgb(self.box_color);

    for thickness in 0..self.thickness {
      let x_min_t = (x_min + thickness).min(w - 1);
      let y_min_t = (y_min + thickness).min(h - 1);
      let x_max_t = (x_max - thickness).max(0);
      let y_max_t = (y_max - thickness).max(0);

      // 上下边
      for x in x_min..=x_max {
        image.put_pixel(x as u32, y_min_t as u32, color);
        image.put_pixel(x as u32, y_max_t as u32, color);
      }

      // 左右边
      for y in y_min..=y_max {
        image.put_pixel(x_min_t as u32, y as u32, color);
        image.put_pixel(x_max_t as u32, y as u32, color);
      }
    }
  }

  fn draw_label(&self, image: &mut RgbImage, x: i32, y: i32, label: &str) {
    let Some(font) = &self.font else {
      return;
    };

    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, font, label);
    let text_height = text_height as i32 + 2 * self.label_text_vertical_padding;

    // 文字基线位于 y，背景画在其上方
    let label_y = (y - text_height).max(0);
    let max_width = (image.width() as i32 - x).max(0);
    let label_width = (text_width as i32).min(max_width);
    if label_width <= 0 || x >= image.width() as i32 {
      return;
    }

    let rect = Rect::at(x, label_y).of_size(label_width as u32, text_height as u32);
    draw_filled_rect_mut(image, rect, Rgb(self.box_color));
    draw_text_mut(
      image,
      Rgb(self.text_color),
      x,
      label_y + self.label_text_vertical_padding,
      scale,
      font,
      label,
    );
  }
}

fn to_pixel(value: f32) -> i32 {
  if value.is_finite() {
    value.trunc() as i32
  } else {
    0
  }
}

fn read_font(path: &Path) -> Result<FontVec, DrawError> {
  let data = std::fs::read(path).map_err(|source| DrawError::FontIo {
    path: path.to_path_buf(),
    source,
  })?;
  FontVec::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn border_is_drawn_in_magenta() {
    let mut image = RgbImage::new(100, 100);
    Draw::default().draw_bbox_with_label(
      &mut image,
      &BoundingBox::new(10.0, 10.0, 70.0, 70.0),
      "Length: 1.02 cm, width: 1.02 cm",
    );

    assert_eq!(image.get_pixel(10, 10), &Rgb(BOX_COLOR));
    assert_eq!(image.get_pixel(40, 13), &Rgb(BOX_COLOR));
    assert_eq!(image.get_pixel(70, 70), &Rgb(BOX_COLOR));
    // 框内部不受影响
    assert_eq!(image.get_pixel(40, 40), &Rgb([0, 0, 0]));
  }

  #[test]
  fn boxes_outside_the_image_do_not_panic() {
    let mut image = RgbImage::new(32, 24);
    let draw = Draw::default();
    draw.draw_bbox_with_label(&mut image, &BoundingBox::new(-50.0, -50.0, 500.0, 500.0), "x");
    draw.draw_bbox_with_label(&mut image, &BoundingBox::new(70.0, 70.0, 10.0, 10.0), "x");
    draw.draw_bbox_with_label(&mut image, &BoundingBox::new(f32::NAN, 0.0, 5.0, f32::INFINITY), "");
  }

  #[test]
  fn missing_font_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.ttf");
    assert!(matches!(
      Draw::load(Some(&path)),
      Err(DrawError::FontIo { .. })
    ));
  }

  #[test]
  fn invalid_font_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.ttf");
    std::fs::write(&path, b"not a font").unwrap();
    assert!(matches!(
      Draw::load(Some(&path)),
      Err(DrawError::InvalidFont(_))
    ));
  }
}
