// 该文件是 Liangce （量测） 项目的一部分。
// src/model/fixed.rs - 固定检测结果模型
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

//! 对每一帧都返回同一组检测结果的模型。
//!
//! 检测结果从 JSON 文件读取，格式为：
//!
//! ```json
//! [{"label": "box", "confidence": 0.91, "bbox": [10, 10, 70, 70]}]
//! ```
//!
//! 没有硬件推理环境时用于演示整条流水线。`fixed://` 不带路径时不产生任何检测结果。

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, Detection, Model},
};

#[derive(Error, Debug)]
pub enum FixedModelError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("检测结果解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct FixedModel {
  detections: Vec<Detection>,
}

impl FixedModel {
  pub fn new(detections: Vec<Detection>) -> Self {
    Self { detections }
  }
}

impl FromUrlWithScheme for FixedModel {
  const SCHEME: &'static str = "fixed";
}

impl FromUrl for FixedModel {
  type Error = FixedModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(FixedModelError::SchemeMismatch(format!(
        "期望模型方案 '{}', 实际模型方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = url.path();
    if path.is_empty() || path == "/" {
      info!("未指定检测结果文件，模型不会产生检测结果");
      return Ok(FixedModel::default());
    }

    let data = std::fs::read_to_string(path)?;
    let detections: Vec<Detection> = serde_json::from_str(&data)?;
    info!("从 {} 读取了 {} 个固定检测结果", path, detections.len());

    Ok(FixedModel { detections })
  }
}

impl Model for FixedModel {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = FixedModelError;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(DetectResult::from(self.detections.clone()))
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn empty_path_yields_no_detections() {
    let model = FixedModel::from_url(&Url::parse("fixed://").unwrap()).unwrap();
    let result = model.infer(&RgbImage::new(4, 4)).unwrap();
    assert!(result.is_empty());
  }

  #[test]
  fn demo_detections_parse() {
    let detections: Vec<Detection> =
      serde_json::from_str(include_str!("../../demos/detections.json")).unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].label, "box");
  }

  #[test]
  fn reads_detections_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
      file,
      r#"[{{"label": "box", "confidence": 0.5, "bbox": [1, 2, 3, 4]}}]"#
    )
    .unwrap();

    let url = Url::from_file_path(file.path()).unwrap();
    let url = Url::parse(&format!("fixed://{}", url.path())).unwrap();
    let model = FixedModel::from_url(&url).unwrap();
    let result = model.infer(&RgbImage::new(4, 4)).unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].label, "box");
  }
}
