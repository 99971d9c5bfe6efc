// 该文件是 Liangce （量测） 项目的一部分。
// src/input/synthetic.rs - 合成测试视频输入
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

//! 合成视频来源，类似 GStreamer 的 `videotestsrc`。
//!
//! `synthetic://?frames=30&width=64&height=48&fps=25`
//!
//! - `frames`: 帧数，0 表示无限
//! - `width` / `height`: 帧尺寸
//! - `fps`: 出帧速率，0 表示不限速
//!
//! 每一帧的像素由帧索引决定，便于在测试中辨认帧。

use std::{
  collections::HashMap,
  thread,
  time::{Duration, Instant},
};

use image::{Rgb, RgbImage};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{CloseHandle, FrameSource, InputError},
};

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;

#[derive(Error, Debug)]
pub enum SyntheticInputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Invalid parameter {name}: {value}")]
  InvalidParameter { name: String, value: String },
}

pub struct SyntheticInput {
  frames: u64,
  width: u32,
  height: u32,
  interval: Option<Duration>,
  produced: u64,
  last_emit: Option<Instant>,
  close: CloseHandle,
}

impl SyntheticInput {
  pub fn new(frames: u64, width: u32, height: u32) -> Self {
    Self {
      frames,
      width: width.max(1),
      height: height.max(1),
      interval: None,
      produced: 0,
      last_emit: None,
      close: CloseHandle::new(),
    }
  }

  /// 无限出帧的来源
  pub fn endless(width: u32, height: u32) -> Self {
    Self::new(0, width, height)
  }

  pub fn with_fps(mut self, fps: u32) -> Self {
    self.interval = (fps > 0).then(|| Duration::from_secs_f64(1.0 / fps as f64));
    self
  }

  /// 第 `index` 帧的像素内容
  pub fn pattern(index: u64, width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
      Rgb([
        ((x as u64 + index) % 256) as u8,
        ((y as u64 + index) % 256) as u8,
        (index % 256) as u8,
      ])
    })
  }

  fn pace(&mut self) {
    if let Some(interval) = self.interval {
      if let Some(last) = self.last_emit {
        let elapsed = last.elapsed();
        if elapsed < interval {
          thread::sleep(interval - elapsed);
        }
      }
      self.last_emit = Some(Instant::now());
    }
  }
}

fn parse_param<T: std::str::FromStr>(
  query: &HashMap<String, String>,
  name: &str,
  default: T,
) -> Result<T, SyntheticInputError> {
  match query.get(name) {
    Some(value) => value
      .parse()
      .map_err(|_| SyntheticInputError::InvalidParameter {
        name: name.to_string(),
        value: value.clone(),
      }),
    None => Ok(default),
  }
}

impl FromUrlWithScheme for SyntheticInput {
  const SCHEME: &'static str = "synthetic";
}

impl FromUrl for SyntheticInput {
  type Error = SyntheticInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SyntheticInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let frames = parse_param(&query, "frames", 0u64)?;
    let width = parse_param(&query, "width", DEFAULT_WIDTH)?;
    let height = parse_param(&query, "height", DEFAULT_HEIGHT)?;
    let fps = parse_param(&query, "fps", 0u32)?;

    info!(
      "合成视频来源: {}x{}, 帧数 {}, 帧率 {}",
      width,
      height,
      if frames == 0 {
        "无限".to_string()
      } else {
        frames.to_string()
      },
      fps
    );

    Ok(SyntheticInput::new(frames, width, height).with_fps(fps))
  }
}

impl FrameSource for SyntheticInput {
  fn read(&mut self) -> Result<Option<RgbImage>, InputError> {
    if self.close.is_closed() || (self.frames > 0 && self.produced >= self.frames) {
      return Ok(None);
    }

    self.pace();
    let image = Self::pattern(self.produced, self.width, self.height);
    self.produced += 1;
    Ok(Some(image))
  }

  fn close_handle(&self) -> CloseHandle {
    self.close.clone()
  }
}
