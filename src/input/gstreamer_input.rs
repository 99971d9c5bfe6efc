// 该文件是 Liangce （量测） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 本模块提供基于 GStreamer 的视频输入功能，支持多种视频源：
//! - 网络流（RTSP / HTTP MJPEG），如 `rtsp://192.168.1.100:8554/stream`
//! - 视频文件，如 `file:///data/video.mp4` 或 `gst://file/data/video.mp4`
//! - 摄像头捕获（V4L2），如 `gst://camera/dev/video0?width=1280&height=720&fps=30`
//!
//! ## 系统依赖
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## Cargo 特性
//!
//! 启用 `gstreamer_input` 特性。
//!
//! ## 停止
//!
//! 读取使用带超时的 `try_pull_sample`，`CloseHandle` 关闭时会把管道切换到 `Null`
//! 状态，阻塞中的读取最多在一个超时周期内返回。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{CloseHandle, FrameSource, InputError},
};

const PULL_TIMEOUT_MS: u64 = 100;
const STATE_CHANGE_TIMEOUT_SECS: u64 = 10;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  UriSource(String),
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::UriSource(uri) => {
        format!("uridecodebin uri=\"{}\"", uri)
      }
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = if let Some(mode) = io_mode {
          format!(" io-mode={}", mode)
        } else {
          "".to_string()
        };
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  /// 直接交给 `uridecodebin` 的流地址方案
  pub const STREAM_SCHEMES: [&'static str; 4] = ["rtsp", "http", "https", "file"];

  fn build_camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let io_mode = query.get("io-mode").and_then(|v| v.parse::<u32>().ok());
    let format = query
      .get("format")
      .map(String::from)
      .unwrap_or(String::from("YUY2"));
    let width = query
      .get("width")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(640);
    let height = query
      .get("height")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(480);
    let fps = query
      .get("fps")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(30);

    GStreamerInputPipelineBuilder {
      items: vec![GStreamerInputBuilderItem::CameraSource {
        camera: path.to_string(),
        io_mode,
        format,
        width,
        height,
        fps,
      }],
    }
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    // 不丢帧，队列满时由采集线程的背压决定节奏
    let full_pipeline = format!(
      "{} ! appsink max-buffers=2 drop=false sync=false name=sink",
      basic_pipeline
    );

    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    // 等待管道真正进入播放状态，打不开的流在这里报错
    let (result, _, _) = pipeline.state(gst::ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));
    if let Err(e) = result {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(GStreamerInputError::StateChangeError(e));
    }

    let close_pipeline = pipeline.clone();
    let close = CloseHandle::new().with_hook(move || {
      if let Err(e) = close_pipeline.set_state(gst::State::Null) {
        warn!("Failed to stop GStreamer pipeline: {}", e);
      }
    });

    Ok(GStreamerInput {
      pipeline,
      appsink,
      close,
    })
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let mut builder = if Self::STREAM_SCHEMES.contains(&url.scheme()) {
      GStreamerInputPipelineBuilder {
        items: vec![GStreamerInputBuilderItem::UriSource(url.to_string())],
      }
    } else if url.scheme() == Self::SCHEME {
      let query: HashMap<String, String> = url
        .query_pairs()
        .map(|(k, v)| (String::from(k), String::from(v)))
        .collect();

      match url.host_str() {
        Some("camera") => Self::build_camera_pipeline(url.path(), &query),
        Some("file") => GStreamerInputPipelineBuilder {
          items: vec![GStreamerInputBuilderItem::FileSource(
            url.path().to_string(),
          )],
        },
        _ => return Err(GStreamerInputError::SchemeMismatch),
      }
    } else {
      return Err(GStreamerInputError::SchemeMismatch);
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(builder)
  }
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  close: CloseHandle,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  fn check_bus(&self) -> Result<(), GStreamerInputError> {
    let Some(bus) = self.pipeline.bus() else {
      return Ok(());
    };
    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
      if let gst::MessageView::Error(err) = msg.view() {
        error!("GStreamer pipeline error: {}", err.error());
        return Err(GStreamerInputError::PipelineError(err.error().to_string()));
      }
    }
    Ok(())
  }
}

impl FrameSource for GStreamerInput {
  fn read(&mut self) -> Result<Option<RgbImage>, InputError> {
    loop {
      if self.close.is_closed() {
        return Ok(None);
      }

      self.check_bus()?;

      match self
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
      {
        Some(sample) => return Ok(Some(convert_sample_to_rgb(sample)?)),
        None if self.appsink.is_eos() => return Ok(None),
        None => continue,
      }
    }
  }

  fn close_handle(&self) -> CloseHandle {
    self.close.clone()
  }
}

fn convert_sample_to_rgb(sample: gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // 去掉每行末尾的对齐填充
  let mut pixels = Vec::with_capacity(width * height * 3);
  for row in 0..height {
    let start = row * stride;
    pixels.extend_from_slice(&data[start..start + width * 3]);
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: data.len(),
    },
  )
}
