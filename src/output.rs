// 该文件是 Liangce （量测） 项目的一部分。
// src/output.rs - 输出定义
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

use std::sync::Arc;

use thiserror::Error;

use crate::{frame::AnnotatedFrame, pipeline::StopHandle};

/// 接收标注帧的输出
///
/// 分发阶段对每个输出依次调用 `deliver`，输出自行决定缓冲与丢帧策略，不能长时间阻塞。
/// 返回错误的输出在本次运行剩余时间内不再接收帧。
pub trait FrameSink: Send {
  fn name(&self) -> &str;

  fn deliver(&mut self, frame: &Arc<AnnotatedFrame>) -> Result<(), OutputError>;

  /// 运行结束时调用
  fn finish(&mut self) {}
}

/// 每次运行开始时创建新的输出
///
/// `stop` 用于让输出（例如显示窗口的按键）请求停止整条流水线。
pub trait SinkFactory: Send + Sync {
  fn create(&self, stop: StopHandle) -> Result<Box<dyn FrameSink>, OutputError>;
}

pub mod draw;

mod frame_feed;
pub use self::frame_feed::{EncodedFrame, FrameFeed};

#[cfg(feature = "display_window")]
mod display_window;
#[cfg(feature = "display_window")]
pub use self::display_window::{DisplayWindow, DisplayWindowError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JPEG 编码错误: {0}")]
  EncodeError(#[from] image::ImageError),
  #[cfg(feature = "display_window")]
  #[error("显示窗口错误: {0}")]
  DisplayWindowError(#[from] DisplayWindowError),
  #[error("输出已关闭: {0}")]
  Closed(String),
}
