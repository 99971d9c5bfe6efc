// 该文件是 Liangce （量测） 项目的一部分。
// src/output/display_window.rs - 本地显示窗口
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

//! 基于 minifb 的显示窗口。
//!
//! 窗口在独立线程中创建并刷新，分发阶段通过容量为 1 的通道投递帧，窗口忙时新帧被丢弃。
//! 按下 `Q` / `Esc` 或关闭窗口会请求停止流水线。

use std::{
  sync::Arc,
  thread::{self, JoinHandle},
  time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use image::{RgbImage, imageops::FilterType};
use minifb::{Key, Window, WindowOptions};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::AnnotatedFrame,
  output::{FrameSink, OutputError, SinkFactory},
  pipeline::StopHandle,
};

const REFRESH_INTERVAL: Duration = Duration::from_millis(30);

#[derive(Error, Debug)]
pub enum DisplayWindowError {
  #[error("无法启动显示线程: {0}")]
  SpawnError(#[from] std::io::Error),
  #[error("显示窗口已关闭")]
  WindowClosed,
}

/// 显示窗口输出的配置，每次运行创建一个新窗口
pub struct DisplayWindow {
  title: String,
  width: usize,
  height: usize,
}

impl DisplayWindow {
  pub fn new(title: impl Into<String>, width: usize, height: usize) -> Self {
    Self {
      title: title.into(),
      width: width.max(1),
      height: height.max(1),
    }
  }
}

impl SinkFactory for DisplayWindow {
  fn create(&self, stop: StopHandle) -> Result<Box<dyn FrameSink>, OutputError> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let title = self.title.clone();
    let (width, height) = (self.width, self.height);

    let handle = thread::Builder::new()
      .name("liangce-display".into())
      .spawn(move || run_window(&title, width, height, rx, stop))
      .map_err(DisplayWindowError::from)?;

    Ok(Box::new(DisplayWindowSink {
      tx: Some(tx),
      handle: Some(handle),
    }))
  }
}

struct DisplayWindowSink {
  tx: Option<Sender<Arc<AnnotatedFrame>>>,
  handle: Option<JoinHandle<()>>,
}

impl FrameSink for DisplayWindowSink {
  fn name(&self) -> &str {
    "display-window"
  }

  fn deliver(&mut self, frame: &Arc<AnnotatedFrame>) -> Result<(), OutputError> {
    let Some(tx) = &self.tx else {
      return Err(DisplayWindowError::WindowClosed.into());
    };
    match tx.try_send(frame.clone()) {
      Ok(()) => Ok(()),
      Err(TrySendError::Full(_)) => {
        debug!("显示窗口繁忙，丢弃第 {} 帧", frame.seq());
        Ok(())
      }
      Err(TrySendError::Disconnected(_)) => Err(DisplayWindowError::WindowClosed.into()),
    }
  }

  fn finish(&mut self) {
    self.tx.take();
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      error!("显示线程异常退出");
    }
  }
}

impl Drop for DisplayWindowSink {
  fn drop(&mut self) {
    self.finish();
  }
}

fn run_window(
  title: &str,
  width: usize,
  height: usize,
  rx: Receiver<Arc<AnnotatedFrame>>,
  stop: StopHandle,
) {
  let mut window = match Window::new(title, width, height, WindowOptions::default()) {
    Ok(window) => window,
    Err(e) => {
      error!("无法创建显示窗口: {}", e);
      return;
    }
  };
  info!("显示窗口已打开 ({}x{})", width, height);

  let mut buffer: Vec<u32> = vec![0; width * height];
  loop {
    if !window.is_open() {
      info!("显示窗口被关闭，请求停止");
      stop.request_stop();
      break;
    }
    if window.is_key_down(Key::Escape) || window.is_key_down(Key::Q) {
      info!("收到退出按键，请求停止");
      stop.request_stop();
      break;
    }

    match rx.recv_timeout(REFRESH_INTERVAL) {
      Ok(frame) => {
        rgb_to_0rgb_u32(frame.image(), width, height, &mut buffer);
        if let Err(e) = window.update_with_buffer(&buffer, width, height) {
          warn!("显示窗口刷新失败: {}", e);
          break;
        }
      }
      Err(RecvTimeoutError::Timeout) => window.update(),
      Err(RecvTimeoutError::Disconnected) => break,
    }
  }
  info!("显示窗口线程退出");
}

/// 缩放到窗口大小并转换为 minifb 使用的 0RGB 像素
fn rgb_to_0rgb_u32(image: &RgbImage, width: usize, height: usize, out: &mut [u32]) {
  let resized;
  let image = if image.width() as usize == width && image.height() as usize == height {
    image
  } else {
    resized = image::imageops::resize(image, width as u32, height as u32, FilterType::Triangle);
    &resized
  };

  for (dst, pixel) in out.iter_mut().zip(image.pixels()) {
    let [r, g, b] = pixel.0;
    *dst = ((r as u32) << 16) | ((g as u32) << 8) | (b as u32);
  }
}
