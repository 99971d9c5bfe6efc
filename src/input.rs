// 该文件是 Liangce （量测） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use image::RgbImage;
use thiserror::Error;

use crate::FromUrl;

/// 帧来源
///
/// `read` 返回 `Ok(None)` 表示流已结束，返回 `Err` 表示读取失败；两者都会让采集循环退出，
/// 来源本身不做重连。
pub trait FrameSource: Send {
  fn read(&mut self) -> Result<Option<RgbImage>, InputError>;

  /// 获取可以在其他线程关闭该来源的句柄
  fn close_handle(&self) -> CloseHandle;
}

type CloseHook = Arc<dyn Fn() + Send + Sync>;

/// 跨线程关闭帧来源的句柄
///
/// 关闭后来源的下一次 `read` 报告流结束。可选的钩子只会执行一次，用于打断阻塞中的底层读取。
#[derive(Clone, Default)]
pub struct CloseHandle {
  closed: Arc<AtomicBool>,
  hook: Option<CloseHook>,
}

impl CloseHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
    self.hook = Some(Arc::new(hook));
    self
  }

  pub fn close(&self) {
    if !self.closed.swap(true, Ordering::SeqCst)
      && let Some(hook) = &self.hook
    {
      hook();
    }
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }
}

impl std::fmt::Debug for CloseHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CloseHandle")
      .field("closed", &self.is_closed())
      .finish()
  }
}

mod synthetic;
pub use self::synthetic::{SyntheticInput, SyntheticInputError};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{FolderInput, ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Synthetic input error: {0}")]
  SyntheticInputError(#[from] SyntheticInputError),
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("Invalid source URI: {0}")]
  InvalidUri(#[from] url::ParseError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  Synthetic(SyntheticInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "read_image_file")]
  Folder(FolderInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    if url.scheme() == SyntheticInput::SCHEME {
      return Ok(InputWrapper::Synthetic(SyntheticInput::from_url(url)?));
    }

    #[cfg(feature = "read_image_file")]
    {
      if url.scheme() == ImageFileInput::SCHEME {
        return Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?));
      }
      if url.scheme() == FolderInput::SCHEME {
        return Ok(InputWrapper::Folder(FolderInput::from_url(url)?));
      }
    }

    #[cfg(feature = "gstreamer_input")]
    {
      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME
        || GStreamerInputPipelineBuilder::STREAM_SCHEMES.contains(&url.scheme())
      {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }

    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  fn read(&mut self) -> Result<Option<RgbImage>, InputError> {
    match self {
      InputWrapper::Synthetic(input) => input.read(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.read(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::Folder(input) => input.read(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.read(),
    }
  }

  fn close_handle(&self) -> CloseHandle {
    match self {
      InputWrapper::Synthetic(input) => input.close_handle(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.close_handle(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::Folder(input) => input.close_handle(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.close_handle(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;

  use super::*;

  #[test]
  fn close_hook_runs_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handle = CloseHandle::new().with_hook(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    let other = handle.clone();
    handle.close();
    other.close();

    assert!(handle.is_closed());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn unknown_scheme_is_source_mismatch() {
    let url = url::Url::parse("ftp://example.com/video").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }
}
