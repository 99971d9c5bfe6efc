// 该文件是 Liangce （量测） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::{collections::VecDeque, path::PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{CloseHandle, FrameSource, InputError},
};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("No image found in directory: {0}")]
  EmptyDirectory(String),
}

fn load_image(path: &std::path::Path) -> Result<RgbImage, ImageFileInputError> {
  Ok(ImageReader::open(path)?.decode()?.to_rgb8())
}

/// 单张图片输入，可通过 `repeat` 参数重复输出多次
///
/// `image:///path/to/frame.jpg?repeat=30`
pub struct ImageFileInput {
  image: RgbImage,
  remaining: u64,
  close: CloseHandle,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let repeat = url
      .query_pairs()
      .find(|(k, _)| k == "repeat")
      .and_then(|(_, v)| v.parse::<u64>().ok())
      .unwrap_or(1);

    let image = load_image(std::path::Path::new(url.path()))?;
    info!(
      "读取图片 {} ({}x{}), 重复 {} 次",
      url.path(),
      image.width(),
      image.height(),
      repeat
    );

    Ok(ImageFileInput {
      image,
      remaining: repeat,
      close: CloseHandle::new(),
    })
  }
}

impl FrameSource for ImageFileInput {
  fn read(&mut self) -> Result<Option<RgbImage>, InputError> {
    if self.close.is_closed() || self.remaining == 0 {
      return Ok(None);
    }
    self.remaining -= 1;
    Ok(Some(self.image.clone()))
  }

  fn close_handle(&self) -> CloseHandle {
    self.close.clone()
  }
}

/// 目录输入，按文件名顺序逐张读取目录中的图片
///
/// `folder:///path/to/frames`
pub struct FolderInput {
  files: VecDeque<PathBuf>,
  close: CloseHandle,
}

impl FromUrlWithScheme for FolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FolderInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let mut files = std::fs::read_dir(url.path())?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| {
        path
          .extension()
          .and_then(|ext| ext.to_str())
          .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
          .unwrap_or(false)
      })
      .collect::<Vec<_>>();

    if files.is_empty() {
      return Err(ImageFileInputError::EmptyDirectory(url.path().to_string()));
    }
    files.sort();
    info!("目录 {} 中共有 {} 张图片", url.path(), files.len());

    Ok(FolderInput {
      files: files.into(),
      close: CloseHandle::new(),
    })
  }
}

impl FrameSource for FolderInput {
  fn read(&mut self) -> Result<Option<RgbImage>, InputError> {
    if self.close.is_closed() {
      return Ok(None);
    }
    match self.files.pop_front() {
      Some(path) => Ok(Some(load_image(&path)?)),
      None => Ok(None),
    }
  }

  fn close_handle(&self) -> CloseHandle {
    self.close.clone()
  }
}
