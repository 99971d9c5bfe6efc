// 该文件是 Liangce （量测） 项目的一部分。
// src/output/frame_feed.rs - 最新帧推流槽
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

//! 只保留最新一帧的输出。
//!
//! 分发阶段不断用新帧覆盖旧帧，尚未被取走的帧直接被替换；HTTP 客户端取帧时才做
//! JPEG 编码，同一帧的编码结果会被缓存，多个客户端共享。

use std::{
  sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use image::codecs::jpeg::JpegEncoder;
use tracing::{debug, warn};

use crate::{
  frame::AnnotatedFrame,
  output::{FrameSink, OutputError, SinkFactory},
  pipeline::StopHandle,
};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// JPEG 编码后的帧
///
/// `id` 为推流槽的发布序号，跨运行单调递增；`seq` 为帧在本次运行中的序号。
#[derive(Debug, Clone)]
pub struct EncodedFrame {
  pub id: u64,
  pub seq: u64,
  pub jpeg: Arc<[u8]>,
}

#[derive(Default)]
struct Slot {
  next_id: u64,
  latest: Option<(u64, Arc<AnnotatedFrame>)>,
  encoded: Option<EncodedFrame>,
}

struct FeedInner {
  slot: Mutex<Slot>,
  ready: Condvar,
  jpeg_quality: u8,
}

#[derive(Clone)]
pub struct FrameFeed {
  inner: Arc<FeedInner>,
}

impl Default for FrameFeed {
  fn default() -> Self {
    Self::new(DEFAULT_JPEG_QUALITY)
  }
}

impl FrameFeed {
  pub fn new(jpeg_quality: u8) -> Self {
    Self {
      inner: Arc::new(FeedInner {
        slot: Mutex::new(Slot::default()),
        ready: Condvar::new(),
        jpeg_quality: jpeg_quality.clamp(1, 100),
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Slot> {
    self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 用新帧替换槽中的帧，并唤醒等待中的客户端
  pub fn publish(&self, frame: Arc<AnnotatedFrame>) {
    let mut slot = self.lock();
    let id = slot.next_id;
    slot.next_id += 1;
    slot.latest = Some((id, frame));
    slot.encoded = None;
    drop(slot);
    self.inner.ready.notify_all();
  }

  /// 清空槽，新一次运行开始时调用
  pub fn reset(&self) {
    let mut slot = self.lock();
    slot.latest = None;
    slot.encoded = None;
  }

  pub fn latest(&self) -> Option<Arc<AnnotatedFrame>> {
    self.lock().latest.as_ref().map(|(_, frame)| frame.clone())
  }

  /// 最近一帧的 JPEG，槽为空时最多等待 `wait`
  pub fn next_encoded_frame(&self, wait: Duration) -> Option<EncodedFrame> {
    self.next_encoded_frame_after(None, wait)
  }

  /// 发布序号大于 `after` 的最近一帧的 JPEG，没有更新的帧时最多等待 `wait`
  pub fn next_encoded_frame_after(&self, after: Option<u64>, wait: Duration) -> Option<EncodedFrame> {
    let is_newer = |slot: &Slot| match (&slot.latest, after) {
      (Some((id, _)), Some(after)) => *id > after,
      (Some(_), None) => true,
      (None, _) => false,
    };

    let slot = self.lock();
    let (slot, _) = self
      .inner
      .ready
      .wait_timeout_while(slot, wait, |slot| !is_newer(slot))
      .unwrap_or_else(PoisonError::into_inner);

    if !is_newer(&*slot) {
      return None;
    }
    let (id, frame) = match &slot.latest {
      Some((id, frame)) => (*id, frame.clone()),
      None => return None,
    };
    if let Some(encoded) = &slot.encoded
      && encoded.id == id
    {
      return Some(encoded.clone());
    }
    drop(slot);

    // 编码时不持有锁，分发阶段可以继续发布
    let jpeg = match encode_jpeg(&frame, self.inner.jpeg_quality) {
      Ok(jpeg) => jpeg,
      Err(e) => {
        warn!("第 {} 帧 JPEG 编码失败: {}", frame.seq(), e);
        return None;
      }
    };
    let encoded = EncodedFrame {
      id,
      seq: frame.seq(),
      jpeg: jpeg.into(),
    };

    let mut slot = self.lock();
    if matches!(&slot.latest, Some((latest_id, _)) if *latest_id == id) {
      slot.encoded = Some(encoded.clone());
    }
    Some(encoded)
  }
}

pub fn encode_jpeg(frame: &AnnotatedFrame, quality: u8) -> Result<Vec<u8>, OutputError> {
  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, quality).encode_image(frame.image())?;
  Ok(buffer)
}

struct FeedSink {
  feed: FrameFeed,
}

impl FrameSink for FeedSink {
  fn name(&self) -> &str {
    "frame-feed"
  }

  fn deliver(&mut self, frame: &Arc<AnnotatedFrame>) -> Result<(), OutputError> {
    debug!("推流槽更新为第 {} 帧", frame.seq());
    self.feed.publish(frame.clone());
    Ok(())
  }
}

impl SinkFactory for FrameFeed {
  fn create(&self, _stop: StopHandle) -> Result<Box<dyn FrameSink>, OutputError> {
    Ok(Box::new(FeedSink { feed: self.clone() }))
  }
}

#[cfg(test)]
mod tests {
  use std::{thread, time::Instant};

  use image::RgbImage;

  use super::*;
  use crate::frame::Frame;

  fn annotated(seq: u64) -> Arc<AnnotatedFrame> {
    Arc::new(AnnotatedFrame::unannotated(Frame::new(
      seq,
      RgbImage::new(16, 12),
    )))
  }

  #[test]
  fn empty_feed_times_out() {
    let feed = FrameFeed::default();
    let start = Instant::now();
    assert!(feed.next_encoded_frame(Duration::from_millis(20)).is_none());
    assert!(start.elapsed() >= Duration::from_millis(20));
  }

  #[test]
  fn encoded_frame_is_jpeg_of_latest() {
    let feed = FrameFeed::default();
    feed.publish(annotated(0));
    feed.publish(annotated(10));

    let encoded = feed.next_encoded_frame(Duration::ZERO).unwrap();
    assert_eq!(encoded.seq, 10);
    assert_eq!(&encoded.jpeg[..2], &[0xFF, 0xD8]);
  }

  #[test]
  fn encoding_is_cached_per_frame() {
    let feed = FrameFeed::default();
    feed.publish(annotated(3));

    let first = feed.next_encoded_frame(Duration::ZERO).unwrap();
    let second = feed.next_encoded_frame(Duration::ZERO).unwrap();
    assert!(Arc::ptr_eq(&first.jpeg, &second.jpeg));
  }

  #[test]
  fn after_waits_for_a_newer_frame() {
    let feed = FrameFeed::default();
    feed.publish(annotated(0));
    let first = feed.next_encoded_frame(Duration::ZERO).unwrap();
    assert!(
      feed
        .next_encoded_frame_after(Some(first.id), Duration::from_millis(10))
        .is_none()
    );

    let publisher = feed.clone();
    let handle = thread::spawn(move || {
      thread::sleep(Duration::from_millis(20));
      publisher.publish(annotated(10));
    });

    let next = feed
      .next_encoded_frame_after(Some(first.id), Duration::from_secs(5))
      .unwrap();
    assert_eq!(next.seq, 10);
    assert!(next.id > first.id);
    handle.join().unwrap();
  }

  #[test]
  fn reset_clears_the_slot_but_ids_keep_growing() {
    let feed = FrameFeed::default();
    feed.publish(annotated(20));
    let before = feed.next_encoded_frame(Duration::ZERO).unwrap();

    feed.reset();
    assert!(feed.latest().is_none());

    feed.publish(annotated(0));
    let after = feed
      .next_encoded_frame_after(Some(before.id), Duration::ZERO)
      .unwrap();
    assert_eq!(after.seq, 0);
  }
}
