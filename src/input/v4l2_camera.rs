// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/input/v4l2_camera.rs - V4L2 摄像头帧源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::pin::Pin;
use std::time::Instant;

use thiserror::Error;
use tracing::error;
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{FromUrl, FromUrlWithScheme, frame::RawFrame, input::FrameSource};

#[derive(Error, Debug)]
pub enum CameraError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("无法打开设备: {0}")]
  DeviceError(std::io::Error),
  #[error("无法创建捕获流: {0}")]
  StreamError(std::io::Error),
  #[error("无法捕获帧: {0}")]
  CaptureError(std::io::Error),
  #[error("捕获缓冲区长度不足: 期望 {expected}, 实际 {actual}")]
  ShortBuffer { expected: usize, actual: usize },
}

const V4L2_SCHEME: &str = "v4l2";
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;

/// V4L2 摄像头帧源
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct V4l2Camera {
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  /// 帧索引
  frame_index: u64,
  /// 视频宽度
  width: u32,
  /// 视频高度
  height: u32,
  /// 开始时间
  start_time: Instant,
}

impl FromUrl for V4l2Camera {
  type Error = CameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != V4L2_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        V4L2_SCHEME,
        url.scheme()
      );
      return Err(CameraError::SchemaMismatch);
    }

    // 形如 v4l2:///dev/video0；路径为空时使用默认设备
    let device_path = if url.path().is_empty() {
      "/dev/video0".to_string()
    } else {
      url.path().to_string()
    };

    Self::new(&device_path)
  }
}

impl FromUrlWithScheme for V4l2Camera {
  const SCHEME: &'static str = V4L2_SCHEME;
}

impl V4l2Camera {
  /// 打开指定设备并协商 YUYV 格式
  pub fn new(device_path: &str) -> Result<Self, CameraError> {
    let device = Box::pin(Device::with_path(device_path).map_err(CameraError::DeviceError)?);

    let mut format = device.format().map_err(CameraError::DeviceError)?;
    format.width = CAPTURE_WIDTH;
    format.height = CAPTURE_HEIGHT;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format).map_err(CameraError::DeviceError)?;

    let width = format.width;
    let height = format.height;

    let mut camera = Self {
      device,
      stream: None,
      frame_index: 0,
      width,
      height,
      start_time: Instant::now(),
    };

    // SAFETY: device 被 Pin<Box> 固定，不会移动，所以引用始终有效
    // Stream 的生命周期通过 camera 的 Drop 来管理
    let device_ref: &Device = &camera.device;
    let stream = unsafe {
      // 将设备引用的生命周期延长到 'static
      // 这是安全的，因为:
      // 1. device 被 Pin<Box> 固定在堆上，不会移动
      // 2. stream 存储在同一个结构体中，会在 device 之前被 drop
      // 3. Drop 顺序：stream (Option::take) -> device
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, 4).map_err(CameraError::StreamError)?
    };

    camera.stream = Some(stream);
    Ok(camera)
  }

  /// 将 YUYV 格式转换为 RGBA
  fn yuyv_to_rgba(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);

    for chunk in yuyv.chunks(4) {
      if chunk.len() < 4 {
        break;
      }

      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      // 第一个像素
      let r = (y0 + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y0 - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y0 + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgba.extend_from_slice(&[r, g, b, 255]);

      // 第二个像素
      let r = (y1 + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y1 - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y1 + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgba.extend_from_slice(&[r, g, b, 255]);
    }

    rgba
  }
}

impl Drop for V4l2Camera {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
  }
}

impl FrameSource for V4l2Camera {
  type Error = CameraError;

  fn current_frame(&mut self) -> Result<Option<RawFrame>, Self::Error> {
    let Some(stream) = self.stream.as_mut() else {
      return Ok(None);
    };

    let (buffer, _meta) = stream.next().map_err(CameraError::CaptureError)?;

    // YUYV 每像素两个字节
    let expected = (self.width * self.height * 2) as usize;
    if buffer.len() < expected {
      return Err(CameraError::ShortBuffer {
        expected,
        actual: buffer.len(),
      });
    }

    let data = Self::yuyv_to_rgba(buffer, self.width, self.height);

    let frame = RawFrame {
      data: data.into_boxed_slice(),
      width: self.width,
      height: self.height,
      index: self.frame_index,
      timestamp_ms: self.start_time.elapsed().as_millis() as u64,
    };
    self.frame_index += 1;
    Ok(Some(frame))
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scheme_is_enforced() {
    let url = Url::parse("image:///dev/video0").unwrap();
    let err = V4l2Camera::from_url(&url).unwrap_err();
    assert!(matches!(err, CameraError::SchemaMismatch));
  }

  #[test]
  fn yuyv_gray_converts_to_gray_rgba() {
    // Y=128, U=V=128 为中性灰
    let yuyv = [128u8, 128, 128, 128];
    let rgba = V4l2Camera::yuyv_to_rgba(&yuyv, 2, 1);

    assert_eq!(rgba.len(), 8);
    assert_eq!(&rgba[..4], &[128, 128, 128, 255]);
    assert_eq!(&rgba[4..], &[128, 128, 128, 255]);
  }
}
