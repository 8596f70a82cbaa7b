// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/input/read_image_file.rs - 图像文件帧源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Instant;

use image::ImageReader;
use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RawFrame, input::FrameSource};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Invalid path encoding: {0}")]
  PathEncoding(std::string::FromUtf8Error),
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(image::ImageError),
}

impl From<std::io::Error> for ImageFileInputError {
  fn from(err: std::io::Error) -> Self {
    ImageFileInputError::IoError(err)
  }
}

impl From<image::ImageError> for ImageFileInputError {
  fn from(err: image::ImageError) -> Self {
    ImageFileInputError::ImageLoadError(err)
  }
}

const READ_IMAGE_FILE_SCHEME: &str = "image";

/// 图像文件帧源
///
/// 解码一次图像后把它作为持续可用的当前帧反复提供，可在没有摄像头
/// 的环境里代替采集面。
#[derive(Debug)]
pub struct ImageFileInput {
  data: Box<[u8]>,
  width: u32,
  height: u32,
  frame_index: u64,
  start_time: Instant,
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != READ_IMAGE_FILE_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        READ_IMAGE_FILE_SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = urlencoding::decode(url.path()).map_err(ImageFileInputError::PathEncoding)?;
    let image = ImageReader::open(path.as_ref())?.decode()?.to_rgba8();
    let (width, height) = image.dimensions();

    Ok(ImageFileInput {
      data: image.into_raw().into_boxed_slice(),
      width,
      height,
      frame_index: 0,
      start_time: Instant::now(),
    })
  }
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

impl FrameSource for ImageFileInput {
  type Error = ImageFileInputError;

  fn current_frame(&mut self) -> Result<Option<RawFrame>, Self::Error> {
    let frame = RawFrame {
      data: self.data.clone(),
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
    let url = Url::parse("file:///tmp/photo.png").unwrap();
    let err = ImageFileInput::from_url(&url).unwrap_err();
    assert!(matches!(err, ImageFileInputError::SchemaMismatch));
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let url = Url::parse("image:///no/such/photo.png").unwrap();
    let err = ImageFileInput::from_url(&url).unwrap_err();
    assert!(matches!(err, ImageFileInputError::IoError(_)));
  }
}
