// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/input.rs - 帧源定义
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

use crate::frame::RawFrame;

/// 帧源
///
/// 提供采集面上最新的一帧。采集侧写入最新帧，循环在每次迭代开始时
/// 读取；返回 Ok(None) 表示当前没有可用帧。
pub trait FrameSource {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 取得当前最新帧
  fn current_frame(&mut self) -> Result<Option<RawFrame>, Self::Error>;

  /// 帧宽度
  fn width(&self) -> u32;

  /// 帧高度
  fn height(&self) -> u32;
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l2_camera")]
mod v4l2_camera;
#[cfg(feature = "v4l2_camera")]
pub use self::v4l2_camera::{CameraError, V4l2Camera};
