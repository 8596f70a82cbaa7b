// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/preprocess.rs - 帧到张量的预处理
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

use std::borrow::Cow;

use image::{RgbaImage, imageops};

use crate::frame::{FrameError, RGBA_CHANNELS, RawFrame};

/// ImageNet 各通道均值（R, G, B）
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet 各通道标准差（R, G, B）
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 分类模型默认输入边长
pub const CLASSIFY_INPUT_SIZE: u32 = 224;

/// 模型输入张量，形状为 [1, 3, H, W]
///
/// 数值按通道平面排列：先是全部 R 值（行主序），其后是 G，最后是 B。
#[derive(Debug, Clone)]
pub struct InputTensor {
  data: Box<[f32]>,
  height: u32,
  width: u32,
}

impl InputTensor {
  pub fn new(data: Vec<f32>, height: u32, width: u32) -> Self {
    let expected = 3 * height as usize * width as usize;
    if data.len() != expected {
      panic!("张量长度不匹配: 期望 {}, 实际 {}", expected, data.len());
    }

    Self {
      data: data.into_boxed_slice(),
      height,
      width,
    }
  }

  pub fn shape(&self) -> [usize; 4] {
    [1, 3, self.height as usize, self.width as usize]
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn width(&self) -> u32 {
    self.width
  }
}

/// 将一帧 RGBA 图像转换为模型输入张量
///
/// 帧先被重采样到 target (H, W) 尺寸（Triangle 滤波），再把每个 8 位
/// 通道值缩放到 [0, 1] 并按 ImageNet 统计量归一化，输出为通道平面
/// 排列。Alpha 通道被丢弃。
pub fn preprocess(frame: &RawFrame, target: (u32, u32)) -> Result<InputTensor, FrameError> {
  frame.validate()?;

  let (target_h, target_w) = target;
  if target_h == 0 || target_w == 0 {
    return Err(FrameError::InvalidDimensions {
      width: target_w,
      height: target_h,
    });
  }

  let rgba: Cow<'_, [u8]> = if frame.width == target_w && frame.height == target_h {
    Cow::Borrowed(&frame.data)
  } else {
    let image = RgbaImage::from_raw(frame.width, frame.height, frame.data.to_vec()).ok_or(
      FrameError::BufferSizeMismatch {
        expected: frame.width as usize * frame.height as usize * RGBA_CHANNELS,
        actual: frame.data.len(),
      },
    )?;
    let resized = imageops::resize(&image, target_w, target_h, imageops::FilterType::Triangle);
    Cow::Owned(resized.into_raw())
  };

  let plane = target_h as usize * target_w as usize;
  let mut data = vec![0.0f32; 3 * plane];
  for h in 0..target_h as usize {
    for w in 0..target_w as usize {
      let pos = h * target_w as usize + w;
      let src = pos * RGBA_CHANNELS;
      for c in 0..3 {
        let value = rgba[src + c] as f32 / 255.0;
        data[c * plane + pos] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
      }
    }
  }

  Ok(InputTensor::new(data, target_h, target_w))
}
