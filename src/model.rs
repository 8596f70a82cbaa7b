// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Duration;

/// 垃圾分类类别名称（顺序即模型输出顺序）
pub const WASTE_CLASSES: [&str; 6] = ["cardboard", "glass", "metal", "paper", "plastic", "trash"];

pub trait Model {
  type Input;
  type Output;
  type Error;

  /// 执行一次推理，返回原始得分与推理耗时
  fn infer(&self, input: &Self::Input) -> Result<(Self::Output, Duration), Self::Error>;
}

pub trait WithLabel: Sized + Copy + std::fmt::Debug {
  /// 类别总数
  const COUNT: usize;
  fn to_label_str(&self) -> String;
  fn from_label_id(id: u32) -> Self;
}

/// 垃圾分类类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasteLabel {
  Cardboard,
  Glass,
  Metal,
  Paper,
  Plastic,
  Trash,
}

impl WithLabel for WasteLabel {
  const COUNT: usize = WASTE_CLASSES.len();

  fn to_label_str(&self) -> String {
    WASTE_CLASSES[*self as usize].to_string()
  }

  fn from_label_id(id: u32) -> Self {
    match id {
      0 => WasteLabel::Cardboard,
      1 => WasteLabel::Glass,
      2 => WasteLabel::Metal,
      3 => WasteLabel::Paper,
      4 => WasteLabel::Plastic,
      5 => WasteLabel::Trash,
      _ => panic!("类别编号超出范围: {}", id),
    }
  }
}

/// 模型输出的原始类别得分
#[derive(Debug, Clone)]
pub struct OutputScores {
  data: Box<[f32]>,
}

impl From<Vec<f32>> for OutputScores {
  fn from(data: Vec<f32>) -> Self {
    Self {
      data: data.into_boxed_slice(),
    }
  }
}

impl OutputScores {
  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

/// 单个类别及其置信度
#[derive(Debug, Clone)]
pub struct ClassScore<T> {
  pub kind: T,
  pub score: f32,
}

/// 一次分类的解码结果
#[derive(Debug, Clone)]
pub struct ClassifyResult<T> {
  /// 置信度最高的类别
  pub top: ClassScore<T>,
  /// 全部类别按置信度降序排列
  pub ranked: Box<[ClassScore<T>]>,
}

mod decode;
pub use self::decode::{DecodeError, decode};

#[cfg(feature = "onnx_model")]
mod onnx;
#[cfg(feature = "onnx_model")]
pub use self::onnx::{OnnxClassifier, OnnxClassifierBuilder, OnnxClassifierError};
