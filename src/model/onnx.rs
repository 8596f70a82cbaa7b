// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 分类模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ndarray::Array4;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Model, OutputScores},
  preprocess::{CLASSIFY_INPUT_SIZE, InputTensor},
};

const ONNX_NUM_INPUTS: usize = 1;
const ONNX_NUM_OUTPUTS: usize = 1;

#[derive(Error, Debug)]
pub enum OnnxClassifierError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("输入张量形状不匹配: 期望 {expected_h}x{expected_w}, 实际 {actual_h}x{actual_w}")]
  ShapeMismatch {
    expected_h: u32,
    expected_w: u32,
    actual_h: u32,
    actual_w: u32,
  },
}

impl From<std::io::Error> for OnnxClassifierError {
  fn from(err: std::io::Error) -> Self {
    OnnxClassifierError::ModelLoadError(err)
  }
}

const ONNX_SCHEME: &str = "onnx";

pub struct OnnxClassifierBuilder {
  model_path: String,
  intra_threads: usize,
  input_height: u32,
  input_width: u32,
}

impl FromUrl for OnnxClassifierBuilder {
  type Error = OnnxClassifierError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != ONNX_SCHEME {
      return Err(OnnxClassifierError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        ONNX_SCHEME
      )));
    }

    let model_path = urlencoding::decode(url.path())
      .map_err(|e| OnnxClassifierError::ModelPathError(e.to_string()))?
      .into_owned();

    Ok(OnnxClassifierBuilder {
      model_path,
      intra_threads: 1,
      input_height: CLASSIFY_INPUT_SIZE,
      input_width: CLASSIFY_INPUT_SIZE,
    })
  }
}

impl FromUrlWithScheme for OnnxClassifierBuilder {
  const SCHEME: &'static str = ONNX_SCHEME;
}

impl OnnxClassifierBuilder {
  pub fn intra_threads(mut self, intra_threads: usize) -> Self {
    self.intra_threads = intra_threads;
    self
  }

  pub fn input_size(mut self, height: u32, width: u32) -> Self {
    self.input_height = height;
    self.input_width = width;
    self
  }

  pub fn build(self) -> Result<OnnxClassifier, OnnxClassifierError> {
    info!("加载模型文件: {}", self.model_path);
    let metadata = std::fs::metadata(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.intra_threads)?
      .commit_from_file(&self.model_path)?;
    info!("模型加载完成");

    if session.inputs.len() != ONNX_NUM_INPUTS {
      return Err(OnnxClassifierError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        ONNX_NUM_INPUTS,
        session.inputs.len()
      )));
    }
    if session.outputs.len() != ONNX_NUM_OUTPUTS {
      return Err(OnnxClassifierError::ModelInvalid(format!(
        "预期模型输出数量为 {}, 实际为 {}",
        ONNX_NUM_OUTPUTS,
        session.outputs.len()
      )));
    }

    let input_name = session.inputs[0].name.clone();
    let output_name = session.outputs[0].name.clone();
    debug!("模型输入: {}", input_name);
    debug!("模型输出: {}", output_name);

    Ok(OnnxClassifier {
      session: Mutex::new(session),
      input_name,
      output_name,
      input_height: self.input_height,
      input_width: self.input_width,
    })
  }
}

/// 基于 ONNX Runtime 的分类模型
pub struct OnnxClassifier {
  session: Mutex<Session>,
  input_name: String,
  output_name: String,
  input_height: u32,
  input_width: u32,
}

impl OnnxClassifier {
  fn lock_session(&self) -> MutexGuard<'_, Session> {
    match self.session.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }
}

impl Model for OnnxClassifier {
  type Input = InputTensor;
  type Output = OutputScores;
  type Error = OnnxClassifierError;

  fn infer(&self, input: &Self::Input) -> Result<(Self::Output, Duration), Self::Error> {
    if input.height() != self.input_height || input.width() != self.input_width {
      return Err(OnnxClassifierError::ShapeMismatch {
        expected_h: self.input_height,
        expected_w: self.input_width,
        actual_h: input.height(),
        actual_w: input.width(),
      });
    }

    let array = Array4::from_shape_vec(
      (1, 3, input.height() as usize, input.width() as usize),
      input.data().to_vec(),
    )
    .map_err(|e| OnnxClassifierError::ModelInvalid(e.to_string()))?;

    let mut session = self.lock_session();

    debug!("执行模型推理");
    let start = Instant::now();
    let contiguous = array.as_standard_layout();
    let tensor = TensorRef::from_array_view(&contiguous)?;
    let outputs = session.run(ort::inputs![self.input_name.as_str() => tensor])?;
    let elapsed = start.elapsed();

    let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
      OnnxClassifierError::ModelInvalid(format!("模型输出 {} 缺失", self.output_name))
    })?;
    let (_shape, data) = output.try_extract_tensor::<f32>()?;

    debug!("模型推理完成，耗时: {:.2?}", elapsed);
    Ok((OutputScores::from(data.to_vec()), elapsed))
  }
}
