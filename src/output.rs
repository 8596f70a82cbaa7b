// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/output.rs - 结果输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::{
  model::{ClassifyResult, WithLabel},
  task::Benchmark,
};

/// 分类结果输出
pub trait Render<T: WithLabel> {
  type Error;

  /// 输出一次成功迭代的结果与耗时
  fn render_result(
    &self,
    result: &ClassifyResult<T>,
    benchmark: &Benchmark,
  ) -> Result<(), Self::Error>;

  /// 上报一次失败，不影响已输出的结果
  fn render_failure(&self, message: &str);
}

/// 控制台输出
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput;

impl<T: WithLabel> Render<T> for ConsoleOutput {
  type Error = Infallible;

  fn render_result(
    &self,
    result: &ClassifyResult<T>,
    benchmark: &Benchmark,
  ) -> Result<(), Self::Error> {
    info!(
      "分类结果: {} ({:.1}%)",
      result.top.kind.to_label_str(),
      result.top.score * 100.0
    );
    for item in result.ranked.iter() {
      info!("  - {}: {:.1}%", item.kind.to_label_str(), item.score * 100.0);
    }
    info!(
      "耗时: 预处理 {:.2} ms / 推理 {:.2} ms / 后处理 {:.2} ms / 合计 {:.2} ms, 帧率 {}",
      benchmark.preprocess_ms,
      benchmark.inference_ms,
      benchmark.postprocess_ms,
      benchmark.total_ms,
      benchmark.fps
    );
    Ok(())
  }

  fn render_failure(&self, message: &str) {
    warn!("本帧处理失败: {}", message);
  }
}

struct Latest<T> {
  result: Option<ClassifyResult<T>>,
  benchmark: Option<Benchmark>,
  failure: Option<String>,
}

impl<T> Default for Latest<T> {
  fn default() -> Self {
    Self {
      result: None,
      benchmark: None,
      failure: None,
    }
  }
}

/// 保存最近结果的共享槽
///
/// 由推理循环写入，界面等读取方随时查询。失败只更新失败信息，
/// 已写入的结果与耗时保持可读。
pub struct SharedLatest<T> {
  inner: Arc<Mutex<Latest<T>>>,
}

impl<T> Clone for SharedLatest<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T> Default for SharedLatest<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> SharedLatest<T> {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(Latest::default())),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Latest<T>> {
    match self.inner.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }
}

impl<T: Clone> SharedLatest<T> {
  /// 最近一次成功的分类结果
  pub fn result(&self) -> Option<ClassifyResult<T>> {
    self.lock().result.clone()
  }

  /// 最近一次成功迭代的耗时
  pub fn benchmark(&self) -> Option<Benchmark> {
    self.lock().benchmark
  }

  /// 最近一次失败的描述
  pub fn last_failure(&self) -> Option<String> {
    self.lock().failure.clone()
  }
}

impl<T: WithLabel> Render<T> for SharedLatest<T> {
  type Error = Infallible;

  fn render_result(
    &self,
    result: &ClassifyResult<T>,
    benchmark: &Benchmark,
  ) -> Result<(), Self::Error> {
    let mut latest = self.lock();
    latest.result = Some(result.clone());
    latest.benchmark = Some(*benchmark);
    Ok(())
  }

  fn render_failure(&self, message: &str) {
    self.lock().failure = Some(message.to_string());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{ClassScore, WasteLabel};

  fn result(top: WasteLabel, score: f32) -> ClassifyResult<WasteLabel> {
    ClassifyResult {
      top: ClassScore { kind: top, score },
      ranked: vec![ClassScore { kind: top, score }].into_boxed_slice(),
    }
  }

  #[test]
  fn failure_keeps_last_good_result() {
    let latest: SharedLatest<WasteLabel> = SharedLatest::new();

    latest
      .render_result(&result(WasteLabel::Glass, 0.9), &Benchmark::default())
      .unwrap();
    latest.render_failure("帧缓冲区长度不匹配");

    assert_eq!(latest.result().unwrap().top.kind, WasteLabel::Glass);
    assert!(latest.benchmark().is_some());
    assert_eq!(
      latest.last_failure().as_deref(),
      Some("帧缓冲区长度不匹配")
    );
  }

  #[test]
  fn newer_result_replaces_older_one() {
    let latest: SharedLatest<WasteLabel> = SharedLatest::new();

    latest
      .render_result(&result(WasteLabel::Paper, 0.4), &Benchmark::default())
      .unwrap();
    latest
      .render_result(&result(WasteLabel::Metal, 0.8), &Benchmark::default())
      .unwrap();

    assert_eq!(latest.result().unwrap().top.kind, WasteLabel::Metal);
  }
}
