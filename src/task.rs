// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/task.rs - 分类任务与推理循环
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  input::FrameSource,
  lifecycle::{Lifecycle, ModelState},
  model::{Model, OutputScores, WithLabel, decode},
  output::Render,
  preprocess::{CLASSIFY_INPUT_SIZE, InputTensor, preprocess},
};

/// 推理循环错误
#[derive(Error, Debug)]
pub enum LoopError {
  #[error("模型尚未就绪，无法启动推理循环")]
  NoModel,
}

/// 单次循环迭代的耗时快照
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Benchmark {
  /// 预处理耗时（毫秒）
  pub preprocess_ms: f64,
  /// 推理耗时（毫秒）
  pub inference_ms: f64,
  /// 后处理耗时（毫秒）
  pub postprocess_ms: f64,
  /// 整个迭代耗时（毫秒）
  pub total_ms: f64,
  /// 每秒完成的迭代数
  pub fps: f64,
}

/// 帧率统计
///
/// 统计窗口满一秒后重新计算帧率并复位计数；窗口之间保留上一次
/// 计算的值，不逐帧刷新。
pub struct FpsCounter {
  frames: u32,
  window_start: Instant,
  fps: f64,
}

impl Default for FpsCounter {
  fn default() -> Self {
    Self::new()
  }
}

impl FpsCounter {
  pub fn new() -> Self {
    Self {
      frames: 0,
      window_start: Instant::now(),
      fps: 0.0,
    }
  }

  /// 记录一次完成的迭代，返回当前帧率
  pub fn tick(&mut self) -> f64 {
    self.tick_at(Instant::now())
  }

  fn tick_at(&mut self, now: Instant) -> f64 {
    self.frames += 1;
    let elapsed_ms = now.duration_since(self.window_start).as_millis();
    if elapsed_ms >= 1000 {
      self.fps = (self.frames as f64 * 1000.0 / elapsed_ms as f64).round();
      self.frames = 0;
      self.window_start = now;
    }
    self.fps
  }
}

/// 推理循环的调度抽象
///
/// 循环每完成一次迭代才调用 next_tick 请求下一个帧刻，同一时间最多
/// 只有一次推理在进行。
pub trait Scheduler {
  /// 等待下一个帧刻；返回 false 表示调度已取消
  fn next_tick(&mut self) -> bool;
  /// 取消调度，此后 next_tick 一律返回 false
  fn cancel(&mut self);
}

/// 按固定刷新周期派发帧刻的时钟
pub struct FrameClock {
  period: Duration,
  next_deadline: Option<Instant>,
  cancelled: Arc<AtomicBool>,
}

impl FrameClock {
  /// 以每秒 refresh_rate 个帧刻的节奏创建时钟
  pub fn new(refresh_rate: u32) -> Self {
    let rate = refresh_rate.max(1);
    Self {
      period: Duration::from_secs_f64(1.0 / rate as f64),
      next_deadline: None,
      cancelled: Arc::new(AtomicBool::new(false)),
    }
  }

  /// 取得可跨线程取消时钟的句柄
  pub fn handle(&self) -> ClockHandle {
    ClockHandle {
      cancelled: Arc::clone(&self.cancelled),
    }
  }
}

impl Scheduler for FrameClock {
  fn next_tick(&mut self) -> bool {
    if self.cancelled.load(Ordering::SeqCst) {
      return false;
    }

    let now = Instant::now();
    let deadline = self.next_deadline.unwrap_or(now);
    if deadline > now {
      thread::sleep(deadline - now);
    }
    self.next_deadline = Some(deadline.max(now) + self.period);

    !self.cancelled.load(Ordering::SeqCst)
  }

  fn cancel(&mut self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }
}

/// 帧时钟的取消句柄
///
/// 取消立即对调度生效，已经开始的迭代会执行完毕。
#[derive(Clone)]
pub struct ClockHandle {
  cancelled: Arc<AtomicBool>,
}

impl ClockHandle {
  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }
}

/// 派发固定次数帧刻的调度器，用于测试与离线批处理
pub struct ManualScheduler {
  remaining: usize,
}

impl ManualScheduler {
  pub fn new(ticks: usize) -> Self {
    Self { remaining: ticks }
  }
}

impl Scheduler for ManualScheduler {
  fn next_tick(&mut self) -> bool {
    if self.remaining == 0 {
      return false;
    }
    self.remaining -= 1;
    true
  }

  fn cancel(&mut self) {
    self.remaining = 0;
  }
}

/// 单次分类任务
///
/// 采集一帧并完成预处理、推理与解码。任何一步失败都会把错误返回
/// 给调用方。
pub struct OneShotClassifyTask {
  target_size: (u32, u32),
}

impl Default for OneShotClassifyTask {
  fn default() -> Self {
    Self {
      target_size: (CLASSIFY_INPUT_SIZE, CLASSIFY_INPUT_SIZE),
    }
  }
}

impl OneShotClassifyTask {
  pub fn with_target_size(mut self, target_size: (u32, u32)) -> Self {
    self.target_size = target_size;
    self
  }

  pub fn run_task<T, F, M, R>(self, mut source: F, model: M, output: R) -> Result<(), anyhow::Error>
  where
    T: WithLabel,
    F: FrameSource,
    M: Model<Input = InputTensor, Output = OutputScores>,
    M::Error: std::error::Error + Sync + Send + 'static,
    R: Render<T>,
    R::Error: std::error::Error + Sync + Send + 'static,
  {
    info!("开始任务...");
    let frame = source
      .current_frame()?
      .ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let total_start = Instant::now();
    let pre_start = Instant::now();
    let tensor = preprocess(&frame, self.target_size)?;
    let preprocess_ms = to_ms(pre_start.elapsed());

    let (scores, infer_elapsed) = model.infer(&tensor)?;

    let post_start = Instant::now();
    let result = decode::<T>(&scores)?;
    let postprocess_ms = to_ms(post_start.elapsed());
    let total_ms = to_ms(total_start.elapsed());

    let benchmark = Benchmark {
      preprocess_ms,
      inference_ms: to_ms(infer_elapsed),
      postprocess_ms,
      total_ms,
      fps: 0.0,
    };
    info!("推理完成，耗时: {:.2} ms", total_ms);
    output.render_result(&result, &benchmark)?;

    Ok(())
  }
}

/// 连续分类任务
///
/// 模型就绪后按调度器的节奏逐帧推理。预处理、推理或解码失败只会
/// 跳过当前帧并上报失败，循环继续处理后续帧；模型状态离开就绪后
/// 循环结束。
pub struct ContinuousClassifyTask<S> {
  scheduler: S,
  frame_limit: Option<usize>,
  target_size: (u32, u32),
}

impl<S: Scheduler> ContinuousClassifyTask<S> {
  pub fn new(scheduler: S) -> Self {
    Self {
      scheduler,
      frame_limit: None,
      target_size: (CLASSIFY_INPUT_SIZE, CLASSIFY_INPUT_SIZE),
    }
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<usize>) -> Self {
    self.frame_limit = frame_limit;
    self
  }

  pub fn with_target_size(mut self, target_size: (u32, u32)) -> Self {
    self.target_size = target_size;
    self
  }

  pub fn run_task<T, F, M, R>(
    mut self,
    mut source: F,
    lifecycle: Lifecycle<M>,
    output: R,
  ) -> Result<(), anyhow::Error>
  where
    T: WithLabel,
    F: FrameSource,
    M: Model<Input = InputTensor, Output = OutputScores>,
    M::Error: std::fmt::Display,
    R: Render<T>,
    R::Error: std::error::Error + Sync + Send + 'static,
  {
    if lifecycle.state() != ModelState::Ready {
      return Err(LoopError::NoModel.into());
    }

    info!("开始任务...");
    let mut fps_counter = FpsCounter::new();
    let mut completed = 0usize;

    while self.scheduler.next_tick() {
      if lifecycle.state() != ModelState::Ready {
        warn!("模型状态离开就绪，退出任务循环");
        break;
      }
      let Some(model) = lifecycle.model() else {
        warn!("推理能力不可用，退出任务循环");
        break;
      };

      let total_start = Instant::now();
      let frame = match source.current_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => {
          debug!("暂无可用帧，等待下一个帧刻");
          continue;
        }
        Err(e) => {
          warn!("帧源错误: {}", e);
          output.render_failure(&e.to_string());
          continue;
        }
      };

      debug!("处理第 {} 帧图像", frame.index);

      let pre_start = Instant::now();
      let tensor = match preprocess(&frame, self.target_size) {
        Ok(tensor) => tensor,
        Err(e) => {
          warn!("预处理失败，跳过该帧: {}", e);
          output.render_failure(&e.to_string());
          continue;
        }
      };
      let preprocess_ms = to_ms(pre_start.elapsed());

      let (scores, infer_elapsed) = match model.infer(&tensor) {
        Ok(outcome) => outcome,
        Err(e) => {
          error!("推理失败: {}", e);
          output.render_failure(&e.to_string());
          continue;
        }
      };

      let post_start = Instant::now();
      let result = match decode::<T>(&scores) {
        Ok(result) => result,
        Err(e) => {
          error!("解码失败: {}", e);
          output.render_failure(&e.to_string());
          continue;
        }
      };
      let postprocess_ms = to_ms(post_start.elapsed());
      let total_ms = to_ms(total_start.elapsed());

      completed += 1;
      let benchmark = Benchmark {
        preprocess_ms,
        inference_ms: to_ms(infer_elapsed),
        postprocess_ms,
        total_ms,
        fps: fps_counter.tick(),
      };
      output.render_result(&result, &benchmark)?;

      if self.frame_limit.map(|n| completed >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", completed);
        break;
      }
    }

    info!("任务完成，退出");
    Ok(())
  }
}

fn to_ms(duration: Duration) -> f64 {
  duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fps_refreshes_once_per_second_window() {
    let start = Instant::now();
    let mut counter = FpsCounter::new();
    counter.window_start = start;

    assert_eq!(counter.tick_at(start + Duration::from_millis(400)), 0.0);
    assert_eq!(counter.tick_at(start + Duration::from_millis(800)), 0.0);

    // 第三帧越过一秒窗口: round(3 * 1000 / 1100) = 3
    let fps = counter.tick_at(start + Duration::from_millis(1100));
    assert_eq!(fps, 3.0);

    // 窗口复位后保留上一次的值
    assert_eq!(counter.tick_at(start + Duration::from_millis(1200)), 3.0);
    assert_eq!(counter.frames, 1);
  }

  #[test]
  fn manual_scheduler_dispatches_exactly_n_ticks() {
    let mut scheduler = ManualScheduler::new(2);
    assert!(scheduler.next_tick());
    assert!(scheduler.next_tick());
    assert!(!scheduler.next_tick());
  }

  #[test]
  fn cancelled_manual_scheduler_stops() {
    let mut scheduler = ManualScheduler::new(5);
    assert!(scheduler.next_tick());
    scheduler.cancel();
    assert!(!scheduler.next_tick());
  }

  #[test]
  fn clock_handle_cancels_across_threads() {
    let mut clock = FrameClock::new(1000);
    let handle = clock.handle();
    assert!(clock.next_tick());

    handle.cancel();
    assert!(!clock.next_tick());
  }
}
