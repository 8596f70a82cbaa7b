// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/bin/live_classify.rs - 摄像头连续分类程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use url::Url;

use shihuang::{
  FromUrl,
  input::V4l2Camera,
  lifecycle::{Lifecycle, ModelState},
  model::{OnnxClassifierBuilder, WasteLabel},
  output::ConsoleOutput,
  task::{ContinuousClassifyTask, FrameClock},
};
use tracing::{info, warn};

/// Shihuang 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE", default_value = "v4l2:///dev/video0")]
  pub input: Url,

  /// 每秒调度的帧刻数
  #[arg(long, value_name = "RATE", default_value = "30")]
  pub refresh_rate: u32,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);

  let camera = V4l2Camera::from_url(&args.input)?;

  let lifecycle = Lifecycle::new();
  let watcher = lifecycle.subscribe(|state| info!("模型状态: {}", state));

  let builder = OnnxClassifierBuilder::from_url(&args.model)?;
  if lifecycle.load(|| builder.build()) != ModelState::Ready {
    anyhow::bail!(
      "模型加载失败: {}",
      lifecycle.last_error().unwrap_or_default()
    );
  }
  watcher.unsubscribe();

  let clock = FrameClock::new(args.refresh_rate);
  let handle = clock.handle();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    handle.cancel();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .expect("Error setting Ctrl-C handler");

  ContinuousClassifyTask::new(clock)
    .with_frame_limit(args.frame_number)
    .run_task::<WasteLabel, _, _, _>(camera, lifecycle, ConsoleOutput)?;

  Ok(())
}
