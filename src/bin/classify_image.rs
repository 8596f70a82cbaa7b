// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/bin/classify_image.rs - 单张图像分类程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use url::Url;

use shihuang::{
  FromUrl,
  input::ImageFileInput,
  model::{OnnxClassifierBuilder, WasteLabel},
  output::ConsoleOutput,
  task::OneShotClassifyTask,
};
use tracing::info;

/// Shihuang 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);

  let input = ImageFileInput::from_url(&args.input)?;
  let model = OnnxClassifierBuilder::from_url(&args.model)?.build()?;

  OneShotClassifyTask::default().run_task::<WasteLabel, _, _, _>(input, model, ConsoleOutput)?;

  Ok(())
}
