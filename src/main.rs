// 该文件是 Shouyin （收银台） 项目的一部分。
// src/main.rs - 收银台主程序
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

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shouyin::{config::Config, dispatch::run_checkout};

fn main() -> Result<()> {
  // 日志写到 stderr，stdout 只留给菜单与账单
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let config = Config::parse();

  info!("标签文件: {} / {}", config.labels_yaml.display(), config.labels_coco.display());
  info!("价格文件: {}", config.prices.display());
  info!("模型地址: {}", config.model);

  let mut reader = io::stdin().lock();
  let mut writer = io::stdout().lock();
  run_checkout(&config, &mut reader, &mut writer)
}
