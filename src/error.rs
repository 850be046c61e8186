// 该文件是 Shouyin （收银台） 项目的一部分。
// src/error.rs - 计费错误定义
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

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BillingError {
  /// 所有标签来源都不存在
  #[error("未找到标签来源: 已尝试 {}", .tried.join(", "))]
  NoLabelSource { tried: Vec<String> },
  #[error("标签文件 {path} 解析失败: {reason}")]
  LabelParse { path: PathBuf, reason: String },
  #[error("价格文件 {path} 解析失败: {source}")]
  PriceParse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  /// 检测器给出的类别索引超出标签表范围
  #[error("类别索引 {index} 超出范围 (共 {len} 个类别)")]
  ClassIndexOutOfRange { index: usize, len: usize },
  #[error("无效的选择: {0:?}")]
  InvalidChoice(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}
