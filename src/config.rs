// 该文件是 Shouyin （收银台） 项目的一部分。
// src/config.rs - 项目参数配置
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

use clap::Parser;
use url::Url;

use crate::{
  bill::DEFAULT_CURRENCY,
  input::CameraConfig,
  labels::{DEFAULT_COCO_LABELS, DEFAULT_YAML_LABELS},
  price::{DEFAULT_PRICES_FILE, DEFAULT_UNIT_PRICE, Price},
};

/// 视频与摄像头输入依赖 GStreamer，默认构建不包含
const FEATURE_HELP: &str = "\
视频（2）与摄像头（3）模式需要 GStreamer 输入支持，默认构建不包含：
  cargo build --release --features gstreamer_input
未启用时选择这两种模式会提示输入不可用。";

/// Shouyin 项目参数配置
///
/// 运行模式与图片/视频路径在启动后交互输入。
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, after_help = FEATURE_HELP)]
pub struct Config {
  /// 数据集描述文件（优先使用）
  #[arg(long, default_value = DEFAULT_YAML_LABELS, value_name = "FILE")]
  pub labels_yaml: PathBuf,

  /// COCO 标注文件（无数据集描述文件时使用）
  #[arg(long, default_value = DEFAULT_COCO_LABELS, value_name = "FILE")]
  pub labels_coco: PathBuf,

  /// 价格文件，不存在时所有类别使用默认单价
  #[arg(long, default_value = DEFAULT_PRICES_FILE, value_name = "FILE")]
  pub prices: PathBuf,

  /// 默认单价
  #[arg(long, default_value_t = DEFAULT_UNIT_PRICE, value_name = "PRICE")]
  pub default_price: Price,

  /// 货币符号
  #[arg(long, default_value = DEFAULT_CURRENCY, value_name = "SYMBOL")]
  pub currency: String,

  /// 模型地址
  /// 支持格式:
  /// - ONNX: onnx:///path/best.onnx?size=640&confidence=0.25&nms=0.45
  /// - 回放: replay:///path/detections.json
  #[arg(long, default_value = "onnx:///best.onnx", value_name = "MODEL")]
  pub model: Url,

  /// 摄像头设备
  #[arg(long, default_value = "/dev/video0", value_name = "DEVICE")]
  pub camera: String,

  #[arg(long, default_value_t = 640, value_name = "PIXELS")]
  pub camera_width: u32,

  #[arg(long, default_value_t = 480, value_name = "PIXELS")]
  pub camera_height: u32,

  #[arg(long, default_value_t = 15, value_name = "FPS")]
  pub camera_fps: u32,

  /// 保存标注后帧图像的目录
  #[arg(long, value_name = "DIR")]
  pub save_dir: Option<PathBuf>,

  /// 摄像头模式下跨帧累计账单（默认每帧单独计费）
  #[arg(long)]
  pub cumulative: bool,

  /// 摄像头模式最大处理帧数（0 表示无限制）
  #[arg(long, default_value_t = 0, value_name = "COUNT")]
  pub max_frames: usize,
}

impl Config {
  pub fn camera_config(&self) -> CameraConfig {
    CameraConfig {
      device: self.camera.clone(),
      width: self.camera_width,
      height: self.camera_height,
      fps: self.camera_fps,
    }
  }

  pub fn frame_limit(&self) -> Option<usize> {
    (self.max_frames > 0).then_some(self.max_frames)
  }
}
