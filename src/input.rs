// 该文件是 Shouyin （收银台） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use thiserror::Error;

use crate::frame::Frame;

#[cfg(feature = "read_image_file")]
mod image_source;
#[cfg(feature = "read_image_file")]
pub use self::image_source::{ImageSource, ImageSourceError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图片输入错误: {0}")]
  ImageSourceError(#[from] ImageSourceError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("无法打开摄像头 {device}: {reason}")]
  CaptureError { device: String, reason: String },
  #[error("{0} 输入未启用，请开启 `{1}` 特性后重新编译")]
  Unavailable(&'static str, &'static str),
}

/// 输入源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSourceType {
  /// 图片文件或目录
  Image,
  /// 视频文件
  Video,
  /// 摄像头
  Camera,
}

/// 输入源 trait，读取失败以 `Err` 帧给出
pub trait InputSource: Iterator<Item = Result<Frame, InputError>> {
  fn source_type(&self) -> InputSourceType;
  fn location(&self) -> &str;
}

/// 摄像头参数
#[derive(Debug, Clone)]
pub struct CameraConfig {
  pub device: String,
  pub width: u32,
  pub height: u32,
  pub fps: u32,
}

/// 打开图片或图片目录
pub fn open_image_source(path: &str) -> Result<Box<dyn InputSource>, InputError> {
  #[cfg(feature = "read_image_file")]
  {
    Ok(Box::new(ImageSource::open(path)?))
  }
  #[cfg(not(feature = "read_image_file"))]
  {
    let _ = path;
    Err(InputError::Unavailable("图片", "read_image_file"))
  }
}

/// 打开视频文件
pub fn open_video_source(path: &str) -> Result<Box<dyn InputSource>, InputError> {
  #[cfg(feature = "gstreamer_input")]
  {
    let input = GStreamerInputPipelineBuilder::new().file(path).build()?;
    Ok(Box::new(input))
  }
  #[cfg(not(feature = "gstreamer_input"))]
  {
    let _ = path;
    Err(InputError::Unavailable("视频", "gstreamer_input"))
  }
}

/// 打开摄像头，任何失败都归为 [`InputError::CaptureError`]
pub fn open_camera_source(camera: &CameraConfig) -> Result<Box<dyn InputSource>, InputError> {
  #[cfg(feature = "gstreamer_input")]
  {
    let input = GStreamerInputPipelineBuilder::new()
      .camera(&camera.device, camera.width, camera.height, camera.fps)
      .build()
      .map_err(|e| InputError::CaptureError {
        device: camera.device.clone(),
        reason: e.to_string(),
      })?;
    Ok(Box::new(input))
  }
  #[cfg(not(feature = "gstreamer_input"))]
  {
    Err(InputError::CaptureError {
      device: camera.device.clone(),
      reason: InputError::Unavailable("摄像头", "gstreamer_input").to_string(),
    })
  }
}
