// 该文件是 Shouyin （收银台） 项目的一部分。
// src/output.rs - 输出定义
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

use std::{convert::Infallible, path::Path};

use thiserror::Error;

use crate::{frame::Frame, model::DetectResult};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

impl<F, D, T: Render<F, D>> Render<F, D> for &T {
  type Error = T::Error;

  fn render_result(&self, frame: &F, result: &D) -> Result<(), Self::Error> {
    (**self).render_result(frame, result)
  }
}

/// 不输出任何内容
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRender;

impl<F, D> Render<F, D> for NoRender {
  type Error = Infallible;

  fn render_result(&self, _frame: &F, _result: &D) -> Result<(), Self::Error> {
    Ok(())
  }
}

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("{0} 输出未启用，请开启 `{1}` 特性后重新编译")]
  Unavailable(&'static str, &'static str),
}

pub enum OutputWrapper {
  NoRender(NoRender),
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
}

impl OutputWrapper {
  /// 指定目录时保存标注后的帧，否则不输出
  pub fn from_save_dir(save_dir: Option<&Path>) -> Result<Self, OutputError> {
    match save_dir {
      None => Ok(OutputWrapper::NoRender(NoRender)),
      #[cfg(feature = "save_image_file")]
      Some(dir) => Ok(OutputWrapper::SaveImageFileOutput(SaveImageFileOutput::new(
        dir,
      )?)),
      #[cfg(not(feature = "save_image_file"))]
      Some(_) => Err(OutputError::Unavailable("图像文件", "save_image_file")),
    }
  }
}

impl Render<Frame, DetectResult> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::NoRender(output) => match output.render_result(frame, result) {
        Ok(()) => Ok(()),
        Err(never) => match never {},
      },
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
