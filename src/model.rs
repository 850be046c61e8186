// 该文件是 Shouyin （收银台） 项目的一部分。
// src/model.rs - 检测模型
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
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<T: Model> Model for &T {
  type Input = T::Input;
  type Output = T::Output;
  type Error = T::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: usize,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn class_ids(&self) -> impl Iterator<Item = usize> + '_ {
    self.items.iter().map(|item| item.class_id)
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxModelError, OnnxYolo, OnnxYoloBuilder};

mod replay;
pub use self::replay::{ReplayModel, ReplayModelError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_onnx")]
  #[error("ONNX 模型错误: {0}")]
  Onnx(#[from] OnnxModelError),
  #[error("回放模型错误: {0}")]
  Replay(#[from] ReplayModelError),
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
}

/// 进程内唯一的检测模型句柄
pub enum ModelWrapper {
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxYolo),
  Replay(ReplayModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_onnx")]
    {
      if url.scheme() == OnnxYoloBuilder::SCHEME {
        let model = OnnxYoloBuilder::from_url(url)?.build()?;
        return Ok(ModelWrapper::Onnx(model));
      }
    }

    if url.scheme() == ReplayModel::SCHEME {
      let model = ReplayModel::from_url(url)?;
      return Ok(ModelWrapper::Replay(model));
    }

    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Model for ModelWrapper {
  type Input = Frame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Frame) -> Result<DetectResult, ModelError> {
    match self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(model) => model.infer(input).map_err(ModelError::from),
      ModelWrapper::Replay(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}
