// 该文件是 Shouyin （收银台） 项目的一部分。
// src/model/replay.rs - 检测结果回放
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

//! 按顺序回放预先录制的检测结果，每次推理消耗一帧。
//!
//! 文件格式为 JSON 数组，每个元素对应一帧：
//!
//! ```json
//! [[0, 0, 1], [], [{"class_id": 1, "score": 0.8, "bbox": [0.1, 0.1, 0.4, 0.5]}]]
//! ```

use std::{cell::Cell, fs, path::Path};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{DetectItem, DetectResult, Model},
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("回放文件格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordedDetection {
  ClassId(usize),
  Item {
    class_id: usize,
    #[serde(default = "full_score")]
    score: f32,
    #[serde(default = "full_frame")]
    bbox: [f32; 4],
  },
}

fn full_score() -> f32 {
  1.0
}

fn full_frame() -> [f32; 4] {
  [0.0, 0.0, 1.0, 1.0]
}

impl From<RecordedDetection> for DetectItem {
  fn from(recorded: RecordedDetection) -> Self {
    match recorded {
      RecordedDetection::ClassId(class_id) => DetectItem {
        class_id,
        score: full_score(),
        bbox: full_frame(),
      },
      RecordedDetection::Item {
        class_id,
        score,
        bbox,
      } => DetectItem {
        class_id,
        score,
        bbox,
      },
    }
  }
}

pub struct ReplayModel {
  frames: Box<[DetectResult]>,
  cursor: Cell<usize>,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Self::from_path(url.path())
  }
}

impl ReplayModel {
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReplayModelError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let recorded: Vec<Vec<RecordedDetection>> = serde_json::from_str(&text)?;
    info!("加载回放文件 {}: 共 {} 帧", path.display(), recorded.len());

    Ok(Self::from_results(
      recorded
        .into_iter()
        .map(|frame| {
          DetectResult::from(frame.into_iter().map(DetectItem::from).collect::<Vec<_>>())
        })
        .collect(),
    ))
  }

  pub fn from_results(frames: Vec<DetectResult>) -> Self {
    Self {
      frames: frames.into_boxed_slice(),
      cursor: Cell::new(0),
    }
  }

  /// 每帧只给出类别索引
  pub fn from_class_ids(frames: Vec<Vec<usize>>) -> Self {
    Self::from_results(
      frames
        .into_iter()
        .map(|ids| {
          DetectResult::from(
            ids
              .into_iter()
              .map(|id| DetectItem::from(RecordedDetection::ClassId(id)))
              .collect::<Vec<_>>(),
          )
        })
        .collect(),
    )
  }

  pub fn remaining(&self) -> usize {
    self.frames.len().saturating_sub(self.cursor.get())
  }

  /// 取出下一帧的检测结果，回放结束后返回空结果
  pub fn next_result(&self) -> DetectResult {
    let cursor = self.cursor.get();
    self.cursor.set(cursor + 1);
    self.frames.get(cursor).cloned().unwrap_or_default()
  }
}

impl Model for ReplayModel {
  type Input = Frame;
  type Output = DetectResult;
  type Error = ReplayModelError;

  fn infer(&self, input: &Frame) -> Result<DetectResult, ReplayModelError> {
    let result = self.next_result();
    debug!("回放输入帧 {}: {} 个目标", input.index, result.len());
    Ok(result)
  }
}
