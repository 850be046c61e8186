// 该文件是 Shouyin （收银台） 项目的一部分。
// src/model/onnx.rs - ONNX YOLO 检测模型
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

use std::collections::HashMap;

use image::imageops::{self, FilterType};
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{DetectItem, DetectResult, Model},
};

const ONNX_DEFAULT_INPUT_SIZE: u32 = 640;
const ONNX_DEFAULT_CONFIDENCE: f32 = 0.25;
const ONNX_DEFAULT_NMS: f32 = 0.45;
// cx, cy, w, h
const YOLO_BOX_CHANNELS: usize = 4;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("模型输出形状不符合预期: {0:?}")]
  UnexpectedOutput(Vec<usize>),
}

pub struct OnnxYoloBuilder {
  model_path: String,
  input_size: u32,
  confidence: f32,
  nms_threshold: f32,
}

impl FromUrlWithScheme for OnnxYoloBuilder {
  const SCHEME: &'static str = "onnx";
}

fn query_param<T: std::str::FromStr>(
  query: &HashMap<String, String>,
  key: &'static str,
  default: T,
) -> Result<T, OnnxModelError> {
  match query.get(key) {
    Some(value) => value
      .parse::<T>()
      .map_err(|_| OnnxModelError::InvalidParameter(key, value.clone())),
    None => Ok(default),
  }
}

impl FromUrl for OnnxYoloBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    Ok(OnnxYoloBuilder {
      model_path: url.path().to_string(),
      input_size: query_param(&query, "size", ONNX_DEFAULT_INPUT_SIZE)?,
      confidence: query_param(&query, "confidence", ONNX_DEFAULT_CONFIDENCE)?,
      nms_threshold: query_param(&query, "nms", ONNX_DEFAULT_NMS)?,
    })
  }
}

impl OnnxYoloBuilder {
  pub fn build(self) -> Result<OnnxYolo, OnnxModelError> {
    info!("加载模型文件: {}", self.model_path);
    let size = self.input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| OnnxModelError::ModelLoadError(format!("{}: {:#}", self.model_path, e)))?;
    info!("模型加载完成");
    debug!(
      "输入尺寸: {}, 置信度阈值: {}, NMS 阈值: {}",
      self.input_size, self.confidence, self.nms_threshold
    );

    Ok(OnnxYolo {
      plan,
      decoder: YoloDecoder {
        input_size: self.input_size,
        confidence: self.confidence,
        nms_threshold: self.nms_threshold,
      },
    })
  }
}

pub struct OnnxYolo {
  plan: TypedRunnableModel<TypedModel>,
  decoder: YoloDecoder,
}

impl OnnxYolo {
  /// 缩放到模型输入尺寸并归一化为 NCHW
  fn preprocess(&self, frame: &Frame) -> Tensor {
    let size = self.decoder.input_size;
    let resized = imageops::resize(&frame.image, size, size, FilterType::Triangle);
    let size = size as usize;
    tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
    .into_tensor()
  }
}

struct YoloDecoder {
  input_size: u32,
  confidence: f32,
  nms_threshold: f32,
}

impl YoloDecoder {
  /// 解码 YOLOv8 检测头 `[1, 4 + classes, anchors]`
  fn decode(&self, output: &Tensor) -> Result<Vec<DetectItem>, OnnxModelError> {
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| OnnxModelError::InferenceError(e.to_string()))?;
    let shape = view.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 {
      return Err(OnnxModelError::UnexpectedOutput(shape));
    }
    let view = view
      .into_dimensionality::<tract_ndarray::Ix3>()
      .map_err(|_| OnnxModelError::UnexpectedOutput(shape.clone()))?;

    // 部分导出会把锚点维放在前面
    let transposed = shape[1] > shape[2];
    let (channels, anchors) = if transposed {
      (shape[2], shape[1])
    } else {
      (shape[1], shape[2])
    };
    if channels <= YOLO_BOX_CHANNELS {
      return Err(OnnxModelError::UnexpectedOutput(shape));
    }
    let at = |channel: usize, anchor: usize| {
      if transposed {
        view[[0, anchor, channel]]
      } else {
        view[[0, channel, anchor]]
      }
    };

    let size = self.input_size as f32;
    let mut items = Vec::new();
    for anchor in 0..anchors {
      let mut best_score = f32::MIN;
      let mut best_class = 0usize;
      for channel in YOLO_BOX_CHANNELS..channels {
        let score = at(channel, anchor);
        if score > best_score {
          best_score = score;
          best_class = channel - YOLO_BOX_CHANNELS;
        }
      }

      if best_score < self.confidence {
        continue;
      }

      let (cx, cy, w, h) = (
        at(0, anchor),
        at(1, anchor),
        at(2, anchor),
        at(3, anchor),
      );
      items.push(DetectItem {
        class_id: best_class,
        score: best_score,
        bbox: [
          ((cx - w / 2.0) / size).clamp(0.0, 1.0),
          ((cy - h / 2.0) / size).clamp(0.0, 1.0),
          ((cx + w / 2.0) / size).clamp(0.0, 1.0),
          ((cy + h / 2.0) / size).clamp(0.0, 1.0),
        ],
      });
    }

    Ok(nms(items, self.nms_threshold))
  }
}

impl Model for OnnxYolo {
  type Input = Frame;
  type Output = DetectResult;
  type Error = OnnxModelError;

  fn infer(&self, input: &Frame) -> Result<DetectResult, OnnxModelError> {
    let tensor = self.preprocess(input);
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| OnnxModelError::InferenceError(format!("{:#}", e)))?;
    let output = outputs
      .first()
      .ok_or_else(|| OnnxModelError::InferenceError("模型没有输出".to_string()))?;

    let items = self.decoder.decode(output)?;
    debug!("帧 {}: 检测到 {} 个目标", input.index, items.len());
    Ok(items.into())
  }
}

/// 按类别的非极大值抑制
fn nms(mut detections: Vec<DetectItem>, threshold: f32) -> Vec<DetectItem> {
  // 按置信度降序排序
  detections.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result: Vec<DetectItem> = Vec::new();
  for det in detections {
    let suppressed = result
      .iter()
      .any(|kept| kept.class_id == det.class_id && iou(&kept.bbox, &det.bbox) >= threshold);
    if !suppressed {
      result.push(det);
    }
  }

  result
}

/// 计算两个边界框的 IoU
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(class_id: usize, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox,
    }
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = [0.0, 0.0, 0.5, 0.5];
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &[0.6, 0.6, 1.0, 1.0]), 0.0);
  }

  #[test]
  fn nms_keeps_best_overlapping_box_per_class() {
    let kept = nms(
      vec![
        item(0, 0.6, [0.0, 0.0, 0.5, 0.5]),
        item(0, 0.9, [0.01, 0.01, 0.5, 0.5]),
        item(1, 0.7, [0.0, 0.0, 0.5, 0.5]),
        item(0, 0.8, [0.6, 0.6, 0.9, 0.9]),
      ],
      0.45,
    );
    let summary: Vec<_> = kept.iter().map(|d| (d.class_id, d.score)).collect();
    assert_eq!(summary, [(0, 0.9), (0, 0.8), (1, 0.7)]);
  }

  #[test]
  fn builder_reads_query_parameters() {
    let url = Url::parse("onnx:///models/best.onnx?size=320&confidence=0.4").unwrap();
    let builder = OnnxYoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, "/models/best.onnx");
    assert_eq!(builder.input_size, 320);
    assert_eq!(builder.confidence, 0.4);
    assert_eq!(builder.nms_threshold, ONNX_DEFAULT_NMS);
  }

  #[test]
  fn builder_rejects_bad_parameter() {
    let url = Url::parse("onnx:///best.onnx?size=large").unwrap();
    assert!(matches!(
      OnnxYoloBuilder::from_url(&url),
      Err(OnnxModelError::InvalidParameter("size", _))
    ));
  }

  #[test]
  fn postprocess_decodes_yolo_head() {
    // 4 个框通道 + 2 个类别, 8 个锚点
    let mut data = vec![0f32; 6 * 8];
    let mut set = |channel: usize, anchor: usize, value: f32| data[channel * 8 + anchor] = value;
    // 锚点 0: 类别 1, 中心 (50, 50), 20x40
    set(0, 0, 50.0);
    set(1, 0, 50.0);
    set(2, 0, 20.0);
    set(3, 0, 40.0);
    set(5, 0, 0.9);
    // 锚点 1: 低于阈值
    set(4, 1, 0.1);
    // 锚点 2: 类别 0
    set(0, 2, 10.0);
    set(1, 2, 10.0);
    set(2, 2, 10.0);
    set(3, 2, 10.0);
    set(4, 2, 0.5);
    let tensor = Tensor::from_shape(&[1, 6, 8], &data).unwrap();

    let decoder = YoloDecoder {
      input_size: 100,
      confidence: 0.25,
      nms_threshold: 0.45,
    };
    let items = decoder.decode(&tensor).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].class_id, 1);
    assert_eq!(items[0].bbox, [0.4, 0.3, 0.6, 0.7]);
    assert_eq!(items[1].class_id, 0);
  }
}
