// 该文件是 Shouyin （收银台） 项目的一部分。
// src/output/save_image_file.rs - 保存标注后的图像文件
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

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::Frame,
  model::{DetectItem, DetectResult},
  output::Render,
};

const BOX_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const BOX_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 把每帧画上检测框后保存为 `frame_{index:06}.jpg`
pub struct SaveImageFileOutput {
  dir: PathBuf,
  color: Rgb<u8>,
}

impl SaveImageFileOutput {
  pub fn new(dir: &Path) -> Result<Self, SaveImageFileError> {
    std::fs::create_dir_all(dir)?;
    Ok(Self {
      dir: dir.to_path_buf(),
      color: Rgb(BOX_COLOR),
    })
  }

  pub fn frame_path(&self, frame: &Frame) -> PathBuf {
    self.dir.join(format!("frame_{:06}.jpg", frame.index))
  }

  // bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox(&self, image: &mut RgbImage, item: &DetectItem) {
    let (w, h) = (image.width() as f32, image.height() as f32);

    let x_min = ((item.bbox[0] * w).floor() as i32).clamp(0, w as i32 - 1);
    let y_min = ((item.bbox[1] * h).floor() as i32).clamp(0, h as i32 - 1);
    let x_max = ((item.bbox[2] * w).ceil() as i32).clamp(0, w as i32 - 1);
    let y_max = ((item.bbox[3] * h).ceil() as i32).clamp(0, h as i32 - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, self.color);
    }
  }
}

impl Render<Frame, DetectResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    let mut image = frame.image.clone();
    for item in result.items.iter() {
      self.draw_bbox(&mut image, item);
    }

    let path = self.frame_path(frame);
    image.save(&path)?;
    debug!(
      "保存标注图像: {} (时间戳 {} ms)",
      path.display(),
      frame.timestamp_ms
    );

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn draws_box_and_saves_frame() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(&dir.path().join("annotated")).unwrap();
    let frame = Frame::new(RgbImage::new(20, 10), 7);
    let result = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.9,
      bbox: [0.25, 0.2, 0.75, 0.8],
    }]);

    let mut drawn = frame.image.clone();
    output.draw_bbox(&mut drawn, &result.items[0]);
    assert_eq!(*drawn.get_pixel(5, 2), Rgb(BOX_COLOR));
    assert_eq!(*drawn.get_pixel(10, 5), Rgb([0, 0, 0]));

    output.render_result(&frame, &result).unwrap();
    assert!(output.frame_path(&frame).ends_with("frame_000007.jpg"));
    assert!(output.frame_path(&frame).exists());
  }
}
