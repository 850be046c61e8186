// 该文件是 Shouyin （收银台） 项目的一部分。
// src/input/image_source.rs - 图片输入源
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

use std::{
  collections::VecDeque,
  fs,
  path::{Path, PathBuf},
};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{InputError, InputSource, InputSourceType};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum ImageSourceError {
  #[error("无法读取目录 {path}: {source}")]
  ReadDirError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法打开图片文件 {path}: {source}")]
  OpenError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法解码图片文件 {path}: {source}")]
  DecodeError {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

/// 图片输入源：单张图片或目录下的全部图片
///
/// 路径不做预先检查，打不开的文件在读取对应帧时报错。
pub struct ImageSource {
  location: String,
  pending: VecDeque<PathBuf>,
  frame_index: u64,
}

fn is_image_file(path: &Path) -> bool {
  path.is_file()
    && path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
      .unwrap_or(false)
}

impl ImageSource {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageSourceError> {
    let path = path.as_ref();

    let pending = if path.is_dir() {
      let mut files = fs::read_dir(path)
        .map_err(|source| ImageSourceError::ReadDirError {
          path: path.to_path_buf(),
          source,
        })?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|entry| is_image_file(entry))
        .collect::<Vec<_>>();
      files.sort();
      if files.is_empty() {
        warn!("目录 {} 中没有图片文件", path.display());
      }
      info!("图片目录 {}: 共 {} 张图片", path.display(), files.len());
      files.into()
    } else {
      VecDeque::from([path.to_path_buf()])
    };

    Ok(Self {
      location: path.display().to_string(),
      pending,
      frame_index: 0,
    })
  }

  fn read(path: &Path) -> Result<image::RgbImage, ImageSourceError> {
    let image = ImageReader::open(path)
      .map_err(|source| ImageSourceError::OpenError {
        path: path.to_path_buf(),
        source,
      })?
      .with_guessed_format()
      .map_err(|source| ImageSourceError::OpenError {
        path: path.to_path_buf(),
        source,
      })?
      .decode()
      .map_err(|source| ImageSourceError::DecodeError {
        path: path.to_path_buf(),
        source,
      })?;
    Ok(image.to_rgb8())
  }
}

impl Iterator for ImageSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.pending.pop_front()?;
    debug!("读取图片: {}", path.display());

    let index = self.frame_index;
    self.frame_index += 1;
    Some(
      Self::read(&path)
        .map(|image| Frame::new(image, index))
        .map_err(InputError::from),
    )
  }
}

impl InputSource for ImageSource {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::Image
  }

  fn location(&self) -> &str {
    &self.location
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn folder_yields_sorted_images_only() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(3, 2, Rgb([255, 0, 0]))
      .save(dir.path().join("b.png"))
      .unwrap();
    RgbImage::from_pixel(2, 2, Rgb([0, 255, 0]))
      .save(dir.path().join("a.png"))
      .unwrap();
    fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

    let source = ImageSource::open(dir.path()).unwrap();
    assert_eq!(source.source_type(), InputSourceType::Image);
    assert_eq!(source.location(), dir.path().display().to_string());

    let frames: Vec<_> = source.map(|frame| frame.unwrap()).collect();
    assert_eq!(frames.len(), 2);
    assert_eq!((frames[0].index, frames[0].width()), (0, 2));
    assert_eq!((frames[1].index, frames[1].width()), (1, 3));
  }

  #[test]
  fn missing_file_fails_on_read() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = ImageSource::open(dir.path().join("missing.jpg")).unwrap();
    assert!(matches!(
      source.next(),
      Some(Err(InputError::ImageSourceError(
        ImageSourceError::OpenError { .. }
      )))
    ));
    assert!(source.next().is_none());
  }
}
