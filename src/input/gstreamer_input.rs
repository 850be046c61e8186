// 该文件是 Shouyin （收银台） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 视频文件与摄像头都通过 GStreamer 管道读取，帧统一转换为 RGB。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## 用法
//!
//! ```no_run
//! use shouyin::input::GStreamerInputPipelineBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input = GStreamerInputPipelineBuilder::new()
//!     .camera("/dev/video0", 640, 480, 15)
//!     .build()?;
//! for frame in input {
//!     let frame = frame?;
//!     println!("帧 {}: {}x{}", frame.index, frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{InputError, InputSource, InputSourceType};
use crate::frame::Frame;

const STATE_CHANGE_TIMEOUT_SECS: u64 = 5;
const PULL_TIMEOUT_MS: u64 = 500;
// 连续这么久拿不到帧视为输入中断
const STALL_TIMEOUT_MS: u64 = 10_000;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    device: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        device,
        width,
        height,
        fps,
      } => format!(
        "v4l2src device={} ! videoconvert ! videoscale ! video/x-raw,width={},height={},framerate={}/1",
        device, width, height, fps
      ),
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  source_type: InputSourceType,
  location: String,
}

impl Default for GStreamerInputPipelineBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self {
      items: Vec::new(),
      source_type: InputSourceType::Video,
      location: String::new(),
    }
  }

  /// 读取视频文件；逐帧读取，不丢帧
  pub fn file(mut self, path: &str) -> Self {
    self
      .items
      .push(GStreamerInputBuilderItem::FileSource(path.to_string()));
    self.source_type = InputSourceType::Video;
    self.location = path.to_string();
    self
  }

  /// 读取 V4L2 摄像头；处理不过来时丢弃旧帧
  pub fn camera(mut self, device: &str, width: u32, height: u32, fps: u32) -> Self {
    self.items.push(GStreamerInputBuilderItem::CameraSource {
      device: device.to_string(),
      width,
      height,
      fps,
    });
    self.source_type = InputSourceType::Camera;
    self.location = device.to_string();
    self
  }

  fn describe(&self) -> String {
    let sink = match self.source_type {
      InputSourceType::Camera => "appsink max-buffers=2 drop=true name=sink",
      _ => "appsink sync=false name=sink",
    };
    let target = GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    };
    self
      .items
      .iter()
      .chain(std::iter::once(&target))
      .map(GStreamerInputBuilderItem::to_pipeline)
      .chain(std::iter::once(sink.to_string()))
      .collect::<Vec<String>>()
      .join(" ! ")
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.describe();
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    let input = GStreamerInput {
      pipeline,
      appsink,
      source_type: self.source_type,
      location: self.location,
      frame_index: 0,
      finished: false,
    };

    // 设备不存在等错误会在状态切换时暴露；失败时 input 被 drop，管道回到 Null
    input.pipeline.set_state(gst::State::Playing)?;
    let (result, _, _) = input
      .pipeline
      .state(gst::ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));
    result?;

    Ok(input)
  }
}

/// GStreamer 视频输入，drop 时释放设备
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  source_type: InputSourceType,
  location: String,
  frame_index: u64,
  finished: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    match self.pipeline.set_state(gst::State::Null) {
      Ok(_) => info!("输入源已释放: {}", self.location),
      Err(e) => warn!("Failed to stop GStreamer pipeline: {}", e),
    }
  }
}

/// 一次拉取的结果
#[derive(Debug, PartialEq)]
enum PullStatus<S> {
  Sample(S),
  /// 正常结束（EOS）
  Finished,
  /// 管道报错
  Failed(String),
  /// 超时，还没有新帧
  Waiting,
}

/// 已到达的帧优先；没有帧时管道错误先于 EOS
fn pull_status<S>(sample: Option<S>, is_eos: bool, bus_error: Option<String>) -> PullStatus<S> {
  match (sample, bus_error) {
    (Some(sample), _) => PullStatus::Sample(sample),
    (None, Some(message)) => PullStatus::Failed(message),
    (None, None) if is_eos => PullStatus::Finished,
    (None, None) => PullStatus::Waiting,
  }
}

impl GStreamerInput {
  /// 取出总线上的错误消息
  fn bus_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    let source = message
      .src()
      .map(|src| src.path_string().to_string())
      .unwrap_or_else(|| "pipeline".to_string());
    match message.view() {
      gst::MessageView::Error(err) => Some(match err.debug() {
        Some(debug) => format!("{}: {} ({})", source, err.error(), debug),
        None => format!("{}: {}", source, err.error()),
      }),
      _ => None,
    }
  }

  fn pull(&self) -> PullStatus<gst::Sample> {
    let sample = self
      .appsink
      .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS));
    if sample.is_some() {
      return pull_status(sample, false, None);
    }
    let bus_error = self.bus_error();
    pull_status(None, self.appsink.is_eos(), bus_error)
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let mut waited_ms = 0;
    let sample = loop {
      match self.pull() {
        PullStatus::Sample(sample) => break sample,
        PullStatus::Finished => {
          debug!("输入流结束: {}", self.location);
          self.finished = true;
          return None;
        }
        PullStatus::Failed(message) => {
          error!("GStreamer 管道错误: {}", message);
          self.finished = true;
          return Some(Err(GStreamerInputError::PipelineError(message).into()));
        }
        PullStatus::Waiting => {
          waited_ms += PULL_TIMEOUT_MS;
          if waited_ms >= STALL_TIMEOUT_MS {
            self.finished = true;
            return Some(Err(
              GStreamerInputError::PipelineError(format!(
                "{} 超过 {} ms 没有新帧",
                self.location, STALL_TIMEOUT_MS
              ))
              .into(),
            ));
          }
          debug!("等待新帧: {} ms", waited_ms);
        }
      }
    };

    let timestamp_ms = sample
      .buffer()
      .and_then(|buffer| buffer.pts())
      .map(|pts| pts.mseconds())
      .unwrap_or(0);

    let index = self.frame_index;
    self.frame_index += 1;
    Some(
      convert_sample_to_rgb(sample)
        .map(|image| Frame::new(image, index).with_timestamp(timestamp_ms))
        .map_err(InputError::from),
    )
  }
}

impl InputSource for GStreamerInput {
  fn source_type(&self) -> InputSourceType {
    self.source_type
  }

  fn location(&self) -> &str {
    &self.location
  }
}

fn convert_sample_to_rgb(sample: gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let swap_channels = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    other => return Err(GStreamerInputError::UnsupportedFormat(other)),
  };

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  // 每行按 stride 对齐，最后一行只需要 width * 3 字节
  let expected_size = stride * height.saturating_sub(1) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(width * height * 3);
  for h in 0..height {
    let row = &data[h * stride..h * stride + width * 3];
    if swap_channels {
      for bgr in row.chunks_exact(3) {
        pixels.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
      }
    } else {
      pixels.extend_from_slice(row);
    }
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: data.len(),
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_pipeline_keeps_every_frame() {
    let description = GStreamerInputPipelineBuilder::new()
      .file("/tmp/checkout.mp4")
      .describe();
    assert_eq!(
      description,
      "filesrc location=\"/tmp/checkout.mp4\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink sync=false name=sink"
    );
  }

  #[test]
  fn camera_pipeline_drops_late_frames() {
    let description = GStreamerInputPipelineBuilder::new()
      .camera("/dev/video0", 640, 480, 15)
      .describe();
    assert!(description.starts_with("v4l2src device=/dev/video0 ! "));
    assert!(description.contains("width=640,height=480,framerate=15/1"));
    assert!(description.ends_with("appsink max-buffers=2 drop=true name=sink"));
  }

  #[test]
  fn samples_come_before_errors_and_errors_before_eos() {
    assert_eq!(pull_status(Some(7u32), false, None), PullStatus::Sample(7));
    assert_eq!(
      pull_status(Some(7u32), true, Some("late".to_string())),
      PullStatus::Sample(7)
    );
    assert_eq!(pull_status(None::<u32>, true, None), PullStatus::Finished);
    assert_eq!(
      pull_status(None::<u32>, true, Some("decodebin0: not negotiated".to_string())),
      PullStatus::Failed("decodebin0: not negotiated".to_string())
    );
    assert_eq!(
      pull_status(None::<u32>, false, Some("v4l2src0: device lost".to_string())),
      PullStatus::Failed("v4l2src0: device lost".to_string())
    );
    assert_eq!(pull_status(None::<u32>, false, None), PullStatus::Waiting);
  }

  // 3x2 图像，每行 9 字节像素 + 3 字节对齐填充
  fn padded_rows() -> Vec<u8> {
    vec![
      1, 2, 3, 4, 5, 6, 7, 8, 9, 0xEE, 0xEE, 0xEE, //
      10, 11, 12, 13, 14, 15, 16, 17, 18, 0xEE, 0xEE, 0xEE,
    ]
  }

  fn sample(format: gst_video::VideoFormat, data: Vec<u8>) -> gst::Sample {
    gst::init().unwrap();
    let info = gst_video::VideoInfo::builder(format, 3, 2).build().unwrap();
    let caps = info.to_caps().unwrap();
    let buffer = gst::Buffer::from_mut_slice(data);
    gst::Sample::builder().buffer(&buffer).caps(&caps).build()
  }

  #[test]
  fn rgb_rows_drop_stride_padding() {
    let image = convert_sample_to_rgb(sample(gst_video::VideoFormat::Rgb, padded_rows())).unwrap();
    assert_eq!(image.dimensions(), (3, 2));
    assert_eq!(
      image.into_raw(),
      [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18]
    );
  }

  #[test]
  fn bgr_rows_are_swapped_to_rgb() {
    let image = convert_sample_to_rgb(sample(gst_video::VideoFormat::Bgr, padded_rows())).unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1]);
    assert_eq!(image.get_pixel(2, 0).0, [9, 8, 7]);
    assert_eq!(image.get_pixel(1, 1).0, [15, 14, 13]);
  }

  #[test]
  fn short_buffer_is_rejected() {
    let mut data = padded_rows();
    data.truncate(20);
    let err = convert_sample_to_rgb(sample(gst_video::VideoFormat::Rgb, data)).unwrap_err();
    assert!(matches!(
      err,
      GStreamerInputError::BufferSizeMismatch {
        expected: 21,
        actual: 20
      }
    ));
  }

  #[test]
  fn other_formats_are_rejected() {
    let err = convert_sample_to_rgb(sample(gst_video::VideoFormat::Gray8, vec![0; 8])).unwrap_err();
    assert!(matches!(
      err,
      GStreamerInputError::UnsupportedFormat(gst_video::VideoFormat::Gray8)
    ));
  }
}
