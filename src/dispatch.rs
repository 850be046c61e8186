// 该文件是 Shouyin （收银台） 项目的一部分。
// src/dispatch.rs - 运行模式选择与分发
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
  io::{self, BufRead, Write},
  str::FromStr,
};

use anyhow::Context;
use tracing::{error, info, warn};

use crate::{
  FromUrl,
  config::Config,
  error::BillingError,
  frame::Frame,
  input::{CameraConfig, InputSource, open_camera_source, open_image_source, open_video_source},
  labels::{default_sources, load_classes},
  model::{DetectResult, Model, ModelWrapper},
  output::{OutputWrapper, Render},
  price::load_prices,
  task::{BatchBillingTask, Billing, LiveBillingTask, Task, ctrlc_quit_signal},
};

const MENU: [&str; 4] = ["Select Input Type:", "1️⃣  Image", "2️⃣  Video", "3️⃣  Webcam"];

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// 单张图片或图片目录
  Image,
  /// 视频文件
  Video,
  /// 摄像头实时计费
  Webcam,
}

impl FromStr for Mode {
  type Err = BillingError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "1" => Ok(Mode::Image),
      "2" => Ok(Mode::Video),
      "3" => Ok(Mode::Webcam),
      other => Err(BillingError::InvalidChoice(other.to_string())),
    }
  }
}

fn prompt<R: BufRead, W: Write>(reader: &mut R, writer: &mut W, text: &str) -> io::Result<String> {
  write!(writer, "{}", text)?;
  writer.flush()?;
  let mut line = String::new();
  reader.read_line(&mut line)?;
  Ok(line.trim().to_string())
}

/// 打印菜单并读取运行模式；无效选择时打印提示并返回 `None`
pub fn select_mode<R: BufRead, W: Write>(
  reader: &mut R,
  writer: &mut W,
) -> io::Result<Option<Mode>> {
  for line in MENU {
    writeln!(writer, "{}", line)?;
  }
  let choice = prompt(reader, writer, "Enter choice (1/2/3): ")?;

  match choice.parse::<Mode>() {
    Ok(mode) => {
      info!("运行模式: {:?}", mode);
      Ok(Some(mode))
    }
    Err(e) => {
      warn!("{}", e);
      writeln!(writer, "Invalid choice.")?;
      Ok(None)
    }
  }
}

/// 持有模型与输出，按模式组织输入并运行计费任务
pub struct Dispatcher<'a, M, O> {
  billing: &'a Billing,
  model: M,
  output: O,
  camera: CameraConfig,
  frame_number: Option<usize>,
  cumulative: bool,
}

impl<
  'a,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  M: Model<Input = Frame, Output = DetectResult, Error = ME>,
  O: Render<Frame, DetectResult, Error = RE>,
> Dispatcher<'a, M, O>
{
  pub fn new(billing: &'a Billing, model: M, output: O, camera: CameraConfig) -> Self {
    Self {
      billing,
      model,
      output,
      camera,
      frame_number: None,
      cumulative: false,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_cumulative(mut self, cumulative: bool) -> Self {
    self.cumulative = cumulative;
    self
  }

  pub fn run<R: BufRead, W: Write>(
    &self,
    mode: Mode,
    reader: &mut R,
    writer: &mut W,
  ) -> anyhow::Result<()> {
    match mode {
      Mode::Image => {
        let path = prompt(reader, writer, "Enter image path (or folder path): ")?;
        let input = open_image_source(&path).with_context(|| format!("无法打开图片: {}", path))?;
        log_source(input.as_ref());
        BatchBillingTask::new(self.billing, &mut *writer).run_task(
          input,
          &self.model,
          &self.output,
        )?;
      }
      Mode::Video => {
        let path = prompt(reader, writer, "Enter video path: ")?;
        let input = open_video_source(&path).with_context(|| format!("无法打开视频: {}", path))?;
        log_source(input.as_ref());
        BatchBillingTask::new(self.billing, &mut *writer).run_task(
          input,
          &self.model,
          &self.output,
        )?;
      }
      Mode::Webcam => self.run_webcam(writer)?,
    }
    Ok(())
  }

  fn run_webcam<W: Write>(&self, writer: &mut W) -> anyhow::Result<()> {
    let input = match open_camera_source(&self.camera) {
      Ok(input) => input,
      Err(e) => {
        error!("{}", e);
        writeln!(writer, "❌ Cannot open webcam.")?;
        return Ok(());
      }
    };

    log_source(input.as_ref());
    writeln!(writer, "🎥 Press Ctrl-C to quit.")?;
    let mut task = LiveBillingTask::new(self.billing, &mut *writer)
      .with_frame_number(self.frame_number)
      .with_cumulative(self.cumulative);
    match ctrlc_quit_signal() {
      Ok(quit) => task = task.with_quit_signal(quit),
      Err(e) => warn!("无法安装 Ctrl-C 处理器: {}", e),
    }
    task.run_task(input, &self.model, &self.output)?;
    Ok(())
  }
}

fn log_source(input: &dyn InputSource) {
  info!("输入源: {:?} {}", input.source_type(), input.location());
}

/// 加载类别表与价格表
pub fn load_billing(config: &Config) -> Result<Billing, BillingError> {
  let registry = load_classes(&default_sources(
    config.labels_yaml.clone(),
    config.labels_coco.clone(),
  ))?;
  let prices = load_prices(&config.prices, registry.names(), config.default_price)?;

  if prices.is_empty() {
    warn!("价格表为空，所有商品按 0 计费");
  } else {
    info!("价格表共 {} 项", prices.len());
  }
  for name in registry.names().iter().filter(|name| !prices.contains(name)) {
    warn!("类别 {} 没有单价，按 0 计费", name);
  }

  Ok(Billing::new(registry, prices, config.currency.clone()))
}

/// 一次完整的收银会话：选择模式，加载类别、价格与模型，运行对应模式
///
/// 先读取选择再加载资源，无效选择不会触发任何加载。
pub fn run_checkout<R: BufRead, W: Write>(
  config: &Config,
  reader: &mut R,
  writer: &mut W,
) -> anyhow::Result<()> {
  let Some(mode) = select_mode(reader, writer)? else {
    return Ok(());
  };

  let billing = load_billing(config)?;
  let model = ModelWrapper::from_url(&config.model)
    .with_context(|| format!("无法加载模型: {}", config.model))?;
  let output = OutputWrapper::from_save_dir(config.save_dir.as_deref())?;

  Dispatcher::new(&billing, model, output, config.camera_config())
    .with_frame_number(config.frame_limit())
    .with_cumulative(config.cumulative)
    .run(mode, reader, writer)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn choices_map_to_modes() {
    assert_eq!("1".parse::<Mode>().unwrap(), Mode::Image);
    assert_eq!(" 2\n".parse::<Mode>().unwrap(), Mode::Video);
    assert_eq!("3".parse::<Mode>().unwrap(), Mode::Webcam);
    assert!(matches!(
      "4".parse::<Mode>(),
      Err(BillingError::InvalidChoice(choice)) if choice == "4"
    ));
    assert!("".parse::<Mode>().is_err());
  }

  #[test]
  fn menu_then_choice() {
    let mut out = Vec::new();
    let mode = select_mode(&mut Cursor::new("  3  \n"), &mut out).unwrap();
    assert_eq!(mode, Some(Mode::Webcam));

    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("Select Input Type:\n1️⃣  Image\n"));
    assert!(text.ends_with("Enter choice (1/2/3): "));
  }

  #[test]
  fn invalid_choice_is_reported_once() {
    let mut out = Vec::new();
    let mode = select_mode(&mut Cursor::new("image\n"), &mut out).unwrap();
    assert_eq!(mode, None);
    assert!(String::from_utf8(out).unwrap().ends_with("Invalid choice.\n"));
  }

  #[test]
  fn billing_tolerates_unpriced_classes() {
    use clap::Parser;

    let dir = tempfile::tempdir().unwrap();
    let yaml = dir.path().join("data.yaml");
    let prices = dir.path().join("prices.json");
    std::fs::write(&yaml, "names: [apple, bread]\n").unwrap();
    std::fs::write(&prices, r#"{"apple": 10}"#).unwrap();

    let config = Config::parse_from([
      "shouyin".to_string(),
      "--labels-yaml".to_string(),
      yaml.display().to_string(),
      "--prices".to_string(),
      prices.display().to_string(),
    ]);
    let billing = load_billing(&config).unwrap();
    assert_eq!(billing.registry.names(), ["apple", "bread"]);
    assert_eq!(billing.prices.len(), 1);
    assert!(billing.prices.contains("apple"));
    assert!(!billing.prices.contains("bread"));
  }
}
