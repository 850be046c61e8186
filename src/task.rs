// 该文件是 Shouyin （收银台） 项目的一部分。
// src/task.rs - 计费任务
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
  io::Write,
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::{
  bill::{Bill, ItemCount, aggregate, write_bill},
  labels::ClassRegistry,
  model::{DetectResult, Model},
  output::Render,
  price::PriceTable,
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 计费所需的只读上下文，启动时构建一次
#[derive(Debug, Clone)]
pub struct Billing {
  pub registry: ClassRegistry,
  pub prices: PriceTable,
  pub currency: String,
}

impl Billing {
  pub fn new(registry: ClassRegistry, prices: PriceTable, currency: impl Into<String>) -> Self {
    Self {
      registry,
      prices,
      currency: currency.into(),
    }
  }
}

/// 图片/视频批量计费：所有帧的检测结果合并为一张账单
pub struct BatchBillingTask<'a, W> {
  billing: &'a Billing,
  writer: W,
}

impl<'a, W: Write> BatchBillingTask<'a, W> {
  pub fn new(billing: &'a Billing, writer: W) -> Self {
    Self { billing, writer }
  }
}

impl<
  F,
  IE: std::error::Error + Sync + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<F, IE>>,
  M: Model<Input = F, Output = DetectResult, Error = ME>,
  O: Render<F, DetectResult, Error = RE>,
  W: Write,
> Task<I, M, O> for BatchBillingTask<'_, W>
{
  type Output = Bill;
  type Error = anyhow::Error;

  fn run_task(mut self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始批量计费任务...");
    let started = Instant::now();

    let registry = &self.billing.registry;
    let mut counts = ItemCount::new();
    let mut detections = 0usize;
    let mut frame_count = 0usize;
    for frame in input {
      let frame = frame.with_context(|| format!("读取第 {} 帧失败", frame_count + 1))?;
      frame_count += 1;

      let now = Instant::now();
      let result = model.infer(&frame)?;
      debug!(
        "第 {} 帧: {} 个目标，推理耗时 {:.2?}",
        frame_count,
        result.len(),
        now.elapsed()
      );
      output.render_result(&frame, &result)?;
      // 逐帧计数，越界索引在出现的那一帧就中止
      counts
        .extend_from(result.class_ids(), registry)
        .with_context(|| format!("第 {} 帧检测结果无法计费", frame_count))?;
      detections += result.len();
    }
    info!(
      "共处理 {} 帧，检测到 {} 个目标，耗时 {:.2?}",
      frame_count,
      detections,
      started.elapsed()
    );

    let bill = Bill::from_counts(&counts, &self.billing.prices);
    write_bill(&mut self.writer, &bill, &self.billing.currency)?;
    Ok(bill)
  }
}

/// 安装 Ctrl-C 处理器，返回对应的退出信号
///
/// 进程内只能安装一次。
pub fn ctrlc_quit_signal() -> Result<Receiver<()>, ctrlc::Error> {
  let (tx, rx) = mpsc::channel();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  Ok(rx)
}

/// 实时计费循环的统计
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LiveSummary {
  /// 已处理帧数
  pub frames: usize,
  /// 打印过账单的帧数
  pub billed_frames: usize,
  /// 最后一张账单
  pub last_bill: Option<Bill>,
}

/// 摄像头实时计费：每帧单独计费，或开启累计后按整个会话计费
pub struct LiveBillingTask<'a, W> {
  billing: &'a Billing,
  writer: W,
  frame_number: Option<usize>,
  cumulative: bool,
  quit: Option<Receiver<()>>,
}

impl<'a, W: Write> LiveBillingTask<'a, W> {
  pub fn new(billing: &'a Billing, writer: W) -> Self {
    Self {
      billing,
      writer,
      frame_number: None,
      cumulative: false,
      quit: None,
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

  /// 每帧处理后检查一次退出信号
  pub fn with_quit_signal(mut self, quit: Receiver<()>) -> Self {
    self.quit = Some(quit);
    self
  }

  fn should_quit(&self) -> bool {
    self
      .quit
      .as_ref()
      .map(|rx| rx.try_recv().is_ok())
      .unwrap_or(false)
  }
}

impl<
  F,
  IE: std::error::Error + Sync + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<F, IE>>,
  M: Model<Input = F, Output = DetectResult, Error = ME>,
  O: Render<F, DetectResult, Error = RE>,
  W: Write,
> Task<I, M, O> for LiveBillingTask<'_, W>
{
  type Output = LiveSummary;
  type Error = anyhow::Error;

  fn run_task(mut self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始实时计费任务...");
    let registry = &self.billing.registry;
    let prices = &self.billing.prices;

    let mut session = ItemCount::new();
    let mut summary = LiveSummary::default();
    let mut now = Instant::now();
    for frame in input {
      let frame = match frame {
        Ok(frame) => frame,
        Err(e) => {
          warn!("读取帧失败: {}，退出任务循环", e);
          break;
        }
      };
      summary.frames += 1;
      debug!("处理第 {} 帧图像", summary.frames);

      let result = model.infer(&frame)?;
      output.render_result(&frame, &result)?;

      if !result.is_empty() {
        let bill = if self.cumulative {
          session.extend_from(result.class_ids(), registry)?;
          Bill::from_counts(&session, prices)
        } else {
          aggregate(result.class_ids(), registry, prices)?
        };
        write_bill(&mut self.writer, &bill, &self.billing.currency)?;
        summary.billed_frames += 1;
        summary.last_bill = Some(bill);
      }
      debug!("第 {} 帧处理完成，耗时: {:.2?}", summary.frames, now.elapsed());
      now = Instant::now();

      if self.frame_number.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }
      if self.should_quit() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!(
      "实时计费结束: 共 {} 帧，其中 {} 帧出账",
      summary.frames, summary.billed_frames
    );
    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    error::BillingError,
    model::{ReplayModel, ReplayModelError},
    output::NoRender,
    price::Price,
  };
  use std::{convert::Infallible, io};

  fn billing(names: &[&str], prices: &[(&str, i64)]) -> Billing {
    Billing::new(
      ClassRegistry::new(names.iter().map(|name| name.to_string()).collect()),
      prices
        .iter()
        .map(|(name, price)| (name.to_string(), Price::Integer(*price)))
        .collect(),
      "₹",
    )
  }

  fn frames(n: usize) -> impl Iterator<Item = Result<usize, Infallible>> {
    (0..n).map(Ok)
  }

  // 帧只是占位，检测结果来自回放模型
  struct Scripted(ReplayModel);

  impl Model for Scripted {
    type Input = usize;
    type Output = DetectResult;
    type Error = ReplayModelError;

    fn infer(&self, _input: &usize) -> Result<DetectResult, ReplayModelError> {
      Ok(self.0.next_result())
    }
  }

  fn scripted(class_ids: Vec<Vec<usize>>) -> Scripted {
    Scripted(ReplayModel::from_class_ids(class_ids))
  }

  #[test]
  fn batch_merges_all_frames_into_one_bill() {
    let billing = billing(&["apple", "bread"], &[("apple", 10), ("bread", 20)]);
    let mut out = Vec::new();
    let bill = BatchBillingTask::new(&billing, &mut out)
      .run_task(frames(2), scripted(vec![vec![0, 0], vec![1]]), NoRender)
      .unwrap();

    assert_eq!(bill.total(), Price::Integer(40));
    assert_eq!(bill.lines().len(), 2);
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches("🧾 Billing Summary").count(), 1);
    assert!(text.contains("Total Bill: ₹40"));
  }

  #[test]
  fn batch_index_error_prints_no_bill() {
    let billing = billing(&["apple", "bread"], &[]);
    let mut out = Vec::new();
    let err = BatchBillingTask::new(&billing, &mut out)
      .run_task(frames(1), scripted(vec![vec![0, 5]]), NoRender)
      .unwrap_err();

    assert!(matches!(
      err.downcast_ref::<BillingError>(),
      Some(BillingError::ClassIndexOutOfRange { index: 5, len: 2 })
    ));
    assert!(out.is_empty());
  }

  #[test]
  fn batch_stops_at_first_unbillable_frame() {
    let billing = billing(&["apple", "bread"], &[("apple", 10)]);
    let model = scripted(vec![vec![0], vec![5], vec![0]]);
    let mut out = Vec::new();
    let err = BatchBillingTask::new(&billing, &mut out)
      .run_task(frames(3), &model, NoRender)
      .unwrap_err();

    assert!(matches!(
      err.downcast_ref::<BillingError>(),
      Some(BillingError::ClassIndexOutOfRange { index: 5, len: 2 })
    ));
    assert!(err.to_string().contains("第 2 帧"));
    // 第三帧没有被推理
    assert_eq!(model.0.remaining(), 1);
    assert!(out.is_empty());
  }

  #[test]
  fn batch_frame_error_aborts_unit() {
    let billing = billing(&["apple"], &[]);
    let mut out = Vec::new();
    let input = vec![
      Ok(0usize),
      Err(io::Error::new(io::ErrorKind::NotFound, "missing.jpg")),
    ];
    let result = BatchBillingTask::new(&billing, &mut out).run_task(
      input.into_iter(),
      scripted(vec![vec![0], vec![0]]),
      NoRender,
    );

    assert!(result.is_err());
    assert!(out.is_empty());
  }

  #[test]
  fn live_bills_each_frame_independently() {
    let billing = billing(&["a", "b"], &[("a", 5), ("b", 3)]);
    let mut out = Vec::new();
    let summary = LiveBillingTask::new(&billing, &mut out)
      .run_task(
        frames(3),
        scripted(vec![vec![0], vec![], vec![1, 1]]),
        NoRender,
      )
      .unwrap();

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.billed_frames, 2);
    assert_eq!(summary.last_bill.map(|bill| bill.total()), Some(Price::Integer(6)));

    let text = String::from_utf8(out).unwrap();
    let totals: Vec<_> = text
      .lines()
      .filter(|line| line.starts_with("Total Bill"))
      .collect();
    assert_eq!(totals, ["Total Bill: ₹5", "Total Bill: ₹6"]);
  }

  #[test]
  fn live_cumulative_carries_counts() {
    let billing = billing(&["a", "b"], &[("a", 5), ("b", 3)]);
    let mut out = Vec::new();
    let summary = LiveBillingTask::new(&billing, &mut out)
      .with_cumulative(true)
      .run_task(
        frames(3),
        scripted(vec![vec![0], vec![], vec![1, 1]]),
        NoRender,
      )
      .unwrap();

    let last = summary.last_bill.unwrap();
    assert_eq!(last.total(), Price::Integer(11));
    assert_eq!(last.lines()[0].label, "a");
    assert_eq!(last.lines()[1].count, 2);
  }

  #[test]
  fn live_stops_on_read_failure() {
    let billing = billing(&["a"], &[("a", 1)]);
    let mut out = Vec::new();
    let input = vec![
      Ok(0usize),
      Err(io::Error::new(io::ErrorKind::UnexpectedEof, "device lost")),
      Ok(2usize),
    ];
    let summary = LiveBillingTask::new(&billing, &mut out)
      .run_task(input.into_iter(), scripted(vec![vec![0]; 3]), NoRender)
      .unwrap();

    assert_eq!(summary.frames, 1);
    assert_eq!(summary.billed_frames, 1);
  }

  #[test]
  fn live_respects_frame_limit_and_quit_signal() {
    let billing = billing(&["a"], &[("a", 1)]);

    let summary = LiveBillingTask::new(&billing, io::sink())
      .with_frame_number(Some(2))
      .run_task(frames(10), scripted(vec![vec![0]; 10]), NoRender)
      .unwrap();
    assert_eq!(summary.frames, 2);

    let (tx, rx) = mpsc::channel();
    tx.send(()).unwrap();
    let summary = LiveBillingTask::new(&billing, io::sink())
      .with_quit_signal(rx)
      .run_task(frames(10), scripted(vec![vec![0]; 10]), NoRender)
      .unwrap();
    assert_eq!(summary.frames, 1);
  }

  #[test]
  fn live_index_error_propagates() {
    let billing = billing(&["a", "b"], &[]);
    let err = LiveBillingTask::new(&billing, io::sink())
      .run_task(frames(1), scripted(vec![vec![5]]), NoRender)
      .unwrap_err();
    assert!(err.downcast_ref::<BillingError>().is_some());
  }
}
