// 该文件是 Shouyin （收银台） 项目的一部分。
// src/bill.rs - 计数与账单
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

use std::{collections::HashMap, fmt, io};

use crate::{
  error::BillingError,
  labels::ClassRegistry,
  price::{Price, PriceTable},
};

pub const DEFAULT_CURRENCY: &str = "₹";

const RULE_WIDTH: usize = 40;
const LABEL_WIDTH: usize = 15;
const COUNT_WIDTH: usize = 2;
const PRICE_WIDTH: usize = 5;

/// 按首次出现顺序记录的类别计数
#[derive(Debug, Clone, Default)]
pub struct ItemCount {
  entries: Vec<(String, u32)>,
  positions: HashMap<String, usize>,
}

impl ItemCount {
  pub fn new() -> Self {
    Self::default()
  }

  /// 统计一组类别索引
  pub fn tally<I>(class_ids: I, registry: &ClassRegistry) -> Result<Self, BillingError>
  where
    I: IntoIterator<Item = usize>,
  {
    let mut counts = Self::new();
    counts.extend_from(class_ids, registry)?;
    Ok(counts)
  }

  /// 在已有计数上累加；遇到越界索引立即返回错误
  pub fn extend_from<I>(&mut self, class_ids: I, registry: &ClassRegistry) -> Result<(), BillingError>
  where
    I: IntoIterator<Item = usize>,
  {
    for class_id in class_ids {
      let label = registry.resolve(class_id)?;
      self.add(label);
    }
    Ok(())
  }

  pub fn add(&mut self, label: &str) {
    match self.positions.get(label) {
      Some(&position) => self.entries[position].1 += 1,
      None => {
        self.positions.insert(label.to_string(), self.entries.len());
        self.entries.push((label.to_string(), 1));
      }
    }
  }

  pub fn get(&self, label: &str) -> u32 {
    self
      .positions
      .get(label)
      .map(|&position| self.entries[position].1)
      .unwrap_or(0)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
    self
      .entries
      .iter()
      .map(|(label, count)| (label.as_str(), *count))
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }
}

impl PartialEq for ItemCount {
  fn eq(&self, other: &Self) -> bool {
    self.entries == other.entries
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BillLine {
  pub label: String,
  pub count: u32,
  pub unit_price: Price,
  pub subtotal: Price,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bill {
  lines: Vec<BillLine>,
  total: Price,
}

impl Bill {
  pub fn from_counts(counts: &ItemCount, prices: &PriceTable) -> Self {
    let mut total = Price::ZERO;
    let lines = counts
      .iter()
      .map(|(label, count)| {
        let unit_price = prices.get(label);
        let subtotal = unit_price.times(count);
        total = total + subtotal;
        BillLine {
          label: label.to_string(),
          count,
          unit_price,
          subtotal,
        }
      })
      .collect();

    Self { lines, total }
  }

  pub fn lines(&self) -> &[BillLine] {
    &self.lines
  }

  pub fn total(&self) -> Price {
    self.total
  }

  pub fn is_empty(&self) -> bool {
    self.lines.is_empty()
  }

  pub fn display<'a>(&'a self, currency: &'a str) -> BillDisplay<'a> {
    BillDisplay {
      bill: self,
      currency,
    }
  }
}

/// 统计并计价，生成一张账单
pub fn aggregate<I>(
  class_ids: I,
  registry: &ClassRegistry,
  prices: &PriceTable,
) -> Result<Bill, BillingError>
where
  I: IntoIterator<Item = usize>,
{
  let counts = ItemCount::tally(class_ids, registry)?;
  Ok(Bill::from_counts(&counts, prices))
}

/// 账单表格
pub struct BillDisplay<'a> {
  bill: &'a Bill,
  currency: &'a str,
}

impl fmt::Display for BillDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rule = "-".repeat(RULE_WIDTH);
    let cur = self.currency;

    writeln!(f, "🧾 Billing Summary")?;
    writeln!(f, "{}", rule)?;
    for line in &self.bill.lines {
      writeln!(
        f,
        "{:<lw$} x{:<cw$}  {}{:<pw$}  =  {}{}",
        line.label,
        line.count,
        cur,
        line.unit_price,
        cur,
        line.subtotal,
        lw = LABEL_WIDTH,
        cw = COUNT_WIDTH,
        pw = PRICE_WIDTH,
      )?;
    }
    writeln!(f, "{}", rule)?;
    write!(f, "Total Bill: {}{}", cur, self.bill.total)
  }
}

/// 将账单写入控制台（或任意输出）
pub fn write_bill<W: io::Write>(writer: &mut W, bill: &Bill, currency: &str) -> io::Result<()> {
  writeln!(writer)?;
  writeln!(writer, "{}", bill.display(currency))?;
  writeln!(writer)?;
  writer.flush()
}
