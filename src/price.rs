// 该文件是 Shouyin （收银台） 项目的一部分。
// src/price.rs - 价格表
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
  collections::HashMap,
  fmt, fs,
  num::ParseFloatError,
  ops::Add,
  path::Path,
  str::FromStr,
};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::BillingError;

pub const DEFAULT_PRICES_FILE: &str = "prices.json";
pub const DEFAULT_UNIT_PRICE: Price = Price::Integer(50);

/// 单价，保留价格文件中整数与小数的区别
///
/// 整数价格按整数运算和显示；任何一方为小数时结果为小数，
/// 整值小数显示为 `13.0` 而不是 `13`。
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Price {
  Integer(i64),
  Decimal(f64),
}

impl Price {
  pub const ZERO: Price = Price::Integer(0);

  pub fn value(self) -> f64 {
    match self {
      Price::Integer(v) => v as f64,
      Price::Decimal(v) => v,
    }
  }

  /// 单价乘以数量
  pub fn times(self, count: u32) -> Price {
    match self {
      Price::Integer(v) => v
        .checked_mul(i64::from(count))
        .map(Price::Integer)
        .unwrap_or_else(|| Price::Decimal(v as f64 * f64::from(count))),
      Price::Decimal(v) => Price::Decimal(v * f64::from(count)),
    }
  }
}

impl Default for Price {
  fn default() -> Self {
    Price::ZERO
  }
}

impl Add for Price {
  type Output = Price;

  fn add(self, rhs: Price) -> Price {
    match (self, rhs) {
      (Price::Integer(a), Price::Integer(b)) => a
        .checked_add(b)
        .map(Price::Integer)
        .unwrap_or_else(|| Price::Decimal(a as f64 + b as f64)),
      (a, b) => Price::Decimal(a.value() + b.value()),
    }
  }
}

impl fmt::Display for Price {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match *self {
      Price::Integer(v) => v.to_string(),
      Price::Decimal(v) if v.is_finite() && v.fract() == 0.0 => format!("{:.1}", v),
      Price::Decimal(v) => v.to_string(),
    };
    // 支持 `{:<5}` 之类的宽度与对齐
    f.pad(&text)
  }
}

impl FromStr for Price {
  type Err = ParseFloatError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    match s.parse::<i64>() {
      Ok(v) => Ok(Price::Integer(v)),
      Err(_) => s.parse::<f64>().map(Price::Decimal),
    }
  }
}

/// 类别名称到单价的映射，启动时构建后不再修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable {
  prices: HashMap<String, Price>,
}

impl PriceTable {
  /// 未定价的类别单价为 0
  pub fn get(&self, label: &str) -> Price {
    self.prices.get(label).copied().unwrap_or(Price::ZERO)
  }

  pub fn contains(&self, label: &str) -> bool {
    self.prices.contains_key(label)
  }

  pub fn len(&self) -> usize {
    self.prices.len()
  }

  pub fn is_empty(&self) -> bool {
    self.prices.is_empty()
  }

  /// 为每个类别生成统一单价
  pub fn uniform<S: AsRef<str>>(class_names: &[S], price: Price) -> Self {
    class_names
      .iter()
      .map(|name| (name.as_ref().to_string(), price))
      .collect()
  }
}

impl FromIterator<(String, Price)> for PriceTable {
  fn from_iter<T: IntoIterator<Item = (String, Price)>>(iter: T) -> Self {
    Self {
      prices: iter.into_iter().collect(),
    }
  }
}

/// 读取价格文件；文件不存在时回退为统一默认单价
///
/// 价格文件按原样使用，不与类别表比对，多出或缺失的条目都允许。
pub fn load_prices<S: AsRef<str>>(
  path: &Path,
  class_names: &[S],
  default_price: Price,
) -> Result<PriceTable, BillingError> {
  if !path.exists() {
    warn!(
      "价格文件 {} 不存在，所有类别使用默认单价 {}",
      path.display(),
      default_price
    );
    return Ok(PriceTable::uniform(class_names, default_price));
  }

  let text = fs::read_to_string(path)?;
  let prices: HashMap<String, Price> =
    serde_json::from_str(&text).map_err(|source| BillingError::PriceParse {
      path: path.to_path_buf(),
      source,
    })?;
  info!("从 {} 加载 {} 条价格", path.display(), prices.len());

  Ok(PriceTable { prices })
}
