// 该文件是 Shouyin （收银台） 项目的一部分。
// src/labels.rs - 类别标签表
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
  collections::BTreeMap,
  fs,
  path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::BillingError;

pub const DEFAULT_YAML_LABELS: &str = "data.yaml";
pub const DEFAULT_COCO_LABELS: &str = "_annotations.coco.json";

/// 有序类别表，位置即类别索引
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRegistry {
  names: Box<[String]>,
}

impl ClassRegistry {
  pub fn new(names: Vec<String>) -> Self {
    Self {
      names: names.into_boxed_slice(),
    }
  }

  /// 将检测器给出的类别索引解析为类别名称
  pub fn resolve(&self, index: usize) -> Result<&str, BillingError> {
    self
      .names
      .get(index)
      .map(String::as_str)
      .ok_or(BillingError::ClassIndexOutOfRange {
        index,
        len: self.names.len(),
      })
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

/// 标签来源策略
pub trait LabelSource {
  fn name(&self) -> &'static str;
  fn path(&self) -> &Path;
  fn load(&self) -> Result<Vec<String>, BillingError>;
}

/// 数据集描述文件（`names` 键）
pub struct YamlLabelSource {
  path: PathBuf,
}

impl YamlLabelSource {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

#[derive(Deserialize)]
struct YamlDescriptor {
  names: YamlNames,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum YamlNames {
  List(Vec<String>),
  Indexed(BTreeMap<usize, String>),
}

impl LabelSource for YamlLabelSource {
  fn name(&self) -> &'static str {
    "yaml"
  }

  fn path(&self) -> &Path {
    &self.path
  }

  fn load(&self) -> Result<Vec<String>, BillingError> {
    let text = fs::read_to_string(&self.path)?;
    let descriptor: YamlDescriptor =
      serde_yaml::from_str(&text).map_err(|e| BillingError::LabelParse {
        path: self.path.clone(),
        reason: e.to_string(),
      })?;

    match descriptor.names {
      YamlNames::List(names) => Ok(names),
      YamlNames::Indexed(map) => {
        let mut names = Vec::with_capacity(map.len());
        // 索引必须从 0 开始连续
        for (expected, (index, name)) in map.into_iter().enumerate() {
          if index != expected {
            return Err(BillingError::LabelParse {
              path: self.path.clone(),
              reason: format!("类别索引不连续: 期望 {}, 实际 {}", expected, index),
            });
          }
          names.push(name);
        }
        Ok(names)
      }
    }
  }
}

/// COCO 标注文件（`categories[].name`）
pub struct CocoJsonLabelSource {
  path: PathBuf,
}

impl CocoJsonLabelSource {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

#[derive(Deserialize)]
struct CocoAnnotations {
  categories: Vec<CocoCategory>,
}

#[derive(Deserialize)]
struct CocoCategory {
  name: String,
}

impl LabelSource for CocoJsonLabelSource {
  fn name(&self) -> &'static str {
    "coco"
  }

  fn path(&self) -> &Path {
    &self.path
  }

  fn load(&self) -> Result<Vec<String>, BillingError> {
    let text = fs::read_to_string(&self.path)?;
    let annotations: CocoAnnotations =
      serde_json::from_str(&text).map_err(|e| BillingError::LabelParse {
        path: self.path.clone(),
        reason: e.to_string(),
      })?;
    Ok(
      annotations
        .categories
        .into_iter()
        .map(|category| category.name)
        .collect(),
    )
  }
}

/// 默认来源顺序: YAML 优先，其次 COCO
pub fn default_sources(
  yaml: impl Into<PathBuf>,
  coco: impl Into<PathBuf>,
) -> Vec<Box<dyn LabelSource>> {
  vec![
    Box::new(YamlLabelSource::new(yaml)),
    Box::new(CocoJsonLabelSource::new(coco)),
  ]
}

/// 按顺序尝试标签来源，使用第一个存在的文件
pub fn load_classes(sources: &[Box<dyn LabelSource>]) -> Result<ClassRegistry, BillingError> {
  for source in sources {
    if !source.path().exists() {
      debug!("标签来源 {} 不存在: {}", source.name(), source.path().display());
      continue;
    }

    info!("从 {} 标签来源加载类别: {}", source.name(), source.path().display());
    let names = source.load()?;
    info!("共加载 {} 个类别", names.len());
    return Ok(ClassRegistry::new(names));
  }

  Err(BillingError::NoLabelSource {
    tried: sources
      .iter()
      .map(|source| source.path().display().to_string())
      .collect(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
  }

  #[test]
  fn yaml_list_keeps_declared_order() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = write(dir.path(), "data.yaml", "nc: 2\nnames: [bread, apple]\n");
    let registry = load_classes(&default_sources(yaml, dir.path().join("none.json"))).unwrap();
    assert_eq!(registry.names(), ["bread", "apple"]);
    assert_eq!(registry.resolve(1).unwrap(), "apple");
  }

  #[test]
  fn yaml_indexed_names_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = write(dir.path(), "data.yaml", "names:\n  0: milk\n  1: eggs\n");
    let registry = load_classes(&default_sources(yaml, dir.path().join("none.json"))).unwrap();
    assert_eq!(registry.names(), ["milk", "eggs"]);
  }

  #[test]
  fn yaml_indexed_names_with_gap_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = write(dir.path(), "data.yaml", "names:\n  0: milk\n  2: eggs\n");
    let err = load_classes(&default_sources(yaml, dir.path().join("none.json"))).unwrap_err();
    assert!(matches!(err, BillingError::LabelParse { .. }));
  }

  #[test]
  fn yaml_wins_over_coco() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = write(dir.path(), "data.yaml", "names: [from_yaml]\n");
    let coco = write(
      dir.path(),
      "_annotations.coco.json",
      r#"{"categories": [{"id": 0, "name": "from_coco"}]}"#,
    );
    let registry = load_classes(&default_sources(yaml, coco)).unwrap();
    assert_eq!(registry.names(), ["from_yaml"]);
  }

  #[test]
  fn coco_categories_in_file_order_without_dedup() {
    let dir = tempfile::tempdir().unwrap();
    let coco = write(
      dir.path(),
      "_annotations.coco.json",
      r#"{"images": [], "categories": [
        {"id": 0, "name": "items", "supercategory": "none"},
        {"id": 1, "name": "apple", "supercategory": "items"},
        {"id": 2, "name": "apple", "supercategory": "items"}
      ]}"#,
    );
    let registry = load_classes(&default_sources(dir.path().join("data.yaml"), coco)).unwrap();
    assert_eq!(registry.names(), ["items", "apple", "apple"]);
  }

  #[test]
  fn missing_sources_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_classes(&default_sources(
      dir.path().join("data.yaml"),
      dir.path().join("_annotations.coco.json"),
    ))
    .unwrap_err();
    match err {
      BillingError::NoLabelSource { tried } => assert_eq!(tried.len(), 2),
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn resolve_out_of_range() {
    let registry = ClassRegistry::new(vec!["a".into(), "b".into()]);
    let err = registry.resolve(5).unwrap_err();
    assert!(matches!(
      err,
      BillingError::ClassIndexOutOfRange { index: 5, len: 2 }
    ));
  }
}
