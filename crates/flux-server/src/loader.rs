use anyhow::{Context, Result};
use flux_rule::Rule;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// 从文件或目录加载规则
///
/// 文件内容可以是单个规则对象或规则数组；目录按文件名顺序读取其中的 `*.json`。
pub fn load_rules(path: &Path) -> Result<Vec<Rule>> {
    if !path.is_dir() {
        return load_file(path);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).with_context(|| format!("Failed to read {}", path.display()))? {
        let file = entry?.path();
        if file.extension().is_some_and(|ext| ext == "json") {
            files.push(file);
        }
    }
    files.sort();

    let mut rules = Vec::new();
    for file in files {
        rules.extend(load_file(&file)?);
    }
    Ok(rules)
}

fn load_file(path: &Path) -> Result<Vec<Rule>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))?;

    let rules = match value {
        Value::Array(_) => serde_json::from_value::<Vec<Rule>>(value),
        other => serde_json::from_value::<Rule>(other).map(|rule| vec![rule]),
    }
    .with_context(|| format!("Invalid rule definition in {}", path.display()))?;

    debug!(file = %path.display(), count = rules.len(), "Rules loaded");
    Ok(rules)
}
