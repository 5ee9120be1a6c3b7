use anyhow::{Context as AnyhowContext, Result};
use std::fs;
use crate::script::ScriptTree;

/// Reads a parser result (`{"children": [...]}` or the parser's root node) from disk.
pub fn load_tree_from_json(file_path: &str) -> Result<ScriptTree> {
    let json_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read tree file from {}", file_path))?;

    let tree: ScriptTree = serde_json::from_str(&json_content)
        .with_context(|| format!("Failed to deserialize script tree from {}", file_path))?;

    Ok(tree)
}
