use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use crate::script::{NodeType, ScriptNode, ScriptTree};

/// 行索引条目：节点及其所属 label 的行范围
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineIndexEntry {
    pub node_id: String,
    pub node_type: NodeType,
    pub label_id: Option<String>,
    pub label_name: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
}

impl LineIndexEntry {
    pub fn span(&self) -> usize {
        self.end_line - self.start_line
    }

    pub fn contains(&self, line: usize) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }
}

/// Depth-first over children and false branches, in source order.
pub fn build_index(tree: &ScriptTree) -> Vec<LineIndexEntry> {
    let mut entries = Vec::new();
    for node in &tree.children {
        visit(node, None, &mut entries);
    }
    entries
}

fn visit<'a>(node: &'a ScriptNode, label: Option<&'a ScriptNode>, entries: &mut Vec<LineIndexEntry>) {
    let label = if node.is_label() { Some(node) } else { label };

    // Inverted ranges are left for the layout pass to reject.
    if node.start_line <= node.end_line {
        entries.push(LineIndexEntry {
            node_id: node.id.clone(),
            node_type: node.node_type,
            label_id: label.map(|l| l.id.clone()),
            label_name: label.map(|l| l.label_name.clone()),
            start_line: node.start_line,
            end_line: node.end_line,
        });
    }

    for child in node.child_nodes() {
        visit(child, label, entries);
    }
}

/// Line number -> owning entry. Narrower ranges win over the ranges that enclose them.
#[derive(Debug, Clone, Default)]
pub struct LineMap {
    entries: Vec<LineIndexEntry>,
    owners: BTreeMap<usize, usize>,
}

pub fn build_line_map(entries: Vec<LineIndexEntry>) -> LineMap {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    // sort_by_key is stable: equal spans keep traversal order
    order.sort_by_key(|&i| entries[i].span());

    let mut owners = BTreeMap::new();
    for i in order {
        let entry = &entries[i];
        for line in entry.start_line..=entry.end_line {
            owners.entry(line).or_insert(i);
        }
    }

    debug!(entries = entries.len(), lines = owners.len(), "Line map built");
    LineMap { entries, owners }
}

impl LineMap {
    pub fn from_tree(tree: &ScriptTree) -> Self {
        build_line_map(build_index(tree))
    }

    pub fn owner(&self, line: usize) -> Option<&LineIndexEntry> {
        self.owners.get(&line).map(|&i| &self.entries[i])
    }

    pub fn entry(&self, node_id: &str) -> Option<&LineIndexEntry> {
        self.entries.iter().find(|e| e.node_id == node_id)
    }

    pub fn entries(&self) -> &[LineIndexEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
