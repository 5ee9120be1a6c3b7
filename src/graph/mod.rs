pub mod layout;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use crate::script::{NodeType, ScriptNode};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Read-only snapshot of the script node a graph node was laid out from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub node_type: NodeType,
    pub label_name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub label_id: String,
}

impl NodeData {
    pub fn of(node: &ScriptNode, label_id: &str) -> Self {
        Self {
            node_type: node.node_type,
            label_name: node.label_name.clone(),
            start_line: node.start_line,
            end_line: node.end_line,
            label_id: label_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub position: Position,
    /// `None` for synthesized end blocks.
    pub original: Option<NodeData>,
}

impl GraphNode {
    pub fn is_end_block(&self) -> bool {
        self.original.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl GraphEdge {
    /// Ids depend only on endpoints and label, so rebuilds keep them stable.
    pub fn new(source: &str, target: &str, label: Option<&str>) -> Self {
        let id = match label {
            Some(l) => format!("e-{}-{}-{}", source, target, l),
            None => format!("e-{}-{}", source, target),
        };
        Self {
            id,
            source: source.to_string(),
            target: target.to_string(),
            label: label.map(str::to_string),
        }
    }
}

/// 渲染器消费的图
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edges_from<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == source)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&GraphEdge> {
        self.edges.iter().find(|e| e.source == source && e.target == target)
    }

    /// Drops repeated edge ids, keeping the first occurrence in order.
    pub fn dedup_edges(&mut self) {
        let mut seen = HashSet::new();
        self.edges.retain(|e| seen.insert(e.id.clone()));
    }
}
