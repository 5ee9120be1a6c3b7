pub mod builder;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::TreeError;

/// 解析器产生的节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    LabelBlock,
    Action,
    IfBlock,
    ElseBlock,
    MenuBlock,
    MenuOption,
    End,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::LabelBlock => "LabelBlock",
            NodeType::Action => "Action",
            NodeType::IfBlock => "IfBlock",
            NodeType::ElseBlock => "ElseBlock",
            NodeType::MenuBlock => "MenuBlock",
            NodeType::MenuOption => "MenuOption",
            NodeType::End => "End",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Child structure of a node. `false_branch` only exists on `Conditional`.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Sequential(Vec<ScriptNode>),
    Conditional {
        true_branch: Vec<ScriptNode>,
        false_branch: Vec<ScriptNode>,
    },
    Choice(Vec<ScriptNode>),
    Leaf,
}

/// 脚本树节点 (由外部解析器产生，布局过程只读)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawScriptNode", into = "RawScriptNode")]
pub struct ScriptNode {
    pub id: String,
    pub node_type: NodeType,
    /// Label name on `LabelBlock`, display caption everywhere else.
    pub label_name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub body: Body,
}

impl ScriptNode {
    pub fn is_label(&self) -> bool {
        self.node_type == NodeType::LabelBlock
    }

    /// `End` nodes never fall through to the next statement.
    pub fn is_terminal(&self) -> bool {
        self.node_type == NodeType::End
    }

    pub fn line_span(&self) -> usize {
        self.end_line.saturating_sub(self.start_line)
    }

    /// All direct descendants, true branch before false branch.
    pub fn child_nodes(&self) -> impl Iterator<Item = &ScriptNode> {
        let empty: &[ScriptNode] = &[];
        let (first, second) = match &self.body {
            Body::Sequential(children) | Body::Choice(children) => (children.as_slice(), empty),
            Body::Conditional { true_branch, false_branch } => {
                (true_branch.as_slice(), false_branch.as_slice())
            }
            Body::Leaf => (empty, empty),
        };
        first.iter().chain(second.iter())
    }

    pub fn find(&self, id: &str) -> Option<&ScriptNode> {
        if self.id == id {
            return Some(self);
        }
        self.child_nodes().find_map(|c| c.find(id))
    }
}

/// 解析结果的根：解析器输出一个合成的 "root" 节点，这里只保留它的 children
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScriptTree {
    #[serde(default)]
    pub children: Vec<ScriptNode>,
}

impl ScriptTree {
    pub fn new(children: Vec<ScriptNode>) -> Self {
        Self { children }
    }

    pub fn labels(&self) -> impl Iterator<Item = &ScriptNode> {
        self.children.iter().filter(|n| n.is_label())
    }

    pub fn label(&self, name: &str) -> Option<&ScriptNode> {
        self.labels().find(|n| n.label_name == name)
    }

    pub fn find(&self, id: &str) -> Option<&ScriptNode> {
        self.children.iter().find_map(|n| n.find(id))
    }
}

// --- Wire format ---

/// JSON shape emitted by the parser service:
/// `{id, node_type, label_name, start_line, end_line, children, false_branch?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawScriptNode {
    pub id: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub label_name: String,
    pub start_line: i64,
    pub end_line: i64,
    #[serde(default)]
    pub children: Vec<RawScriptNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_branch: Option<Vec<RawScriptNode>>,
}

impl TryFrom<RawScriptNode> for ScriptNode {
    type Error = TreeError;

    fn try_from(raw: RawScriptNode) -> Result<Self, Self::Error> {
        // the parser emits end_line = -1 for empty preambles
        if raw.start_line < 0 || raw.start_line > raw.end_line {
            return Err(TreeError::InvalidRange {
                id: raw.id,
                start: raw.start_line,
                end: raw.end_line,
            });
        }

        if raw.false_branch.is_some() && raw.node_type != NodeType::IfBlock {
            return Err(TreeError::UnexpectedFalseBranch {
                id: raw.id,
                node_type: raw.node_type.to_string(),
            });
        }

        let children = convert_all(raw.children)?;

        let body = match raw.node_type {
            NodeType::IfBlock => Body::Conditional {
                true_branch: children,
                false_branch: convert_all(raw.false_branch.unwrap_or_default())?,
            },
            NodeType::MenuBlock => {
                if let Some(bad) = children.iter().find(|c| c.node_type != NodeType::MenuOption) {
                    return Err(TreeError::InvalidMenuChild {
                        menu_id: raw.id,
                        child_id: bad.id.clone(),
                        node_type: bad.node_type.to_string(),
                    });
                }
                Body::Choice(children)
            }
            NodeType::End => {
                if !children.is_empty() {
                    return Err(TreeError::TerminalWithChildren { id: raw.id });
                }
                Body::Leaf
            }
            NodeType::Action if children.is_empty() => Body::Leaf,
            NodeType::LabelBlock | NodeType::ElseBlock | NodeType::MenuOption | NodeType::Action => {
                Body::Sequential(children)
            }
        };

        Ok(ScriptNode {
            id: raw.id,
            node_type: raw.node_type,
            label_name: raw.label_name,
            start_line: raw.start_line as usize,
            end_line: raw.end_line as usize,
            body,
        })
    }
}

fn convert_all(raw: Vec<RawScriptNode>) -> Result<Vec<ScriptNode>, TreeError> {
    raw.into_iter().map(ScriptNode::try_from).collect()
}

impl From<ScriptNode> for RawScriptNode {
    fn from(node: ScriptNode) -> Self {
        let (children, false_branch) = match node.body {
            Body::Sequential(children) | Body::Choice(children) => (children, None),
            Body::Conditional { true_branch, false_branch } => (true_branch, Some(false_branch)),
            Body::Leaf => (Vec::new(), None),
        };

        RawScriptNode {
            id: node.id,
            node_type: node.node_type,
            label_name: node.label_name,
            start_line: node.start_line as i64,
            end_line: node.end_line as i64,
            children: children.into_iter().map(RawScriptNode::from).collect(),
            false_branch: false_branch.map(|b| b.into_iter().map(RawScriptNode::from).collect()),
        }
    }
}
