use thiserror::Error;

/// 树结构错误：在线格式 (wire format) 转换为类型化树时检测
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node {id}: invalid line range {start}..={end}")]
    InvalidRange { id: String, start: i64, end: i64 },

    #[error("node {id}: false_branch is only allowed on IfBlock, found on {node_type}")]
    UnexpectedFalseBranch { id: String, node_type: String },

    #[error("node {id}: End nodes cannot have children")]
    TerminalWithChildren { id: String },

    #[error("menu {menu_id}: child {child_id} is a {node_type}, expected MenuOption")]
    InvalidMenuChild { menu_id: String, child_id: String, node_type: String },
}

/// 布局错误：对当前布局过程是致命的，调用方保留上一版图
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("cycle detected: node {id} appears twice on the same path")]
    Cycle { id: String },

    #[error("node {id}: start_line {start} is after end_line {end}")]
    InvertedRange { id: String, start: usize, end: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextError {
    #[error("invalid line range {start}..={end} for a script of {line_count} lines")]
    InvalidRange { start: usize, end: usize, line_count: usize },

    #[error("invalid insertion line {line} for a script of {line_count} lines")]
    InvalidInsertion { line: usize, line_count: usize },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("operation not allowed in state {state}")]
    InvalidState { state: String },

    #[error("node not found in line index: {0}")]
    NodeNotFound(String),

    #[error("edit session for {0} is read-only")]
    ReadOnly(String),

    #[error("save blocked by inconsistent indentation: {0}")]
    IndentationBlocked(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}
