use crate::script::{Body, NodeType, ScriptNode, ScriptTree};

/// 构建脚本树的辅助函数，主要用于测试和 fixtures
pub fn label(id: &str, name: &str, lines: (usize, usize), children: Vec<ScriptNode>) -> ScriptNode {
    node(id, NodeType::LabelBlock, name, lines, Body::Sequential(children))
}

pub fn action(id: &str, caption: &str, lines: (usize, usize)) -> ScriptNode {
    node(id, NodeType::Action, caption, lines, Body::Leaf)
}

pub fn end(id: &str, caption: &str, lines: (usize, usize)) -> ScriptNode {
    node(id, NodeType::End, caption, lines, Body::Leaf)
}

pub fn if_block(
    id: &str,
    caption: &str,
    lines: (usize, usize),
    true_branch: Vec<ScriptNode>,
    false_branch: Vec<ScriptNode>,
) -> ScriptNode {
    node(id, NodeType::IfBlock, caption, lines, Body::Conditional { true_branch, false_branch })
}

pub fn else_block(id: &str, lines: (usize, usize), children: Vec<ScriptNode>) -> ScriptNode {
    node(id, NodeType::ElseBlock, "else", lines, Body::Sequential(children))
}

pub fn menu(id: &str, lines: (usize, usize), options: Vec<ScriptNode>) -> ScriptNode {
    node(id, NodeType::MenuBlock, "menu", lines, Body::Choice(options))
}

pub fn option(id: &str, text: &str, lines: (usize, usize), children: Vec<ScriptNode>) -> ScriptNode {
    node(id, NodeType::MenuOption, text, lines, Body::Sequential(children))
}

pub fn tree(children: Vec<ScriptNode>) -> ScriptTree {
    ScriptTree::new(children)
}

fn node(id: &str, node_type: NodeType, caption: &str, (start_line, end_line): (usize, usize), body: Body) -> ScriptNode {
    ScriptNode {
        id: id.to_string(),
        node_type,
        label_name: caption.to_string(),
        start_line,
        end_line,
        body,
    }
}
