use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use crate::error::LayoutError;
use crate::graph::{Graph, GraphEdge, GraphNode, NodeData, Position};
use crate::script::{Body, ScriptNode, ScriptTree};

pub const TRUE_LABEL: &str = "True";
pub const FALSE_LABEL: &str = "False";

/// 布局间距配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub node_width: f64,
    pub node_height: f64,
    pub vertical_gap: f64,
    pub horizontal_gap: f64,
    /// Vertical separation between label blocks, in multiples of `vertical_gap`.
    pub label_gap_factor: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            node_width: 250.0,
            node_height: 50.0,
            vertical_gap: 80.0,
            horizontal_gap: 20.0,
            label_gap_factor: 3.0,
        }
    }
}

impl LayoutConfig {
    fn row_step(&self) -> f64 {
        self.node_height + self.vertical_gap
    }
}

/// Which labels take part in a layout pass (e.g. the active tab).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LabelFilter {
    #[default]
    All,
    Only(String),
}

impl LabelFilter {
    pub fn accepts(&self, label: &ScriptNode) -> bool {
        match self {
            LabelFilter::All => true,
            LabelFilter::Only(name) => label.label_name == *name || label.id == *name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn center(&self) -> f64 {
        (self.min_x + self.max_x) / 2.0
    }

    fn union(self, other: Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
        }
    }
}

/// Result of laying out one subtree. Returned by value and merged by the caller.
#[derive(Debug)]
struct SubLayout {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    next_y: f64,
    bounds: Option<Bounds>,
}

impl SubLayout {
    fn empty(y: f64) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            next_y: y,
            bounds: None,
        }
    }

    fn shift(&mut self, dx: f64) {
        for node in &mut self.nodes {
            node.position.x += dx;
        }
        if let Some(b) = &mut self.bounds {
            b.min_x += dx;
            b.max_x += dx;
        }
    }

    fn absorb(&mut self, other: SubLayout) {
        self.nodes.extend(other.nodes);
        self.edges.extend(other.edges);
        self.next_y = self.next_y.max(other.next_y);
        self.bounds = match (self.bounds, other.bounds) {
            (Some(a), Some(b)) => Some(a.union(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Per-label traversal state: owning label and the ids on the current path.
struct Walk<'a> {
    label_id: &'a str,
    path: HashSet<&'a str>,
}

/// One laid out label block, including its synthesized end node.
#[derive(Debug)]
pub struct LabelLayout {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub end_node_id: String,
    pub end_y: f64,
}

pub fn end_node_id(label_id: &str) -> String {
    format!("end-{}", label_id)
}

pub struct LayoutEngine {
    config: LayoutConfig,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Lays out every accepted label block, stacked vertically.
    pub fn layout(&self, tree: &ScriptTree, filter: &LabelFilter) -> Result<Graph, LayoutError> {
        let mut graph = Graph::default();
        let mut y = 0.0;

        for node in &tree.children {
            if !node.is_label() {
                debug!(node_id = %node.id, node_type = %node.node_type, "Skipping top-level non-label node");
                continue;
            }
            if !filter.accepts(node) {
                continue;
            }

            let part = self.layout_label(node, y)?;
            y = part.end_y
                + self.config.node_height
                + self.config.vertical_gap * self.config.label_gap_factor;
            graph.nodes.extend(part.nodes);
            graph.edges.extend(part.edges);
        }

        graph.dedup_edges();
        debug!(nodes = graph.nodes.len(), edges = graph.edges.len(), "Layout finished");
        Ok(graph)
    }

    /// Lays out a single label at vertical offset `y` and closes every open path
    /// with an edge into the label's end node.
    pub fn layout_label(&self, label: &ScriptNode, y: f64) -> Result<LabelLayout, LayoutError> {
        let end_id = end_node_id(&label.id);
        let mut walk = Walk {
            label_id: &label.id,
            path: HashSet::new(),
        };

        let sub = self.process(label, None, 0.0, y, Some(end_id.as_str()), &mut walk)?;
        let SubLayout { mut nodes, mut edges, next_y, bounds } = sub;

        let center = bounds.map(|b| b.center()).unwrap_or(self.config.node_width / 2.0);
        let end_node = GraphNode {
            id: end_id.clone(),
            position: Position {
                x: center - self.config.node_width / 2.0,
                y: next_y,
            },
            original: None,
        };

        // Nodes without an outgoing edge flow into the end block
        let sources: HashSet<&str> = edges.iter().map(|e| e.source.as_str()).collect();
        let dangling: Vec<GraphEdge> = nodes
            .iter()
            .filter(|n| n.id != label.id && !sources.contains(n.id.as_str()))
            .map(|n| GraphEdge::new(&n.id, &end_id, None))
            .collect();
        edges.extend(dangling);
        nodes.push(end_node);

        Ok(LabelLayout {
            nodes,
            edges,
            end_node_id: end_id,
            end_y: next_y,
        })
    }

    fn process<'a>(
        &self,
        node: &'a ScriptNode,
        parent: Option<&str>,
        x: f64,
        y: f64,
        fallthrough: Option<&str>,
        walk: &mut Walk<'a>,
    ) -> Result<SubLayout, LayoutError> {
        if node.start_line > node.end_line {
            return Err(LayoutError::InvertedRange {
                id: node.id.clone(),
                start: node.start_line,
                end: node.end_line,
            });
        }
        if !walk.path.insert(node.id.as_str()) {
            return Err(LayoutError::Cycle { id: node.id.clone() });
        }

        let mut out = SubLayout {
            nodes: vec![GraphNode {
                id: node.id.clone(),
                position: Position { x, y },
                original: Some(NodeData::of(node, walk.label_id)),
            }],
            edges: Vec::new(),
            next_y: y + self.config.row_step(),
            bounds: Some(Bounds {
                min_x: x,
                max_x: x + self.config.node_width,
            }),
        };

        if let Some(p) = parent {
            out.edges.push(GraphEdge::new(p, &node.id, None));
        }

        match &node.body {
            Body::Sequential(children) if !children.is_empty() => {
                let seq = self.sequence(children, Some(node.id.as_str()), x, out.next_y, fallthrough, walk)?;
                out.absorb(seq);
            }
            Body::Conditional { true_branch, false_branch } => {
                self.conditional(node, true_branch, false_branch, x, fallthrough, &mut out, walk)?;
            }
            Body::Choice(options) if !options.is_empty() => {
                self.choice(node, options, x, fallthrough, &mut out, walk)?;
            }
            _ => {
                if !node.is_terminal() {
                    if let Some(target) = fallthrough {
                        out.edges.push(GraphEdge::new(&node.id, target, None));
                    }
                }
            }
        }

        walk.path.remove(node.id.as_str());
        Ok(out)
    }

    /// Children stacked at the same x; each one falls through to its next sibling.
    fn sequence<'a>(
        &self,
        children: &'a [ScriptNode],
        parent: Option<&str>,
        x: f64,
        y: f64,
        fallthrough: Option<&str>,
        walk: &mut Walk<'a>,
    ) -> Result<SubLayout, LayoutError> {
        let mut out = SubLayout::empty(y);
        for (i, child) in children.iter().enumerate() {
            let next = children.get(i + 1).map(|c| c.id.as_str()).or(fallthrough);
            let child_parent = if i == 0 { parent } else { None };
            let sub = self.process(child, child_parent, x, out.next_y, next, walk)?;
            out.absorb(sub);
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn conditional<'a>(
        &self,
        node: &'a ScriptNode,
        true_branch: &'a [ScriptNode],
        false_branch: &'a [ScriptNode],
        x: f64,
        fallthrough: Option<&str>,
        out: &mut SubLayout,
        walk: &mut Walk<'a>,
    ) -> Result<(), LayoutError> {
        let branch_y = out.next_y;
        let mut t = self.sequence(true_branch, None, x, branch_y, fallthrough, walk)?;
        let mut f = self.sequence(false_branch, None, x, branch_y, fallthrough, walk)?;

        // false branch on the left, true branch on the right
        let center = x + self.config.node_width / 2.0;
        self.place(vec![&mut f, &mut t], center);

        let true_target = true_branch.first().map(|c| c.id.as_str()).or(fallthrough);
        if let Some(target) = true_target {
            out.edges.push(GraphEdge::new(&node.id, target, Some(TRUE_LABEL)));
        }
        let false_target = false_branch.first().map(|c| c.id.as_str()).or(fallthrough);
        if let Some(target) = false_target {
            out.edges.push(GraphEdge::new(&node.id, target, Some(FALSE_LABEL)));
        }

        out.absorb(t);
        out.absorb(f);
        Ok(())
    }

    fn choice<'a>(
        &self,
        node: &'a ScriptNode,
        options: &'a [ScriptNode],
        x: f64,
        fallthrough: Option<&str>,
        out: &mut SubLayout,
        walk: &mut Walk<'a>,
    ) -> Result<(), LayoutError> {
        let branch_y = out.next_y;
        let mut subs = Vec::with_capacity(options.len());
        for option in options {
            subs.push(self.process(option, None, x, branch_y, fallthrough, walk)?);
        }

        self.place(subs.iter_mut().collect(), x + self.config.node_width / 2.0);

        for (option, sub) in options.iter().zip(subs) {
            out.edges.push(GraphEdge::new(&node.id, &option.id, Some(option_caption(option))));
            out.absorb(sub);
        }
        Ok(())
    }

    /// Shifts the non-empty subtrees side by side, centered under `center`.
    fn place(&self, subs: Vec<&mut SubLayout>, center: f64) {
        let placed: Vec<(&mut SubLayout, Bounds)> = subs
            .into_iter()
            .filter_map(|s| {
                let b = s.bounds?;
                Some((s, b))
            })
            .collect();
        let widths: Vec<f64> = placed.iter().map(|(_, b)| b.width()).collect();
        let slots = branch_slots(center, &widths, self.config.horizontal_gap);
        for ((sub, b), left) in placed.into_iter().zip(slots) {
            sub.shift(left - b.min_x);
        }
    }
}

/// Left edges for subtrees of the given widths laid out left to right with
/// `gap` between them, the whole row centered on `center`.
pub fn branch_slots(center: f64, widths: &[f64], gap: f64) -> Vec<f64> {
    let total = widths.iter().sum::<f64>() + gap * widths.len().saturating_sub(1) as f64;
    let mut cursor = center - total / 2.0;
    widths
        .iter()
        .map(|w| {
            let left = cursor;
            cursor += w + gap;
            left
        })
        .collect()
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

/// `layout(tree, config)` over all labels.
pub fn layout(tree: &ScriptTree, config: &LayoutConfig) -> Result<Graph, LayoutError> {
    LayoutEngine::new(config.clone()).layout(tree, &LabelFilter::All)
}

/// Menu options keep their surrounding quotes in the source; edges show the bare text.
fn option_caption(option: &ScriptNode) -> &str {
    option.label_name.trim().trim_matches('"')
}
