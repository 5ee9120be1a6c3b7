use async_trait::async_trait;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use crate::graph::Graph;
use crate::script::ScriptTree;
use crate::text::WriteOutcome;

// --- Interfaces ---

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutput {
    pub tree: ScriptTree,
    pub line_count: usize,
}

/// 外部脚本解析器 (黑盒)
#[async_trait]
pub trait ScriptParser: Send + Sync {
    async fn parse(&self, source: &str) -> Result<ParseOutput>;
}

/// Persistence of script bytes, addressed by 0-based inclusive line ranges.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn read_all(&self, script_id: &str) -> Result<String>;
    async fn read_range(&self, script_id: &str, start_line: usize, end_line: usize) -> Result<String>;
    async fn write_range(&self, script_id: &str, start_line: usize, end_line: usize, text: &str) -> Result<WriteOutcome>;
    async fn insert_lines(&self, script_id: &str, at_line: usize, text: &str) -> Result<WriteOutcome>;
}

/// Collaborative edit locks. The controller bounds `acquire` with a timeout.
#[async_trait]
pub trait LockService: Send + Sync {
    async fn acquire(&self, node_id: &str) -> Result<bool>;
    async fn release(&self, node_id: &str) -> Result<()>;
    async fn notify_editing_started(&self, node_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

/// The canvas that draws the graph. Calls are fire-and-forget from the engine's side.
pub trait Renderer: Send + Sync {
    fn render(&self, graph: &Graph);
    /// Returns false when the node is not on the canvas.
    fn focus_node(&self, node_id: &str) -> bool;
    fn capture_viewport(&self) -> Viewport;
    fn restore_viewport(&self, viewport: Viewport);
    fn fit_all(&self);
}
