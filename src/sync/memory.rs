use async_trait::async_trait;
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;
use crate::graph::Graph;
use crate::sync::collab::{LockService, ParseOutput, Renderer, ScriptParser, ScriptStore, Viewport};
use crate::text::excerpt::{self, WriteOutcome};

// --- In-Memory Implementations ---

/// Returns the same pre-parsed tree for every call.
pub struct StaticTreeParser {
    output: ParseOutput,
}

impl StaticTreeParser {
    pub fn new(output: ParseOutput) -> Self {
        Self { output }
    }
}

#[async_trait]
impl ScriptParser for StaticTreeParser {
    async fn parse(&self, _source: &str) -> Result<ParseOutput> {
        Ok(self.output.clone())
    }
}

struct ScriptText {
    lines: Vec<String>,
    trailing_newline: bool,
}

pub struct InMemoryScriptStore {
    // Map<ScriptID, ScriptText>
    scripts: DashMap<String, ScriptText>,
}

impl InMemoryScriptStore {
    pub fn new() -> Self {
        Self {
            scripts: DashMap::new(),
        }
    }

    pub fn insert_script(&self, script_id: &str, content: &str) {
        let (lines, trailing_newline) = excerpt::split_lines(content);
        self.scripts.insert(script_id.to_string(), ScriptText { lines, trailing_newline });
    }

    pub fn content(&self, script_id: &str) -> Option<String> {
        self.scripts.get(script_id)
            .map(|script| excerpt::join_lines(&script.lines, script.trailing_newline))
    }
}

impl Default for InMemoryScriptStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptStore for InMemoryScriptStore {
    async fn read_all(&self, script_id: &str) -> Result<String> {
        self.content(script_id)
            .ok_or_else(|| anyhow!("Script not found: {}", script_id))
    }

    async fn read_range(&self, script_id: &str, start_line: usize, end_line: usize) -> Result<String> {
        let script = self.scripts.get(script_id)
            .ok_or_else(|| anyhow!("Script not found: {}", script_id))?;
        Ok(excerpt::extract_range(&script.lines, start_line, end_line)?)
    }

    async fn write_range(&self, script_id: &str, start_line: usize, end_line: usize, text: &str) -> Result<WriteOutcome> {
        let mut script = self.scripts.get_mut(script_id)
            .ok_or_else(|| anyhow!("Script not found: {}", script_id))?;
        Ok(excerpt::splice_range(&mut script.lines, start_line, end_line, text)?)
    }

    async fn insert_lines(&self, script_id: &str, at_line: usize, text: &str) -> Result<WriteOutcome> {
        let mut script = self.scripts.get_mut(script_id)
            .ok_or_else(|| anyhow!("Script not found: {}", script_id))?;
        Ok(excerpt::insert_lines(&mut script.lines, at_line, text)?)
    }
}

#[derive(Debug, Clone)]
struct LockEntry {
    owner: Uuid,
    expires_at: Instant,
}

/// Node locks shared between participants. Each handle acts for one owner;
/// `participant()` hands out another owner over the same lock table.
pub struct InMemoryLockService {
    owner: Uuid,
    ttl: Duration,
    // Map<NodeID, LockEntry>
    locks: Arc<DashMap<String, LockEntry>>,
    // Map<NodeID, Owner>
    editing: Arc<DashMap<String, Uuid>>,
}

impl InMemoryLockService {
    /// Locks expire after five minutes unless re-acquired.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

    pub fn new(ttl: Duration) -> Self {
        Self {
            owner: Uuid::new_v4(),
            ttl,
            locks: Arc::new(DashMap::new()),
            editing: Arc::new(DashMap::new()),
        }
    }

    pub fn participant(&self) -> Self {
        Self {
            owner: Uuid::new_v4(),
            ttl: self.ttl,
            locks: self.locks.clone(),
            editing: self.editing.clone(),
        }
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn holder(&self, node_id: &str) -> Option<Uuid> {
        let now = Instant::now();
        self.locks.get(node_id)
            .filter(|l| l.expires_at > now)
            .map(|l| l.owner)
    }

    pub fn is_editing(&self, node_id: &str) -> bool {
        self.editing.contains_key(node_id)
    }

    /// Drops every lock this participant holds (e.g. on disconnect).
    pub fn release_all(&self) {
        self.locks.retain(|_, l| l.owner != self.owner);
        self.editing.retain(|_, owner| *owner != self.owner);
    }
}

impl Default for InMemoryLockService {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(&self, node_id: &str) -> Result<bool> {
        let now = Instant::now();
        let fresh = LockEntry {
            owner: self.owner,
            expires_at: now + self.ttl,
        };

        match self.locks.entry(node_id.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().owner != self.owner && held.get().expires_at > now {
                    return Ok(false);
                }
                // expired, or ours: take over and extend
                held.insert(fresh);
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
            }
        }
        Ok(true)
    }

    async fn release(&self, node_id: &str) -> Result<()> {
        self.locks.remove_if(node_id, |_, l| l.owner == self.owner);
        self.editing.remove_if(node_id, |_, owner| *owner == self.owner);
        Ok(())
    }

    async fn notify_editing_started(&self, node_id: &str) -> Result<()> {
        info!(node_id = %node_id, owner = %self.owner, "Editing started");
        self.editing.insert(node_id.to_string(), self.owner);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RendererState {
    pub graph: Option<Graph>,
    pub viewport: Viewport,
    pub focused: Option<String>,
    pub render_count: usize,
    pub fit_count: usize,
}

/// Renderer without a canvas: remembers what it was asked to show.
#[derive(Default)]
pub struct HeadlessRenderer {
    state: Mutex<RendererState>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RendererState {
        self.state().clone()
    }

    /// Simulates the user panning/zooming the canvas.
    pub fn set_viewport(&self, viewport: Viewport) {
        self.state().viewport = viewport;
    }

    fn state(&self) -> MutexGuard<'_, RendererState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Renderer for HeadlessRenderer {
    fn render(&self, graph: &Graph) {
        let mut state = self.state();
        state.graph = Some(graph.clone());
        state.render_count += 1;
    }

    fn focus_node(&self, node_id: &str) -> bool {
        let mut state = self.state();
        let position = state.graph.as_ref()
            .and_then(|g| g.node(node_id))
            .map(|n| n.position);

        match position {
            Some(p) => {
                let zoom = state.viewport.zoom;
                state.viewport = Viewport { x: p.x, y: p.y, zoom };
                state.focused = Some(node_id.to_string());
                true
            }
            None => false,
        }
    }

    fn capture_viewport(&self) -> Viewport {
        self.state().viewport
    }

    fn restore_viewport(&self, viewport: Viewport) {
        self.state().viewport = viewport;
    }

    fn fit_all(&self) {
        let mut state = self.state();
        state.viewport = Viewport::default();
        state.fit_count += 1;
    }
}
