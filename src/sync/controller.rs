use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::graph::Graph;
use crate::graph::layout::{LabelFilter, LayoutEngine};
use crate::index::{search, LineMap, SearchHit};
use crate::script::ScriptTree;
use crate::sync::collab::{LockService, Renderer, ScriptParser, ScriptStore, Viewport};
use crate::text::excerpt::{self, WriteOutcome};
use crate::text::indent::{restore_indent, strip_indent, IndentInfo, IndentPolicy};
use crate::text::metadata::{self, NodeMetadata, SidecarStyle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Loading,
    Ready,
    Editing(String),
    Saving,
    Reloading,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => f.write_str("Idle"),
            SyncState::Loading => f.write_str("Loading"),
            SyncState::Ready => f.write_str("Ready"),
            SyncState::Editing(id) => write!(f, "Editing({})", id),
            SyncState::Saving => f.write_str("Saving"),
            SyncState::Reloading => f.write_str("Reloading"),
        }
    }
}

/// 单个节点的编辑会话
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditSession {
    pub session_id: Uuid,
    pub node_id: String,
    pub start_line: usize,
    pub end_line: usize,
    pub metadata: NodeMetadata,
    /// How the sidecar line sat in the source, if there was one.
    pub sidecar: Option<SidecarStyle>,
    pub indent: IndentInfo,
    /// Excerpt with the sidecar line removed and the base indent stripped.
    pub body: String,
    /// Set when the edit lock was denied or timed out.
    pub read_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SaveRequest {
    pub body: String,
    pub metadata: NodeMetadata,
    /// Save even if the excerpt's indentation was inconsistent.
    pub override_indent: bool,
    /// Node to center on after a reload.
    pub focus: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    pub write: WriteOutcome,
    pub reloaded: bool,
    pub focused: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureUpdate {
    Applied,
    /// An edit session is open; the reload runs when it closes.
    Deferred,
    /// Nothing loaded yet.
    Ignored,
}

enum Focus {
    Keep(Option<Viewport>),
    Node(String),
    Line(usize),
}

pub struct Collaborators {
    pub parser: Arc<dyn ScriptParser>,
    pub store: Arc<dyn ScriptStore>,
    pub locks: Arc<dyn LockService>,
    pub renderer: Arc<dyn Renderer>,
}

/// Keeps tree, line index, graph and source text in step for one script.
pub struct SyncController {
    script_id: String,
    config: EngineConfig,
    layout: LayoutEngine,

    parser: Arc<dyn ScriptParser>,
    store: Arc<dyn ScriptStore>,
    locks: Arc<dyn LockService>,
    renderer: Arc<dyn Renderer>,

    state: SyncState,
    filter: LabelFilter,
    tree: Option<ScriptTree>,
    line_count: usize,
    lines: Vec<String>,
    line_map: LineMap,
    graph: Graph,

    session: Option<EditSession>,
    pre_edit_viewport: Option<Viewport>,
    pending_reload: bool,
}

impl SyncController {
    pub fn new(script_id: &str, config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            script_id: script_id.to_string(),
            layout: LayoutEngine::new(config.layout.clone()),
            config,
            parser: collaborators.parser,
            store: collaborators.store,
            locks: collaborators.locks,
            renderer: collaborators.renderer,
            state: SyncState::Idle,
            filter: LabelFilter::All,
            tree: None,
            line_count: 0,
            lines: Vec::new(),
            line_map: LineMap::default(),
            graph: Graph::default(),
            session: None,
            pre_edit_viewport: None,
            pending_reload: false,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn tree(&self) -> Option<&ScriptTree> {
        self.tree.as_ref()
    }

    pub fn line_map(&self) -> &LineMap {
        &self.line_map
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn session(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    pub fn has_pending_reload(&self) -> bool {
        self.pending_reload
    }

    fn invalid_state(&self) -> SyncError {
        SyncError::InvalidState {
            state: self.state.to_string(),
        }
    }

    /// Reads, parses, indexes and lays out the script, then fits it on the canvas.
    pub async fn load(&mut self) -> Result<&Graph, SyncError> {
        let previous = match self.state {
            SyncState::Idle | SyncState::Ready => self.state.clone(),
            _ => return Err(self.invalid_state()),
        };

        info!(script_id = %self.script_id, "Loading script");
        self.state = SyncState::Loading;
        if let Err(e) = self.fetch_and_rebuild().await {
            error!(script_id = %self.script_id, error = %e, "Load failed");
            self.state = previous;
            return Err(e);
        }

        self.state = SyncState::Ready;
        self.renderer.fit_all();
        Ok(&self.graph)
    }

    async fn fetch_and_rebuild(&mut self) -> Result<(), SyncError> {
        let source = self.store.read_all(&self.script_id).await?;
        let parsed = self.parser.parse(&source).await?;
        self.rebuild(parsed.tree, parsed.line_count, excerpt::to_lines(&source))
    }

    /// Commits a new tree only if it lays out; otherwise the last good graph stays.
    fn rebuild(&mut self, tree: ScriptTree, line_count: usize, lines: Vec<String>) -> Result<(), SyncError> {
        let graph = self.layout.layout(&tree, &self.filter)?;
        let line_map = LineMap::from_tree(&tree);

        debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            indexed = line_map.entries().len(),
            "Graph rebuilt"
        );

        self.graph = graph;
        self.line_map = line_map;
        self.tree = Some(tree);
        self.line_count = line_count;
        self.lines = lines;
        self.renderer.render(&self.graph);
        Ok(())
    }

    /// Restricts the layout to one label (active tab) or shows all of them.
    pub fn set_label_filter(&mut self, filter: LabelFilter) -> Result<&Graph, SyncError> {
        if self.state != SyncState::Ready {
            return Err(self.invalid_state());
        }
        if let Some(tree) = &self.tree {
            let graph = self.layout.layout(tree, &filter)?;
            self.graph = graph;
            self.renderer.render(&self.graph);
            self.renderer.fit_all();
        }
        self.filter = filter;
        Ok(&self.graph)
    }

    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        search(&self.lines, &self.line_map, query)
    }

    /// Opens an edit session on `node_id`. A denied or timed out lock gives a
    /// read-only session instead of an error.
    pub async fn begin_edit(&mut self, node_id: &str) -> Result<&EditSession, SyncError> {
        if self.state != SyncState::Ready {
            return Err(self.invalid_state());
        }
        self.retry_pending_reload().await?;
        let entry = self.line_map.entry(node_id)
            .ok_or_else(|| SyncError::NodeNotFound(node_id.to_string()))?
            .clone();

        let locked = match timeout(self.config.lock_timeout(), self.locks.acquire(node_id)).await {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                warn!(node_id = %node_id, "Edit lock denied, opening read-only");
                false
            }
            Ok(Err(e)) => {
                warn!(node_id = %node_id, error = ?e, "Edit lock failed, opening read-only");
                false
            }
            Err(_) => {
                warn!(node_id = %node_id, "Edit lock timed out after {:?}, opening read-only", self.config.lock_timeout());
                false
            }
        };

        let raw = match self.store.read_range(&self.script_id, entry.start_line, entry.end_line).await {
            Ok(raw) => raw,
            Err(e) => {
                if locked {
                    self.release_lock(node_id).await;
                }
                return Err(e.into());
            }
        };

        let sidecar = metadata::sidecar_style(&raw);
        let (meta, body) = metadata::split(&raw);
        let stripped = strip_indent(&body);
        if let Some(problem) = &stripped.info.error {
            warn!(node_id = %node_id, problem = %problem, "Inconsistent indentation in excerpt");
        }

        if locked {
            if let Err(e) = self.locks.notify_editing_started(node_id).await {
                warn!(node_id = %node_id, error = ?e, "Failed to announce edit");
            }
        }

        self.pre_edit_viewport = Some(self.renderer.capture_viewport());
        self.state = SyncState::Editing(node_id.to_string());
        info!(node_id = %node_id, read_only = !locked, "Edit session started");

        Ok(&*self.session.insert(EditSession {
            session_id: Uuid::new_v4(),
            node_id: node_id.to_string(),
            start_line: entry.start_line,
            end_line: entry.end_line,
            metadata: meta,
            sidecar,
            indent: stripped.info,
            body: stripped.text,
            read_only: !locked,
        }))
    }

    /// Writes the edited node back. A changed line count triggers a full reload.
    pub async fn save_edit(&mut self, request: SaveRequest) -> Result<SaveOutcome, SyncError> {
        let session = match (&self.state, &self.session) {
            (SyncState::Editing(_), Some(session)) => session.clone(),
            _ => return Err(self.invalid_state()),
        };

        if session.read_only {
            return Err(SyncError::ReadOnly(session.node_id));
        }
        if let Some(problem) = &session.indent.error {
            if !self.config.indent_policy.permits(&session.indent, request.override_indent) {
                return Err(SyncError::IndentationBlocked(problem.clone()));
            }
            if self.config.indent_policy == IndentPolicy::Warn && !request.override_indent {
                warn!(node_id = %session.node_id, "Saving excerpt with inconsistent indentation");
            }
        }

        let body = if session.indent.stripped {
            restore_indent(&request.body, &session.indent.indent)
        } else {
            request.body.clone()
        };
        // 新加的 sidecar 行跟随正文缩进
        let style = session.sidecar.clone().unwrap_or_else(|| SidecarStyle {
            indent: session.indent.indent.clone(),
            crlf: body.split('\n').next().is_some_and(|l| l.ends_with('\r')),
        });
        let text = metadata::attach_styled(&body, &request.metadata, &style);

        self.state = SyncState::Saving;
        let write = match self.store
            .write_range(&self.script_id, session.start_line, session.end_line, &text)
            .await
        {
            Ok(write) => write,
            Err(e) => {
                error!(node_id = %session.node_id, error = ?e, "Save failed");
                self.state = SyncState::Editing(session.node_id);
                return Err(e.into());
            }
        };

        self.close_session(&session).await;
        let viewport = self.pre_edit_viewport.take();
        info!(node_id = %session.node_id, line_delta = write.line_delta, "Node saved");

        if write.line_delta != 0 || self.pending_reload {
            let focus = match request.focus {
                Some(id) => Focus::Node(id),
                None => Focus::Keep(viewport),
            };
            let focused = self.reload(focus).await?;
            return Ok(SaveOutcome { write, reloaded: true, focused });
        }

        // Same line count: ranges are still valid, only the cached text changes.
        if let Err(e) = excerpt::splice_range(&mut self.lines, session.start_line, session.end_line, &text) {
            warn!(error = %e, "Cached source out of step with store");
        }
        self.state = SyncState::Ready;

        let focused = request.focus.filter(|id| self.renderer.focus_node(id));
        Ok(SaveOutcome { write, reloaded: false, focused })
    }

    /// Leaves the edit session without writing.
    pub async fn cancel_edit(&mut self) -> Result<(), SyncError> {
        let session = match (&self.state, &self.session) {
            (SyncState::Editing(_), Some(session)) => session.clone(),
            _ => return Err(self.invalid_state()),
        };

        self.close_session(&session).await;
        self.state = SyncState::Ready;
        info!(node_id = %session.node_id, "Edit session cancelled");

        if self.pending_reload {
            let viewport = self.pre_edit_viewport.take();
            self.reload(Focus::Keep(viewport)).await?;
        }
        Ok(())
    }

    /// Inserts `text` right after `node_id`'s lines, reloads and focuses the new node.
    pub async fn insert_after(&mut self, node_id: &str, text: &str) -> Result<SaveOutcome, SyncError> {
        if self.state != SyncState::Ready {
            return Err(self.invalid_state());
        }
        self.retry_pending_reload().await?;
        let at = self.line_map.entry(node_id)
            .ok_or_else(|| SyncError::NodeNotFound(node_id.to_string()))?
            .end_line + 1;

        let write = self.store.insert_lines(&self.script_id, at, text).await?;
        info!(after = %node_id, at_line = at, lines = write.line_count, "Lines inserted");

        if write.line_count == 0 {
            return Ok(SaveOutcome { write, reloaded: false, focused: None });
        }
        let focused = self.reload(Focus::Line(at)).await?;
        Ok(SaveOutcome { write, reloaded: true, focused })
    }

    /// Inbound notification that someone else changed the script structure.
    pub async fn structure_changed(&mut self) -> Result<StructureUpdate, SyncError> {
        match self.state {
            SyncState::Idle => Ok(StructureUpdate::Ignored),
            SyncState::Ready => {
                let viewport = self.renderer.capture_viewport();
                self.reload(Focus::Keep(Some(viewport))).await?;
                Ok(StructureUpdate::Applied)
            }
            _ => {
                debug!(state = %self.state, "Deferring structure update");
                self.pending_reload = true;
                Ok(StructureUpdate::Deferred)
            }
        }
    }

    /// Line ranges are stale after a failed reload; they must be refreshed
    /// before anything is read or written by range.
    async fn retry_pending_reload(&mut self) -> Result<(), SyncError> {
        if !self.pending_reload {
            return Ok(());
        }
        info!(script_id = %self.script_id, "Retrying pending reload");
        let viewport = self.renderer.capture_viewport();
        self.reload(Focus::Keep(Some(viewport))).await?;
        Ok(())
    }

    async fn reload(&mut self, focus: Focus) -> Result<Option<String>, SyncError> {
        self.state = SyncState::Reloading;
        self.pending_reload = false;

        if let Err(e) = self.fetch_and_rebuild().await {
            error!(script_id = %self.script_id, error = %e, "Reload failed, keeping last graph");
            self.pending_reload = true;
            self.state = SyncState::Ready;
            return Err(e);
        }
        self.state = SyncState::Ready;

        let focused = match focus {
            Focus::Keep(viewport) => {
                if let Some(v) = viewport {
                    self.renderer.restore_viewport(v);
                }
                None
            }
            Focus::Node(id) if self.focus_node(&id) => Some(id),
            Focus::Node(id) => {
                warn!(node_id = %id, "Focus node missing after reload, fitting graph");
                self.renderer.fit_all();
                None
            }
            Focus::Line(line) => {
                let owner = self.line_map.owner(line).map(|e| e.node_id.clone());
                match owner {
                    Some(id) if self.focus_node(&id) => Some(id),
                    _ => {
                        warn!(line = line, "No node owns the inserted line, fitting graph");
                        self.renderer.fit_all();
                        None
                    }
                }
            }
        };
        Ok(focused)
    }

    fn focus_node(&self, node_id: &str) -> bool {
        self.graph.node(node_id).is_some() && self.renderer.focus_node(node_id)
    }

    async fn close_session(&mut self, session: &EditSession) {
        if !session.read_only {
            self.release_lock(&session.node_id).await;
        }
        self.session = None;
    }

    async fn release_lock(&self, node_id: &str) {
        if let Err(e) = self.locks.release(node_id).await {
            warn!(node_id = %node_id, error = ?e, "Failed to release edit lock");
        }
    }
}
