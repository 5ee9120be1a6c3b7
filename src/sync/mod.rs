pub mod collab;
pub mod controller;
pub mod memory;

pub use collab::{LockService, ParseOutput, Renderer, ScriptParser, ScriptStore, Viewport};
pub use controller::{Collaborators, EditSession, SaveOutcome, SaveRequest, StructureUpdate, SyncController, SyncState};
