pub mod config;
pub mod error;
pub mod graph;
pub mod index;
pub mod script;
pub mod sync;
pub mod text;
