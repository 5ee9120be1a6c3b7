pub mod line_index;
pub mod search;

pub use line_index::{build_index, build_line_map, LineIndexEntry, LineMap};
pub use search::{search, SearchHit};
