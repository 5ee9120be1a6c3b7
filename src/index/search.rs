use serde::Serialize;
use crate::index::line_index::{LineIndexEntry, LineMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub line: usize,
    pub text: String,
    pub entry: LineIndexEntry,
}

/// Case-insensitive substring search over raw source lines.
/// Lines that no indexed node owns are skipped.
pub fn search<S: AsRef<str>>(lines: &[S], map: &LineMap, query: &str) -> Vec<SearchHit> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    let needle = query.to_lowercase();

    lines
        .iter()
        .map(|l| l.as_ref())
        .enumerate()
        .filter(|(_, line)| line.to_lowercase().contains(&needle))
        .filter_map(|(n, line)| {
            map.owner(n).map(|entry| SearchHit {
                line: n,
                text: line.to_string(),
                entry: entry.clone(),
            })
        })
        .collect()
}
