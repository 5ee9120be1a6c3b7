use serde::{Deserialize, Serialize};
use crate::error::TextError;

/// Result of replacing or inserting a run of lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub start_line: usize,
    /// Number of lines that now occupy the written region.
    pub line_count: usize,
    pub line_delta: isize,
}

impl WriteOutcome {
    /// Last line of the written region, `None` when the region became empty.
    pub fn end_line(&self) -> Option<usize> {
        if self.line_count == 0 {
            None
        } else {
            Some(self.start_line + self.line_count - 1)
        }
    }
}

/// Splits on `\n` only, so a `\r` stays with its line, and reports whether
/// the text ended with a newline. Joining with `\n` (plus the final newline
/// when flagged) gives back the input byte for byte.
pub fn split_lines(content: &str) -> (Vec<String>, bool) {
    if content.is_empty() {
        return (Vec::new(), false);
    }
    let trailing_newline = content.ends_with('\n');
    let body = if trailing_newline {
        &content[..content.len() - 1]
    } else {
        content
    };
    (body.split('\n').map(String::from).collect(), trailing_newline)
}

pub fn join_lines(lines: &[String], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    out
}

/// Lines of `content` without the trailing-newline flag.
pub fn to_lines(content: &str) -> Vec<String> {
    split_lines(content).0
}

fn check_range(lines: &[String], start: usize, end: usize) -> Result<(), TextError> {
    if start > end || end >= lines.len() {
        return Err(TextError::InvalidRange {
            start,
            end,
            line_count: lines.len(),
        });
    }
    Ok(())
}

/// Lines `[start, end]` joined with `\n`.
pub fn extract_range(lines: &[String], start: usize, end: usize) -> Result<String, TextError> {
    check_range(lines, start, end)?;
    Ok(lines[start..=end].join("\n"))
}

/// Replaces lines `[start, end]` with the lines of `text`.
pub fn splice_range(lines: &mut Vec<String>, start: usize, end: usize, text: &str) -> Result<WriteOutcome, TextError> {
    check_range(lines, start, end)?;

    let replacement = to_lines(text);
    let old_count = end - start + 1;
    let new_count = replacement.len();
    lines.splice(start..=end, replacement);

    Ok(WriteOutcome {
        start_line: start,
        line_count: new_count,
        line_delta: new_count as isize - old_count as isize,
    })
}

/// Inserts the lines of `text` before line `at` (`at == len` appends).
pub fn insert_lines(lines: &mut Vec<String>, at: usize, text: &str) -> Result<WriteOutcome, TextError> {
    if at > lines.len() {
        return Err(TextError::InvalidInsertion {
            line: at,
            line_count: lines.len(),
        });
    }

    let inserted = to_lines(text);
    let count = inserted.len();
    lines.splice(at..at, inserted);

    Ok(WriteOutcome {
        start_line: at,
        line_count: count,
        line_delta: count as isize,
    })
}
