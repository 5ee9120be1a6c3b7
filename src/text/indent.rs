use serde::{Deserialize, Serialize};

/// Common leading whitespace detected on a node excerpt. Lives for one edit session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndentInfo {
    pub indent: String,
    pub stripped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stripped {
    pub info: IndentInfo,
    pub text: String,
}

/// What a save does when the excerpt had inconsistent indentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndentPolicy {
    /// Refuse the save unless the caller explicitly overrides.
    #[default]
    Block,
    /// Log a warning and write anyway.
    Warn,
}

impl IndentPolicy {
    pub fn permits(&self, info: &IndentInfo, override_indent: bool) -> bool {
        info.error.is_none() || override_indent || *self == IndentPolicy::Warn
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn leading_whitespace(line: &str) -> &str {
    let end = line
        .find(|c: char| c != ' ' && c != '\t')
        .unwrap_or(line.len());
    &line[..end]
}

/// Removes the base indent (taken from the first non-blank line) from every
/// non-blank line. A shallower or differently composed indent on a later line
/// is reported through `IndentInfo::error` and the text comes back untouched.
pub fn strip_indent(excerpt: &str) -> Stripped {
    let lines: Vec<&str> = excerpt.split('\n').collect();

    let indent = match lines.iter().find(|l| !is_blank(l)) {
        Some(first) => leading_whitespace(first),
        None => "",
    };
    if indent.is_empty() {
        return Stripped {
            info: IndentInfo::default(),
            text: excerpt.to_string(),
        };
    }

    for (n, line) in lines.iter().enumerate().filter(|(_, l)| !is_blank(l)) {
        let error = if leading_whitespace(line).len() < indent.len() {
            Some(format!(
                "line {} is indented less than the block ({} < {} characters)",
                n + 1,
                leading_whitespace(line).len(),
                indent.len()
            ))
        } else if !line.starts_with(indent) {
            Some(format!("line {} mixes tabs and spaces differently from the block indent", n + 1))
        } else {
            None
        };

        if let Some(error) = error {
            return Stripped {
                info: IndentInfo {
                    indent: String::new(),
                    stripped: false,
                    error: Some(error),
                },
                text: excerpt.to_string(),
            };
        }
    }

    let text = lines
        .iter()
        .map(|l| if is_blank(l) { *l } else { &l[indent.len()..] })
        .collect::<Vec<_>>()
        .join("\n");

    Stripped {
        info: IndentInfo {
            indent: indent.to_string(),
            stripped: true,
            error: None,
        },
        text,
    }
}

/// Prepends `indent` to every non-blank line.
pub fn restore_indent(text: &str, indent: &str) -> String {
    if indent.is_empty() {
        return text.to_string();
    }
    text.split('\n')
        .map(|l| if is_blank(l) { l.to_string() } else { format!("{}{}", indent, l) })
        .collect::<Vec<_>>()
        .join("\n")
}
