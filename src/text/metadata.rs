use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Prefix of the sidecar comment line, e.g.
/// `# @node name="Intro scene" status=Done author=alice`
pub const SENTINEL: &str = "# @node";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "Done")]
    Done,
    #[serde(rename = "In progress")]
    InProgress,
    #[serde(rename = "To Do")]
    ToDo,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Done => "Done",
            Status::InProgress => "In progress",
            Status::ToDo => "To Do",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Done" => Some(Status::Done),
            "In progress" => Some(Status::InProgress),
            "To Do" => Some(Status::ToDo),
            _ => None,
        }
    }
}

/// 节点元数据；没有 sidecar 行时所有字段均为 None
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accent_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_color: Option<String>,
    /// Keys whose value was read in quotes; `format` keeps quoting them.
    /// Not part of equality.
    #[serde(skip)]
    pub quoted: BTreeSet<String>,
}

impl PartialEq for NodeMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.fields() == other.fields()
    }
}

impl Eq for NodeMetadata {}

impl NodeMetadata {
    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, v)| v.is_none())
    }

    /// Fields in their serialized order.
    fn fields(&self) -> [(&'static str, Option<&str>); 6] {
        [
            ("name", self.name.as_deref()),
            ("status", self.status.as_ref().map(Status::as_str)),
            ("author", self.author.as_deref()),
            ("accent_color", self.accent_color.as_deref()),
            ("tag", self.tag.as_deref()),
            ("tag_color", self.tag_color.as_deref()),
        ]
    }

    /// Anything unrecognised or empty leaves the field as it was.
    fn set(&mut self, key: &str, value: String, quoted: bool) {
        if value.is_empty() {
            return;
        }
        match key {
            "name" => self.name = Some(value),
            "status" => match Status::parse(&value) {
                Some(status) => self.status = Some(status),
                None => return,
            },
            "author" => self.author = Some(value),
            "accent_color" => self.accent_color = Some(value),
            "tag" => self.tag = Some(value),
            "tag_color" => self.tag_color = Some(value),
            _ => return,
        }
        if quoted {
            self.quoted.insert(key.to_string());
        } else {
            self.quoted.remove(key);
        }
    }
}

/// Returns `None` when `line` is not a sidecar comment.
pub fn parse(line: &str) -> Option<NodeMetadata> {
    let rest = line.trim().strip_prefix(SENTINEL)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let mut meta = NodeMetadata::default();
    for token in tokenize(rest) {
        meta.set(&token.key, token.value, token.quoted);
    }
    Some(meta)
}

struct Token {
    key: String,
    value: String,
    quoted: bool,
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        // bare word without a value
        if chars.next_if_eq(&'=').is_none() {
            continue;
        }

        let mut value = String::new();
        let quoted = chars.next_if_eq(&'"').is_some();
        if quoted {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
            }
        }
        out.push(Token { key, value, quoted });
    }

    out
}

fn encode(value: &str, quoted: bool) -> String {
    let needs_quotes = quoted
        || value.is_empty()
        || value.chars().any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '='));
    if needs_quotes {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Sidecar line with the set fields only, or `None` if nothing is set.
pub fn format(meta: &NodeMetadata) -> Option<String> {
    if meta.is_empty() {
        return None;
    }
    let mut line = String::from(SENTINEL);
    for (key, value) in meta.fields() {
        if let Some(v) = value {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(&encode(v, meta.quoted.contains(key)));
        }
    }
    Some(line)
}

/// Separates the sidecar line (and a blank line right after it) from the body.
pub fn split(excerpt: &str) -> (NodeMetadata, String) {
    let (first, rest) = match excerpt.split_once('\n') {
        Some((first, rest)) => (first, Some(rest)),
        None => (excerpt, None),
    };

    let Some(meta) = parse(first) else {
        return (NodeMetadata::default(), excerpt.to_string());
    };

    let body = match rest {
        Some(rest) => match rest.split_once('\n') {
            Some((next, tail)) if next.trim().is_empty() => tail.to_string(),
            None if rest.trim().is_empty() => String::new(),
            _ => rest.to_string(),
        },
        None => String::new(),
    };
    (meta, body)
}

/// Leading whitespace and `\r` of a sidecar line as it sits in the source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SidecarStyle {
    pub indent: String,
    pub crlf: bool,
}

impl SidecarStyle {
    pub fn of(line: &str) -> Self {
        let indent_len = line.len() - line.trim_start_matches([' ', '\t']).len();
        Self {
            indent: line[..indent_len].to_string(),
            crlf: line.ends_with('\r'),
        }
    }
}

/// Style of the excerpt's sidecar line, `None` when it has none.
pub fn sidecar_style(excerpt: &str) -> Option<SidecarStyle> {
    let first = excerpt.split('\n').next()?;
    parse(first).map(|_| SidecarStyle::of(first))
}

/// Puts the sidecar line (if any field is set) back in front of `body`.
pub fn attach(body: &str, meta: &NodeMetadata) -> String {
    attach_styled(body, meta, &SidecarStyle::default())
}

/// Same as [`attach`], writing the sidecar line with `style`.
pub fn attach_styled(body: &str, meta: &NodeMetadata, style: &SidecarStyle) -> String {
    let Some(formatted) = format(meta) else {
        return body.to_string();
    };
    let mut line = format!("{}{}", style.indent, formatted);
    if style.crlf {
        line.push('\r');
    }
    if body.is_empty() {
        line
    } else {
        format!("{}\n{}", line, body)
    }
}
