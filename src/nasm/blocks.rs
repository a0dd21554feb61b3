/// Inline assembly block extraction
///
/// Source files may embed assembly between `--nasm-start` and `--nasm-end`
/// marker lines. The start marker optionally carries metadata tokens, either
/// `key=value` pairs or standalone flags:
///
/// ```text
/// --nasm-start name=init bits=64
///     mov rax, 1
/// --nasm-end
/// ```
///
/// Extraction dedents the block body and reports 1-based line spans for the
/// content between the markers.
use crate::types::{Result, RuntimeError};
use std::collections::HashMap;

/// One metadata token from a start marker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetaValue {
    /// Standalone token, e.g. `--nasm-start verbose`.
    Flag,
    /// `key=value` token; the value is the text after the first `=`.
    Value(String),
}

/// An extracted assembly block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NasmBlock {
    /// Dedented block body with trailing newlines stripped.
    pub content: String,
    /// 1-based line number of the first content line (the line after the
    /// start marker). For an empty block this exceeds `end_line`.
    pub start_line: usize,
    /// 1-based line number of the last content line (the line before the
    /// end marker).
    pub end_line: usize,
    /// Metadata parsed from the start marker.
    pub meta: HashMap<String, MetaValue>,
}

impl NasmBlock {
    /// The value of a `key=value` metadata token, if present.
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        match self.meta.get(key) {
            Some(MetaValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// True when `key` appeared as a standalone flag.
    pub fn has_flag(&self, key: &str) -> bool {
        matches!(self.meta.get(key), Some(MetaValue::Flag))
    }
}

/// Extract every marked assembly block from `code`.
///
/// A start marker inside an open block is an error, as is a start marker
/// with no matching end before the end of input. A stray end marker outside
/// any block is ignored.
pub fn extract_blocks(code: &str) -> Result<Vec<NasmBlock>> {
    let normalized = code.replace("\r\n", "\n").replace('\r', "\n");
    let mut blocks = Vec::new();
    let mut inside = false;
    let mut current_lines: Vec<&str> = Vec::new();
    let mut current_meta = HashMap::new();
    let mut content_start_line = 0;

    for (idx, line) in normalized.split('\n').enumerate() {
        let lineno = idx + 1;
        if let Some(meta_str) = match_marker(line, "nasm-start") {
            if inside {
                return Err(RuntimeError::InvalidArgument(format!(
                    "nested --nasm-start at line {}",
                    lineno
                )));
            }
            inside = true;
            current_lines.clear();
            current_meta = parse_meta(meta_str);
            content_start_line = lineno + 1;
            continue;
        }

        if match_marker(line, "nasm-end").is_some() {
            if !inside {
                continue;
            }
            inside = false;
            blocks.push(NasmBlock {
                content: dedent(&current_lines),
                start_line: content_start_line,
                end_line: lineno - 1,
                meta: std::mem::take(&mut current_meta),
            });
            current_lines.clear();
            continue;
        }

        if inside {
            current_lines.push(line);
        }
    }

    if inside {
        return Err(RuntimeError::InvalidArgument(
            "unclosed --nasm-start: missing --nasm-end before end of input".to_string(),
        ));
    }
    Ok(blocks)
}

/// Find `--<name>` anywhere in `line`, allowing whitespace after the dashes
/// and an optional `:` or whitespace before the metadata. Returns the
/// trimmed remainder of the line when the marker matches.
fn match_marker<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    for (i, _) in line.match_indices("--") {
        let after = line[i + 2..].trim_start();
        let Some(rest) = after.strip_prefix(name) else {
            continue;
        };
        if let Some(meta) = rest.strip_prefix(':') {
            return Some(meta.trim());
        }
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Some(rest.trim());
        }
    }
    None
}

fn parse_meta(meta_str: &str) -> HashMap<String, MetaValue> {
    let mut meta = HashMap::new();
    for token in meta_str.split_whitespace() {
        match token.split_once('=') {
            Some((k, v)) => {
                meta.insert(k.trim().to_string(), MetaValue::Value(v.trim().to_string()));
            }
            None => {
                meta.insert(token.to_string(), MetaValue::Flag);
            }
        }
    }
    meta
}

/// Strip the common leading whitespace of the non-blank lines, then join
/// with trailing newlines removed.
fn dedent(lines: &[&str]) -> String {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out = lines
        .iter()
        .map(|l| l.get(indent..).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");
    while out.ends_with('\n') {
        out.pop();
    }
    out
}
