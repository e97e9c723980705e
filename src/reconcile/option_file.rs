/// MySQL option file (`my.cnf`) handler
///
/// Only the `[mysqld]` group is read and edited. Option names compare with
/// `-` and `_` as equivalent. Comments, blank lines and other groups are
/// written back untouched. Edits are buffered until `apply`.
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConfigError, GrupoError, GrupoResult};

const SERVER_GROUP: &str = "mysqld";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Group { name: String, raw: String },
    Option { key: String, value: Option<String>, raw: String },
    Other(String),
}

impl Line {
    fn raw(&self) -> &str {
        match self {
            Line::Group { raw, .. } | Line::Option { raw, .. } | Line::Other(raw) => raw,
        }
    }
}

/// Canonical spelling of an option name
pub fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('-', "_")
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    if v.len() >= 2 && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\''))) {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

fn strip_inline_comment(value: &str) -> &str {
    match value.find(" #").or_else(|| value.find("\t#")) {
        Some(pos) => &value[..pos],
        None => value,
    }
}

fn format_option(key: &str, value: Option<&str>) -> String {
    match value {
        Some(v) => format!("{} = {}", key, v),
        None => key.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct OptionFile {
    path: PathBuf,
    lines: Vec<Line>,
    dirty: bool,
}

impl OptionFile {
    /// Read and parse `path`; a missing file is treated as empty
    pub async fn load<P: AsRef<Path>>(path: P) -> GrupoResult<Self> {
        let path = path.as_ref().to_path_buf();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Option file {} does not exist yet", path.display());
                String::new()
            }
            Err(e) => return Err(GrupoError::Io(e)),
        };
        Self::parse(path, &content)
    }

    pub fn parse<P: Into<PathBuf>>(path: P, content: &str) -> GrupoResult<Self> {
        let path = path.into();
        let mut lines = Vec::new();
        let mut in_group = false;

        for (number, raw) in content.lines().enumerate() {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') || trimmed.starts_with('!') {
                lines.push(Line::Other(raw.to_string()));
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix('[') {
                let name = rest.split(']').next().unwrap_or_default().trim().to_ascii_lowercase();
                in_group = true;
                lines.push(Line::Group {
                    name,
                    raw: raw.to_string(),
                });
                continue;
            }
            if !in_group {
                return Err(GrupoError::Config(ConfigError::ParseError(format!(
                    "{}:{}: option '{}' without preceding group",
                    path.display(),
                    number + 1,
                    trimmed
                ))));
            }
            let (key, value) = match trimmed.split_once('=') {
                Some((key, value)) => (
                    normalize_key(key),
                    Some(unquote(strip_inline_comment(value)).to_string()),
                ),
                None => (normalize_key(strip_inline_comment(trimmed)), None),
            };
            lines.push(Line::Option {
                key,
                value,
                raw: raw.to_string(),
            });
        }

        Ok(Self {
            path,
            lines,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index range of the lines belonging to every `[mysqld]` group
    fn server_group_lines(&self) -> Vec<usize> {
        let mut current: Option<&str> = None;
        let mut indexes = Vec::new();
        for (i, line) in self.lines.iter().enumerate() {
            match line {
                Line::Group { name, .. } => current = Some(name),
                _ if current == Some(SERVER_GROUP) => indexes.push(i),
                _ => {}
            }
        }
        indexes
    }

    /// `None` when absent, `Some(None)` for a flag without value
    pub fn get(&self, key: &str) -> Option<Option<String>> {
        let key = normalize_key(key);
        self.server_group_lines()
            .into_iter()
            .rev()
            .find_map(|i| match &self.lines[i] {
                Line::Option { key: k, value, .. } if *k == key => Some(value.clone()),
                _ => None,
            })
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set `key` in `[mysqld]`, replacing every existing occurrence
    pub fn set(&mut self, key: &str, value: Option<&str>) {
        let normalized = normalize_key(key);
        let indexes = self.server_group_lines();
        let existing: Vec<usize> = indexes
            .iter()
            .copied()
            .filter(|i| matches!(&self.lines[*i], Line::Option { key: k, .. } if *k == normalized))
            .collect();

        let line = Line::Option {
            key: normalized,
            value: value.map(str::to_string),
            raw: format_option(key, value),
        };
        match existing.split_first() {
            Some((first, rest)) => {
                self.lines[*first] = line;
                for i in rest.iter().rev() {
                    self.lines.remove(*i);
                }
            }
            None => {
                let group_start = self.lines.iter().position(
                    |l| matches!(l, Line::Group { name, .. } if name == SERVER_GROUP),
                );
                match group_start {
                    Some(start) => {
                        // after the last option of the first [mysqld] group
                        let mut at = start + 1;
                        for i in start + 1..self.lines.len() {
                            match &self.lines[i] {
                                Line::Group { .. } => break,
                                Line::Option { .. } => at = i + 1,
                                Line::Other(_) => {}
                            }
                        }
                        self.lines.insert(at, line);
                    }
                    None => {
                        if self.lines.last().map_or(false, |l| !l.raw().trim().is_empty()) {
                            self.lines.push(Line::Other(String::new()));
                        }
                        self.lines.push(Line::Group {
                            name: SERVER_GROUP.to_string(),
                            raw: format!("[{}]", SERVER_GROUP),
                        });
                        self.lines.push(line);
                    }
                }
            }
        }
        self.dirty = true;
    }

    /// Remove every occurrence of `key` from `[mysqld]`
    pub fn remove(&mut self, key: &str) -> bool {
        let key = normalize_key(key);
        let indexes: Vec<usize> = self
            .server_group_lines()
            .into_iter()
            .filter(|i| matches!(&self.lines[*i], Line::Option { key: k, .. } if *k == key))
            .collect();
        for i in indexes.iter().rev() {
            self.lines.remove(*i);
        }
        if !indexes.is_empty() {
            self.dirty = true;
        }
        !indexes.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line.raw());
            out.push('\n');
        }
        out
    }

    /// Write the buffered edits back to the file
    pub async fn apply(&mut self) -> GrupoResult<()> {
        if !self.dirty {
            return Ok(());
        }
        debug!("Writing option file {}", self.path.display());
        tokio::fs::write(&self.path, self.render()).await?;
        self.dirty = false;
        Ok(())
    }
}
