//! `.env` file handling.
//!
//! Settings the command line does not receive are read from environment
//! variables, which can be kept in a `.env` file next to the device's
//! certificates. The file is a list of `KEY=value` lines; values may be
//! single- or double-quoted, and `#` starts a comment line.

use std::path::{Path, PathBuf};

pub const ENV_FILE_NAME: &str = ".env";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("missing -- in environment key {0:?}")]
    MissingDashes(String),

    #[error("no value given for key {0:?}")]
    MissingValue(String),

    #[error("empty key")]
    EmptyKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String },
    Other(String),
}

/// A `.env` file, kept line by line so that rewriting it preserves comments
/// and the order of untouched keys.
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
    lines: Vec<Line>,
}

impl EnvFile {
    /// Looks for `.env` in `start` and each of its ancestors.
    pub fn find(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(ENV_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Loads `path`. A missing file is treated as empty, so that `set` can
    /// create it.
    pub fn load(path: impl Into<PathBuf>) -> Result<EnvFile, Error> {
        let path = path.into();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(Error::Read { path, source }),
        };
        Ok(EnvFile {
            path,
            lines: contents.lines().map(parse_line).collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v)
            .last()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry { key, value } => Some((key.as_str(), value.as_str())),
            Line::Other(_) => None,
        })
    }

    /// Replaces every existing `key` entry, or appends one.
    pub fn set(&mut self, key: &str, value: &str) {
        let mut found = false;
        for line in &mut self.lines {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    found = true;
                }
            }
        }
        if !found {
            self.lines.push(Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
    }

    pub fn save(&self) -> Result<(), Error> {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry { key, value } => {
                    out.push_str(key);
                    out.push_str("='");
                    out.push_str(&value.replace('\'', "\\'"));
                    out.push('\'');
                }
                Line::Other(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        std::fs::write(&self.path, out).map_err(|source| Error::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Exports entries into the process environment. Variables that are
    /// already set keep their value.
    pub fn apply_to_process(&self) {
        for (key, value) in self.entries() {
            if std::env::var_os(key).is_none() {
                std::env::set_var(key, value);
            }
        }
    }
}

/// Loads the nearest `.env` above the current directory into the process
/// environment, returning its path if one was found.
pub fn load_dotenv() -> Result<Option<PathBuf>, Error> {
    let Ok(cwd) = std::env::current_dir() else {
        return Ok(None);
    };
    let Some(path) = EnvFile::find(&cwd) else {
        return Ok(None);
    };
    EnvFile::load(&path)?.apply_to_process();
    Ok(Some(path))
}

/// Parses `--KEY value` pairs.
pub fn parse_set_args(args: &[String]) -> Result<Vec<(String, String)>, Error> {
    args.chunks(2)
        .map(|pair| {
            let key = pair[0]
                .strip_prefix("--")
                .ok_or_else(|| Error::MissingDashes(pair[0].clone()))?;
            if key.is_empty() {
                return Err(Error::EmptyKey);
            }
            let value = pair
                .get(1)
                .ok_or_else(|| Error::MissingValue(key.to_string()))?;
            Ok((key.to_string(), value.clone()))
        })
        .collect()
}

fn parse_line(raw: &str) -> Line {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Line::Other(raw.to_string());
    }
    let body = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let Some((key, value)) = body.split_once('=') else {
        return Line::Other(raw.to_string());
    };
    let key = key.trim();
    if key.is_empty() {
        return Line::Other(raw.to_string());
    }
    Line::Entry {
        key: key.to_string(),
        value: unquote(value.trim()),
    }
}

fn unquote(value: &str) -> String {
    for quote in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            let inner = &value[1..value.len() - 1];
            return inner.replace(&format!("\\{quote}"), &quote.to_string());
        }
    }
    value.to_string()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
