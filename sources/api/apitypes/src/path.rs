//! Paths address nodes of the configuration tree.  A path with no elements addresses the root.

use serde::{Deserialize, Serialize};
use snafu::{ensure, Snafu};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const PATH_SEPARATOR: char = '/';

/// One step of a path: a node name, plus the keys selecting an entry if the node is a keyed list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathElem {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, String>,
}

impl PathElem {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            keys: BTreeMap::new(),
        }
    }

    pub fn with_keys<S: Into<String>>(name: S, keys: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            keys,
        }
    }

    pub fn is_keyed(&self) -> bool {
        !self.keys.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default)]
    pub elem: Vec<PathElem>,
}

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(elem: Vec<PathElem>) -> Self {
        Self { origin: None, elem }
    }

    pub fn is_root(&self) -> bool {
        self.elem.is_empty()
    }

    /// Appends the elements of `path` to those of `prefix`.  A missing prefix is the same as an
    /// empty one.  No validation happens here; a bad combination fails later, during navigation.
    pub fn full_path(prefix: Option<&Path>, path: &Path) -> Path {
        let mut elem = prefix.map(|p| p.elem.clone()).unwrap_or_default();
        elem.extend(path.elem.iter().cloned());
        Path {
            origin: path.origin.clone(),
            elem,
        }
    }

    /// Returns a copy of this path with one more element on the end.
    pub fn child(&self, elem: PathElem) -> Path {
        let mut child = self.clone();
        child.elem.push(elem);
        child
    }

    /// Splits off the final element, giving the path of its parent.  Returns None for the root.
    pub fn split_last(&self) -> Option<(&[PathElem], &PathElem)> {
        self.elem.split_last().map(|(last, parent)| (parent, last))
    }

    /// Parses elements from the xpath-style string form, e.g. `/a/list[k1=v1][k2=v2]/c`.
    /// Inside brackets, `/` isn't a separator, and a backslash escapes the following character so
    /// that key values may contain `]`.
    fn parse_elements(path: &str) -> Result<Vec<PathElem>> {
        let trimmed = path.trim();
        let body = trimmed.strip_prefix(PATH_SEPARATOR).unwrap_or(trimmed);
        if body.is_empty() {
            return Ok(Vec::new());
        }

        let mut elems = Vec::new();
        let mut chars = body.chars().peekable();

        loop {
            // Element name: everything up to a separator or an opening bracket.
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c == PATH_SEPARATOR || c == '[' {
                    break;
                }
                ensure!(
                    c != ']' && c != '=',
                    InvalidPathSnafu {
                        path,
                        msg: format!("unexpected '{}' in element name", c),
                    }
                );
                name.push(c);
                chars.next();
            }
            ensure!(
                valid_identifier(&name),
                InvalidPathSnafu {
                    path,
                    msg: format!("invalid element name '{}'", name),
                }
            );

            let mut keys = BTreeMap::new();
            while chars.peek() == Some(&'[') {
                chars.next();
                let (key, value) = parse_key_value(path, &mut chars)?;
                ensure!(
                    !keys.contains_key(&key),
                    InvalidPathSnafu {
                        path,
                        msg: format!("duplicate key '{}' in element '{}'", key, name),
                    }
                );
                keys.insert(key, value);
            }

            elems.push(PathElem { name, keys });

            match chars.next() {
                None => break,
                Some(PATH_SEPARATOR) => {
                    ensure!(
                        chars.peek().is_some(),
                        InvalidPathSnafu {
                            path,
                            msg: "ends with separator",
                        }
                    );
                }
                Some(c) => {
                    return InvalidPathSnafu {
                        path,
                        msg: format!("unexpected '{}' after key list", c),
                    }
                    .fail()
                }
            }
        }

        Ok(elems)
    }
}

/// Reads `key=value]`, the opening bracket having been consumed already.
fn parse_key_value<I>(path: &str, chars: &mut std::iter::Peekable<I>) -> Result<(String, String)>
where
    I: Iterator<Item = char>,
{
    let mut key = String::new();
    loop {
        match chars.next() {
            Some('=') => break,
            Some(']') | None => {
                return InvalidPathSnafu {
                    path,
                    msg: "key without value",
                }
                .fail()
            }
            Some(c) => key.push(c),
        }
    }
    let key = key.trim().to_string();
    ensure!(
        valid_identifier(&key),
        InvalidPathSnafu {
            path,
            msg: format!("invalid key name '{}'", key),
        }
    );

    let mut value = String::new();
    loop {
        match chars.next() {
            Some('\\') => match chars.next() {
                Some(escaped) => value.push(escaped),
                None => {
                    return InvalidPathSnafu {
                        path,
                        msg: "unterminated escape",
                    }
                    .fail()
                }
            },
            Some(']') => break,
            Some(c) => value.push(c),
            None => {
                return InvalidPathSnafu {
                    path,
                    msg: "unbalanced brackets",
                }
                .fail()
            }
        }
    }
    ensure!(
        !value.is_empty(),
        InvalidPathSnafu {
            path,
            msg: format!("empty value for key '{}'", key),
        }
    );

    Ok((key, value))
}

/// YANG identifiers, optionally module-qualified: `[A-Za-z_][A-Za-z0-9_.-]*`
fn valid_identifier(s: &str) -> bool {
    let unqualified = match s.split_once(':') {
        Some((module, name)) => {
            if !valid_identifier(module) {
                return false;
            }
            name
        }
        None => s,
    };
    let mut chars = unqualified.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Path::new(Self::parse_elements(s)?))
    }
}

impl fmt::Display for PathElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in &self.keys {
            let escaped = v.replace('\\', "\\\\").replace(']', "\\]");
            write!(f, "[{}={}]", k, escaped)?;
        }
        Ok(())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elem.is_empty() {
            return write!(f, "{}", PATH_SEPARATOR);
        }
        for elem in &self.elem {
            write!(f, "{}{}", PATH_SEPARATOR, elem)?;
        }
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Path '{}' has invalid format: {}", path, msg))]
    InvalidPath { path: String, msg: String },
}

type Result<T> = std::result::Result<T, Error>;
