//! Field paths and repeated-sibling selectors
//!
//! A path such as `Multiple-Services-Credit-Control[1].Rating-Group` or
//! `Subscription-Id.Subscription-Id-Data[~Subscription-Id-Type(0)]` is
//! parsed once into [`PathItem`]s and reused on every lookup.

use std::fmt;

use crate::error::{AgentError, AgentResult};

/// Separator between path hops
pub const NESTING_SEP: char = '.';

/// `~Field(value)` condition inside a selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorFilter {
    pub field: String,
    pub value: String,
}

/// Disambiguation among repeated siblings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Index(usize),
    Filters(Vec<SelectorFilter>),
}

/// One hop of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathItem {
    pub field: String,
    pub selector: Option<Selector>,
}

impl PathItem {
    /// Hop without selector
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            selector: None,
        }
    }

    /// Parse `Name`, `Name[2]` or `Name[~A(x)|~B(y)]`
    pub fn parse(s: &str) -> AgentResult<Self> {
        let invalid = || AgentError::InvalidPath(s.to_string());
        let Some(open) = s.find('[') else {
            if s.is_empty() || s.contains(']') {
                return Err(invalid());
            }
            return Ok(Self::new(s));
        };
        if !s.ends_with(']') || open == 0 {
            return Err(invalid());
        }
        let field = &s[..open];
        let inner = &s[open + 1..s.len() - 1];
        if inner.is_empty() {
            return Err(invalid());
        }

        if inner.chars().all(|c| c.is_ascii_digit()) {
            let idx = inner.parse().map_err(|_| invalid())?;
            return Ok(Self {
                field: field.to_string(),
                selector: Some(Selector::Index(idx)),
            });
        }

        let mut filters = Vec::new();
        for part in split_outside(inner, '|') {
            let part = part.strip_prefix('~').ok_or_else(invalid)?;
            let open = part.find('(').ok_or_else(invalid)?;
            if !part.ends_with(')') || open == 0 {
                return Err(invalid());
            }
            filters.push(SelectorFilter {
                field: part[..open].to_string(),
                value: part[open + 1..part.len() - 1].to_string(),
            });
        }
        Ok(Self {
            field: field.to_string(),
            selector: Some(Selector::Filters(filters)),
        })
    }
}

impl fmt::Display for PathItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.field)?;
        match &self.selector {
            None => Ok(()),
            Some(Selector::Index(i)) => write!(f, "[{i}]"),
            Some(Selector::Filters(filters)) => {
                f.write_str("[")?;
                for (i, flt) in filters.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "~{}({})", flt.field, flt.value)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Parsed path plus its original text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullPath {
    pub items: Vec<PathItem>,
    pub path: String,
}

impl FullPath {
    /// Parse a dotted path; dots inside selectors do not split
    pub fn parse(path: &str) -> AgentResult<Self> {
        if path.is_empty() {
            return Err(AgentError::InvalidPath(path.to_string()));
        }
        let items = split_outside(path, NESTING_SEP)
            .into_iter()
            .map(PathItem::parse)
            .collect::<AgentResult<Vec<_>>>()?;
        Ok(Self {
            items,
            path: path.to_string(),
        })
    }

    /// Build from already split hops
    pub fn from_items(items: Vec<PathItem>) -> Self {
        let path = items
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(".");
        Self { items, path }
    }

    /// Path without its first hop
    pub fn tail(&self) -> FullPath {
        Self::from_items(self.items.iter().skip(1).cloned().collect())
    }

    /// First hop name, used to pick a data section
    pub fn prefix(&self) -> &str {
        self.items.first().map(|i| i.field.as_str()).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Display for FullPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Split on `sep` while ignoring separators nested in `[]` or `()`
pub fn split_outside(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Pick one of `candidates` repeated siblings
///
/// `filter_values[n]` holds, per candidate, the value of the field named by
/// the n-th selector filter. A filter whose value count differs from the
/// candidate count cannot be aligned and yields not-found. Indices passing
/// every filter are intersected and the lowest one wins. Without selector
/// the first candidate is returned.
pub fn select_index(
    candidates: usize,
    selector: Option<&Selector>,
    filter_values: &[Vec<String>],
) -> AgentResult<usize> {
    if candidates == 0 {
        return Err(AgentError::NotFound);
    }
    match selector {
        None => Ok(0),
        Some(Selector::Index(idx)) if *idx < candidates => Ok(*idx),
        Some(Selector::Index(_)) => Err(AgentError::NotFound),
        Some(Selector::Filters(filters)) => {
            if filters.len() != filter_values.len() {
                return Err(AgentError::NotFound);
            }
            let mut passing = vec![true; candidates];
            for (flt, values) in filters.iter().zip(filter_values) {
                if values.len() != candidates {
                    return Err(AgentError::NotFound);
                }
                for (pass, value) in passing.iter_mut().zip(values) {
                    *pass &= *value == flt.value;
                }
            }
            passing
                .iter()
                .position(|p| *p)
                .ok_or(AgentError::NotFound)
        }
    }
}
