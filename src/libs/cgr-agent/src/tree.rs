//! Ordered, path-addressable data tree
//!
//! Every name maps to an ordered list of sibling nodes so repeated groups
//! (several `Subscription-Id` entries, several credit-control blocks) live
//! side by side. Key insertion order is preserved and drives export order.
//!
//! Hops without selector continue the last sibling on write and read the
//! first sibling, matching how the Diameter reader resolves unqualified
//! repeated groups.

use std::net::SocketAddr;

use hashlink::LinkedHashMap;

use crate::error::{AgentError, AgentResult};
use crate::path::{select_index, FullPath, PathItem, Selector};
use crate::value::DataValue;

/// Read-only, path-addressable view over a data source
pub trait DataProvider {
    /// Resolve `path` to a scalar
    fn field_as_value(&self, path: &FullPath) -> AgentResult<DataValue>;

    /// Resolve `path` and render it as text
    fn field_as_string(&self, path: &FullPath) -> AgentResult<String> {
        self.field_as_value(path).map(|v| v.to_string())
    }

    /// Address of the peer the data came from, if any
    fn remote_host(&self) -> Option<SocketAddr> {
        None
    }
}

impl<T: DataProvider + ?Sized> DataProvider for std::sync::Arc<T> {
    fn field_as_value(&self, path: &FullPath) -> AgentResult<DataValue> {
        (**self).field_as_value(path)
    }

    fn remote_host(&self) -> Option<SocketAddr> {
        (**self).remote_host()
    }
}

/// A value written into the tree together with its branching intent
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    pub value: DataValue,
    pub new_branch: bool,
}

impl DataItem {
    pub fn new(value: impl Into<DataValue>) -> Self {
        Self {
            value: value.into(),
            new_branch: false,
        }
    }

    pub fn with_new_branch(mut self, new_branch: bool) -> Self {
        self.new_branch = new_branch;
        self
    }
}

/// Tree node
#[derive(Debug, Clone, PartialEq)]
pub enum DataNode {
    /// Scalar slot; reads return the last item
    Leaf(Vec<DataItem>),
    /// Nested map
    Map(DataMap),
}

impl DataNode {
    fn leaf_value(&self) -> AgentResult<&DataValue> {
        match self {
            DataNode::Leaf(items) => items.last().map(|i| &i.value).ok_or(AgentError::NotFound),
            DataNode::Map(_) => Err(AgentError::NotFound),
        }
    }
}

/// Exported leaf: hop names from the root and the stored item
#[derive(Debug, Clone, PartialEq)]
pub struct LeafEntry<'a> {
    pub path: Vec<&'a str>,
    pub item: &'a DataItem,
    /// Position of `item` inside its leaf; non-zero for appended values
    pub pos: usize,
    /// Hop at which this leaf starts a new sibling: a non-first sibling
    /// node, an appended value, or an item written with `new_branch`
    pub branch_at: Option<usize>,
}

/// Ordered map of names to sibling nodes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataMap {
    entries: LinkedHashMap<String, Vec<DataNode>>,
}

impl DataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every field
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Top level names in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Sibling nodes stored under a top level name
    pub fn siblings(&self, name: &str) -> &[DataNode] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Write `item` at `path`
    ///
    /// With `new_branch` false the leaf at `path` is replaced. With
    /// `new_branch` true a new sibling is started at the leaf's parent
    /// hop, or next to the leaf itself for single-hop paths.
    pub fn set(&mut self, path: &[PathItem], item: DataItem) -> AgentResult<()> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| AgentError::InvalidPath(String::new()))?;
        let new_branch = item.new_branch;
        let branch_at = if new_branch { parents.len().checked_sub(1) } else { None };
        let map = self.walk_mut(parents, branch_at)?;

        let siblings = map
            .entries
            .entry(last.field.clone())
            .or_insert_with(Vec::new);
        if siblings.is_empty() || (new_branch && parents.is_empty()) {
            siblings.push(DataNode::Leaf(vec![item]));
            return Ok(());
        }
        let idx = write_index(siblings, last)?;
        siblings[idx] = DataNode::Leaf(vec![item]);
        Ok(())
    }

    /// Add `item` to the leaf at `path`, keeping the previous items
    pub fn append(&mut self, path: &[PathItem], item: DataItem) -> AgentResult<()> {
        match self.leaf_mut(path) {
            Some(items) => {
                items.push(item);
                Ok(())
            }
            None => self.set(path, item),
        }
    }

    /// Concatenate `value` to the text already stored at `path`
    pub fn compose(&mut self, path: &[PathItem], item: DataItem) -> AgentResult<()> {
        if let Some(last) = self.leaf_mut(path).and_then(|items| items.last_mut()) {
            last.value = DataValue::Str(format!("{}{}", last.value, item.value));
            return Ok(());
        }
        self.set(path, item)
    }

    /// Delete the node at `path`; a selector removes only that sibling
    pub fn remove(&mut self, path: &[PathItem]) -> AgentResult<()> {
        let Some((last, parents)) = path.split_last() else {
            return Err(AgentError::InvalidPath(String::new()));
        };
        let Some(map) = self.find_mut(parents) else {
            return Ok(());
        };
        match &last.selector {
            None => {
                map.entries.remove(&last.field);
            }
            Some(_) => {
                let Some(siblings) = map.entries.get_mut(&last.field) else {
                    return Ok(());
                };
                if let Ok(idx) = read_index(siblings, last) {
                    siblings.remove(idx);
                }
                if siblings.is_empty() {
                    map.entries.remove(&last.field);
                }
            }
        }
        Ok(())
    }

    /// Resolve `path` to its node
    pub fn field(&self, path: &[PathItem]) -> AgentResult<&DataNode> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| AgentError::InvalidPath(String::new()))?;
        let mut current = self;
        for hop in parents {
            let siblings = current.entries.get(&hop.field).ok_or(AgentError::NotFound)?;
            current = match &siblings[read_index(siblings, hop)?] {
                DataNode::Map(m) => m,
                DataNode::Leaf(_) => return Err(AgentError::NotFound),
            };
        }
        let siblings = current.entries.get(&last.field).ok_or(AgentError::NotFound)?;
        Ok(&siblings[read_index(siblings, last)?])
    }

    /// Resolve `path` to a scalar value
    ///
    /// A filter selector on the final hop selects among all leaves reachable
    /// at the full path, aligning them with the filter field found at the
    /// same or a shallower depth.
    pub fn value_at(&self, path: &[PathItem]) -> AgentResult<DataValue> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| AgentError::InvalidPath(String::new()))?;
        if let Some(Selector::Filters(filters)) = &last.selector {
            let candidates = self.collect(parents, &last.field);
            let values: Vec<Vec<String>> = filters
                .iter()
                .map(|flt| self.values_searching_up(parents, &flt.field))
                .collect();
            let idx = select_index(candidates.len(), last.selector.as_ref(), &values)?;
            return candidates[idx].leaf_value().cloned();
        }
        self.field(path)?.leaf_value().cloned()
    }

    /// Every leaf in insertion order
    pub fn leaves(&self) -> Vec<LeafEntry<'_>> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), None, &mut out);
        out
    }

    /// `opens` is the branch hop carried to the first leaf of this map
    fn collect_leaves<'a>(
        &'a self,
        prefix: &mut Vec<&'a str>,
        mut opens: Option<usize>,
        out: &mut Vec<LeafEntry<'a>>,
    ) {
        for (name, siblings) in self.entries.iter() {
            let depth = prefix.len();
            prefix.push(name.as_str());
            for (idx, node) in siblings.iter().enumerate() {
                let node_opens = opens.take().or((idx > 0).then_some(depth));
                match node {
                    DataNode::Leaf(items) => {
                        for (pos, item) in items.iter().enumerate() {
                            let opened = if pos == 0 { node_opens } else { Some(depth) };
                            let branch_at =
                                opened.or_else(|| item.new_branch.then(|| depth.saturating_sub(1)));
                            out.push(LeafEntry {
                                path: prefix.clone(),
                                item,
                                pos,
                                branch_at,
                            });
                        }
                    }
                    DataNode::Map(m) => m.collect_leaves(prefix, node_opens, out),
                }
            }
            prefix.pop();
        }
    }

    /// Walk `parents` for writing, creating maps as needed and starting a
    /// fresh sibling at index `branch_at`
    fn walk_mut(&mut self, parents: &[PathItem], branch_at: Option<usize>) -> AgentResult<&mut DataMap> {
        let mut current = self;
        for (depth, hop) in parents.iter().enumerate() {
            let siblings = current
                .entries
                .entry(hop.field.clone())
                .or_insert_with(Vec::new);
            if siblings.is_empty() || branch_at == Some(depth) {
                siblings.push(DataNode::Map(DataMap::new()));
            }
            let idx = if branch_at == Some(depth) {
                siblings.len() - 1
            } else {
                write_index(siblings, hop)?
            };
            current = match &mut siblings[idx] {
                DataNode::Map(m) => m,
                DataNode::Leaf(_) => return Err(AgentError::InvalidPath(hop.field.clone())),
            };
        }
        Ok(current)
    }

    /// Walk existing `parents` without creating anything
    fn find_mut(&mut self, parents: &[PathItem]) -> Option<&mut DataMap> {
        let mut current = self;
        for hop in parents {
            let siblings = current.entries.get_mut(&hop.field)?;
            let idx = write_index(siblings, hop).ok()?;
            current = match &mut siblings[idx] {
                DataNode::Map(m) => m,
                DataNode::Leaf(_) => return None,
            };
        }
        Some(current)
    }

    fn leaf_mut(&mut self, path: &[PathItem]) -> Option<&mut Vec<DataItem>> {
        let (last, parents) = path.split_last()?;
        let map = self.find_mut(parents)?;
        let siblings = map.entries.get_mut(&last.field)?;
        let idx = write_index(siblings, last).ok()?;
        match &mut siblings[idx] {
            DataNode::Leaf(items) => Some(items),
            DataNode::Map(_) => None,
        }
    }

    /// Nodes named `field` under every map reachable through `parents`
    fn collect(&self, parents: &[PathItem], field: &str) -> Vec<&DataNode> {
        let mut maps: Vec<&DataMap> = vec![self];
        for hop in parents {
            let mut next = Vec::new();
            for map in maps {
                let Some(siblings) = map.entries.get(&hop.field) else {
                    continue;
                };
                let chosen: Vec<&DataNode> = match &hop.selector {
                    None => siblings.iter().collect(),
                    Some(_) => read_index(siblings, hop)
                        .map(|i| vec![&siblings[i]])
                        .unwrap_or_default(),
                };
                next.extend(chosen.into_iter().filter_map(|n| match n {
                    DataNode::Map(m) => Some(m),
                    DataNode::Leaf(_) => None,
                }));
            }
            maps = next;
        }
        maps.into_iter()
            .filter_map(|m| m.entries.get(field))
            .flatten()
            .collect()
    }

    /// Values of `field` at the deepest level of `parents` where it exists
    fn values_searching_up(&self, parents: &[PathItem], field: &str) -> Vec<String> {
        for depth in (0..=parents.len()).rev() {
            let found = self.collect(&parents[..depth], field);
            if !found.is_empty() {
                return found
                    .into_iter()
                    .map(|n| n.leaf_value().map(|v| v.to_string()).unwrap_or_default())
                    .collect();
            }
        }
        Vec::new()
    }

    /// Convenience setter parsing `path`
    pub fn set_field(&mut self, path: &str, value: impl Into<DataValue>) -> AgentResult<()> {
        let path = FullPath::parse(path)?;
        self.set(&path.items, DataItem::new(value))
    }
}

impl DataProvider for DataMap {
    fn field_as_value(&self, path: &FullPath) -> AgentResult<DataValue> {
        self.value_at(&path.items)
    }
}

/// Per-sibling value of each selector filter's field, for non-final hops
fn child_filter_values(siblings: &[DataNode], hop: &PathItem) -> Vec<Vec<String>> {
    let Some(Selector::Filters(filters)) = &hop.selector else {
        return Vec::new();
    };
    filters
        .iter()
        .map(|flt| {
            siblings
                .iter()
                .map(|node| match node {
                    DataNode::Map(m) => m
                        .siblings(&flt.field)
                        .first()
                        .and_then(|n| n.leaf_value().ok())
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                    DataNode::Leaf(_) => String::new(),
                })
                .collect()
        })
        .collect()
}

fn read_index(siblings: &[DataNode], hop: &PathItem) -> AgentResult<usize> {
    select_index(siblings.len(), hop.selector.as_ref(), &child_filter_values(siblings, hop))
}

fn write_index(siblings: &[DataNode], hop: &PathItem) -> AgentResult<usize> {
    match &hop.selector {
        None if !siblings.is_empty() => Ok(siblings.len() - 1),
        _ => read_index(siblings, hop),
    }
}
