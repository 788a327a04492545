//! Protocol-neutral event handed to the session service

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::error::AgentResult;
use crate::tree::DataMap;
use crate::value::DataValue;

/// Event field carrying the charged duration
pub const USAGE: &str = "Usage";

static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Flattened `*cgreq` tree
#[derive(Debug, Clone, PartialEq)]
pub struct CgrEvent {
    pub tenant: String,
    pub id: String,
    pub time: DateTime<Utc>,
    pub event: BTreeMap<String, DataValue>,
}

impl CgrEvent {
    /// Flatten `tree`; nested names are joined with `.`, repeated items
    /// keep the last value
    pub fn from_data_map(tree: &DataMap, tenant: &str) -> AgentResult<Self> {
        let mut event = BTreeMap::new();
        for leaf in tree.leaves() {
            event.insert(leaf.path.join("."), leaf.item.value.clone());
        }
        let time = Utc::now();
        let seq = EVENT_SEQ.fetch_add(1, Ordering::Relaxed);
        Ok(Self {
            tenant: tenant.to_string(),
            id: format!("{:x}-{seq:x}", time.timestamp_micros()),
            time,
            event,
        })
    }

    pub fn get(&self, field: &str) -> Option<&DataValue> {
        self.event.get(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<DataValue>) {
        self.event.insert(field.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_tree() {
        let mut tree = DataMap::new();
        tree.set_field("OriginID", "sess1").unwrap();
        tree.set_field("Extra.Field", "x").unwrap();
        let a = CgrEvent::from_data_map(&tree, "cgrates.org").unwrap();
        let b = CgrEvent::from_data_map(&tree, "cgrates.org").unwrap();
        assert_eq!(a.get("OriginID"), Some(&DataValue::Str("sess1".into())));
        assert_eq!(a.get("Extra.Field"), Some(&DataValue::Str("x".into())));
        assert_eq!(a.tenant, "cgrates.org");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_set_overrides() {
        let mut ev = CgrEvent::from_data_map(&DataMap::new(), "t").unwrap();
        ev.set(USAGE, DataValue::Int(0));
        assert_eq!(ev.get(USAGE), Some(&DataValue::Int(0)));
    }
}
