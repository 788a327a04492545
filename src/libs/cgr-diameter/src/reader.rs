//! Path-addressable view of an inbound Diameter message
//!
//! Paths like `Multiple-Services-Credit-Control.Used-Service-Unit.CC-Time` or
//! `Subscription-Id.Subscription-Id-Data[~Subscription-Id-Type(0)]` are
//! resolved hop by hop against the message AVPs. Every hop gathers the
//! same-named AVPs across all groups reached so far; a selector on a hop
//! narrows the candidates to one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use cgr_agent::path::select_index;
use cgr_agent::{AgentError, AgentResult, DataProvider, DataValue, FullPath, PathItem, Selector};

use crate::avp::Avp;
use crate::datatype::{avp_value, expand_avps};
use crate::dict::{AvpDef, Dictionary};
use crate::error::DiameterResult;
use crate::message::DiameterMessage;

/// Read-only data provider over a decoded message
///
/// Values are cached per path for the lifetime of the provider, which is
/// the lifetime of one request.
#[derive(Debug)]
pub struct DiameterDataProvider {
    msg: DiameterMessage,
    dict: Arc<Dictionary>,
    remote: Option<SocketAddr>,
    cache: Mutex<HashMap<String, DataValue>>,
}

impl DiameterDataProvider {
    /// Wrap `msg`, typing its raw AVPs with `dict`
    pub fn new(mut msg: DiameterMessage, dict: Arc<Dictionary>, remote: Option<SocketAddr>) -> Self {
        expand_avps(&mut msg.avps, &dict, msg.header.application_id);
        Self {
            msg,
            dict,
            remote,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped message with dictionary types applied
    pub fn message(&self) -> &DiameterMessage {
        &self.msg
    }

    fn def(&self, hop: &PathItem) -> DiameterResult<&AvpDef> {
        self.dict.find_avp(self.msg.header.application_id, &hop.field)
    }

    fn resolve(&self, path: &[PathItem]) -> DiameterResult<DataValue> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| AgentError::InvalidPath(String::new()))?;

        // levels[d] holds the AVP lists reachable at depth d
        let mut levels: Vec<Vec<&[Avp]>> = vec![vec![self.msg.avps.as_slice()]];
        for hop in parents {
            let def = self.def(hop)?;
            let groups = levels.last().map(Vec::as_slice).unwrap_or_default();
            let mut found = matching(groups, def);
            if hop.selector.is_some() {
                let values = self.child_filter_values(&found, hop)?;
                let idx = select_index(found.len(), hop.selector.as_ref(), &values)?;
                found = vec![found[idx]];
            }
            levels.push(found.into_iter().filter_map(Avp::as_grouped).collect());
        }

        let def = self.def(last)?;
        let groups = levels.last().map(Vec::as_slice).unwrap_or_default();
        let candidates = matching(groups, def);
        let values = match &last.selector {
            Some(Selector::Filters(filters)) => filters
                .iter()
                .map(|flt| self.values_searching_up(&levels, &flt.field))
                .collect::<DiameterResult<Vec<_>>>()?,
            _ => Vec::new(),
        };
        let idx = select_index(candidates.len(), last.selector.as_ref(), &values)?;
        avp_value(candidates[idx], &def.name)
    }

    /// For an intermediate hop, the value of each filter field inside every
    /// candidate group
    fn child_filter_values(&self, candidates: &[&Avp], hop: &PathItem) -> DiameterResult<Vec<Vec<String>>> {
        let Some(Selector::Filters(filters)) = &hop.selector else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(filters.len());
        for flt in filters {
            let def = self.dict.find_avp(self.msg.header.application_id, &flt.field)?;
            out.push(
                candidates
                    .iter()
                    .map(|group| {
                        group
                            .as_grouped()
                            .and_then(|children| children.iter().find(|a| def.describes(a)))
                            .map(value_string)
                            .unwrap_or_default()
                    })
                    .collect(),
            );
        }
        Ok(out)
    }

    /// Values of `field` at the deepest level where it exists
    fn values_searching_up(&self, levels: &[Vec<&[Avp]>], field: &str) -> DiameterResult<Vec<String>> {
        let def = self.dict.find_avp(self.msg.header.application_id, field)?;
        for groups in levels.iter().rev() {
            let found = matching(groups, def);
            if !found.is_empty() {
                return Ok(found.into_iter().map(value_string).collect());
            }
        }
        Ok(Vec::new())
    }
}

impl DataProvider for DiameterDataProvider {
    fn field_as_value(&self, path: &FullPath) -> AgentResult<DataValue> {
        if let Some(v) = self.cache.lock().ok().and_then(|c| c.get(&path.path).cloned()) {
            return Ok(v);
        }
        let value = self.resolve(&path.items)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.path.clone(), value.clone());
        }
        Ok(value)
    }

    fn remote_host(&self) -> Option<SocketAddr> {
        self.remote
    }
}

fn matching<'a>(groups: &[&'a [Avp]], def: &AvpDef) -> Vec<&'a Avp> {
    groups
        .iter()
        .flat_map(|g| g.iter())
        .filter(|a| def.describes(a))
        .collect()
}

fn value_string(avp: &Avp) -> String {
    avp_value(avp, "")
        .map(|v| v.to_string())
        .unwrap_or_default()
}
