//! Writing template output into an outbound Diameter message
//!
//! A write resolves every hop in the dictionary, converts the text into the
//! terminal AVP's type and then either merges the new AVP into the deepest
//! group that already exists on its path or starts a fresh top-level branch.
//! The header length is kept in step with every mutation and checked after
//! each write.

use cgr_agent::{AgentError, DataMap, PathItem, Selector};

use crate::avp::{Avp, AvpData};
use crate::datatype::data_from_str;
use crate::dict::{AvpDef, AvpType, Dictionary};
use crate::error::{DiameterError, DiameterResult};
use crate::message::DiameterMessage;

/// Write `value` at `path` into `msg`
///
/// With `new_branch` false the AVP joins the last existing instance of its
/// deepest ancestor group, and a top-level scalar replaces the last AVP of
/// the same kind. With `new_branch` true the whole chain is appended as a
/// new top-level branch.
pub fn set_avp_with_path(
    msg: &mut DiameterMessage,
    dict: &Dictionary,
    path: &[PathItem],
    value: &str,
    new_branch: bool,
    timezone: &str,
) -> DiameterResult<()> {
    write_avp(msg, dict, path, value, new_branch.then_some(0), timezone)
}

/// Write `value` at `path`, starting new instances from hop `branch_at`
/// down and continuing the last existing instance above it
fn write_avp(
    msg: &mut DiameterMessage,
    dict: &Dictionary,
    path: &[PathItem],
    value: &str,
    branch_at: Option<usize>,
    timezone: &str,
) -> DiameterResult<()> {
    let app_id = msg.header.application_id;
    let defs = path
        .iter()
        .map(|hop| dict.find_avp(app_id, &hop.field))
        .collect::<DiameterResult<Vec<_>>>()?;
    let (terminal, parent_defs) = defs
        .split_last()
        .ok_or_else(|| AgentError::InvalidPath(String::new()))?;
    if let Some(scalar) = parent_defs.iter().find(|d| d.avp_type != AvpType::Grouped) {
        return Err(DiameterError::Encoding(format!(
            "<{}> is not grouped and cannot hold <{}>",
            scalar.name, terminal.name
        )));
    }

    let leaf = terminal.build(data_from_str(terminal, value, timezone)?);
    leaf.check_length()?;

    if parent_defs.is_empty() {
        replace_or_append(msg, terminal, leaf, branch_at.is_some());
        return msg.verify_length();
    }

    let mut chain = existing_chain(&msg.avps, &path[..parent_defs.len()], parent_defs);
    if let Some(hop) = branch_at {
        chain.truncate(hop);
    }
    let avp = parent_defs[chain.len()..]
        .iter()
        .rev()
        .fold(leaf, |child, def| def.build(AvpData::Grouped(vec![child])));
    let added = avp.encoded_len() as u32;

    let mut target = &mut msg.avps;
    for idx in &chain {
        target = target[*idx]
            .as_grouped_mut()
            .ok_or_else(|| DiameterError::InvalidAvp("group vanished while writing".into()))?;
    }
    target.push(avp);
    msg.header.length += added;

    msg.verify_length()
}

/// Write every leaf of `tree` into `msg`, in tree order
///
/// Where the tree starts a new sibling the message starts a new instance
/// at that same hop; the groups above it stay shared. Values appended to a
/// leaf become repeated AVPs inside the same parent group.
pub fn update_message_from_tree(
    msg: &mut DiameterMessage,
    dict: &Dictionary,
    tree: &DataMap,
    timezone: &str,
) -> DiameterResult<()> {
    for leaf in tree.leaves() {
        let path: Vec<PathItem> = leaf.path.iter().map(|hop| PathItem::new(*hop)).collect();
        write_avp(
            msg,
            dict,
            &path,
            &leaf.item.value.to_string(),
            leaf.branch_at,
            timezone,
        )?;
    }
    Ok(())
}

fn replace_or_append(msg: &mut DiameterMessage, def: &AvpDef, avp: Avp, new_branch: bool) {
    let existing = if new_branch {
        None
    } else {
        msg.avps.iter().rposition(|a| def.describes(a))
    };
    match existing {
        Some(idx) => {
            let old = std::mem::replace(&mut msg.avps[idx], avp);
            msg.header.length -= old.encoded_len() as u32;
            msg.header.length += msg.avps[idx].encoded_len() as u32;
        }
        None => msg.add_avp(avp),
    }
}

/// Indices of the existing groups along `hops`, continuing the last
/// instance at every level (or the one an index selector names)
fn existing_chain(avps: &[Avp], hops: &[PathItem], defs: &[&AvpDef]) -> Vec<usize> {
    let mut chain = Vec::new();
    let mut current = avps;
    for (hop, def) in hops.iter().zip(defs) {
        let instances: Vec<usize> = current
            .iter()
            .enumerate()
            .filter(|(_, a)| def.describes(a))
            .map(|(i, _)| i)
            .collect();
        let pick = match &hop.selector {
            Some(Selector::Index(n)) => instances.get(*n).copied(),
            _ => instances.last().copied(),
        };
        let Some(children) = pick.and_then(|idx| current[idx].as_grouped().map(|c| (idx, c))) else {
            break;
        };
        chain.push(children.0);
        current = children.1;
    }
    chain
}
