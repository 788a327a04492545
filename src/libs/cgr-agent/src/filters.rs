//! Filter evaluation gating templates and request processors
//!
//! The evaluator is a trait so a remote filter service can replace the
//! in-process one. [`InlineFilterS`] understands inline rules of the form
//! `*type:~element:value1|value2` and named profiles made of such rules.

use std::collections::HashMap;

use regex::Regex;

use crate::error::{AgentError, AgentResult};
use crate::path::FullPath;
use crate::tree::DataProvider;
use crate::value::DataValue;

/// Boolean oracle deciding whether a filter list passes for a data source
pub trait FilterS: Send + Sync {
    fn pass(&self, tenant: &str, filter_ids: &[String], dp: &dyn DataProvider) -> AgentResult<bool>;
}

/// Comparison performed by a filter rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    String,
    Prefix,
    Suffix,
    Exists,
    Empty,
    Gt,
    Gte,
    Lt,
    Lte,
    Regex,
}

impl FilterKind {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "string" => Self::String,
            "prefix" => Self::Prefix,
            "suffix" => Self::Suffix,
            "exists" => Self::Exists,
            "empty" => Self::Empty,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "regex" => Self::Regex,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
enum RuleValue {
    Constant(String),
    Dynamic(FullPath),
}

/// One compiled `*type:element:values` rule
#[derive(Debug, Clone)]
pub struct FilterRule {
    kind: FilterKind,
    negate: bool,
    element: FullPath,
    values: Vec<RuleValue>,
    regexes: Vec<Regex>,
}

impl FilterRule {
    /// Compile an inline rule
    pub fn parse(rule: &str) -> AgentResult<Self> {
        let invalid = || AgentError::Filter(format!("invalid filter rule <{rule}>"));
        let mut parts = rule.splitn(3, ':');
        let kind = parts.next().and_then(|k| k.strip_prefix('*')).ok_or_else(invalid)?;
        let element = parts.next().and_then(|e| e.strip_prefix('~')).ok_or_else(invalid)?;
        let raw_values = parts.next().unwrap_or("");

        let (negate, kind) = match kind.strip_prefix("not") {
            Some(k) => (true, k),
            None => (false, kind),
        };
        let kind = FilterKind::parse(kind).ok_or_else(invalid)?;

        let values: Vec<RuleValue> = if raw_values.is_empty() {
            Vec::new()
        } else {
            raw_values
                .split('|')
                .map(|v| match v.strip_prefix('~') {
                    Some(p) => FullPath::parse(p).map(RuleValue::Dynamic),
                    None => Ok(RuleValue::Constant(v.to_string())),
                })
                .collect::<AgentResult<_>>()?
        };
        let needs_values = !matches!(kind, FilterKind::Exists | FilterKind::Empty);
        if needs_values && values.is_empty() {
            return Err(invalid());
        }
        let regexes = if kind == FilterKind::Regex {
            values
                .iter()
                .map(|v| match v {
                    RuleValue::Constant(c) => Regex::new(c).map_err(AgentError::from),
                    RuleValue::Dynamic(_) => Err(invalid()),
                })
                .collect::<AgentResult<_>>()?
        } else {
            Vec::new()
        };

        Ok(Self {
            kind,
            negate,
            element: FullPath::parse(element)?,
            values,
            regexes,
        })
    }

    /// Evaluate the rule against `dp`
    pub fn pass(&self, dp: &dyn DataProvider) -> AgentResult<bool> {
        let field = match dp.field_as_value(&self.element) {
            Ok(v) => Some(v),
            Err(AgentError::NotFound) => None,
            Err(e) => return Err(e),
        };
        let passed = match (self.kind, field) {
            (FilterKind::Exists, field) => field.is_some(),
            (_, None) => false,
            (FilterKind::Empty, Some(v)) => v.is_empty(),
            (FilterKind::Regex, Some(v)) => {
                let text = v.to_string();
                self.regexes.iter().any(|r| r.is_match(&text))
            }
            (kind, Some(v)) => {
                let text = v.to_string();
                let mut any = false;
                for value in &self.values {
                    let Some(expected) = self.resolve(value, dp)? else {
                        continue;
                    };
                    let matched = match kind {
                        FilterKind::String => text == expected,
                        FilterKind::Prefix => text.starts_with(&expected),
                        FilterKind::Suffix => text.ends_with(&expected),
                        FilterKind::Gt | FilterKind::Gte | FilterKind::Lt | FilterKind::Lte => {
                            compare(kind, &v, &expected)?
                        }
                        FilterKind::Exists | FilterKind::Empty | FilterKind::Regex => false,
                    };
                    if matched {
                        any = true;
                        break;
                    }
                }
                any
            }
        };
        Ok(passed != self.negate)
    }

    fn resolve(&self, value: &RuleValue, dp: &dyn DataProvider) -> AgentResult<Option<String>> {
        match value {
            RuleValue::Constant(c) => Ok(Some(c.clone())),
            RuleValue::Dynamic(path) => match dp.field_as_string(path) {
                Ok(s) => Ok(Some(s)),
                Err(AgentError::NotFound) => Ok(None),
                Err(e) => Err(e),
            },
        }
    }
}

fn compare(kind: FilterKind, field: &DataValue, expected: &str) -> AgentResult<bool> {
    let expected = DataValue::from_str_guess(expected);
    let field = match field {
        DataValue::Str(s) => DataValue::from_str_guess(s),
        other => other.clone(),
    };
    let is_duration = |v: &DataValue| matches!(v, DataValue::Duration(_));
    let (lhs, rhs) = if is_duration(&field) || is_duration(&expected) {
        (
            field.as_duration()?.as_nanos() as f64,
            expected.as_duration()?.as_nanos() as f64,
        )
    } else {
        match (field.as_f64(), expected.as_f64()) {
            (Ok(l), Ok(r)) => (l, r),
            _ => return Ok(false),
        }
    };
    Ok(match kind {
        FilterKind::Gt => lhs > rhs,
        FilterKind::Gte => lhs >= rhs,
        FilterKind::Lt => lhs < rhs,
        FilterKind::Lte => lhs <= rhs,
        _ => false,
    })
}

/// In-process filter evaluator with named profiles
#[derive(Debug, Clone, Default)]
pub struct InlineFilterS {
    profiles: HashMap<String, Vec<FilterRule>>,
}

impl InlineFilterS {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile named profiles; keys are `ID` or `tenant:ID`
    pub fn with_profiles(profiles: &HashMap<String, Vec<String>>) -> AgentResult<Self> {
        let mut compiled = HashMap::with_capacity(profiles.len());
        for (id, rules) in profiles {
            let rules = rules
                .iter()
                .map(|r| FilterRule::parse(r))
                .collect::<AgentResult<Vec<_>>>()?;
            compiled.insert(id.clone(), rules);
        }
        Ok(Self { profiles: compiled })
    }

    /// Check every inline rule and profile reference in `filter_ids`
    pub fn validate(&self, tenant: &str, filter_ids: &[String]) -> AgentResult<()> {
        for id in filter_ids {
            if id.starts_with('*') {
                FilterRule::parse(id)?;
            } else {
                self.profile(tenant, id)?;
            }
        }
        Ok(())
    }

    fn profile(&self, tenant: &str, id: &str) -> AgentResult<&[FilterRule]> {
        self.profiles
            .get(&format!("{tenant}:{id}"))
            .or_else(|| self.profiles.get(id))
            .map(Vec::as_slice)
            .ok_or_else(|| AgentError::Filter(format!("NOT_FOUND:{id}")))
    }
}

impl FilterS for InlineFilterS {
    fn pass(&self, tenant: &str, filter_ids: &[String], dp: &dyn DataProvider) -> AgentResult<bool> {
        for id in filter_ids {
            let passed = if id.starts_with('*') {
                FilterRule::parse(id)?.pass(dp)?
            } else {
                let mut all = true;
                for rule in self.profile(tenant, id)? {
                    if !rule.pass(dp)? {
                        all = false;
                        break;
                    }
                }
                all
            };
            if !passed {
                log::trace!("filter <{id}> not passing for tenant <{tenant}>");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DataMap;

    fn dp() -> DataMap {
        let mut m = DataMap::new();
        m.set_field("Service-Context-Id", "voice@DiamItCCRInit").unwrap();
        m.set_field("CC-Request-Type", "1").unwrap();
        m.set_field("Usage", "300s").unwrap();
        m.set_field("Empty", "").unwrap();
        m.set_field("Other", "1").unwrap();
        m
    }

    fn pass(rules: &[&str]) -> bool {
        let ids: Vec<String> = rules.iter().map(|r| r.to_string()).collect();
        InlineFilterS::new().pass("cgrates.org", &ids, &dp()).unwrap()
    }

    #[test]
    fn test_string_and_prefix_rules() {
        assert!(pass(&["*string:~CC-Request-Type:1"]));
        assert!(pass(&["*string:~CC-Request-Type:2|1"]));
        assert!(!pass(&["*string:~CC-Request-Type:2"]));
        assert!(pass(&["*notstring:~CC-Request-Type:2"]));
        assert!(pass(&["*prefix:~Service-Context-Id:voice"]));
        assert!(pass(&["*suffix:~Service-Context-Id:CCRInit"]));
        assert!(!pass(&["*string:~Missing:1"]));
        assert!(pass(&["*notstring:~Missing:1"]));
    }

    #[test]
    fn test_all_rules_must_pass() {
        assert!(pass(&["*string:~CC-Request-Type:1", "*prefix:~Service-Context-Id:voice"]));
        assert!(!pass(&["*string:~CC-Request-Type:1", "*prefix:~Service-Context-Id:data"]));
    }

    #[test]
    fn test_exists_and_empty() {
        assert!(pass(&["*exists:~Usage:"]));
        assert!(pass(&["*notexists:~Missing:"]));
        assert!(pass(&["*empty:~Empty:"]));
        assert!(!pass(&["*empty:~Usage:"]));
    }

    #[test]
    fn test_numeric_and_duration_comparisons() {
        assert!(pass(&["*gt:~CC-Request-Type:0"]));
        assert!(pass(&["*lte:~CC-Request-Type:1"]));
        assert!(pass(&["*gte:~Usage:5m"]));
        assert!(!pass(&["*lt:~Usage:1m"]));
    }

    #[test]
    fn test_dynamic_value_and_regex() {
        assert!(pass(&["*string:~CC-Request-Type:~Other"]));
        assert!(pass(&["*regex:~Service-Context-Id:^voice@.*$"]));
    }

    #[test]
    fn test_named_profiles() {
        let mut profiles = HashMap::new();
        profiles.insert(
            "FLTR_INIT".to_string(),
            vec!["*string:~CC-Request-Type:1".to_string()],
        );
        let fs = InlineFilterS::with_profiles(&profiles).unwrap();
        assert!(fs.pass("cgrates.org", &["FLTR_INIT".to_string()], &dp()).unwrap());
        assert!(fs.pass("cgrates.org", &["FLTR_UNKNOWN".to_string()], &dp()).is_err());
        assert!(fs.validate("cgrates.org", &["FLTR_INIT".to_string()]).is_ok());
    }

    #[test]
    fn test_malformed_rules() {
        assert!(FilterRule::parse("*string:CC-Request-Type:1").is_err());
        assert!(FilterRule::parse("*bogus:~X:1").is_err());
        assert!(FilterRule::parse("*string:~X").is_err());
        assert!(FilterRule::parse("*regex:~X:(").is_err());
    }
}
