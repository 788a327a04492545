//! RSR field expressions
//!
//! A value such as `~*req.Session-Id;-;~*vars.OriginHost` is a list of
//! parsers separated by `;`. Each parser is a constant or a reference
//! (`~` prefix) optionally followed by a search/replace (`:s/re/repl/`) and
//! a converter chain (`{*duration_seconds&*round:0}`). Constants may be
//! wrapped in backticks to carry `;` or `~`.

use regex::Regex;

use crate::converter::{convert_all, parse_converters, DataConverter};
use crate::error::{AgentError, AgentResult};
use crate::path::FullPath;
use crate::tree::DataProvider;
use crate::value::DataValue;

const RULES_SEP: char = ';';
const DYNAMIC_PREFIX: char = '~';
const QUOTE: char = '`';

#[derive(Debug, Clone)]
enum RsrSource {
    Constant(String),
    Reference(FullPath),
}

#[derive(Debug, Clone)]
struct SearchReplace {
    search: Regex,
    replace: String,
}

/// One compiled value expression
#[derive(Debug, Clone)]
pub struct RsrParser {
    rules: String,
    source: RsrSource,
    search_replace: Option<SearchReplace>,
    converters: Vec<DataConverter>,
}

impl RsrParser {
    /// Compile a single rule
    pub fn parse(rule: &str) -> AgentResult<Self> {
        let constant = |value: &str| Self {
            rules: rule.to_string(),
            source: RsrSource::Constant(value.to_string()),
            search_replace: None,
            converters: Vec::new(),
        };
        if rule.len() >= 2 && rule.starts_with(QUOTE) && rule.ends_with(QUOTE) {
            return Ok(constant(&rule[1..rule.len() - 1]));
        }
        let Some(body) = rule.strip_prefix(DYNAMIC_PREFIX) else {
            return Ok(constant(rule));
        };

        let (body, converters) = match body.strip_suffix('}') {
            Some(stripped) => {
                let open = stripped
                    .rfind('{')
                    .ok_or_else(|| AgentError::InvalidRule(rule.to_string()))?;
                (&stripped[..open], parse_converters(&stripped[open + 1..])?)
            }
            None => (body, Vec::new()),
        };

        let (path, search_replace) = match body.find(":s/") {
            Some(pos) => (&body[..pos], Some(parse_search_replace(rule, &body[pos + 3..])?)),
            None => (body, None),
        };

        Ok(Self {
            rules: rule.to_string(),
            source: RsrSource::Reference(FullPath::parse(path)?),
            search_replace,
            converters,
        })
    }

    /// Original rule text
    pub fn rules(&self) -> &str {
        &self.rules
    }

    /// Referenced path, `None` for constants
    pub fn path(&self) -> Option<&FullPath> {
        match &self.source {
            RsrSource::Reference(p) => Some(p),
            RsrSource::Constant(_) => None,
        }
    }

    /// Apply search/replace and converters to an already resolved value
    pub fn parse_value(&self, value: DataValue) -> AgentResult<DataValue> {
        let value = match &self.search_replace {
            Some(sr) => {
                let text = value.to_string();
                if sr.search.is_match(&text) {
                    DataValue::Str(sr.search.replace_all(&text, sr.replace.as_str()).into_owned())
                } else {
                    DataValue::Str(text)
                }
            }
            None => value,
        };
        convert_all(&self.converters, value)
    }

    /// Evaluate against a data source
    pub fn parse_data_provider_value(&self, dp: &dyn DataProvider) -> AgentResult<DataValue> {
        match &self.source {
            RsrSource::Constant(c) => Ok(DataValue::Str(c.clone())),
            RsrSource::Reference(path) => self.parse_value(dp.field_as_value(path)?),
        }
    }

    /// Evaluate against a data source and render as text
    pub fn parse_data_provider(&self, dp: &dyn DataProvider) -> AgentResult<String> {
        self.parse_data_provider_value(dp).map(|v| v.to_string())
    }

    /// Evaluate without a data source; references see an empty value
    pub fn parse_constant(&self) -> AgentResult<String> {
        match &self.source {
            RsrSource::Constant(c) => Ok(c.clone()),
            RsrSource::Reference(_) => self.parse_value(DataValue::Str(String::new())).map(|v| v.to_string()),
        }
    }
}

fn parse_search_replace(rule: &str, spec: &str) -> AgentResult<SearchReplace> {
    let invalid = || AgentError::InvalidRule(rule.to_string());
    let spec = spec.strip_suffix('/').ok_or_else(invalid)?;
    let mut sep = None;
    let mut escaped = false;
    for (i, c) in spec.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '/' if !escaped => {
                sep = Some(i);
                break;
            }
            _ => escaped = false,
        }
    }
    let sep = sep.ok_or_else(invalid)?;
    Ok(SearchReplace {
        search: Regex::new(&spec[..sep].replace("\\/", "/"))?,
        replace: spec[sep + 1..].to_string(),
    })
}

/// Ordered list of value expressions
#[derive(Debug, Clone, Default)]
pub struct RsrParsers(Vec<RsrParser>);

impl RsrParsers {
    /// Compile `;`-separated rules, honoring backtick quoting
    pub fn parse(rules: &str) -> AgentResult<Self> {
        if rules.is_empty() {
            return Ok(Self::default());
        }
        let mut parsers = Vec::new();
        let mut quoted = false;
        let mut start = 0;
        for (i, c) in rules.char_indices() {
            match c {
                QUOTE => quoted = !quoted,
                RULES_SEP if !quoted => {
                    parsers.push(RsrParser::parse(&rules[start..i])?);
                    start = i + 1;
                }
                _ => {}
            }
        }
        if quoted {
            return Err(AgentError::InvalidRule(rules.to_string()));
        }
        parsers.push(RsrParser::parse(&rules[start..])?);
        Ok(Self(parsers))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RsrParser> {
        self.0.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&RsrParser> {
        self.0.get(idx)
    }

    /// Concatenated output of every parser against `dp`
    pub fn parse_data_provider(&self, dp: &dyn DataProvider) -> AgentResult<String> {
        self.0
            .iter()
            .map(|p| p.parse_data_provider(dp))
            .collect::<AgentResult<Vec<_>>>()
            .map(|parts| parts.concat())
    }

    /// Concatenated output without a data source
    pub fn parse_constant(&self) -> AgentResult<String> {
        self.0
            .iter()
            .map(RsrParser::parse_constant)
            .collect::<AgentResult<Vec<_>>>()
            .map(|parts| parts.concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DataMap;

    fn provider() -> DataMap {
        let mut m = DataMap::new();
        m.set_field("Session-Id", "sess1").unwrap();
        m.set_field("Origin-Host", "client.test").unwrap();
        m.set_field("Requested-Service-Unit.CC-Time", "300").unwrap();
        m.set_field("Usage", DataValue::Duration(std::time::Duration::from_secs(90)))
            .unwrap();
        m
    }

    #[test]
    fn test_constant_and_reference_concat() {
        let prs = RsrParsers::parse("~Session-Id;-;~Origin-Host").unwrap();
        assert_eq!(prs.len(), 3);
        assert_eq!(prs.parse_data_provider(&provider()).unwrap(), "sess1-client.test");
    }

    #[test]
    fn test_backtick_constant_keeps_separators() {
        let prs = RsrParsers::parse("`a;b`;~Session-Id").unwrap();
        assert_eq!(prs.len(), 2);
        assert_eq!(prs.parse_data_provider(&provider()).unwrap(), "a;bsess1");
        assert!(RsrParsers::parse("`open").is_err());
    }

    #[test]
    fn test_search_replace() {
        let prs = RsrParsers::parse("~Requested-Service-Unit.CC-Time:s/(.*)/${1}s/").unwrap();
        assert_eq!(prs.parse_data_provider(&provider()).unwrap(), "300s");
    }

    #[test]
    fn test_converter_chain() {
        let prs = RsrParsers::parse("~Usage{*duration_seconds}").unwrap();
        assert_eq!(prs.parse_data_provider(&provider()).unwrap(), "90");

        let prs = RsrParsers::parse("~Usage{*duration_minutes&*round:1}").unwrap();
        assert_eq!(prs.parse_data_provider(&provider()).unwrap(), "1.5");
    }

    #[test]
    fn test_missing_reference_is_not_found() {
        let prs = RsrParsers::parse("~Missing").unwrap();
        assert_eq!(prs.parse_data_provider(&provider()), Err(AgentError::NotFound));
    }

    #[test]
    fn test_invalid_rules() {
        assert!(RsrParser::parse("~Usage{*bogus}").is_err());
        assert!(RsrParser::parse("~Usage*duration}").is_err());
        assert!(RsrParser::parse("~X:s/(/y/").is_err());
        assert!(RsrParser::parse("~X:s/abc").is_err());
    }

    #[test]
    fn test_parse_constant() {
        let prs = RsrParsers::parse("2001").unwrap();
        assert_eq!(prs.parse_constant().unwrap(), "2001");
        assert!(prs.get(0).unwrap().path().is_none());
    }
}
