//! Field templates
//!
//! Templates are declared in YAML (see [`FcTemplateConfig`]) and compiled
//! once at startup: paths are parsed, value expressions compiled and
//! `*template` references inflated from the named template sets.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};
use crate::path::FullPath;
use crate::request::Section;
use crate::rsr::RsrParsers;

/// Limit on nested `*template` references
const MAX_TEMPLATE_DEPTH: usize = 8;

/// How a template computes and stores its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    None,
    Constant,
    Variable,
    Composed,
    Group,
    Remove,
    RemoveAll,
    RemoteHost,
    UsageDifference,
    CcUsage,
    Sum,
    Difference,
    Multiply,
    Divide,
    ValueExponent,
    UnixTimestamp,
    Template,
}

impl FieldType {
    pub fn parse(s: &str) -> AgentResult<Self> {
        Ok(match s {
            "*none" => Self::None,
            "*constant" => Self::Constant,
            "*variable" => Self::Variable,
            "*composed" => Self::Composed,
            "*group" => Self::Group,
            "*remove" => Self::Remove,
            "*remove_all" => Self::RemoveAll,
            "*remote_host" => Self::RemoteHost,
            "*usage_difference" => Self::UsageDifference,
            "*cc_usage" => Self::CcUsage,
            "*sum" => Self::Sum,
            "*difference" => Self::Difference,
            "*multiply" => Self::Multiply,
            "*divide" => Self::Divide,
            "*value_exponent" => Self::ValueExponent,
            "*unix_timestamp" => Self::UnixTimestamp,
            "*template" => Self::Template,
            other => return Err(AgentError::UnsupportedFieldType(other.to_string())),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "*none",
            Self::Constant => "*constant",
            Self::Variable => "*variable",
            Self::Composed => "*composed",
            Self::Group => "*group",
            Self::Remove => "*remove",
            Self::RemoveAll => "*remove_all",
            Self::RemoteHost => "*remote_host",
            Self::UsageDifference => "*usage_difference",
            Self::CcUsage => "*cc_usage",
            Self::Sum => "*sum",
            Self::Difference => "*difference",
            Self::Multiply => "*multiply",
            Self::Divide => "*divide",
            Self::ValueExponent => "*value_exponent",
            Self::UnixTimestamp => "*unix_timestamp",
            Self::Template => "*template",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Template as written in configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FcTemplateConfig {
    pub tag: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub path: String,
    pub value: String,
    pub filters: Vec<String>,
    pub mandatory: bool,
    pub blocker: bool,
    pub new_branch: bool,
    pub timezone: String,
}

impl FcTemplateConfig {
    /// Shorthand used by built-in templates and tests
    pub fn new(tag: &str, field_type: &str, path: &str, value: &str) -> Self {
        Self {
            tag: tag.to_string(),
            field_type: field_type.to_string(),
            path: path.to_string(),
            value: value.to_string(),
            ..Default::default()
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn new_branch(mut self) -> Self {
        self.new_branch = true;
        self
    }

    pub fn blocker(mut self) -> Self {
        self.blocker = true;
        self
    }

    pub fn with_filters(mut self, filters: &[&str]) -> Self {
        self.filters = filters.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// Compiled template
#[derive(Debug, Clone)]
pub struct FcTemplate {
    pub tag: String,
    pub field_type: FieldType,
    /// Target path including its section prefix
    pub path: FullPath,
    pub value: RsrParsers,
    pub filters: Vec<String>,
    pub mandatory: bool,
    pub blocker: bool,
    pub new_branch: bool,
    pub timezone: String,
}

impl FcTemplate {
    /// Compile one template that is not a `*template` reference
    pub fn compile(cfg: &FcTemplateConfig) -> AgentResult<Self> {
        let field_type = FieldType::parse(&cfg.field_type)?;
        let tag = if cfg.tag.is_empty() { cfg.path.clone() } else { cfg.tag.clone() };
        let bad = |reason: &str| AgentError::Template(format!("<{tag}> {reason}"));

        let path = match field_type {
            FieldType::None if cfg.path.is_empty() => FullPath {
                items: Vec::new(),
                path: String::new(),
            },
            FieldType::Template => return Err(bad("template references must be inflated")),
            _ => {
                let path = FullPath::parse(&cfg.path)?;
                let section = Section::parse(path.prefix())?;
                if !section.is_writable() {
                    return Err(bad("path targets a read-only section"));
                }
                if field_type != FieldType::RemoveAll && path.items.len() < 2 {
                    return Err(bad("path needs a field after the section"));
                }
                path
            }
        };

        let value = RsrParsers::parse(&cfg.value)?;
        let arity = match field_type {
            FieldType::UsageDifference | FieldType::ValueExponent => Some(2),
            FieldType::CcUsage => Some(3),
            _ => None,
        };
        if let Some(n) = arity {
            if value.len() != n {
                return Err(bad(&format!("{field_type} needs {n} values")));
            }
        }

        Ok(Self {
            tag,
            field_type,
            path,
            value,
            filters: cfg.filters.clone(),
            mandatory: cfg.mandatory,
            blocker: cfg.blocker,
            new_branch: cfg.new_branch,
            timezone: cfg.timezone.clone(),
        })
    }
}

/// Named template sets referenced through `*template`
pub type TemplateSets = HashMap<String, Vec<FcTemplateConfig>>;

/// Compile a template list, inflating `*template` references
pub fn compile_templates(fields: &[FcTemplateConfig], sets: &TemplateSets) -> AgentResult<Vec<FcTemplate>> {
    let mut out = Vec::with_capacity(fields.len());
    inflate(fields, sets, 0, &mut out)?;
    Ok(out)
}

fn inflate(
    fields: &[FcTemplateConfig],
    sets: &TemplateSets,
    depth: usize,
    out: &mut Vec<FcTemplate>,
) -> AgentResult<()> {
    if depth > MAX_TEMPLATE_DEPTH {
        return Err(AgentError::Template("template references nest too deep".into()));
    }
    for cfg in fields {
        if cfg.field_type == FieldType::Template.as_str() {
            let set = sets
                .get(&cfg.value)
                .ok_or_else(|| AgentError::Template(format!("no template with id <{}>", cfg.value)))?;
            inflate(set, sets, depth + 1, out)?;
        } else {
            out.push(FcTemplate::compile(cfg)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_variable() {
        let cfg = FcTemplateConfig::new("SessionId", "*variable", "*cgreq.OriginID", "~*req.Session-Id")
            .mandatory();
        let t = FcTemplate::compile(&cfg).unwrap();
        assert_eq!(t.field_type, FieldType::Variable);
        assert_eq!(t.path.prefix(), "*cgreq");
        assert!(t.mandatory);
        assert_eq!(t.value.len(), 1);
    }

    #[test]
    fn test_tag_defaults_to_path() {
        let cfg = FcTemplateConfig::new("", "*constant", "*rep.Result-Code", "2001");
        assert_eq!(FcTemplate::compile(&cfg).unwrap().tag, "*rep.Result-Code");
    }

    #[test]
    fn test_reject_bad_templates() {
        let cases = [
            FcTemplateConfig::new("t", "*bogus", "*rep.X", "1"),
            FcTemplateConfig::new("t", "*constant", "*req.X", "1"),
            FcTemplateConfig::new("t", "*constant", "*unknown.X", "1"),
            FcTemplateConfig::new("t", "*constant", "*rep", "1"),
            FcTemplateConfig::new("t", "*cc_usage", "*cgreq.Usage", "~*req.A;~*req.B"),
        ];
        for cfg in cases {
            assert!(FcTemplate::compile(&cfg).is_err(), "{cfg:?}");
        }
    }

    #[test]
    fn test_inflate_template_references() {
        let mut sets = TemplateSets::new();
        sets.insert(
            "*err".to_string(),
            vec![
                FcTemplateConfig::new("SessionId", "*variable", "*rep.Session-Id", "~*req.Session-Id"),
                FcTemplateConfig::new("OriginHost", "*variable", "*rep.Origin-Host", "~*vars.OriginHost"),
            ],
        );
        let fields = vec![
            FcTemplateConfig::new("", "*template", "", "*err"),
            FcTemplateConfig::new("ResultCode", "*constant", "*rep.Result-Code", "2001"),
        ];
        let compiled = compile_templates(&fields, &sets).unwrap();
        let tags: Vec<_> = compiled.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(tags, vec!["SessionId", "OriginHost", "ResultCode"]);
    }

    #[test]
    fn test_inflate_detects_cycles_and_missing() {
        let mut sets = TemplateSets::new();
        sets.insert("a".to_string(), vec![FcTemplateConfig::new("", "*template", "", "a")]);
        assert!(compile_templates(&[FcTemplateConfig::new("", "*template", "", "a")], &sets).is_err());
        assert!(compile_templates(&[FcTemplateConfig::new("", "*template", "", "b")], &sets).is_err());
    }

    #[test]
    fn test_deserialize_yaml() {
        let yaml = r#"
- tag: CCTime
  path: "*rep.Granted-Service-Unit.CC-Time"
  type: "*variable"
  value: "~*cgrep.MaxUsage{*duration_seconds}"
  mandatory: true
"#;
        let cfgs: Vec<FcTemplateConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfgs[0].field_type, "*variable");
        assert!(cfgs[0].mandatory);
        assert!(!cfgs[0].new_branch);
        assert!(FcTemplate::compile(&cfgs[0]).is_ok());
    }
}
