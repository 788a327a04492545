//! Per-message request context
//!
//! [`AgentRequest`] owns the five data trees of one inbound message and
//! applies field templates to them. Reads and writes are routed by the
//! first path hop (`*req`, `*vars`, `*cgreq`, `*cgrep`, `*rep`).

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use crate::converter::{round, RoundingMethod};
use crate::error::{AgentError, AgentResult};
use crate::filters::FilterS;
use crate::path::FullPath;
use crate::template::{FcTemplate, FieldType};
use crate::tree::{DataItem, DataMap, DataProvider};
use crate::value::{
    format_duration, parse_duration_with_nanos, parse_time_detect_layout, DataValue,
};

/// Decimals kept by `*value_exponent`
const ROUNDING_DECIMALS: i32 = 10;

/// Reply field carrying backend errors
pub const ERROR_FIELD: &str = "Error";

/// The five data trees of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Inbound message, read-only
    Req,
    /// Scratch values seeded by the adapter
    Vars,
    /// Event sent to the backend
    CgReq,
    /// Backend reply
    CgRep,
    /// Outbound reply
    Rep,
}

impl Section {
    pub const REQ: &'static str = "*req";
    pub const VARS: &'static str = "*vars";
    pub const CGREQ: &'static str = "*cgreq";
    pub const CGREP: &'static str = "*cgrep";
    pub const REP: &'static str = "*rep";

    pub fn parse(prefix: &str) -> AgentResult<Self> {
        match prefix {
            Self::REQ => Ok(Self::Req),
            Self::VARS => Ok(Self::Vars),
            Self::CGREQ => Ok(Self::CgReq),
            Self::CGREP => Ok(Self::CgRep),
            Self::REP => Ok(Self::Rep),
            other => Err(AgentError::UnsupportedSection(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Req => Self::REQ,
            Self::Vars => Self::VARS,
            Self::CgReq => Self::CGREQ,
            Self::CgRep => Self::CGREP,
            Self::Rep => Self::REP,
        }
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::Req)
    }
}

/// Context of one inbound message
pub struct AgentRequest {
    request: Box<dyn DataProvider + Send>,
    pub vars: DataMap,
    pub cgr_request: DataMap,
    pub cgr_reply: DataMap,
    pub reply: DataMap,
    pub tenant: String,
    pub timezone: String,
    filter_s: Arc<dyn FilterS>,
}

impl AgentRequest {
    /// Build a context around an inbound message
    ///
    /// `reply` is passed in so several processors can accumulate into the
    /// same outbound tree.
    pub fn new(
        request: Box<dyn DataProvider + Send>,
        vars: DataMap,
        reply: DataMap,
        tenant: impl Into<String>,
        timezone: impl Into<String>,
        filter_s: Arc<dyn FilterS>,
    ) -> Self {
        Self {
            request,
            vars,
            cgr_request: DataMap::new(),
            cgr_reply: DataMap::new(),
            reply,
            tenant: tenant.into(),
            timezone: timezone.into(),
            filter_s,
        }
    }

    /// Consume the context, keeping the outbound tree
    pub fn into_reply(self) -> DataMap {
        self.reply
    }

    /// Evaluate `filter_ids` against this context
    pub fn pass_filters(&self, filter_ids: &[String]) -> AgentResult<bool> {
        if filter_ids.is_empty() {
            return Ok(true);
        }
        self.filter_s.pass(&self.tenant, filter_ids, self)
    }

    /// Writable tree for `section`
    pub fn tree_mut(&mut self, section: Section) -> AgentResult<&mut DataMap> {
        match section {
            Section::Req => Err(AgentError::UnsupportedSection(Section::REQ.to_string())),
            Section::Vars => Ok(&mut self.vars),
            Section::CgReq => Ok(&mut self.cgr_request),
            Section::CgRep => Ok(&mut self.cgr_reply),
            Section::Rep => Ok(&mut self.reply),
        }
    }

    fn tree(&self, section: Section) -> Option<&DataMap> {
        match section {
            Section::Req => None,
            Section::Vars => Some(&self.vars),
            Section::CgReq => Some(&self.cgr_request),
            Section::CgRep => Some(&self.cgr_reply),
            Section::Rep => Some(&self.reply),
        }
    }

    /// Apply `templates` in declaration order
    pub fn set_fields(&mut self, templates: &[FcTemplate]) -> AgentResult<()> {
        for tpl in templates {
            if !self.pass_filters(&tpl.filters)? {
                if tpl.mandatory {
                    return Err(AgentError::MandatoryIeMissing(tpl.tag.clone()));
                }
                continue;
            }
            match tpl.field_type {
                FieldType::None => {}
                FieldType::Remove => {
                    let section = Section::parse(tpl.path.prefix())?;
                    self.tree_mut(section)?.remove(&tpl.path.items[1..])?;
                }
                FieldType::RemoveAll => {
                    let section = Section::parse(tpl.path.prefix())?;
                    self.tree_mut(section)?.clear();
                }
                _ => {
                    let value = match self.parse_field(tpl) {
                        Ok(v) => v,
                        Err(AgentError::NotFound) if !tpl.mandatory => continue,
                        Err(AgentError::NotFound) => {
                            return Err(AgentError::MandatoryIeMissing(tpl.tag.clone()))
                        }
                        Err(e) => return Err(e),
                    };
                    let item = DataItem {
                        value,
                        new_branch: tpl.new_branch,
                    };
                    let section = Section::parse(tpl.path.prefix())?;
                    let tree = self.tree_mut(section)?;
                    let target = &tpl.path.items[1..];
                    match tpl.field_type {
                        FieldType::Composed => tree.compose(target, item)?,
                        FieldType::Group => tree.append(target, item)?,
                        _ => tree.set(target, item)?,
                    }
                }
            }
            if tpl.blocker {
                break;
            }
        }
        Ok(())
    }

    /// Compute the value a template would write
    pub fn parse_field(&self, tpl: &FcTemplate) -> AgentResult<DataValue> {
        let timezone = if tpl.timezone.is_empty() { &self.timezone } else { &tpl.timezone };
        let arg = |idx: usize| -> AgentResult<String> {
            tpl.value
                .get(idx)
                .ok_or_else(|| AgentError::Template(format!("<{}> missing value {idx}", tpl.tag)))?
                .parse_data_provider(self)
        };
        match tpl.field_type {
            FieldType::None | FieldType::Remove | FieldType::RemoveAll | FieldType::Template => {
                Err(AgentError::UnsupportedFieldType(tpl.field_type.to_string()))
            }
            FieldType::Constant => Ok(DataValue::Str(tpl.value.parse_constant()?)),
            FieldType::RemoteHost => self
                .remote_host()
                .map(|addr| DataValue::Str(addr.to_string()))
                .ok_or(AgentError::NotFound),
            FieldType::Variable | FieldType::Composed | FieldType::Group => {
                Ok(DataValue::Str(tpl.value.parse_data_provider(self)?))
            }
            FieldType::UsageDifference => {
                let end = parse_time_detect_layout(&arg(0)?, timezone)?;
                let start = parse_time_detect_layout(&arg(1)?, timezone)?;
                let usage = (end - start)
                    .to_std()
                    .map_err(|_| AgentError::conversion(format!("{end} - {start}"), "duration"))?;
                Ok(DataValue::Str(format_duration(usage)))
            }
            FieldType::CcUsage => {
                let req_nr_text = arg(0)?;
                let req_nr: i64 = req_nr_text
                    .parse()
                    .map_err(|_| AgentError::conversion(&req_nr_text, "request number"))?;
                let used = parse_duration_with_nanos(&arg(1)?)?;
                let interval = parse_duration_with_nanos(&arg(2)?)?;
                let multiple = u32::try_from((req_nr - 1).max(0))
                    .map_err(|_| AgentError::conversion(req_nr, "request number"))?;
                Ok(DataValue::Duration(used + interval * multiple))
            }
            FieldType::Sum | FieldType::Difference | FieldType::Multiply | FieldType::Divide => {
                let values = tpl
                    .value
                    .iter()
                    .map(|p| p.parse_data_provider(self).map(|s| DataValue::from_str_guess(&s)))
                    .collect::<AgentResult<Vec<_>>>()?;
                arithmetic(tpl.field_type, values)
            }
            FieldType::ValueExponent => {
                let text = arg(0)?;
                let value: f64 = text
                    .parse()
                    .map_err(|_| AgentError::conversion(&text, "float64"))?;
                let exp_text = arg(1)?;
                let exp: i32 = exp_text
                    .parse()
                    .map_err(|_| AgentError::conversion(&exp_text, "exponent"))?;
                let out = round(value * 10f64.powi(exp), ROUNDING_DECIMALS, RoundingMethod::Middle);
                Ok(DataValue::Str(DataValue::Float(out).to_string()))
            }
            FieldType::UnixTimestamp => {
                let text = tpl.value.parse_data_provider(self)?;
                let t = parse_time_detect_layout(&text, timezone)?;
                Ok(DataValue::Str(t.timestamp().to_string()))
            }
        }
    }

    /// Load the backend reply, or its error, into `*cgrep`
    pub fn set_cgr_reply(&mut self, reply: Result<DataMap, String>) -> AgentResult<()> {
        let (mut tree, error) = match reply {
            Ok(tree) => (tree, String::new()),
            Err(e) => (DataMap::new(), e),
        };
        tree.set_field(ERROR_FIELD, error)?;
        self.cgr_reply = tree;
        Ok(())
    }

    /// Text rendering of the computed trees, used by `*log` and `*dryrun`
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (name, tree) in [
            (Section::VARS, &self.vars),
            (Section::CGREQ, &self.cgr_request),
            (Section::CGREP, &self.cgr_reply),
            (Section::REP, &self.reply),
        ] {
            let fields: Vec<String> = tree
                .leaves()
                .iter()
                .map(|l| format!("{}={}", l.path.join("."), l.item.value))
                .collect();
            let _ = write!(out, "{name}: {{{}}} ", fields.join(", "));
        }
        out.trim_end().to_string()
    }
}

impl DataProvider for AgentRequest {
    fn field_as_value(&self, path: &FullPath) -> AgentResult<DataValue> {
        let section = Section::parse(path.prefix())?;
        if path.items.len() < 2 {
            return Err(AgentError::InvalidPath(path.path.clone()));
        }
        match self.tree(section) {
            Some(tree) => tree.value_at(&path.items[1..]),
            None => self.request.field_as_value(&path.tail()),
        }
    }

    fn remote_host(&self) -> Option<std::net::SocketAddr> {
        self.request.remote_host()
    }
}

/// Fold values for `*sum`, `*difference`, `*multiply` and `*divide`
///
/// Durations are used when the first operand is one, integers when every
/// operand is an integer, floats otherwise.
fn arithmetic(op: FieldType, values: Vec<DataValue>) -> AgentResult<DataValue> {
    let mut iter = values.into_iter();
    let first = iter.next().ok_or_else(|| AgentError::Template(format!("{op} needs values")))?;
    let rest: Vec<DataValue> = iter.collect();

    if let DataValue::Duration(d) = first {
        let mut acc = d.as_nanos() as i128;
        for v in &rest {
            let n = match v {
                DataValue::Duration(d) => d.as_nanos() as i128,
                other => other.as_i64()? as i128,
            };
            let next = match op {
                FieldType::Sum => acc.checked_add(n),
                FieldType::Difference => acc.checked_sub(n),
                FieldType::Multiply => acc.checked_mul(n),
                _ if n == 0 => return Err(AgentError::conversion("division by zero", "duration")),
                _ => acc.checked_div(n),
            };
            acc = next.ok_or_else(|| AgentError::conversion(format!("{acc} {op} {n}"), "duration"))?;
        }
        let nanos = u64::try_from(acc).map_err(|_| AgentError::conversion(acc, "duration"))?;
        return Ok(DataValue::Duration(Duration::from_nanos(nanos)));
    }

    if let (DataValue::Int(first), true) = (&first, rest.iter().all(|v| matches!(v, DataValue::Int(_)))) {
        let mut acc = *first;
        for v in &rest {
            let n = v.as_i64()?;
            let next = match op {
                FieldType::Sum => acc.checked_add(n),
                FieldType::Difference => acc.checked_sub(n),
                FieldType::Multiply => acc.checked_mul(n),
                _ => acc.checked_div(n),
            };
            acc = next.ok_or_else(|| AgentError::conversion(format!("{acc} {op} {n}"), "int64"))?;
        }
        return Ok(DataValue::Int(acc));
    }

    let mut acc = first.as_f64()?;
    for v in &rest {
        let n = v.as_f64()?;
        acc = match op {
            FieldType::Sum => acc + n,
            FieldType::Difference => acc - n,
            FieldType::Multiply => acc * n,
            _ => acc / n,
        };
    }
    Ok(DataValue::Float(acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::InlineFilterS;
    use crate::template::{compile_templates, FcTemplateConfig, TemplateSets};

    fn request() -> DataMap {
        let mut m = DataMap::new();
        m.set_field("Session-Id", "sess;1").unwrap();
        m.set_field("CC-Request-Type", "1").unwrap();
        m.set_field("CC-Request-Number", "3").unwrap();
        m.set_field("Requested-Service-Unit.CC-Time", "300").unwrap();
        m.set_field("Used-Service-Unit.CC-Time", "250").unwrap();
        m.set_field("Event-Timestamp", "2024-03-01T10:00:00Z").unwrap();
        m.set_field("Answer-Time", "2024-03-01T10:01:30Z").unwrap();
        m
    }

    fn agent_request() -> AgentRequest {
        let mut vars = DataMap::new();
        vars.set_field("OriginHost", "cgr.test").unwrap();
        AgentRequest::new(
            Box::new(request()),
            vars,
            DataMap::new(),
            "cgrates.org",
            "UTC",
            Arc::new(InlineFilterS::new()),
        )
    }

    fn compile(cfgs: Vec<FcTemplateConfig>) -> Vec<FcTemplate> {
        compile_templates(&cfgs, &TemplateSets::new()).unwrap()
    }

    fn value(ar: &AgentRequest, path: &str) -> AgentResult<String> {
        ar.field_as_string(&FullPath::parse(path).unwrap())
    }

    #[test]
    fn test_section_parse() {
        assert_eq!(Section::parse("*cgrep").unwrap(), Section::CgRep);
        assert!(Section::parse("*hdr").is_err());
        assert!(!Section::Req.is_writable());
    }

    #[test]
    fn test_set_fields_routes_by_section() {
        let mut ar = agent_request();
        let tpls = compile(vec![
            FcTemplateConfig::new("OriginID", "*variable", "*cgreq.OriginID", "~*req.Session-Id"),
            FcTemplateConfig::new("Usage", "*variable", "*cgreq.Usage", "~*req.Requested-Service-Unit.CC-Time:s/(.*)/${1}s/"),
            FcTemplateConfig::new("Host", "*variable", "*vars.Host", "~*vars.OriginHost"),
            FcTemplateConfig::new("RC", "*constant", "*rep.Result-Code", "2001"),
        ]);
        ar.set_fields(&tpls).unwrap();
        assert_eq!(value(&ar, "*cgreq.OriginID").unwrap(), "sess;1");
        assert_eq!(value(&ar, "*cgreq.Usage").unwrap(), "300s");
        assert_eq!(value(&ar, "*vars.Host").unwrap(), "cgr.test");
        assert_eq!(value(&ar, "*rep.Result-Code").unwrap(), "2001");
    }

    #[test]
    fn test_filters_skip_and_mandatory() {
        let mut ar = agent_request();
        let tpls = compile(vec![
            FcTemplateConfig::new("Skipped", "*constant", "*cgreq.Skipped", "x")
                .with_filters(&["*string:~*req.CC-Request-Type:3"]),
            FcTemplateConfig::new("Missing", "*variable", "*cgreq.Missing", "~*req.Nope"),
        ]);
        ar.set_fields(&tpls).unwrap();
        assert_eq!(value(&ar, "*cgreq.Skipped"), Err(AgentError::NotFound));

        let tpls = compile(vec![
            FcTemplateConfig::new("Missing", "*variable", "*cgreq.Missing", "~*req.Nope").mandatory(),
        ]);
        assert_eq!(
            ar.set_fields(&tpls),
            Err(AgentError::MandatoryIeMissing("Missing".into()))
        );

        let tpls = compile(vec![
            FcTemplateConfig::new("Gated", "*constant", "*cgreq.Gated", "x")
                .with_filters(&["*string:~*req.CC-Request-Type:3"])
                .mandatory(),
        ]);
        assert_eq!(
            ar.set_fields(&tpls),
            Err(AgentError::MandatoryIeMissing("Gated".into()))
        );
    }

    #[test]
    fn test_composed_group_and_blocker() {
        let mut ar = agent_request();
        let tpls = compile(vec![
            FcTemplateConfig::new("Id1", "*composed", "*cgreq.Id", "~*req.CC-Request-Type"),
            FcTemplateConfig::new("Id2", "*composed", "*cgreq.Id", "_;~*req.CC-Request-Number"),
            FcTemplateConfig::new("R1", "*group", "*rep.Route", "a"),
            FcTemplateConfig::new("R2", "*group", "*rep.Route", "b").blocker(),
            FcTemplateConfig::new("After", "*constant", "*rep.After", "x"),
        ]);
        ar.set_fields(&tpls).unwrap();
        assert_eq!(value(&ar, "*cgreq.Id").unwrap(), "1_3");
        let routes: Vec<String> = ar
            .reply
            .leaves()
            .iter()
            .map(|l| l.item.value.to_string())
            .collect();
        assert_eq!(routes, vec!["a", "b"]);
        assert_eq!(value(&ar, "*rep.After"), Err(AgentError::NotFound));
    }

    #[test]
    fn test_remove_and_remove_all() {
        let mut ar = agent_request();
        let tpls = compile(vec![
            FcTemplateConfig::new("A", "*constant", "*cgreq.A", "1"),
            FcTemplateConfig::new("B", "*constant", "*cgreq.B", "2"),
            FcTemplateConfig::new("RmA", "*remove", "*cgreq.A", ""),
        ]);
        ar.set_fields(&tpls).unwrap();
        assert_eq!(value(&ar, "*cgreq.A"), Err(AgentError::NotFound));
        assert_eq!(value(&ar, "*cgreq.B").unwrap(), "2");

        let tpls = compile(vec![FcTemplateConfig::new("Clear", "*remove_all", "*cgreq", "")]);
        ar.set_fields(&tpls).unwrap();
        assert!(ar.cgr_request.is_empty());
    }

    #[test]
    fn test_usage_difference_and_cc_usage() {
        let ar = agent_request();
        let tpl = &compile(vec![FcTemplateConfig::new(
            "Usage",
            "*usage_difference",
            "*cgreq.Usage",
            "~*req.Answer-Time;~*req.Event-Timestamp",
        )])[0];
        assert_eq!(ar.parse_field(tpl).unwrap(), DataValue::Str("1m30s".into()));

        let tpl = &compile(vec![FcTemplateConfig::new(
            "Usage",
            "*cc_usage",
            "*cgreq.Usage",
            "~*req.CC-Request-Number;~*req.Used-Service-Unit.CC-Time:s/(.*)/${1}s/;5m",
        )])[0];
        assert_eq!(
            ar.parse_field(tpl).unwrap(),
            DataValue::Duration(Duration::from_secs(250 + 2 * 300))
        );
    }

    #[test]
    fn test_arithmetic_types() {
        let ar = agent_request();
        let eval = |ty: &str, val: &str| {
            let tpl = &compile(vec![FcTemplateConfig::new("T", ty, "*cgreq.T", val)])[0];
            ar.parse_field(tpl).unwrap()
        };
        assert_eq!(eval("*sum", "~*req.CC-Request-Number;4"), DataValue::Int(7));
        assert_eq!(eval("*difference", "10;~*req.CC-Request-Number"), DataValue::Int(7));
        assert_eq!(eval("*multiply", "1.5;2"), DataValue::Float(3.0));
        assert_eq!(eval("*divide", "9;2"), DataValue::Int(4));
        assert_eq!(
            eval("*sum", "10s;5s"),
            DataValue::Duration(Duration::from_secs(15))
        );
        assert_eq!(eval("*value_exponent", "15;-1"), DataValue::Str("1.5".into()));
        assert_eq!(
            eval("*unix_timestamp", "~*req.Event-Timestamp"),
            DataValue::Str("1709287200".into())
        );
    }

    #[test]
    fn test_arithmetic_overflow_is_an_error() {
        let ar = agent_request();
        let eval = |ty: &str, val: &str| {
            let tpl = &compile(vec![FcTemplateConfig::new("T", ty, "*cgreq.T", val)])[0];
            ar.parse_field(tpl)
        };
        let huge = "9000000000000000000";
        assert!(matches!(
            eval("*multiply", &format!("1h;{huge};{huge}")),
            Err(AgentError::Conversion { target: "duration", .. })
        ));
        assert!(matches!(
            eval("*sum", &format!("{huge};{huge}")),
            Err(AgentError::Conversion { target: "int64", .. })
        ));
        assert!(matches!(eval("*difference", "1s;2s"), Err(AgentError::Conversion { .. })));
        assert!(matches!(eval("*divide", "1h;0"), Err(AgentError::Conversion { .. })));
        assert_eq!(eval("*multiply", "1h;2").unwrap(), DataValue::Duration(Duration::from_secs(7200)));
    }

    #[test]
    fn test_set_cgr_reply() {
        let mut ar = agent_request();
        let mut rep = DataMap::new();
        rep.set_field("MaxUsage", DataValue::Duration(Duration::from_secs(300)))
            .unwrap();
        ar.set_cgr_reply(Ok(rep)).unwrap();
        assert_eq!(value(&ar, "*cgrep.Error").unwrap(), "");
        assert_eq!(value(&ar, "*cgrep.MaxUsage").unwrap(), "5m0s");

        ar.set_cgr_reply(Err("RALS_ERROR:insufficient credit".into())).unwrap();
        assert_eq!(value(&ar, "*cgrep.Error").unwrap(), "RALS_ERROR:insufficient credit");
        assert_eq!(value(&ar, "*cgrep.MaxUsage"), Err(AgentError::NotFound));
    }

    #[test]
    fn test_unknown_section_read() {
        let ar = agent_request();
        assert!(matches!(
            value(&ar, "*hdr.X"),
            Err(AgentError::UnsupportedSection(_))
        ));
    }
}
