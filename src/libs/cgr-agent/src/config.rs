//! Request processor configuration

use serde::{Deserialize, Serialize};

use crate::dispatcher::{ProcessorFlags, META_CONTINUE};
use crate::error::{AgentError, AgentResult};
use crate::rsr::RsrParsers;
use crate::template::{compile_templates, FcTemplate, FcTemplateConfig, TemplateSets};
use crate::tree::DataProvider;

/// Request processor as written in configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestProcessorConfig {
    pub id: String,
    /// Tenant expression; empty uses the agent default
    pub tenant: String,
    pub filters: Vec<String>,
    pub flags: Vec<String>,
    pub timezone: String,
    pub request_fields: Vec<FcTemplateConfig>,
    pub reply_fields: Vec<FcTemplateConfig>,
}

impl RequestProcessorConfig {
    /// Compile templates and flags
    pub fn compile(&self, sets: &TemplateSets) -> AgentResult<RequestProcessor> {
        let ctx = |e: AgentError| AgentError::Template(format!("processor <{}>: {e}", self.id));
        Ok(RequestProcessor {
            id: self.id.clone(),
            tenant: RsrParsers::parse(&self.tenant).map_err(ctx)?,
            filters: self.filters.clone(),
            flags: ProcessorFlags::parse(&self.flags),
            timezone: self.timezone.clone(),
            request_fields: compile_templates(&self.request_fields, sets).map_err(ctx)?,
            reply_fields: compile_templates(&self.reply_fields, sets).map_err(ctx)?,
        })
    }
}

/// Compiled request processor
#[derive(Debug, Clone)]
pub struct RequestProcessor {
    pub id: String,
    pub tenant: RsrParsers,
    pub filters: Vec<String>,
    pub flags: ProcessorFlags,
    pub timezone: String,
    pub request_fields: Vec<FcTemplate>,
    pub reply_fields: Vec<FcTemplate>,
}

impl RequestProcessor {
    /// Keep running later processors after this one handled the request
    pub fn continues(&self) -> bool {
        self.flags.has(META_CONTINUE)
    }

    /// Tenant for a request, falling back to `default`
    pub fn tenant(&self, dp: &dyn DataProvider, default: &str) -> AgentResult<String> {
        if self.tenant.is_empty() {
            return Ok(default.to_string());
        }
        let tenant = self.tenant.parse_data_provider(dp)?;
        Ok(if tenant.is_empty() { default.to_string() } else { tenant })
    }

    /// Timezone for a request, falling back to `default`
    pub fn timezone<'a>(&'a self, default: &'a str) -> &'a str {
        if self.timezone.is_empty() {
            default
        } else {
            &self.timezone
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DataMap;

    #[test]
    fn test_compile_processor() {
        let cfg = RequestProcessorConfig {
            id: "init".into(),
            flags: vec!["*initiate".into(), "*continue".into()],
            request_fields: vec![FcTemplateConfig::new("OriginID", "*variable", "*cgreq.OriginID", "~*req.Session-Id")],
            ..Default::default()
        };
        let p = cfg.compile(&TemplateSets::new()).unwrap();
        assert!(p.continues());
        assert_eq!(p.request_fields.len(), 1);
        assert_eq!(p.timezone("UTC"), "UTC");
    }

    #[test]
    fn test_compile_error_names_processor() {
        let cfg = RequestProcessorConfig {
            id: "broken".into(),
            reply_fields: vec![FcTemplateConfig::new("X", "*constant", "*req.X", "1")],
            ..Default::default()
        };
        let err = cfg.compile(&TemplateSets::new()).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_tenant_expression() {
        let mut dp = DataMap::new();
        dp.set_field("Realm", "example.org").unwrap();
        let cfg = RequestProcessorConfig {
            tenant: "~Realm".into(),
            ..Default::default()
        };
        let p = cfg.compile(&TemplateSets::new()).unwrap();
        assert_eq!(p.tenant(&dp, "cgrates.org").unwrap(), "example.org");

        let p = RequestProcessorConfig::default().compile(&TemplateSets::new()).unwrap();
        assert_eq!(p.tenant(&dp, "cgrates.org").unwrap(), "cgrates.org");
    }
}
