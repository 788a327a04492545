//! Agent configuration
//!
//! Loaded once from YAML at startup:
//!
//! ```yaml
//! general:
//!   default_tenant: cgrates.org
//!   default_timezone: UTC
//! filters:
//!   FLTR_VOICE: ["*prefix:~*req.Service-Context-Id:voice"]
//! diameter_agent:
//!   enabled: true
//!   listen: 127.0.0.1:3868
//!   request_processors:
//!     - id: voice_init
//!       filters: ["FLTR_VOICE", "*string:~*req.CC-Request-Type:1"]
//!       flags: ["*initiate", "*accounts"]
//!       request_fields:
//!         - { tag: OriginID, path: "*cgreq.OriginID", type: "*variable", value: "~*req.Session-Id" }
//!       reply_fields:
//!         - { tag: CCATemplate, type: "*template", value: "*cca" }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use cgr_agent::value::TZ_LOCAL;
use cgr_agent::{
    FcTemplateConfig, InlineFilterS, RequestProcessor, RequestProcessorConfig, TemplateSets,
    DEFAULT_TENANT,
};
use serde::{Deserialize, Serialize};

use crate::error::{DiameterError, DiameterResult};

/// Template used to build error answers
pub const ERR_TEMPLATE: &str = "*err";
/// Template with the mandatory Credit-Control-Answer fields
pub const CCA_TEMPLATE: &str = "*cca";

/// Whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CgrConfig {
    pub general: GeneralConfig,
    /// Named filter profiles: ID (or `tenant:ID`) to inline rules
    pub filters: HashMap<String, Vec<String>>,
    pub diameter_agent: DiameterAgentConfig,
}

/// Settings shared by every agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub node_id: String,
    pub default_tenant: String,
    pub default_timezone: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            node_id: "cgr-diameterd".to_string(),
            default_tenant: DEFAULT_TENANT.to_string(),
            default_timezone: TZ_LOCAL.to_string(),
        }
    }
}

/// Diameter agent section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiameterAgentConfig {
    pub enabled: bool,
    pub listen: String,
    /// Directory with extra dictionary files; empty uses the built-ins only
    pub dictionaries_path: String,
    pub origin_host: String,
    pub origin_realm: String,
    pub vendor_id: u32,
    pub product_name: String,
    /// Requests processed at once; negative means unlimited
    pub concurrent_requests: i64,
    /// Named templates, merged over the built-in ones
    pub templates: TemplateSets,
    pub request_processors: Vec<RequestProcessorConfig>,
}

impl Default for DiameterAgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:3868".to_string(),
            dictionaries_path: String::new(),
            origin_host: "CGR-DA".to_string(),
            origin_realm: "cgrates.org".to_string(),
            vendor_id: 0,
            product_name: "CGRateS".to_string(),
            concurrent_requests: -1,
            templates: TemplateSets::new(),
            request_processors: Vec::new(),
        }
    }
}

impl CgrConfig {
    /// Read and parse a YAML file
    pub fn load(path: &Path) -> DiameterResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> DiameterResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check everything that would otherwise fail at request time
    pub fn validate(&self) -> DiameterResult<()> {
        let agent = &self.diameter_agent;
        agent.listen_addr()?;
        if agent.origin_host.is_empty() || agent.origin_realm.is_empty() {
            return Err(DiameterError::Config("origin_host and origin_realm are required".into()));
        }
        if agent.concurrent_requests == 0 {
            return Err(DiameterError::Config("concurrent_requests must be positive or -1".into()));
        }
        let filter_s = self.filter_s()?;
        agent.compile_processors()?;
        for p in &agent.request_processors {
            filter_s
                .validate(&self.general.default_tenant, &p.filters)
                .map_err(|e| DiameterError::Config(format!("processor <{}>: {e}", p.id)))?;
        }
        Ok(())
    }

    /// Filter evaluator holding the configured profiles
    pub fn filter_s(&self) -> DiameterResult<InlineFilterS> {
        InlineFilterS::with_profiles(&self.filters)
            .map_err(|e| DiameterError::Config(format!("filters: {e}")))
    }
}

impl DiameterAgentConfig {
    pub fn listen_addr(&self) -> DiameterResult<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| DiameterError::Config(format!("invalid listen address <{}>: {e}", self.listen)))
    }

    /// Built-in templates overridden by the configured ones
    pub fn template_sets(&self) -> TemplateSets {
        let mut sets = builtin_templates();
        sets.extend(self.templates.clone());
        sets
    }

    /// Compile every request processor in declaration order
    pub fn compile_processors(&self) -> DiameterResult<Vec<RequestProcessor>> {
        let sets = self.template_sets();
        Ok(self
            .request_processors
            .iter()
            .map(|p| p.compile(&sets))
            .collect::<Result<Vec<_>, _>>()?)
    }
}

/// `*err` and `*cca` templates
pub fn builtin_templates() -> TemplateSets {
    let origin = || {
        [
            FcTemplateConfig::new("SessionId", "*variable", "*rep.Session-Id", "~*req.Session-Id")
                .mandatory(),
            FcTemplateConfig::new("OriginHost", "*variable", "*rep.Origin-Host", "~*vars.OriginHost")
                .mandatory(),
            FcTemplateConfig::new("OriginRealm", "*variable", "*rep.Origin-Realm", "~*vars.OriginRealm")
                .mandatory(),
        ]
    };

    let mut cca = vec![];
    let [session_id, origin_host, origin_realm] = origin();
    cca.push(session_id);
    cca.push(FcTemplateConfig::new("ResultCode", "*constant", "*rep.Result-Code", "2001"));
    cca.push(
        FcTemplateConfig::new("ResultCode", "*constant", "*rep.Result-Code", "5030")
            .with_filters(&["*prefix:~*cgrep.Error:RALS_ERROR"]),
    );
    cca.push(
        FcTemplateConfig::new("ResultCode", "*constant", "*rep.Result-Code", "3004")
            .with_filters(&["*prefix:~*cgrep.Error:TOO_BUSY"]),
    );
    cca.push(origin_host);
    cca.push(origin_realm);
    cca.push(
        FcTemplateConfig::new("AuthApplicationId", "*variable", "*rep.Auth-Application-Id", "~*vars.*appid")
            .mandatory(),
    );
    cca.push(
        FcTemplateConfig::new("CCRequestType", "*variable", "*rep.CC-Request-Type", "~*req.CC-Request-Type")
            .mandatory(),
    );
    cca.push(
        FcTemplateConfig::new("CCRequestNumber", "*variable", "*rep.CC-Request-Number", "~*req.CC-Request-Number")
            .mandatory(),
    );

    let mut sets = TemplateSets::new();
    sets.insert(ERR_TEMPLATE.to_string(), origin().to_vec());
    sets.insert(CCA_TEMPLATE.to_string(), cca);
    sets
}
