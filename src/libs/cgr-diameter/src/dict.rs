//! Diameter dictionaries
//!
//! A dictionary file is a YAML document listing applications with their
//! commands and AVP definitions:
//!
//! ```yaml
//! applications:
//!   - id: 4
//!     name: Diameter Credit Control Application
//!     commands:
//!       - { code: 272, short: CC, name: Credit-Control }
//!     avps:
//!       - { code: 415, name: CC-Request-Number, type: Unsigned32 }
//!       - { code: 873, name: Service-Information, type: Grouped, vendor_id: 10415 }
//! ```
//!
//! The base protocol and credit control applications are built in; files
//! from a directory are merged on top at startup. Lookups try the message's
//! application first and fall back to the base application.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::avp::{avp_flags, Avp, AvpData};
use crate::error::{DiameterError, DiameterResult};
use crate::message::BASE_APPLICATION_ID;

const BASE_DICTIONARY: &str = include_str!("../dict/base.yaml");
const CREDIT_CONTROL_DICTIONARY: &str = include_str!("../dict/credit_control.yaml");

/// AVP data type as declared in a dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvpType {
    Address,
    DiameterIdentity,
    DiameterUri,
    Enumerated,
    Float32,
    Float64,
    Grouped,
    IpFilterRule,
    Integer32,
    Integer64,
    OctetString,
    Time,
    Utf8String,
    Unsigned32,
    Unsigned64,
    /// Declared type the agent cannot decode or encode
    Unsupported,
}

impl AvpType {
    /// Parse a dictionary type name; unknown names map to `Unsupported`
    pub fn parse(s: &str) -> Self {
        match s {
            "Address" => Self::Address,
            "DiameterIdentity" => Self::DiameterIdentity,
            "DiameterURI" => Self::DiameterUri,
            "Enumerated" => Self::Enumerated,
            "Float32" => Self::Float32,
            "Float64" => Self::Float64,
            "Grouped" => Self::Grouped,
            "IPFilterRule" => Self::IpFilterRule,
            "Integer32" => Self::Integer32,
            "Integer64" => Self::Integer64,
            "OctetString" => Self::OctetString,
            "Time" => Self::Time,
            "UTF8String" => Self::Utf8String,
            "Unsigned32" => Self::Unsigned32,
            "Unsigned64" => Self::Unsigned64,
            _ => Self::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Address => "Address",
            Self::DiameterIdentity => "DiameterIdentity",
            Self::DiameterUri => "DiameterURI",
            Self::Enumerated => "Enumerated",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::Grouped => "Grouped",
            Self::IpFilterRule => "IPFilterRule",
            Self::Integer32 => "Integer32",
            Self::Integer64 => "Integer64",
            Self::OctetString => "OctetString",
            Self::Time => "Time",
            Self::Utf8String => "UTF8String",
            Self::Unsigned32 => "Unsigned32",
            Self::Unsigned64 => "Unsigned64",
            Self::Unsupported => "Unsupported",
        }
    }
}

impl fmt::Display for AvpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command definition
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Command {
    pub code: u32,
    /// Abbreviation without the R/A suffix, e.g. `CC`
    pub short: String,
    pub name: String,
}

/// AVP definition
#[derive(Debug, Clone, PartialEq)]
pub struct AvpDef {
    pub code: u32,
    pub name: String,
    /// 0 for IETF AVPs
    pub vendor_id: u32,
    pub avp_type: AvpType,
    pub mandatory: bool,
}

impl AvpDef {
    /// Header flags for AVPs built from this definition
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.mandatory {
            flags |= avp_flags::MANDATORY;
        }
        if self.vendor_id != 0 {
            flags |= avp_flags::VENDOR;
        }
        flags
    }

    /// Vendor-ID field for AVPs built from this definition
    pub fn vendor(&self) -> Option<u32> {
        (self.vendor_id != 0).then_some(self.vendor_id)
    }

    /// True when `avp` is an instance of this definition
    pub fn describes(&self, avp: &Avp) -> bool {
        avp.code == self.code && avp.vendor_id.unwrap_or(0) == self.vendor_id
    }

    /// Build an AVP of this definition around `data`
    pub fn build(&self, data: AvpData) -> Avp {
        Avp::new(self.code, self.flags(), self.vendor(), data)
    }
}

/// Commands and AVPs of one application
#[derive(Debug, Clone, Default)]
pub struct Application {
    pub id: u32,
    pub name: String,
    commands: HashMap<u32, Command>,
    avps: Vec<AvpDef>,
    by_name: HashMap<String, usize>,
    by_code: HashMap<(u32, u32), usize>,
}

impl Application {
    pub fn command(&self, code: u32) -> Option<&Command> {
        self.commands.get(&code)
    }

    fn avp_by_name(&self, name: &str) -> Option<&AvpDef> {
        self.by_name.get(name).map(|&i| &self.avps[i])
    }

    fn avp_by_code(&self, code: u32, vendor_id: u32) -> Option<&AvpDef> {
        self.by_code.get(&(code, vendor_id)).map(|&i| &self.avps[i])
    }

    fn insert_avp(&mut self, def: AvpDef) {
        let key = (def.code, def.vendor_id);
        let existing = self
            .by_code
            .get(&key)
            .or_else(|| self.by_name.get(&def.name))
            .copied();
        let idx = match existing {
            Some(idx) => {
                let old = &self.avps[idx];
                self.by_name.remove(&old.name);
                self.by_code.remove(&(old.code, old.vendor_id));
                self.avps[idx] = def;
                idx
            }
            None => {
                self.avps.push(def);
                self.avps.len() - 1
            }
        };
        let def = &self.avps[idx];
        self.by_name.insert(def.name.clone(), idx);
        self.by_code.insert(key, idx);
    }
}

#[derive(Debug, Deserialize)]
struct DictionaryFile {
    #[serde(default)]
    applications: Vec<ApplicationFile>,
}

#[derive(Debug, Deserialize)]
struct ApplicationFile {
    id: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    commands: Vec<Command>,
    #[serde(default)]
    avps: Vec<AvpFile>,
}

#[derive(Debug, Deserialize)]
struct AvpFile {
    code: u32,
    name: String,
    #[serde(rename = "type")]
    avp_type: String,
    #[serde(default)]
    vendor_id: u32,
    #[serde(default = "default_mandatory")]
    mandatory: bool,
}

fn default_mandatory() -> bool {
    true
}

/// Set of applications known to the agent
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    apps: BTreeMap<u32, Application>,
}

impl Dictionary {
    /// Empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Base protocol and credit control applications
    pub fn builtin() -> DiameterResult<Self> {
        let mut dict = Self::new();
        dict.load_str(BASE_DICTIONARY)?;
        dict.load_str(CREDIT_CONTROL_DICTIONARY)?;
        Ok(dict)
    }

    /// Merge one YAML dictionary document
    pub fn load_str(&mut self, yaml: &str) -> DiameterResult<()> {
        let file: DictionaryFile = serde_yaml::from_str(yaml)?;
        for app_file in file.applications {
            let app = self.apps.entry(app_file.id).or_insert_with(|| Application {
                id: app_file.id,
                ..Default::default()
            });
            if !app_file.name.is_empty() {
                app.name = app_file.name;
            }
            for cmd in app_file.commands {
                app.commands.insert(cmd.code, cmd);
            }
            for avp in app_file.avps {
                let avp_type = AvpType::parse(&avp.avp_type);
                if avp_type == AvpType::Unsupported {
                    log::debug!("AVP <{}> declared with unsupported type {}", avp.name, avp.avp_type);
                }
                app.insert_avp(AvpDef {
                    code: avp.code,
                    name: avp.name,
                    vendor_id: avp.vendor_id,
                    avp_type,
                    mandatory: avp.mandatory,
                });
            }
        }
        Ok(())
    }

    /// Merge every `.yaml`/`.yml` file of `dir`, in file name order
    pub fn load_dir(&mut self, dir: &Path) -> DiameterResult<usize> {
        let mut files: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"))
            })
            .collect();
        files.sort();
        for path in &files {
            let content = std::fs::read_to_string(path)?;
            self.load_str(&content).map_err(|e| {
                DiameterError::Dictionary(format!("{}: {e}", path.display()))
            })?;
            log::info!("Loaded Diameter dictionary {}", path.display());
        }
        Ok(files.len())
    }

    pub fn app(&self, id: u32) -> Option<&Application> {
        self.apps.get(&id)
    }

    /// IDs of every loaded application, base protocol included
    pub fn application_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.apps.keys().copied()
    }

    /// Command of `app_id`, falling back to the base application
    pub fn find_command(&self, app_id: u32, code: u32) -> DiameterResult<&Command> {
        self.lookup(app_id, |app| app.command(code))
            .ok_or(DiameterError::UnknownCommand(code))
    }

    /// AVP by name (or decimal code) as seen from `app_id`
    pub fn find_avp(&self, app_id: u32, name: &str) -> DiameterResult<&AvpDef> {
        let found = match name.parse::<u32>() {
            Ok(code) => self.lookup(app_id, |app| {
                app.avps.iter().find(|d| d.code == code)
            }),
            Err(_) => self.lookup(app_id, |app| app.avp_by_name(name)),
        };
        found.ok_or_else(|| {
            DiameterError::Dictionary(format!("AVP <{name}> not found for application {app_id}"))
        })
    }

    /// AVP by code and vendor as seen from `app_id`
    pub fn find_avp_by_code(&self, app_id: u32, code: u32, vendor_id: u32) -> Option<&AvpDef> {
        self.lookup(app_id, |app| app.avp_by_code(code, vendor_id))
    }

    fn lookup<'a, T: 'a>(&'a self, app_id: u32, f: impl Fn(&'a Application) -> Option<T>) -> Option<T> {
        self.apps
            .get(&app_id)
            .and_then(&f)
            .or_else(|| self.apps.get(&BASE_APPLICATION_ID).and_then(&f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let dict = Dictionary::builtin().unwrap();
        assert_eq!(dict.app(4).unwrap().name, "Diameter Credit Control Application");
        assert!(dict.app(16777238).is_none());

        let cc = dict.find_command(4, 272).unwrap();
        assert_eq!(cc.short, "CC");
        // base commands are visible from every application
        assert_eq!(dict.find_command(4, 280).unwrap().short, "DW");
        assert!(matches!(dict.find_command(4, 999), Err(DiameterError::UnknownCommand(999))));

        let cc_time = dict.find_avp(4, "CC-Time").unwrap();
        assert_eq!(cc_time.code, 420);
        assert_eq!(cc_time.avp_type, AvpType::Unsigned32);
        // Session-Id lives in the base application
        assert_eq!(dict.find_avp(4, "Session-Id").unwrap().code, 263);
        assert_eq!(dict.find_avp(4, "263").unwrap().name, "Session-Id");
        assert_eq!(dict.find_avp_by_code(4, 456, 0).unwrap().avp_type, AvpType::Grouped);
        assert!(dict.find_avp(4, "No-Such-AVP").is_err());
    }

    #[test]
    fn test_load_vendor_extension() {
        let mut dict = Dictionary::builtin().unwrap();
        dict.load_str(
            r#"
applications:
  - id: 4
    avps:
      - { code: 873, name: Service-Information, type: Grouped, vendor_id: 10415 }
      - { code: 1028, name: QoS-Class-Identifier, type: QoSFilterRule, vendor_id: 10415, mandatory: false }
"#,
        )
        .unwrap();

        let si = dict.find_avp(4, "Service-Information").unwrap();
        assert_eq!(si.vendor(), Some(10415));
        assert_eq!(si.flags(), avp_flags::VENDOR | avp_flags::MANDATORY);
        assert_eq!(dict.find_avp(4, "QoS-Class-Identifier").unwrap().avp_type, AvpType::Unsupported);
        // merge keeps the existing application name
        assert_eq!(dict.app(4).unwrap().name, "Diameter Credit Control Application");
        assert!(dict.find_avp_by_code(4, 873, 0).is_none());
    }

    #[test]
    fn test_redefinition_replaces() {
        let mut dict = Dictionary::new();
        dict.load_str("applications: [{ id: 0, avps: [{ code: 1, name: User-Name, type: OctetString }] }]")
            .unwrap();
        dict.load_str("applications: [{ id: 0, avps: [{ code: 1, name: User-Name, type: UTF8String }] }]")
            .unwrap();
        assert_eq!(dict.find_avp(0, "User-Name").unwrap().avp_type, AvpType::Utf8String);
    }

    #[test]
    fn test_load_dir() {
        let dir = std::env::temp_dir().join(format!("cgr-dict-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("tgpp.yaml"),
            "applications: [{ id: 4, avps: [{ code: 2, name: Test-AVP, type: Integer32 }] }]",
        )
        .unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut dict = Dictionary::builtin().unwrap();
        assert_eq!(dict.load_dir(&dir).unwrap(), 1);
        assert_eq!(dict.find_avp(4, "Test-AVP").unwrap().avp_type, AvpType::Integer32);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
