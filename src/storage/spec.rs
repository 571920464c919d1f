//! Index specifications
//!
//! Indexes are created and opened from a flat string-keyed property map:
//!
//! | key | meaning |
//! |---|---|
//! | `name` | index name (required) |
//! | `kind` | `incore`, `inline`, `external` or `shadow` |
//! | `indexpath` | directory holding `<name>.tix` (required unless in-core) |
//! | `datapath` | payload file (required for shadow indexes) |
//! | `datatype` | default data type name for appended items |
//! | `loadstyle` | `all`, `hollow` or `none` |
//! | `readonly` | `true` or `false` |
//! | `description` | free text stored in the header |
//! | `policy` | cache policy, see [`PolicyConfig`] |
//!
//! Any other key is kept and stored in the header's extension options.

use crate::index::PolicyConfig;
use crate::storage::error::{IndexError, IndexResult};
use crate::storage::header::IndexKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Extension of the index file
pub const INDEX_EXTENSION: &str = "tix";

/// Extension of the companion data file of external indexes
pub const DATA_EXTENSION: &str = "tdat";

const KNOWN_KEYS: &[&str] = &[
    "name",
    "kind",
    "indexpath",
    "datapath",
    "datatype",
    "loadstyle",
    "readonly",
    "description",
    "policy",
];

/// How much of an index is read into memory when it is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStyle {
    /// Every item with its payload
    All,
    /// Every item, payloads left in storage
    #[default]
    Hollow,
    /// Nothing; items load on first access
    None,
}

impl fmt::Display for LoadStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStyle::All => write!(f, "all"),
            LoadStyle::Hollow => write!(f, "hollow"),
            LoadStyle::None => write!(f, "none"),
        }
    }
}

impl FromStr for LoadStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(LoadStyle::All),
            "hollow" => Ok(LoadStyle::Hollow),
            "none" => Ok(LoadStyle::None),
            other => Err(format!("unknown load style: {}", other)),
        }
    }
}

/// Values used for properties that are not supplied
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecDefaults {
    pub load_style: LoadStyle,
    pub policy: PolicyConfig,
}

/// Validated creation/open parameters of one index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub kind: IndexKind,
    pub index_dir: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub data_type: Option<String>,
    pub load_style: LoadStyle,
    pub read_only: bool,
    pub description: Option<String>,
    pub policy: PolicyConfig,
    pub extra: BTreeMap<String, String>,
}

impl IndexSpec {
    /// Memory-only index
    pub fn in_core(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::InCore,
            index_dir: None,
            data_path: None,
            data_type: None,
            load_style: LoadStyle::All,
            read_only: false,
            description: None,
            policy: PolicyConfig::Keep,
            extra: BTreeMap::new(),
        }
    }

    /// File-backed index of `kind` stored under `index_dir`
    pub fn file(kind: IndexKind, name: impl Into<String>, index_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            index_dir: Some(index_dir.into()),
            load_style: LoadStyle::default(),
            ..Self::in_core(name)
        }
    }

    /// Builder method: set the data file
    pub fn data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    /// Builder method: set the load style
    pub fn load_style(mut self, load_style: LoadStyle) -> Self {
        self.load_style = load_style;
        self
    }

    /// Builder method: set the cache policy
    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Builder method: open read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Builder method: set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder method: set the default data type name
    pub fn data_type(mut self, name: impl Into<String>) -> Self {
        self.data_type = Some(name.into());
        self
    }

    /// Parse and validate a property map
    pub fn from_properties(properties: &HashMap<String, String>) -> IndexResult<Self> {
        Self::from_properties_with(properties, SpecDefaults::default())
    }

    /// Parse and validate a property map, filling gaps from `defaults`
    pub fn from_properties_with(
        properties: &HashMap<String, String>,
        defaults: SpecDefaults,
    ) -> IndexResult<Self> {
        let get = |key: &str| {
            properties
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let name = get("name")
            .ok_or_else(|| invalid("missing required property 'name'"))?
            .to_string();

        let index_dir = get("indexpath").map(PathBuf::from);

        let kind = match get("kind") {
            Some(kind) => kind.parse::<IndexKind>().map_err(invalid)?,
            None if index_dir.is_some() => IndexKind::External,
            None => IndexKind::InCore,
        };

        let load_style = match get("loadstyle") {
            Some(style) => style.parse::<LoadStyle>().map_err(invalid)?,
            None => defaults.load_style,
        };

        let read_only = match get("readonly") {
            Some(flag) => parse_bool(flag)?,
            None => false,
        };

        let policy = match get("policy") {
            Some(policy) => policy.parse::<PolicyConfig>().map_err(invalid)?,
            None => defaults.policy,
        };

        let extra = properties
            .iter()
            .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let spec = Self {
            name,
            kind,
            index_dir,
            data_path: get("datapath").map(PathBuf::from),
            data_type: get("datatype").map(str::to_string),
            load_style,
            read_only,
            description: get("description").map(str::to_string),
            policy,
            extra,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check that the properties are complete and consistent
    pub fn validate(&self) -> IndexResult<()> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(invalid(format!("invalid index name '{}'", self.name)));
        }

        match self.kind {
            IndexKind::InCore => {
                if self.policy.removes_items() {
                    return Err(invalid(
                        "an in-core index cannot regenerate removed items",
                    ));
                }
                if self.read_only {
                    return Err(invalid("an in-core index cannot be read-only"));
                }
            }
            IndexKind::Inline | IndexKind::External => {
                if self.index_dir.is_none() {
                    return Err(invalid(format!(
                        "{} index requires 'indexpath'",
                        self.kind
                    )));
                }
            }
            IndexKind::Shadow => {
                if self.index_dir.is_none() {
                    return Err(invalid("shadow index requires 'indexpath'"));
                }
                if self.data_path.is_none() {
                    return Err(invalid("shadow index requires 'datapath'"));
                }
            }
        }

        Ok(())
    }

    /// Path of the index file; `None` for in-core indexes
    pub fn index_file(&self) -> Option<PathBuf> {
        if !self.kind.is_file_backed() {
            return None;
        }
        self.index_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", self.name, INDEX_EXTENSION)))
    }

    /// Path of the payload file for external and shadow indexes
    pub fn data_file(&self) -> Option<PathBuf> {
        match self.kind {
            IndexKind::External => self.data_path.clone().or_else(|| {
                self.index_dir
                    .as_ref()
                    .map(|dir| dir.join(format!("{}.{}", self.name, DATA_EXTENSION)))
            }),
            IndexKind::Shadow => self.data_path.clone(),
            IndexKind::InCore | IndexKind::Inline => None,
        }
    }

    /// Canonical URI: `file://<index file>` or `mem:<name>`
    pub fn uri(&self) -> String {
        match self.index_file() {
            Some(path) => format!("file://{}", absolute(&path).display()),
            None => format!("mem:{}", self.name),
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

fn parse_bool(value: &str) -> IndexResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(invalid(format!("invalid boolean '{}'", other))),
    }
}

fn invalid(message: impl Into<String>) -> IndexError {
    IndexError::SpecificationInvalid(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_external() {
        let spec = IndexSpec::from_properties(&props(&[
            ("name", "events"),
            ("indexpath", "/var/lib/ti"),
            ("loadstyle", "NONE"),
            ("readonly", "true"),
            ("policy", "hollow-after-use:8"),
            ("owner", "ops"),
        ]))
        .unwrap();

        assert_eq!(spec.kind, IndexKind::External);
        assert_eq!(spec.load_style, LoadStyle::None);
        assert!(spec.read_only);
        assert_eq!(spec.policy, PolicyConfig::HollowAfterUse(8));
        assert_eq!(spec.extra.get("owner").map(String::as_str), Some("ops"));
        assert_eq!(spec.index_file(), Some(PathBuf::from("/var/lib/ti/events.tix")));
        assert_eq!(spec.data_file(), Some(PathBuf::from("/var/lib/ti/events.tdat")));
        assert_eq!(spec.uri(), "file:///var/lib/ti/events.tix");
    }

    #[test]
    fn test_in_core_by_default() {
        let spec = IndexSpec::from_properties(&props(&[("name", "scratch")])).unwrap();
        assert_eq!(spec.kind, IndexKind::InCore);
        assert_eq!(spec.uri(), "mem:scratch");
        assert_eq!(spec.index_file(), None);
    }

    #[test]
    fn test_defaults_fill_gaps() {
        let defaults = SpecDefaults {
            load_style: LoadStyle::All,
            policy: PolicyConfig::HollowAtDataVolume(4096),
        };
        let spec = IndexSpec::from_properties_with(
            &props(&[("name", "x"), ("indexpath", "/tmp")]),
            defaults,
        )
        .unwrap();
        assert_eq!(spec.load_style, LoadStyle::All);
        assert_eq!(spec.policy, PolicyConfig::HollowAtDataVolume(4096));
    }

    #[test]
    fn test_invalid_specifications() {
        let cases: &[&[(&str, &str)]] = &[
            &[("indexpath", "/tmp")],
            &[("name", "x"), ("kind", "external")],
            &[("name", "x"), ("kind", "shadow"), ("indexpath", "/tmp")],
            &[("name", "x"), ("loadstyle", "some")],
            &[("name", "x"), ("readonly", "maybe")],
            &[("name", "x"), ("policy", "remove-after-use:4")],
            &[("name", "x"), ("kind", "btree"), ("indexpath", "/tmp")],
            &[("name", "a/b"), ("indexpath", "/tmp")],
        ];

        for case in cases {
            assert!(
                matches!(
                    IndexSpec::from_properties(&props(case)),
                    Err(IndexError::SpecificationInvalid(_))
                ),
                "accepted {:?}",
                case
            );
        }
    }

    #[test]
    fn test_shadow_data_file() {
        let spec = IndexSpec::file(IndexKind::Shadow, "cam", "/idx").data_path("/video/cam.raw");
        assert!(spec.validate().is_ok());
        assert_eq!(spec.data_file(), Some(PathBuf::from("/video/cam.raw")));
    }
}
