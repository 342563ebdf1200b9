//! Configuration model for ccproxy.
//!
//! Read from a `ccproxy.yaml` with a single `ccproxy:` section. All fields
//! carry serde defaults so an empty file yields a working passthrough
//! proxy. Malformed sources (neither or both of `command`/`file`) are
//! construction errors and abort startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("oauth source '{provider}' must set exactly one of 'command' or 'file'")]
    InvalidSource { provider: String },
    #[error("hook entry is missing the 'hook' key")]
    MissingHookName,
    #[error("rule entry is missing 'name' or 'rule'")]
    InvalidRule,
}

/// How an OAuth token is obtained for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Shell command; stdout (trimmed) is the token.
    Command(String),
    /// File whose trimmed contents are the token.
    File(PathBuf),
}

/// Normalized per-provider OAuth source.
#[derive(Debug, Clone)]
pub struct OAuthSource {
    pub kind: SourceKind,
    pub user_agent: Option<String>,
    /// Hostname substrings routed to this provider's token.
    pub destinations: Vec<String>,
}

/// Raw yaml form of an OAuth source: either a bare command string or the
/// extended mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OAuthSourceEntry {
    Command(String),
    Extended {
        #[serde(default)]
        command: Option<String>,
        #[serde(default)]
        file: Option<PathBuf>,
        #[serde(default)]
        user_agent: Option<String>,
        #[serde(default)]
        destinations: Vec<String>,
    },
}

impl OAuthSourceEntry {
    pub fn normalize(&self, provider: &str) -> ConfigResult<OAuthSource> {
        match self {
            OAuthSourceEntry::Command(command) => Ok(OAuthSource {
                kind: SourceKind::Command(command.clone()),
                user_agent: None,
                destinations: Vec::new(),
            }),
            OAuthSourceEntry::Extended {
                command,
                file,
                user_agent,
                destinations,
            } => {
                let kind = match (command, file) {
                    (Some(command), None) => SourceKind::Command(command.clone()),
                    (None, Some(file)) => SourceKind::File(file.clone()),
                    _ => {
                        return Err(ConfigError::InvalidSource {
                            provider: provider.to_string(),
                        });
                    }
                };
                Ok(OAuthSource {
                    kind,
                    user_agent: user_agent.clone(),
                    destinations: destinations.clone(),
                })
            }
        }
    }
}

/// One entry of the ordered `hooks:` list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HookEntry {
    Path(String),
    Detailed {
        hook: String,
        #[serde(default)]
        params: serde_json::Map<String, serde_json::Value>,
    },
}

impl HookEntry {
    /// Hook name: the last segment of a dotted path.
    pub fn name(&self) -> ConfigResult<&str> {
        let path = match self {
            HookEntry::Path(path) => path,
            HookEntry::Detailed { hook, .. } => hook,
        };
        let name = path.rsplit('.').next().unwrap_or("");
        if name.is_empty() {
            return Err(ConfigError::MissingHookName);
        }
        Ok(name)
    }

    pub fn params(&self) -> serde_json::Map<String, serde_json::Value> {
        match self {
            HookEntry::Path(_) => serde_json::Map::new(),
            HookEntry::Detailed { params, .. } => params.clone(),
        }
    }
}

/// One entry of the ordered `rules:` list.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleEntry {
    pub name: String,
    pub rule: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RuleEntry {
    /// Rule kind: the last segment of the dotted class path.
    pub fn rule_name(&self) -> ConfigResult<&str> {
        let name = self.rule.rsplit('.').next().unwrap_or("");
        if self.name.is_empty() || name.is_empty() {
            return Err(ConfigError::InvalidRule);
        }
        Ok(name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MitmConfig {
    pub enabled: bool,
    pub port: u16,
    /// Max captured body bytes; 0 means unlimited.
    pub max_body_size: usize,
    pub capture_bodies: bool,
    pub excluded_hosts: Vec<String>,
    pub llm_hosts: Vec<String>,
    pub debug: bool,
    pub database_url: Option<String>,
}

impl Default for MitmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8081,
            max_body_size: 0,
            capture_bodies: true,
            excluded_hosts: Vec::new(),
            llm_hosts: Vec::new(),
            debug: false,
            database_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CcproxyConfig {
    pub debug: bool,
    pub default_model_passthrough: bool,
    /// Provider name -> token source. BTreeMap keeps load order stable.
    pub oat_sources: BTreeMap<String, OAuthSourceEntry>,
    /// Token TTL in seconds.
    pub oauth_ttl: u64,
    /// Fraction of the TTL held back before a token counts as expired.
    pub oauth_refresh_buffer: f64,
    pub hooks: Vec<HookEntry>,
    pub rules: Vec<RuleEntry>,
    pub mitm: MitmConfig,
}

impl Default for CcproxyConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_model_passthrough: true,
            oat_sources: BTreeMap::new(),
            oauth_ttl: 28800,
            oauth_refresh_buffer: 0.1,
            hooks: Vec::new(),
            rules: Vec::new(),
            mitm: MitmConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    ccproxy: CcproxyConfig,
}

impl CcproxyConfig {
    pub fn from_yaml_str(input: &str) -> ConfigResult<Self> {
        let file: ConfigFile = serde_yaml::from_str(input)?;
        let config = file.ccproxy;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_path(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    fn validate(&self) -> ConfigResult<()> {
        for (provider, entry) in &self.oat_sources {
            entry.normalize(provider)?;
        }
        for entry in &self.hooks {
            entry.name()?;
        }
        for rule in &self.rules {
            rule.rule_name()?;
        }
        Ok(())
    }

    /// Normalized sources in declaration order.
    pub fn oauth_sources(&self) -> ConfigResult<BTreeMap<String, OAuthSource>> {
        self.oat_sources
            .iter()
            .map(|(provider, entry)| Ok((provider.clone(), entry.normalize(provider)?)))
            .collect()
    }
}
