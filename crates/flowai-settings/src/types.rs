use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings object, mirrored by `~/.flowai/settings.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowSettings {
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
    pub gateway: GatewaySettings,
    pub markdown: MarkdownSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: crate::loader::flowai_dir().join("database").join("flowai.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-module overrides, e.g. `{"flowai_markdown": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    pub default_provider: String,
    pub request_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            default_provider: "grok".to_string(),
            request_timeout_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkdownSettings {
    pub export_related: bool,
    pub include_ancestors: bool,
    pub start_level: usize,
    pub reconcile: bool,
}

impl Default for MarkdownSettings {
    fn default() -> Self {
        Self {
            export_related: true,
            include_ancestors: false,
            start_level: 1,
            reconcile: true,
        }
    }
}

impl FlowSettings {
    /// Reject values no consumer can work with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.markdown.start_level == 0 || self.markdown.start_level > 6 {
            return Err(crate::SettingsError::InvalidValue(format!(
                "markdown.startLevel must be 1..=6, got {}",
                self.markdown.start_level
            )));
        }
        if self.gateway.request_timeout_ms == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "gateway.requestTimeoutMs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
