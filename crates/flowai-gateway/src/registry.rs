use std::collections::HashMap;
use std::sync::Arc;

use flowai_core::{ProviderKind, TextProvider};
use flowai_settings::GatewaySettings;

use crate::error::GatewayError;

/// Adapters keyed by vendor, plus the kind used when a request names none.
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn TextProvider>>,
    default_kind: ProviderKind,
}

impl ProviderRegistry {
    pub fn new(default_kind: ProviderKind) -> Self {
        Self {
            providers: HashMap::new(),
            default_kind,
        }
    }

    /// Empty registry whose default comes from `gateway.defaultProvider`.
    pub fn from_settings(settings: &GatewaySettings) -> Result<Self, GatewayError> {
        let default_kind = settings
            .default_provider
            .parse::<ProviderKind>()
            .map_err(|_| GatewayError::UnsupportedProvider(settings.default_provider.clone()))?;
        Ok(Self::new(default_kind))
    }

    /// Register an adapter under its own kind, returning the one it replaced.
    pub fn register(&mut self, provider: Arc<dyn TextProvider>) -> Option<Arc<dyn TextProvider>> {
        self.providers.insert(provider.kind(), provider)
    }

    pub fn default_kind(&self) -> ProviderKind {
        self.default_kind
    }

    pub fn is_registered(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// Resolve a request's provider name; `None` or blank means the default.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn TextProvider>, GatewayError> {
        let kind = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name
                .parse::<ProviderKind>()
                .map_err(|_| GatewayError::UnsupportedProvider(name.to_string()))?,
            None => self.default_kind,
        };
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| GatewayError::UnsupportedProvider(format!("no adapter registered for {kind}")))
    }
}
