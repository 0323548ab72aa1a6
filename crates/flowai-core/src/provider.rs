use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::tokens::TokenUsage;

/// Vendors a conversation can be routed to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Grok,
    #[serde(rename = "openai")]
    OpenAi,
    Claude,
    Mistral,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grok => f.write_str("grok"),
            Self::OpenAi => f.write_str("openai"),
            Self::Claude => f.write_str("claude"),
            Self::Mistral => f.write_str("mistral"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grok" => Ok(Self::Grok),
            "openai" => Ok(Self::OpenAi),
            "claude" | "anthropic" => Ok(Self::Claude),
            "mistral" => Ok(Self::Mistral),
            other => Err(format!("unsupported provider: {other}")),
        }
    }
}

/// Options controlling generation.
#[derive(Clone, Debug, Default)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// Text plus token accounting returned by one provider call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Capability implemented by each vendor adapter (Grok, OpenAI, Claude, ...).
#[async_trait]
pub trait TextProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn model(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parse() {
        assert_eq!("grok".parse::<ProviderKind>(), Ok(ProviderKind::Grok));
        assert_eq!("OpenAI".parse::<ProviderKind>(), Ok(ProviderKind::OpenAi));
        assert_eq!("anthropic".parse::<ProviderKind>(), Ok(ProviderKind::Claude));
        assert!("llama".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn provider_kind_serde_matches_display() {
        for kind in [
            ProviderKind::Grok,
            ProviderKind::OpenAi,
            ProviderKind::Claude,
            ProviderKind::Mistral,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn default_is_grok() {
        assert_eq!(ProviderKind::default(), ProviderKind::Grok);
    }
}
