//! Model provider enumeration and model naming.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of vote providers.
///
/// Providers are selected by configuration at run start; each exposes the
/// same vote-call contract, so adding a provider is one new client module
/// plus one arm here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAI,
    Claude,
}

const PROVIDER_PARSE_VALUES: &[&str] = &["openai", "gpt", "claude", "anthropic"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} value '{raw}'; expected one of: {expected:?}")]
pub struct ModelParseError {
    kind: &'static str,
    raw: String,
    expected: &'static [&'static str],
}

impl ModelParseError {
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Claude => "claude",
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "GPT",
            Provider::Claude => "Claude",
        }
    }

    #[must_use]
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Claude => "ANTHROPIC_API_KEY",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ModelParseError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "gpt" | "chatgpt" => Ok(Provider::OpenAI),
            "claude" | "anthropic" => Ok(Provider::Claude),
            other => Err(ModelParseError {
                kind: "provider",
                raw: other.to_owned(),
                expected: PROVIDER_PARSE_VALUES,
            }),
        }
    }

    #[must_use]
    pub fn all() -> &'static [Provider] {
        &[Provider::OpenAI, Provider::Claude]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const OPENAI_MODEL_PREFIXES: &[&str] = &["gpt-", "o1", "o3", "o4"];
const CLAUDE_MODEL_PREFIX: &str = "claude-";

/// A concrete model id that knows which provider serves it.
///
/// The constructor infers the provider from the id prefix, so a vote call
/// can never be routed to the wrong API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelName {
    id: String,
    provider: Provider,
}

impl ModelName {
    pub fn parse(id: impl Into<String>) -> Result<Self, ModelParseError> {
        let id = id.into();
        let lower = id.to_ascii_lowercase();
        if lower.starts_with(CLAUDE_MODEL_PREFIX) {
            return Ok(Self {
                id,
                provider: Provider::Claude,
            });
        }
        if OPENAI_MODEL_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return Ok(Self {
                id,
                provider: Provider::OpenAI,
            });
        }
        Err(ModelParseError {
            kind: "model id",
            raw: id,
            expected: &["gpt-*", "o*", "claude-*"],
        })
    }

    /// Construct with an explicit provider, for model ids that do not
    /// follow either naming convention (proxies, fine-tunes).
    #[must_use]
    pub fn with_provider(id: impl Into<String>, provider: Provider) -> Self {
        Self {
            id: id.into(),
            provider,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Default voting ensemble: one cheap model per provider.
    #[must_use]
    pub fn default_ensemble() -> Vec<ModelName> {
        vec![
            ModelName::with_provider("gpt-4o-mini", Provider::OpenAI),
            ModelName::with_provider("claude-3-5-haiku-latest", Provider::Claude),
        ]
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::{ModelName, Provider};

    #[test]
    fn infers_provider_from_model_id() {
        assert_eq!(
            ModelName::parse("gpt-4o-mini").unwrap().provider(),
            Provider::OpenAI
        );
        assert_eq!(
            ModelName::parse("o3-mini").unwrap().provider(),
            Provider::OpenAI
        );
        assert_eq!(
            ModelName::parse("claude-3-5-haiku-latest").unwrap().provider(),
            Provider::Claude
        );
    }

    #[test]
    fn rejects_unknown_model_id() {
        let err = ModelName::parse("llama-70b").unwrap_err();
        assert_eq!(err.raw(), "llama-70b");
    }

    #[test]
    fn default_ensemble_covers_each_provider_once() {
        let providers: Vec<Provider> = ModelName::default_ensemble()
            .iter()
            .map(ModelName::provider)
            .collect();
        assert_eq!(providers, [Provider::OpenAI, Provider::Claude]);
    }

    #[test]
    fn provider_parse_accepts_aliases() {
        assert_eq!(Provider::parse("Anthropic").unwrap(), Provider::Claude);
        assert_eq!(Provider::parse("gpt").unwrap(), Provider::OpenAI);
        assert!(Provider::parse("gemini").is_err());
    }
}
