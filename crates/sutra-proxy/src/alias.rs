// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use sutra_config::{ProxyConfig, ProxyProviderConfig};

use crate::ProxyError;

/// A fully resolved upstream target.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub provider: String,
    pub model: String,
    pub config: ProxyProviderConfig,
}

/// Maps requested model names onto configured upstream providers.
///
/// Resolution order: exact alias, fuzzy alias (either side contains the
/// other), explicit `provider/model` syntax, then the first wildcard
/// provider (one whose model list is empty).
pub struct AliasResolver {
    /// Sorted for deterministic fuzzy/wildcard selection.
    aliases: Vec<(String, String)>,
    providers: Vec<(String, ProxyProviderConfig)>,
}

impl AliasResolver {
    pub fn new(cfg: &ProxyConfig) -> Self {
        let mut aliases: Vec<(String, String)> = cfg
            .aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        aliases.sort_by(|a, b| a.0.cmp(&b.0));
        let mut providers: Vec<(String, ProxyProviderConfig)> = cfg
            .providers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        providers.sort_by(|a, b| a.0.cmp(&b.0));
        Self { aliases, providers }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn aliases(&self) -> &[(String, String)] {
        &self.aliases
    }

    fn provider(&self, name: &str) -> Option<&ProxyProviderConfig> {
        self.providers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Resolve an alias target of the form `provider/model`.
    fn from_target(&self, target: &str) -> Option<ResolvedTarget> {
        let (provider, model) = target.split_once('/')?;
        let config = self.provider(provider)?.clone();
        Some(ResolvedTarget {
            provider: provider.to_string(),
            model: model.to_string(),
            config,
        })
    }

    pub fn resolve(&self, requested: &str) -> Result<ResolvedTarget, ProxyError> {
        let lowered = requested.to_lowercase();

        // 1. Exact alias.
        if let Some((_, target)) = self.aliases.iter().find(|(a, _)| a == &lowered) {
            if let Some(t) = self.from_target(target) {
                return Ok(t);
            }
        }

        // 2. Fuzzy alias: either side contains the other.
        if let Some((_, target)) = self
            .aliases
            .iter()
            .find(|(a, _)| a.contains(&lowered) || lowered.contains(a.as_str()))
        {
            if let Some(t) = self.from_target(target) {
                return Ok(t);
            }
        }

        // 3. Explicit provider/model syntax.
        if let Some((provider, model)) = requested.split_once('/') {
            if let Some(config) = self.provider(provider) {
                return Ok(ResolvedTarget {
                    provider: provider.to_string(),
                    model: model.to_string(),
                    config: config.clone(),
                });
            }
        }

        // 4. First wildcard provider (empty model set accepts anything).
        if let Some((name, config)) = self.providers.iter().find(|(_, c)| c.models.is_empty()) {
            return Ok(ResolvedTarget {
                provider: name.clone(),
                model: requested.to_string(),
                config: config.clone(),
            });
        }

        Err(ProxyError::UnknownModel(requested.to_string()))
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use sutra_config::WireFormat;

    fn provider(models: &[&str]) -> ProxyProviderConfig {
        ProxyProviderConfig {
            base_url: "http://upstream".into(),
            api_key_env: None,
            format: WireFormat::Openai,
            models: models.iter().map(|m| m.to_string()).collect(),
            max_tokens_cap: None,
        }
    }

    fn resolver() -> AliasResolver {
        let mut aliases = HashMap::new();
        aliases.insert("sonnet".to_string(), "corp/llm-large".to_string());
        aliases.insert("haiku".to_string(), "corp/llm-small".to_string());
        let mut providers = HashMap::new();
        providers.insert("corp".to_string(), provider(&["llm-large", "llm-small"]));
        providers.insert("fallback".to_string(), provider(&[]));
        AliasResolver::new(&ProxyConfig {
            aliases,
            providers,
            ..Default::default()
        })
    }

    #[test]
    fn exact_alias_wins() {
        let t = resolver().resolve("sonnet").unwrap();
        assert_eq!(t.provider, "corp");
        assert_eq!(t.model, "llm-large");
    }

    #[test]
    fn fuzzy_contains_match() {
        let t = resolver().resolve("claude-sonnet-4").unwrap();
        assert_eq!(t.model, "llm-large", "\"claude-sonnet-4\" contains \"sonnet\"");
    }

    #[test]
    fn explicit_provider_slash_model() {
        let t = resolver().resolve("corp/custom-model").unwrap();
        assert_eq!(t.provider, "corp");
        assert_eq!(t.model, "custom-model");
    }

    #[test]
    fn wildcard_provider_takes_leftovers() {
        let t = resolver().resolve("some-exotic-model").unwrap();
        assert_eq!(t.provider, "fallback");
        assert_eq!(t.model, "some-exotic-model");
    }

    #[test]
    fn unresolvable_without_wildcard_is_an_error() {
        let mut aliases = HashMap::new();
        aliases.insert("a".to_string(), "corp/m".to_string());
        let mut providers = HashMap::new();
        providers.insert("corp".to_string(), provider(&["m"]));
        let r = AliasResolver::new(&ProxyConfig {
            aliases,
            providers,
            ..Default::default()
        });
        assert!(matches!(
            r.resolve("zzz").unwrap_err(),
            ProxyError::UnknownModel(_)
        ));
    }

    #[test]
    fn alias_matching_is_case_insensitive() {
        let t = resolver().resolve("Sonnet").unwrap();
        assert_eq!(t.model, "llm-large");
    }
}
