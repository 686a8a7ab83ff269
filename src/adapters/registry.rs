//! Adapter registry: the closed, startup-built set of configured provider
//! adapters. Immutable after construction, mirroring the "global state
//! restricted to a handful of startup-built maps" design note — the registry
//! itself lives in `AppState` behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, ToolConfig};
use crate::models::CapabilityDescriptor;

use super::claude::ClaudeAdapter;
use super::gemini::GeminiAdapter;
use super::openai::OpenAiAdapter;
use super::Adapter;

/// Picks a concrete adapter implementation by sniffing the configured tool
/// name, since the TOML `[tools.<name>]` table carries no explicit "kind"
/// field (per spec.md §6). Names containing a recognized provider family
/// dispatch to that family's wire format; everything else is assumed to
/// speak the OpenAI-compatible `chat/completions` shape, which is how most
/// proxying/aggregator providers (Perplexity, local OpenAI-compatible
/// gateways, etc.) are actually reached in practice.
fn build_adapter(name: &str, tool: &ToolConfig) -> Arc<dyn Adapter> {
    let api_key = tool.api_key.clone().unwrap_or_default();
    let model = tool.model.clone().unwrap_or_else(|| name.to_string());
    let lower = name.to_ascii_lowercase();

    if lower.contains("claude") || lower.contains("anthropic") {
        Arc::new(ClaudeAdapter::new(name, api_key, model, None))
    } else if lower.contains("gemini") || lower.contains("google") {
        Arc::new(GeminiAdapter::new(name, api_key, model, None))
    } else {
        Arc::new(OpenAiAdapter::new(name, api_key, model, None))
    }
}

/// The live, immutable set of provider adapters built from configuration at
/// startup.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn from_config(config: &Config) -> Self {
        let mut adapters = HashMap::new();
        for (name, tool) in &config.tools {
            if !tool.enabled {
                continue;
            }
            adapters.insert(name.clone(), build_adapter(name, tool));
        }
        Self { adapters }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    /// The first candidate from an ordered list that exists in the live
    /// adapter map, per the orchestrator's selection rule.
    pub fn first_available_candidate<'a>(&self, candidates: &'a [String]) -> Option<&'a str> {
        candidates.iter().map(String::as_str).find(|c| self.contains(c))
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.adapters.values().map(|a| a.capabilities().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(model: &str) -> ToolConfig {
        ToolConfig {
            api_key_env: "X".into(),
            enabled: true,
            model: Some(model.into()),
            api_key: Some("k".into()),
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_success_threshold: 2,
            circuit_breaker_timeout_secs: 60,
        }
    }

    #[test]
    fn dispatches_by_name_family() {
        let claude = build_adapter("claude", &tool("claude-3"));
        assert_eq!(claude.name(), "claude");
        let gemini = build_adapter("gemini", &tool("gemini-1.5"));
        assert_eq!(gemini.name(), "gemini");
        let gpt = build_adapter("gpt", &tool("gpt-4o"));
        assert_eq!(gpt.name(), "gpt");
    }

    #[test]
    fn disabled_tools_are_excluded() {
        let mut tools = HashMap::new();
        tools.insert("gpt".to_string(), ToolConfig { enabled: false, ..tool("gpt-4o") });
        let config_tools = tools;
        let mut adapters = HashMap::new();
        for (name, t) in &config_tools {
            if t.enabled {
                adapters.insert(name.clone(), build_adapter(name, t));
            }
        }
        let registry = AdapterRegistry { adapters };
        assert!(registry.is_empty());
    }

    #[test]
    fn first_available_candidate_picks_first_match() {
        let mut adapters: HashMap<String, Arc<dyn Adapter>> = HashMap::new();
        adapters.insert("gpt".to_string(), build_adapter("gpt", &tool("gpt-4o")));
        let registry = AdapterRegistry { adapters };
        let candidates = vec!["claude".to_string(), "gpt".to_string()];
        assert_eq!(registry.first_available_candidate(&candidates), Some("gpt"));
    }
}
