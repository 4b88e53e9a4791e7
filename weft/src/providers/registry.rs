//! Provider registry: resolve a caller model id to a provider binding and a
//! clean upstream model id, honoring feature toggles.
//!
//! Id grammar:
//! - `ollama@<server[:port]>/<model>` routes to a specific Ollama server;
//! - `<provider>/<model>` routes by the static registry;
//! - in OpenAI-compatible mode every id routes to the Agents fallback as-is.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use super::{
    provider_name, ProviderConfig, ProviderParams, ProxyParams, ALL_PROVIDERS, PROVIDER_AGENTS,
    PROVIDER_DEEPSEEK, PROVIDER_GIGACHAT, PROVIDER_OLLAMA, PROVIDER_OPENROUTER,
    PROVIDER_OPENROUTER_PROXY, PROVIDER_XROUTER, PROVIDER_YANDEX, PROVIDER_ZAI,
};
use crate::error::GatewayError;
use crate::settings::Settings;

/// Normalize a model id: lowercase, spaces to hyphens, collapsed hyphen runs,
/// no leading/trailing hyphen. Idempotent.
pub fn normalize_model_id(model_id: &str) -> String {
    let mut normalized = model_id.to_lowercase().replace(' ', "-");
    while normalized.contains("--") {
        normalized = normalized.replace("--", "-");
    }
    normalized.trim_matches('-').to_string()
}

/// Resolves model ids against the static provider registry and settings.
pub struct ProviderRegistry {
    settings: Arc<Settings>,
}

impl ProviderRegistry {
    pub fn new(settings: Arc<Settings>) -> Self {
        ProviderRegistry { settings }
    }

    pub fn is_enabled(&self, provider_id: &str) -> bool {
        let s = &self.settings;
        match provider_id {
            PROVIDER_AGENTS => s.enable_agents,
            PROVIDER_XROUTER => s.enable_xrouter,
            PROVIDER_DEEPSEEK => s.enable_deepseek,
            PROVIDER_OPENROUTER => s.enable_openrouter,
            PROVIDER_OPENROUTER_PROXY => s.enable_openrouter_proxy,
            PROVIDER_GIGACHAT => s.enable_gigachat,
            PROVIDER_YANDEX => s.enable_yandex,
            PROVIDER_OLLAMA => s.enable_ollama,
            PROVIDER_ZAI => s.enable_zai,
            _ => false,
        }
    }

    /// Provider ids that are currently enabled, registry order.
    pub fn enabled_providers(&self) -> Vec<&'static str> {
        ALL_PROVIDERS
            .iter()
            .copied()
            .filter(|p| self.is_enabled(p))
            .collect()
    }

    fn credentials(&self, provider_id: &str) -> String {
        let s = &self.settings;
        match provider_id {
            PROVIDER_AGENTS => s.agents_api_key.clone(),
            PROVIDER_XROUTER => s.xrouter_api_key.clone(),
            PROVIDER_DEEPSEEK => s.deepseek_api_key.clone(),
            PROVIDER_OPENROUTER | PROVIDER_OPENROUTER_PROXY => s.openrouter_api_key.clone(),
            PROVIDER_YANDEX => s.yandex_api_key.clone(),
            PROVIDER_ZAI => s.zai_api_key.clone(),
            PROVIDER_GIGACHAT => {
                if !s.gigachat_api_key.is_empty() {
                    s.gigachat_api_key.clone()
                } else if !s.gigachat_login.is_empty() && !s.gigachat_password.is_empty() {
                    format!("{}:{}", s.gigachat_login, s.gigachat_password)
                } else {
                    String::new()
                }
            }
            _ => String::new(),
        }
    }

    fn base_url(&self, provider_id: &str) -> String {
        let s = &self.settings;
        match provider_id {
            PROVIDER_AGENTS => s.agents_base_url.clone(),
            PROVIDER_XROUTER => s.xrouter_base_url.clone(),
            PROVIDER_DEEPSEEK => s.deepseek_base_url.clone(),
            PROVIDER_OPENROUTER | PROVIDER_OPENROUTER_PROXY => s.openrouter_base_url.clone(),
            PROVIDER_GIGACHAT => s.gigachat_base_url.clone(),
            PROVIDER_YANDEX => s.yandex_base_url.clone(),
            PROVIDER_ZAI => s.zai_base_url.clone(),
            _ => String::new(),
        }
    }

    fn parameters(&self, provider_id: &str) -> ProviderParams {
        let s = &self.settings;
        let mut params = ProviderParams {
            timeout_secs: s.provider_timeout,
            verify_ssl: !s.disable_ssl_verification,
            folder_id: None,
            proxy: None,
        };
        match provider_id {
            PROVIDER_YANDEX => {
                params.folder_id = if s.yandex_folder_id.is_empty() {
                    None
                } else {
                    Some(s.yandex_folder_id.clone())
                };
            }
            PROVIDER_OPENROUTER_PROXY => {
                params.proxy = s.openrouter_proxy.proxy_address().map(|address| ProxyParams {
                    address,
                    user: s.openrouter_proxy.user.clone(),
                    password: s.openrouter_proxy.password.clone(),
                    scheme: s.openrouter_proxy.scheme.clone(),
                });
            }
            _ => {}
        }
        params
    }

    /// Binding for a provider alias. 403 when the toggle is off.
    pub fn binding(&self, provider_id: &str) -> Result<ProviderConfig, GatewayError> {
        self.binding_for(provider_id)
    }

    /// One binding per configured Ollama server.
    pub fn ollama_server_bindings(&self) -> Vec<ProviderConfig> {
        self.settings
            .ollama_servers()
            .into_iter()
            .map(|(base_url, api_key)| ProviderConfig {
                provider_id: PROVIDER_OLLAMA.to_string(),
                name: provider_name(PROVIDER_OLLAMA).to_string(),
                credentials: api_key,
                base_url,
                parameters: ProviderParams {
                    timeout_secs: self.settings.provider_timeout.max(600),
                    ..ProviderParams::default()
                },
            })
            .collect()
    }

    fn binding_for(&self, provider_id: &str) -> Result<ProviderConfig, GatewayError> {
        if !self.is_enabled(provider_id) {
            return Err(GatewayError::new(
                403,
                format!("Provider {provider_id} is disabled by feature toggle"),
                json!({ "provider_alias": provider_id }),
            ));
        }
        Ok(ProviderConfig {
            provider_id: provider_id.to_string(),
            name: provider_name(provider_id).to_string(),
            credentials: self.credentials(provider_id),
            base_url: self.base_url(provider_id),
            parameters: self.parameters(provider_id),
        })
    }

    /// Split `ollama@server[:port]/model`, normalizing the server to a URL.
    fn parse_ollama_model_id(
        &self,
        external_model_id: &str,
    ) -> Result<(String, String), GatewayError> {
        let rest = external_model_id.strip_prefix("ollama@").ok_or_else(|| {
            GatewayError::new(
                400,
                format!("Invalid Ollama model ID format: {external_model_id}"),
                json!({ "external_model_id": external_model_id }),
            )
        })?;
        let (server, model_id) = rest.split_once('/').ok_or_else(|| {
            GatewayError::new(
                400,
                format!("Invalid Ollama model ID format: {external_model_id}"),
                json!({ "external_model_id": external_model_id }),
            )
        })?;
        if server.is_empty() || model_id.is_empty() {
            return Err(GatewayError::new(
                400,
                format!("Invalid Ollama model ID format: {external_model_id}"),
                json!({ "external_model_id": external_model_id }),
            ));
        }
        let server_url = if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("http://{server}")
        };
        Ok((server_url, model_id.to_string()))
    }

    /// Resolve an external model id to `(binding, clean_model_id)`.
    pub fn resolve(
        &self,
        external_model_id: &str,
    ) -> Result<(ProviderConfig, String), GatewayError> {
        debug!(external_model_id, "resolving provider by model id");

        // OpenAI-compatible mode bypasses the id grammar entirely.
        if self.settings.enable_openai_compatible_api {
            return Ok((
                self.binding_for(PROVIDER_AGENTS)?,
                external_model_id.to_string(),
            ));
        }

        if external_model_id.contains('@') {
            let (server_url, model_id) = self.parse_ollama_model_id(external_model_id)?;
            if !self.is_enabled(PROVIDER_OLLAMA) {
                return Err(GatewayError::new(
                    403,
                    format!("Provider {PROVIDER_OLLAMA} is disabled by feature toggle"),
                    json!({ "provider_alias": PROVIDER_OLLAMA }),
                ));
            }
            let api_key = self
                .settings
                .ollama_servers()
                .into_iter()
                .find(|(url, _)| url == &server_url)
                .map(|(_, key)| key)
                .unwrap_or_default();
            let config = ProviderConfig {
                provider_id: PROVIDER_OLLAMA.to_string(),
                name: provider_name(PROVIDER_OLLAMA).to_string(),
                credentials: api_key,
                base_url: server_url,
                parameters: ProviderParams {
                    timeout_secs: self.settings.provider_timeout.max(600),
                    ..ProviderParams::default()
                },
            };
            return Ok((config, model_id));
        }

        let (provider_alias, model_id) = external_model_id.split_once('/').ok_or_else(|| {
            GatewayError::new(
                400,
                format!("Invalid model ID format: {external_model_id}"),
                json!({ "external_model_id": external_model_id }),
            )
        })?;

        if !ALL_PROVIDERS.contains(&provider_alias) {
            return Err(GatewayError::new(
                400,
                format!("Invalid model ID format: {external_model_id}"),
                json!({ "external_model_id": external_model_id }),
            ));
        }

        Ok((self.binding_for(provider_alias)?, model_id.to_string()))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        let mut s = Settings::from_env();
        s.enable_openai_compatible_api = false;
        s.enable_deepseek = true;
        s.enable_ollama = true;
        s.enable_gigachat = false;
        s.enable_agents = true;
        s.deepseek_api_key = "sk-ds".to_string();
        s.ollama_base_urls = "http://10.0.0.1:11434;http://10.0.0.2:11434".to_string();
        s.ollama_api_keys = "key-1".to_string();
        s
    }

    fn registry(s: Settings) -> ProviderRegistry {
        ProviderRegistry::new(Arc::new(s))
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_model_id("  GPT  4 Turbo ".trim());
        assert_eq!(once, "gpt-4-turbo");
        assert_eq!(normalize_model_id(&once), once);
        assert_eq!(normalize_model_id("--a--b--"), "a-b");
    }

    #[test]
    fn resolves_provider_slash_model() {
        let (config, model_id) = registry(settings()).resolve("deepseek/deepseek-chat").unwrap();
        assert_eq!(config.provider_id, "deepseek");
        assert_eq!(config.credentials, "sk-ds");
        assert_eq!(model_id, "deepseek-chat");
    }

    #[test]
    fn disabled_provider_is_403() {
        let err = registry(settings()).resolve("gigachat/GigaChat-Pro").unwrap_err();
        assert_eq!(err.code, 403);
    }

    #[test]
    fn unknown_provider_is_400() {
        let err = registry(settings()).resolve("nonesuch/model").unwrap_err();
        assert_eq!(err.code, 400);
        let err = registry(settings()).resolve("no-slash-here").unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[test]
    fn ollama_id_selects_server_credentials() {
        let (config, model_id) = registry(settings())
            .resolve("ollama@10.0.0.1:11434/llama3:8b")
            .unwrap();
        assert_eq!(config.provider_id, "ollama");
        assert_eq!(config.base_url, "http://10.0.0.1:11434");
        assert_eq!(config.credentials, "key-1");
        assert_eq!(model_id, "llama3:8b");

        // Second server has no key configured.
        let (config, _) = registry(settings())
            .resolve("ollama@10.0.0.2:11434/llama3:8b")
            .unwrap();
        assert_eq!(config.credentials, "");
    }

    #[test]
    fn malformed_ollama_id_is_400() {
        let err = registry(settings()).resolve("ollama@hostonly").unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[test]
    fn openai_compatible_mode_routes_to_agents() {
        let mut s = settings();
        s.enable_openai_compatible_api = true;
        let (config, model_id) = registry(s).resolve("anything-goes").unwrap();
        assert_eq!(config.provider_id, "agents");
        assert_eq!(model_id, "anything-goes");
    }
}
