//! Catalog service: aggregate models across enabled providers and bind a
//! caller model id to a driver + model pair.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::ProviderModel;
use crate::cache::Cache;
use crate::error::GatewayError;
use crate::providers::{
    build_provider, normalize_model_id, Provider, ProviderRegistry, PROVIDER_AGENTS,
    PROVIDER_OLLAMA,
};
use crate::settings::Settings;

/// Aggregating model catalog over the provider registry.
pub struct ModelCatalog {
    settings: Arc<Settings>,
    registry: Arc<ProviderRegistry>,
    cache: Arc<dyn Cache>,
}

impl ModelCatalog {
    pub fn new(
        settings: Arc<Settings>,
        registry: Arc<ProviderRegistry>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        ModelCatalog {
            settings,
            registry,
            cache,
        }
    }

    /// Strip the scheme from an Ollama server URL for the external model id.
    fn server_id(base_url: &str) -> &str {
        base_url
            .trim_start_matches("http://")
            .trim_start_matches("https://")
    }

    /// Rewrite `external_model_id` the way callers address models.
    fn rewrite_external_ids(
        &self,
        mut models: Vec<ProviderModel>,
        provider_alias: &str,
        server_id: Option<&str>,
    ) -> Vec<ProviderModel> {
        for model in &mut models {
            let normalized = normalize_model_id(&model.model_id);
            model.external_model_id = Some(if self.settings.enable_openai_compatible_api {
                normalized
            } else if let Some(server) = server_id {
                format!("{provider_alias}@{server}/{normalized}")
            } else {
                format!("{provider_alias}/{normalized}")
            });
        }
        models
    }

    /// All models from enabled providers. A provider that fails to list is
    /// skipped, not fatal.
    pub async fn get_models(&self) -> Result<Vec<ProviderModel>, GatewayError> {
        let providers_to_check: Vec<&str> = if self.settings.enable_openai_compatible_api {
            vec![PROVIDER_AGENTS]
        } else {
            self.registry.enabled_providers()
        };

        let mut all_models = Vec::new();
        for provider_alias in providers_to_check {
            if !self.registry.is_enabled(provider_alias) {
                info!(provider_alias, "provider is disabled by feature toggle");
                continue;
            }

            if provider_alias == PROVIDER_OLLAMA {
                for config in self.registry.ollama_server_bindings() {
                    let server_id = Self::server_id(&config.base_url).to_string();
                    let base_url = config.base_url.clone();
                    let result = match build_provider(
                        config,
                        &self.settings,
                        Arc::clone(&self.cache),
                    ) {
                        Ok(provider) => provider.get_models().await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(models) => {
                            let models = self.rewrite_external_ids(
                                models,
                                provider_alias,
                                Some(&server_id),
                            );
                            info!(
                                provider_alias,
                                server_id = %server_id,
                                count = models.len(),
                                "retrieved models from Ollama server"
                            );
                            all_models.extend(models);
                        }
                        Err(e) => {
                            error!(
                                provider_alias,
                                base_url = %base_url,
                                error = %e,
                                "failed to get models from Ollama server"
                            );
                        }
                    }
                }
                continue;
            }

            let result = match self.registry.binding(provider_alias) {
                Ok(config) => {
                    match build_provider(config, &self.settings, Arc::clone(&self.cache)) {
                        Ok(provider) => provider.get_models().await,
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(models) => {
                    let models = self.rewrite_external_ids(models, provider_alias, None);
                    info!(provider_alias, count = models.len(), "retrieved models from provider");
                    all_models.extend(models);
                }
                Err(e) => {
                    warn!(provider_alias, error = %e, "failed to get models from provider");
                }
            }
        }

        info!(total = all_models.len(), "retrieved all models");
        Ok(all_models)
    }

    /// Resolve a caller model id to its driver and model record.
    ///
    /// The returned model's `external_model_id` is the caller's id verbatim,
    /// so responses echo exactly what was asked for.
    pub async fn bind(
        &self,
        external_model_id: &str,
    ) -> Result<(Arc<dyn Provider>, ProviderModel), GatewayError> {
        let (config, clean_model_id) = self.registry.resolve(external_model_id)?;
        let provider = build_provider(config, &self.settings, Arc::clone(&self.cache))?;
        let mut model = provider.get_model(&clean_model_id).await?;
        model.external_model_id = Some(external_model_id.to_string());
        Ok((provider, model))
    }

    /// Look up one model by its caller-visible id. 404 on miss.
    pub async fn get_model(
        &self,
        external_model_id: &str,
    ) -> Result<ProviderModel, GatewayError> {
        let (_, model) = self.bind(external_model_id).await?;
        Ok(model)
    }
}
