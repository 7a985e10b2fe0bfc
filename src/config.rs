use crate::models::{ModelConfig, ModelSelection};
use crate::storage::{StorageError, StorageManager, SETTINGS_KEY};
use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};

/// Schema version written into the persisted settings blob.
pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

const KEYRING_SERVICE_PREFIX: &str = "polychat_api_key";

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

/// User preferences, serialized under `chatAppSettings`. Every field has a
/// default so a partial blob (or none at all) loads cleanly; unknown fields
/// are ignored. A blob written by a newer schema is rejected on load.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub version: u32,
    pub models: Vec<ModelConfig>,
    pub selection: ModelSelection,
    pub streaming: bool,
    pub theme: Theme,
    pub system_prompt: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_SCHEMA_VERSION,
            models: vec![ModelConfig {
                model: DEFAULT_MODEL.to_string(),
                api_url: DEFAULT_API_URL.to_string(),
                // Key is fetched from the environment variable OPENAI_API_KEY
                api_key_ref: Some("env:OPENAI_API_KEY".to_string()),
            }],
            selection: ModelSelection::single(DEFAULT_MODEL),
            streaming: true,
            theme: Theme::default(),
            system_prompt: None,
        }
    }
}

impl AppSettings {
    /// Endpoint configuration for a model identifier, if one is configured.
    pub fn model_config(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|config| config.model == model_id)
    }

    /// Loads settings from storage, falling back to defaults when nothing
    /// is stored yet.
    pub async fn load(storage: &StorageManager) -> Result<Self, StorageError> {
        let Some(json) = storage.get(SETTINGS_KEY).await? else {
            log::info!("No stored settings found, using defaults");
            return Ok(Self::default());
        };
        let settings: AppSettings = serde_json::from_str(&json)?;
        if settings.version > SETTINGS_SCHEMA_VERSION {
            return Err(StorageError::IncompatibleSchema {
                blob: SETTINGS_KEY,
                found: settings.version,
                supported: SETTINGS_SCHEMA_VERSION,
            });
        }
        Ok(settings)
    }

    /// Serializes the settings wholesale and writes them in one piece.
    pub async fn save(&self, storage: &StorageManager) -> Result<(), StorageError> {
        let json = serde_json::to_string(self)?;
        storage.put(SETTINGS_KEY, &json).await
    }
}

// --- API Key Retrieval ---

/// Retrieves the API key for a model configuration. The `api_key_ref`
/// field determines whether to read from an environment variable or the
/// OS keyring.
pub fn get_api_key(config: &ModelConfig) -> Result<String> {
    match config.api_key_ref.as_deref() {
        Some(ref_str) if ref_str.starts_with("env:") => {
            let env_var_name = ref_str.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {}", env_var_name);
            std::env::var(env_var_name).context(format!(
                "Failed to get API key from environment variable '{}'",
                env_var_name
            ))
        }
        Some("keyring") => {
            let service_name = format!("{}-{}", KEYRING_SERVICE_PREFIX, config.model);
            let entry = Entry::new(&service_name, &config.model)
                .context("Failed to create keyring entry")?;
            log::debug!("Retrieving API key from keyring for service: {}", service_name);
            entry.get_password().context(format!(
                "Failed to get API key from keyring for '{}'. Please set it first.",
                config.model
            ))
        }
        Some(other) => Err(anyhow::anyhow!("Unsupported api_key_ref format: {}", other)),
        None => Err(anyhow::anyhow!(
            "API key reference not set for model '{}'",
            config.model
        )),
    }
}

/// Stores an API key in the OS keyring for the given model configuration.
pub fn set_api_key_in_keyring(config: &ModelConfig, api_key: &str) -> Result<()> {
    let service_name = format!("{}-{}", KEYRING_SERVICE_PREFIX, config.model);
    let entry = Entry::new(&service_name, &config.model)
        .context("Failed to create keyring entry for setting password")?;
    log::info!("Setting API key in keyring for service: {}", service_name);
    entry
        .set_password(api_key)
        .context(format!("Failed to set API key in keyring for '{}'", config.model))
}
