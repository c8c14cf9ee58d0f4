//! Configuration keys and the configuration store.
//!
//! Keys come from two disjoint spaces:
//!
//! - [`GlobalStateKey`]: non-secret settings, persisted with the host's global
//!   state.
//! - [`SecretKey`]: credentials, kept in a separate secret store and never
//!   written next to global state.
//!
//! Consumers persist and restore by the literal key strings, so every
//! spelling below is part of the contract.

use crate::errors::{ApiError, ApiResult, UnknownTag};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

closed_set! {
    /// Non-secret configuration keys.
    pub enum GlobalStateKey {
        ApiProvider => "apiProvider",
        ApiModelId => "apiModelId",
        GlamaModelId => "glamaModelId",
        GlamaModelInfo => "glamaModelInfo",
        AwsRegion => "awsRegion",
        AwsUseCrossRegionInference => "awsUseCrossRegionInference",
        AwsProfile => "awsProfile",
        AwsUseProfile => "awsUseProfile",
        AwsCustomArn => "awsCustomArn",
        VertexKeyFile => "vertexKeyFile",
        VertexJsonCredentials => "vertexJsonCredentials",
        VertexProjectId => "vertexProjectId",
        VertexRegion => "vertexRegion",
        LastShownAnnouncementId => "lastShownAnnouncementId",
        CustomInstructions => "customInstructions",
        AlwaysAllowReadOnly => "alwaysAllowReadOnly",
        AlwaysAllowReadOnlyOutsideWorkspace => "alwaysAllowReadOnlyOutsideWorkspace",
        AlwaysAllowWrite => "alwaysAllowWrite",
        AlwaysAllowWriteOutsideWorkspace => "alwaysAllowWriteOutsideWorkspace",
        AlwaysAllowExecute => "alwaysAllowExecute",
        AlwaysAllowBrowser => "alwaysAllowBrowser",
        AlwaysAllowMcp => "alwaysAllowMcp",
        AlwaysAllowModeSwitch => "alwaysAllowModeSwitch",
        AlwaysAllowSubtasks => "alwaysAllowSubtasks",
        TaskHistory => "taskHistory",
        OpenAiBaseUrl => "openAiBaseUrl",
        OpenAiModelId => "openAiModelId",
        OpenAiCustomModelInfo => "openAiCustomModelInfo",
        OpenAiUseAzure => "openAiUseAzure",
        OllamaModelId => "ollamaModelId",
        OllamaBaseUrl => "ollamaBaseUrl",
        LmStudioModelId => "lmStudioModelId",
        LmStudioBaseUrl => "lmStudioBaseUrl",
        AnthropicBaseUrl => "anthropicBaseUrl",
        ModelMaxThinkingTokens => "modelMaxThinkingTokens",
        AzureApiVersion => "azureApiVersion",
        OpenAiStreamingEnabled => "openAiStreamingEnabled",
        OpenRouterModelId => "openRouterModelId",
        OpenRouterModelInfo => "openRouterModelInfo",
        OpenRouterBaseUrl => "openRouterBaseUrl",
        OpenRouterSpecificProvider => "openRouterSpecificProvider",
        OpenRouterUseMiddleOutTransform => "openRouterUseMiddleOutTransform",
        GoogleGeminiBaseUrl => "googleGeminiBaseUrl",
        AllowedCommands => "allowedCommands",
        SoundEnabled => "soundEnabled",
        TtsEnabled => "ttsEnabled",
        TtsSpeed => "ttsSpeed",
        SoundVolume => "soundVolume",
        DiffEnabled => "diffEnabled",
        EnableCheckpoints => "enableCheckpoints",
        CheckpointStorage => "checkpointStorage",
        BrowserViewportSize => "browserViewportSize",
        ScreenshotQuality => "screenshotQuality",
        RemoteBrowserHost => "remoteBrowserHost",
        FuzzyMatchThreshold => "fuzzyMatchThreshold",
        WriteDelayMs => "writeDelayMs",
        TerminalOutputLineLimit => "terminalOutputLineLimit",
        TerminalShellIntegrationTimeout => "terminalShellIntegrationTimeout",
        McpEnabled => "mcpEnabled",
        EnableMcpServerCreation => "enableMcpServerCreation",
        AlwaysApproveResubmit => "alwaysApproveResubmit",
        RequestDelaySeconds => "requestDelaySeconds",
        RateLimitSeconds => "rateLimitSeconds",
        CurrentApiConfigName => "currentApiConfigName",
        ListApiConfigMeta => "listApiConfigMeta",
        VsCodeLmModelSelector => "vsCodeLmModelSelector",
        Mode => "mode",
        ModeApiConfigs => "modeApiConfigs",
        CustomModePrompts => "customModePrompts",
        CustomSupportPrompts => "customSupportPrompts",
        EnhancementApiConfigId => "enhancementApiConfigId",
        Experiments => "experiments",
        AutoApprovalEnabled => "autoApprovalEnabled",
        CustomModes => "customModes",
        UnboundModelId => "unboundModelId",
        RequestyModelId => "requestyModelId",
        RequestyModelInfo => "requestyModelInfo",
        UnboundModelInfo => "unboundModelInfo",
        ModelTemperature => "modelTemperature",
        ModelMaxTokens => "modelMaxTokens",
        MistralCodestralUrl => "mistralCodestralUrl",
        MaxOpenTabsContext => "maxOpenTabsContext",
        BrowserToolEnabled => "browserToolEnabled",
        LmStudioSpeculativeDecodingEnabled => "lmStudioSpeculativeDecodingEnabled",
        LmStudioDraftModelId => "lmStudioDraftModelId",
        TelemetrySetting => "telemetrySetting",
        ShowRooIgnoredFiles => "showRooIgnoredFiles",
        RemoteBrowserEnabled => "remoteBrowserEnabled",
        Language => "language",
        MaxWorkspaceFiles => "maxWorkspaceFiles",
        MaxReadFileLine => "maxReadFileLine",
        FakeAi => "fakeAi",
        PinnedApiConfigs => "pinnedApiConfigs",
    }
}

closed_set! {
    /// Credential keys. Values live in the secret store only.
    pub enum SecretKey {
        ApiKey => "apiKey",
        GlamaApiKey => "glamaApiKey",
        OpenRouterApiKey => "openRouterApiKey",
        AwsAccessKey => "awsAccessKey",
        AwsSecretKey => "awsSecretKey",
        AwsSessionToken => "awsSessionToken",
        OpenAiApiKey => "openAiApiKey",
        GeminiApiKey => "geminiApiKey",
        OpenAiNativeApiKey => "openAiNativeApiKey",
        DeepSeekApiKey => "deepSeekApiKey",
        MistralApiKey => "mistralApiKey",
        UnboundApiKey => "unboundApiKey",
        RequestyApiKey => "requestyApiKey",
    }
}

/// Any recognized configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigurationKey {
    Global(GlobalStateKey),
    Secret(SecretKey),
}

impl ConfigurationKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global(key) => key.as_str(),
            Self::Secret(key) => key.as_str(),
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }

    /// Every recognized key, global state first.
    pub fn all() -> impl Iterator<Item = ConfigurationKey> {
        GlobalStateKey::ALL
            .iter()
            .copied()
            .map(Self::Global)
            .chain(SecretKey::ALL.iter().copied().map(Self::Secret))
    }
}

impl From<GlobalStateKey> for ConfigurationKey {
    fn from(key: GlobalStateKey) -> Self {
        Self::Global(key)
    }
}

impl From<SecretKey> for ConfigurationKey {
    fn from(key: SecretKey) -> Self {
        Self::Secret(key)
    }
}

impl std::fmt::Display for ConfigurationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConfigurationKey {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(key) = s.parse::<GlobalStateKey>() {
            return Ok(Self::Global(key));
        }
        s.parse::<SecretKey>()
            .map(Self::Secret)
            .map_err(|_| UnknownTag::new("ConfigurationKey", s))
    }
}

impl Serialize for ConfigurationKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ConfigurationKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Untyped configuration values keyed by configuration key.
///
/// The consumer supplies values of the type each key implies; nothing here
/// validates them.
pub type ConfigurationValues = HashMap<ConfigurationKey, serde_json::Value>;

/// Build a [`ConfigurationValues`] map from `(key, value)` pairs.
pub fn configuration_values<K, V, I>(pairs: I) -> ConfigurationValues
where
    K: Into<ConfigurationKey>,
    V: Serialize,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .filter_map(|(k, v)| serde_json::to_value(v).ok().map(|v| (k.into(), v)))
        .collect()
}

/// Current configuration, split into global state and secrets.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationStore {
    global: HashMap<GlobalStateKey, serde_json::Value>,
    secrets: HashMap<SecretKey, serde_json::Value>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `values` into the current configuration.
    ///
    /// Keys absent from `values` are left untouched. A JSON `null` clears the
    /// key.
    pub fn set_configuration(&mut self, values: ConfigurationValues) {
        let mut global_changed = 0usize;
        let mut secrets_changed = 0usize;

        for (key, value) in values {
            match key {
                ConfigurationKey::Global(key) => {
                    global_changed += 1;
                    if value.is_null() {
                        self.global.remove(&key);
                    } else {
                        self.global.insert(key, value);
                    }
                }
                ConfigurationKey::Secret(key) => {
                    secrets_changed += 1;
                    if value.is_null() {
                        self.secrets.remove(&key);
                    } else {
                        self.secrets.insert(key, value);
                    }
                }
            }
        }

        tracing::debug!(global_changed, secrets_changed, "configuration updated");
    }

    pub fn get(&self, key: impl Into<ConfigurationKey>) -> Option<&serde_json::Value> {
        match key.into() {
            ConfigurationKey::Global(key) => self.global.get(&key),
            ConfigurationKey::Secret(key) => self.secrets.get(&key),
        }
    }

    /// Get a value decoded as `T`. `None` if absent or of another type.
    pub fn get_as<T: for<'de> Deserialize<'de>>(
        &self,
        key: impl Into<ConfigurationKey>,
    ) -> Option<T> {
        self.get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_bool(&self, key: GlobalStateKey) -> Option<bool> {
        self.get_as(key)
    }

    pub fn get_string(&self, key: impl Into<ConfigurationKey>) -> Option<String> {
        self.get_as(key)
    }

    pub fn contains(&self, key: impl Into<ConfigurationKey>) -> bool {
        self.get(key).is_some()
    }

    /// A snapshot of every set value, secrets included.
    pub fn values(&self) -> ConfigurationValues {
        self.global
            .iter()
            .map(|(k, v)| (ConfigurationKey::Global(*k), v.clone()))
            .chain(
                self.secrets
                    .iter()
                    .map(|(k, v)| (ConfigurationKey::Secret(*k), v.clone())),
            )
            .collect()
    }

    pub fn global_state(&self) -> &HashMap<GlobalStateKey, serde_json::Value> {
        &self.global
    }

    pub fn secrets(&self) -> &HashMap<SecretKey, serde_json::Value> {
        &self.secrets
    }

    /// Write global state to `path` as JSON. Secrets are never included.
    pub fn save_global_state(&self, path: &Path) -> ApiResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec_pretty(&self.global)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), keys = self.global.len(), "saved global state");
        Ok(())
    }

    /// Replace global state with the contents of `path`. Secrets are kept.
    ///
    /// A secret key found in the file is rejected: the two stores must
    /// never mix.
    pub fn load_global_state(&mut self, path: &Path) -> ApiResult<()> {
        let bytes = std::fs::read(path)?;
        let raw: HashMap<String, serde_json::Value> = serde_json::from_slice(&bytes)?;

        let mut global = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            match key.parse::<ConfigurationKey>()? {
                ConfigurationKey::Global(key) => {
                    global.insert(key, value);
                }
                ConfigurationKey::Secret(key) => {
                    return Err(ApiError::configuration(
                        key.as_str(),
                        format!("secret key {} found in global state file", key),
                    )
                    .with_context("path", path.display().to_string()));
                }
            }
        }

        tracing::info!(path = %path.display(), keys = global.len(), "loaded global state");
        self.global = global;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_spaces_are_disjoint() {
        let global: HashSet<_> = GlobalStateKey::ALL.iter().map(|k| k.as_str()).collect();
        let secret: HashSet<_> = SecretKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(global.len(), GlobalStateKey::ALL.len());
        assert_eq!(secret.len(), SecretKey::ALL.len());
        assert!(global.is_disjoint(&secret));
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!(
            "soundEnabled".parse::<ConfigurationKey>().unwrap(),
            ConfigurationKey::Global(GlobalStateKey::SoundEnabled)
        );
        assert_eq!(
            "openRouterApiKey".parse::<ConfigurationKey>().unwrap(),
            ConfigurationKey::Secret(SecretKey::OpenRouterApiKey)
        );
        assert!("soundenabled".parse::<ConfigurationKey>().is_err());
        assert_eq!(
            GlobalStateKey::VsCodeLmModelSelector.as_str(),
            "vsCodeLmModelSelector"
        );
    }

    #[test]
    fn test_values_serialize_by_literal_key() {
        let values = configuration_values([(GlobalStateKey::SoundEnabled, true)]);
        let json = serde_json::to_value(&values).unwrap();
        assert_eq!(json["soundEnabled"], true);

        let back: ConfigurationValues =
            serde_json::from_str(r#"{"apiKey":"sk-1","mode":"code"}"#).unwrap();
        assert_eq!(back.len(), 2);
        assert!(back.contains_key(&ConfigurationKey::Secret(SecretKey::ApiKey)));

        assert!(serde_json::from_str::<ConfigurationValues>(r#"{"nope":1}"#).is_err());
    }

    #[test]
    fn test_set_configuration_merges() {
        let mut store = ConfigurationStore::new();
        store.set_configuration(configuration_values([
            (GlobalStateKey::Mode, serde_json::json!("code")),
            (GlobalStateKey::SoundEnabled, serde_json::json!(false)),
        ]));
        store.set_configuration(configuration_values([(SecretKey::ApiKey, "sk-test")]));

        store.set_configuration(configuration_values([(GlobalStateKey::SoundEnabled, true)]));

        assert_eq!(store.get_bool(GlobalStateKey::SoundEnabled), Some(true));
        assert_eq!(
            store.get_string(GlobalStateKey::Mode),
            Some("code".to_string())
        );
        assert_eq!(
            store.get_string(SecretKey::ApiKey),
            Some("sk-test".to_string())
        );
        assert_eq!(store.values().len(), 3);
    }

    #[test]
    fn test_null_clears_key() {
        let mut store = ConfigurationStore::new();
        store.set_configuration(configuration_values([(GlobalStateKey::Language, "en")]));
        store.set_configuration(configuration_values([(
            GlobalStateKey::Language,
            serde_json::Value::Null,
        )]));
        assert!(!store.contains(GlobalStateKey::Language));
    }

    #[test]
    fn test_secrets_never_saved_with_global_state() {
        let dir = std::env::temp_dir().join(format!("roo-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("global.json");

        let mut store = ConfigurationStore::new();
        store.set_configuration(configuration_values([
            (ConfigurationKey::from(GlobalStateKey::SoundVolume), serde_json::json!(0.5)),
            (ConfigurationKey::from(SecretKey::AwsSecretKey), serde_json::json!("hunter2")),
        ]));
        store.save_global_state(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("soundVolume"));
        assert!(!written.contains("hunter2"));
        assert!(!written.contains("awsSecretKey"));

        let mut restored = ConfigurationStore::new();
        restored.load_global_state(&path).unwrap();
        assert_eq!(
            restored.get_as::<f64>(GlobalStateKey::SoundVolume),
            Some(0.5)
        );
        assert!(restored.secrets().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_rejects_secret_in_global_file() {
        let dir = std::env::temp_dir().join(format!("roo-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("global.json");
        std::fs::write(&path, r#"{"mode":"code","apiKey":"leak"}"#).unwrap();

        let mut store = ConfigurationStore::new();
        let err = store.load_global_state(&path).unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::ConfigurationError);
        assert!(store.global_state().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
