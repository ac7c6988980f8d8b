use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::crypto::{validate_token_format, CredentialCipher};
use crate::error::{ConfigStoreError, StorageError};
use crate::storage::KeyValueStore;

pub const CONFIG_SLOT: &str = "pbi-link.config.v1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Acceptance-criteria pattern chosen by the user, kept alongside the other
    /// display preferences and handed back unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ac_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_fields: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_base_url: Option<String>,
}

/// The persisted blob. Only the sealed token is ever written.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredConfig {
    encrypted_token: String,
    organization: String,
    #[serde(flatten)]
    preferences: Preferences,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub organization: String,
    /// Required on first write; `None` keeps the stored token.
    pub token: Option<String>,
    /// `None` keeps the stored preferences.
    pub preferences: Option<Preferences>,
}

/// Decrypted view of the stored config. Not serializable; the token only
/// leaves this struct as an auth header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub organization: String,
    pub pat: Zeroizing<String>,
    pub preferences: Preferences,
    /// When the current token was stored.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInfo {
    pub organization: String,
    pub has_valid_token: bool,
    #[serde(flatten)]
    pub preferences: Preferences,
    pub created_at: DateTime<Utc>,
}

pub struct ConfigStore {
    store: Arc<dyn KeyValueStore>,
    cipher: Arc<CredentialCipher>,
}

impl ConfigStore {
    pub fn new(store: Arc<dyn KeyValueStore>, cipher: Arc<CredentialCipher>) -> Self {
        Self { store, cipher }
    }

    pub async fn store(&self, update: ConfigUpdate) -> Result<(), ConfigStoreError> {
        let existing = self.load().await;

        let (encrypted_token, created_at) = match update.token.as_deref() {
            Some(token) => {
                if !validate_token_format(token) {
                    return Err(ConfigStoreError::InvalidTokenFormat);
                }
                (self.cipher.encrypt(token).await?, Utc::now())
            }
            None => existing
                .as_ref()
                .map(|c| (c.encrypted_token.clone(), c.created_at))
                .ok_or(ConfigStoreError::MissingToken)?,
        };

        let preferences = update
            .preferences
            .or_else(|| existing.map(|c| c.preferences))
            .unwrap_or_default();

        let record = StoredConfig {
            encrypted_token,
            organization: update.organization,
            preferences,
            created_at,
        };
        let json = serde_json::to_string(&record)?;
        self.store.set(CONFIG_SLOT, &json).await?;
        info!(organization = %record.organization, "stored credential config");
        Ok(())
    }

    /// Replaces preferences, keeping organization and token.
    pub async fn update_preferences(
        &self,
        preferences: Preferences,
    ) -> Result<(), ConfigStoreError> {
        let existing = self.load().await.ok_or(ConfigStoreError::MissingToken)?;
        self.store(ConfigUpdate {
            organization: existing.organization,
            token: None,
            preferences: Some(preferences),
        })
        .await
    }

    /// Decrypted config, or `None` when nothing usable is stored.
    pub async fn retrieve(&self) -> Option<Config> {
        let stored = self.load().await?;
        let pat = self.cipher.decrypt(&stored.encrypted_token).await;
        if pat.is_none() {
            warn!("stored token could not be decrypted");
        }
        Some(Config {
            organization: stored.organization,
            pat: Zeroizing::new(pat?),
            preferences: stored.preferences,
            created_at: stored.created_at,
        })
    }

    pub async fn get_info(&self) -> Option<ConfigInfo> {
        let stored = self.load().await?;
        let has_valid_token = self.cipher.decrypt(&stored.encrypted_token).await.is_some();
        Some(ConfigInfo {
            organization: stored.organization,
            has_valid_token,
            preferences: stored.preferences,
            created_at: stored.created_at,
        })
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.delete(CONFIG_SLOT).await?;
        info!("cleared credential config");
        Ok(())
    }

    async fn load(&self) -> Option<StoredConfig> {
        let raw = match self.store.get(CONFIG_SLOT).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "failed to read stored config");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(error = %e, "stored config is unreadable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};

    const PAT: &str = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFGHIJKLMNOP";

    fn config_store() -> (ConfigStore, MemoryStore) {
        let memory = MemoryStore::new();
        let store: Arc<dyn KeyValueStore> = Arc::new(memory.clone());
        let cipher = Arc::new(CredentialCipher::new(store.clone()));
        (ConfigStore::new(store, cipher), memory)
    }

    fn update(token: Option<&str>) -> ConfigUpdate {
        ConfigUpdate {
            organization: "acme".into(),
            token: token.map(String::from),
            preferences: None,
        }
    }

    #[tokio::test]
    async fn store_then_retrieve() {
        let (configs, memory) = config_store();
        configs.store(update(Some(PAT))).await.unwrap();

        let config = configs.retrieve().await.unwrap();
        assert_eq!(config.organization, "acme");
        assert_eq!(config.pat.as_str(), PAT);

        let raw = memory.get(CONFIG_SLOT).await.unwrap().unwrap();
        assert!(!raw.contains(PAT));
        let blob: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(blob["organization"], "acme");
        assert_eq!(blob["encryptedToken"].as_str().unwrap().split(':').count(), 3);
        assert!(blob["createdAt"].is_string());
    }

    #[tokio::test]
    async fn malformed_blob_reads_as_absent() {
        let (configs, memory) = config_store();
        memory.set(CONFIG_SLOT, "invalid-json-data").await.unwrap();
        assert!(configs.retrieve().await.is_none());
        assert!(configs.get_info().await.is_none());
    }

    #[tokio::test]
    async fn invalid_token_is_rejected_without_writing() {
        let (configs, memory) = config_store();
        let err = configs.store(update(Some("too-short"))).await.unwrap_err();
        assert!(matches!(err, ConfigStoreError::InvalidTokenFormat));
        assert_eq!(memory.get(CONFIG_SLOT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn first_write_requires_token() {
        let (configs, _) = config_store();
        let err = configs.store(update(None)).await.unwrap_err();
        assert!(matches!(err, ConfigStoreError::MissingToken));
    }

    #[tokio::test]
    async fn preferences_only_update_keeps_token() {
        let (configs, memory) = config_store();
        configs.store(update(Some(PAT))).await.unwrap();
        let before = memory.get(CONFIG_SLOT).await.unwrap().unwrap();
        let sealed_before: serde_json::Value = serde_json::from_str(&before).unwrap();

        let prefs = Preferences {
            ac_pattern: Some("^AC:".into()),
            visible_fields: Some(BTreeMap::from([("tags".to_string(), false)])),
            last_base_url: None,
        };
        configs.update_preferences(prefs.clone()).await.unwrap();

        let after = memory.get(CONFIG_SLOT).await.unwrap().unwrap();
        let sealed_after: serde_json::Value = serde_json::from_str(&after).unwrap();
        assert_eq!(sealed_before["encryptedToken"], sealed_after["encryptedToken"]);
        assert_eq!(sealed_after["acPattern"], "^AC:");
        assert_eq!(sealed_after["visibleFields"]["tags"], false);

        let config = configs.retrieve().await.unwrap();
        assert_eq!(config.pat.as_str(), PAT);
        assert_eq!(config.preferences, prefs);
    }

    #[tokio::test]
    async fn update_preferences_without_config_is_missing_token() {
        let (configs, memory) = config_store();
        let err = configs
            .update_preferences(Preferences::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigStoreError::MissingToken));
        assert_eq!(memory.get(CONFIG_SLOT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn created_at_moves_only_with_a_new_token() {
        let (configs, memory) = config_store();
        configs.store(update(Some(PAT))).await.unwrap();

        // Backdate the stored record so a re-stamp would be visible.
        let raw = memory.get(CONFIG_SLOT).await.unwrap().unwrap();
        let mut blob: serde_json::Value = serde_json::from_str(&raw).unwrap();
        blob["createdAt"] = "2024-01-02T03:04:05Z".into();
        memory.set(CONFIG_SLOT, &blob.to_string()).await.unwrap();

        configs
            .update_preferences(Preferences {
                ac_pattern: Some("^AC:".into()),
                ..Preferences::default()
            })
            .await
            .unwrap();
        let config = configs.retrieve().await.unwrap();
        assert_eq!(config.created_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");

        configs.store(update(Some(PAT))).await.unwrap();
        let info = configs.get_info().await.unwrap();
        assert!(info.created_at.timestamp() > 1_704_164_645);
    }

    #[tokio::test]
    async fn get_info_never_exposes_token() {
        let (configs, _) = config_store();
        configs.store(update(Some(PAT))).await.unwrap();
        let info = configs.get_info().await.unwrap();
        assert!(info.has_valid_token);
        assert_eq!(info.organization, "acme");
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains(PAT));
    }

    #[tokio::test]
    async fn foreign_key_reports_undecryptable() {
        let (configs, memory) = config_store();
        configs.store(update(Some(PAT))).await.unwrap();

        // Same blob, different key.
        let other = MemoryStore::new();
        other
            .set(CONFIG_SLOT, &memory.get(CONFIG_SLOT).await.unwrap().unwrap())
            .await
            .unwrap();
        let other: Arc<dyn KeyValueStore> = Arc::new(other);
        let foreign = ConfigStore::new(other.clone(), Arc::new(CredentialCipher::new(other)));

        assert!(foreign.retrieve().await.is_none());
        assert!(!foreign.get_info().await.unwrap().has_valid_token);
    }

    #[tokio::test]
    async fn clear_leaves_nothing_behind() {
        let (configs, memory) = config_store();
        configs.store(update(Some(PAT))).await.unwrap();
        configs.clear().await.unwrap();

        assert!(configs.retrieve().await.is_none());
        assert!(configs.get_info().await.is_none());
        assert_eq!(memory.get(CONFIG_SLOT).await.unwrap(), None);
        configs.clear().await.unwrap();
    }

    #[tokio::test]
    async fn file_backed_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(tmp.path()));
        let cipher = Arc::new(CredentialCipher::new(store.clone()));
        let configs = ConfigStore::new(store.clone(), cipher);
        configs.store(update(Some(PAT))).await.unwrap();

        // A fresh process reading the same directory.
        let reopened = ConfigStore::new(store.clone(), Arc::new(CredentialCipher::new(store)));
        assert_eq!(reopened.retrieve().await.unwrap().pat.as_str(), PAT);

        let raw = std::fs::read_to_string(tmp.path().join(CONFIG_SLOT)).unwrap();
        assert!(!raw.contains(PAT));
    }
}
