use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{DispatchError, Result};
use crate::registry::ListenerRegistry;
use crate::signing;
use crate::types::Listener;

const LISTENERS_FILE: &str = "listeners.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateListener {
    pub tenant_id: String,
    pub url: String,
    pub event_type: String,
    #[serde(default)]
    pub secret: Option<String>,
}

/// Partial update; absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerPatch {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// In-memory listener table, optionally mirrored to `listeners.json`.
pub struct ListenerStore {
    listeners: RwLock<HashMap<String, Listener>>,
    data_dir: Option<PathBuf>,
}

impl ListenerStore {
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            data_dir,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Restore listeners from the data directory, returning how many were read.
    pub async fn load(&self) -> Result<usize> {
        let Some(path) = self.file_path() else {
            return Ok(0);
        };
        if !tokio::fs::try_exists(&path).await? {
            return Ok(0);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let items: Vec<Listener> = serde_json::from_str(&content)
            .map_err(|e| DispatchError::Storage(format!("failed to parse {LISTENERS_FILE}: {e}")))?;

        let mut listeners = self.listeners.write().await;
        listeners.clear();
        for listener in items {
            listeners.insert(listener.id.clone(), listener);
        }
        Ok(listeners.len())
    }

    pub async fn save(&self) -> Result<()> {
        let listeners = self.listeners.read().await;
        self.write_file(&listeners).await
    }

    pub async fn create(&self, request: CreateListener) -> Result<Listener> {
        let tenant_id = request.tenant_id.trim().to_string();
        if tenant_id.is_empty() {
            return Err(DispatchError::Validation("tenantId is required".into()));
        }
        let url = validate_url(&request.url)?;
        let event_type = validate_event_type(&request.event_type)?;
        let secret = match request.secret {
            Some(secret) if secret.trim().is_empty() => {
                return Err(DispatchError::Validation("secret must not be empty".into()));
            }
            Some(secret) => secret,
            None => signing::generate_secret(),
        };

        let mut listeners = self.listeners.write().await;
        if listeners
            .values()
            .any(|l| l.same_triple(&tenant_id, &url, &event_type))
        {
            return Err(DispatchError::DuplicateListener {
                tenant_id,
                url,
                event_type,
            });
        }

        let now = Utc::now();
        let listener = Listener {
            id: format!("lst_{}", &Uuid::new_v4().simple().to_string()[..8]),
            tenant_id,
            url,
            event_type,
            secret,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let mut next = listeners.clone();
        next.insert(listener.id.clone(), listener.clone());
        self.write_file(&next).await?;
        *listeners = next;

        tracing::info!(
            listener_id = %listener.id,
            tenant_id = %listener.tenant_id,
            event_type = %listener.event_type,
            "Listener created"
        );
        Ok(listener)
    }

    pub async fn get(&self, id: &str) -> Result<Listener> {
        self.listeners
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DispatchError::ListenerNotFound(id.to_string()))
    }

    /// All listeners, oldest first.
    pub async fn list(&self) -> Vec<Listener> {
        let mut items: Vec<Listener> = self.listeners.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    pub async fn list_for_tenant(&self, tenant_id: &str) -> Vec<Listener> {
        let mut items = self.list().await;
        items.retain(|l| l.tenant_id == tenant_id);
        items
    }

    pub async fn update(&self, id: &str, patch: ListenerPatch) -> Result<Listener> {
        let url = patch.url.as_deref().map(validate_url).transpose()?;
        let event_type = patch
            .event_type
            .as_deref()
            .map(validate_event_type)
            .transpose()?;
        if matches!(patch.secret.as_deref(), Some(s) if s.trim().is_empty()) {
            return Err(DispatchError::Validation("secret must not be empty".into()));
        }

        let mut listeners = self.listeners.write().await;
        let current = listeners
            .get(id)
            .ok_or_else(|| DispatchError::ListenerNotFound(id.to_string()))?;

        let next_url = url.unwrap_or_else(|| current.url.clone());
        let next_event_type = event_type.unwrap_or_else(|| current.event_type.clone());
        let tenant_id = current.tenant_id.clone();
        if listeners
            .values()
            .any(|l| l.id != id && l.same_triple(&tenant_id, &next_url, &next_event_type))
        {
            return Err(DispatchError::DuplicateListener {
                tenant_id,
                url: next_url,
                event_type: next_event_type,
            });
        }

        let mut updated = current.clone();
        updated.url = next_url;
        updated.event_type = next_event_type;
        if let Some(secret) = patch.secret {
            updated.secret = secret;
        }
        if let Some(is_active) = patch.is_active {
            updated.is_active = is_active;
        }
        updated.updated_at = Utc::now();

        let mut next = listeners.clone();
        next.insert(updated.id.clone(), updated.clone());
        self.write_file(&next).await?;
        *listeners = next;
        Ok(updated)
    }

    pub async fn remove(&self, id: &str) -> Result<Listener> {
        let mut listeners = self.listeners.write().await;
        let mut next = listeners.clone();
        let removed = next
            .remove(id)
            .ok_or_else(|| DispatchError::ListenerNotFound(id.to_string()))?;
        self.write_file(&next).await?;
        *listeners = next;

        tracing::info!(
            listener_id = %removed.id,
            tenant_id = %removed.tenant_id,
            "Listener removed"
        );
        Ok(removed)
    }

    fn file_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(LISTENERS_FILE))
    }

    async fn write_file(&self, listeners: &HashMap<String, Listener>) -> Result<()> {
        let Some(path) = self.file_path() else {
            return Ok(());
        };
        if let Some(dir) = &self.data_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut items: Vec<&Listener> = listeners.values().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let content = serde_json::to_string_pretty(&items)?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl ListenerRegistry for ListenerStore {
    async fn find_active(&self, tenant_id: &str, event_type: &str) -> Result<Vec<Listener>> {
        Ok(self
            .listeners
            .read()
            .await
            .values()
            .filter(|l| l.is_active && l.tenant_id == tenant_id && l.event_type == event_type)
            .cloned()
            .collect())
    }
}

fn validate_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| DispatchError::Validation(format!("invalid url '{trimmed}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(DispatchError::Validation(format!(
            "unsupported url scheme '{other}'"
        ))),
    }
}

fn validate_event_type(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DispatchError::Validation("eventType is required".into()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WILDCARD_EVENT_TYPE;

    fn request(tenant: &str, url: &str, event_type: &str) -> CreateListener {
        CreateListener {
            tenant_id: tenant.into(),
            url: url.into(),
            event_type: event_type.into(),
            secret: None,
        }
    }

    #[tokio::test]
    async fn create_generates_secret_and_activates() {
        let store = ListenerStore::in_memory();
        let listener = store
            .create(request("t1", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap();
        assert!(listener.is_active);
        assert!(listener.id.starts_with("lst_"));
        assert!(listener.secret.starts_with("whsec_"));
        assert_eq!(listener.created_at, listener.updated_at);
    }

    #[tokio::test]
    async fn create_keeps_supplied_secret() {
        let store = ListenerStore::in_memory();
        let mut req = request("t1", "https://a.example.com/hook", "order.created");
        req.secret = Some("my-secret".into());
        let listener = store.create(req).await.unwrap();
        assert_eq!(listener.secret, "my-secret");
    }

    #[tokio::test]
    async fn duplicate_triple_is_rejected() {
        let store = ListenerStore::in_memory();
        store
            .create(request("t1", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap();
        let err = store
            .create(request("t1", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateListener { .. }));

        // Same url and type under another tenant is a different triple.
        store
            .create(request("t2", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let store = ListenerStore::in_memory();
        let err = store
            .create(request("t1", "ftp://a.example.com", "order.created"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        let err = store
            .create(request("t1", "not a url", "order.created"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn update_patches_only_supplied_fields() {
        let store = ListenerStore::in_memory();
        let created = store
            .create(request("t1", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap();

        let updated = store
            .update(
                &created.id,
                ListenerPatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.url, created.url);
        assert_eq!(updated.secret, created.secret);
        assert!(updated.updated_at >= created.updated_at);

        let touched = store
            .update(&created.id, ListenerPatch::default())
            .await
            .unwrap();
        assert!(touched.updated_at >= updated.updated_at);
    }

    #[tokio::test]
    async fn update_cannot_collide_with_another_listener() {
        let store = ListenerStore::in_memory();
        store
            .create(request("t1", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap();
        let other = store
            .create(request("t1", "https://a.example.com/hook", "order.updated"))
            .await
            .unwrap();
        let err = store
            .update(
                &other.id,
                ListenerPatch {
                    event_type: Some("order.created".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateListener { .. }));
    }

    #[tokio::test]
    async fn remove_unknown_is_not_found_and_second_remove_fails() {
        let store = ListenerStore::in_memory();
        let created = store
            .create(request("t1", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap();
        store.remove(&created.id).await.unwrap();
        let err = store.remove(&created.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::ListenerNotFound(_)));
        let err = store.remove("lst_missing").await.unwrap_err();
        assert!(matches!(err, DispatchError::ListenerNotFound(_)));
    }

    #[tokio::test]
    async fn match_unions_exact_and_wildcard_active_listeners() {
        let store = ListenerStore::in_memory();
        let exact = store
            .create(request("t1", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap();
        let wildcard = store
            .create(request("t1", "https://b.example.com/hook", WILDCARD_EVENT_TYPE))
            .await
            .unwrap();
        let inactive = store
            .create(request("t1", "https://c.example.com/hook", "order.created"))
            .await
            .unwrap();
        store
            .update(
                &inactive.id,
                ListenerPatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .create(request("t1", "https://d.example.com/hook", "order.deleted"))
            .await
            .unwrap();
        store
            .create(request("t2", "https://e.example.com/hook", WILDCARD_EVENT_TYPE))
            .await
            .unwrap();

        let mut ids: Vec<String> = store
            .match_listeners("t1", "order.created")
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        ids.sort();
        let mut expected = vec![exact.id, wildcard.id.clone()];
        expected.sort();
        assert_eq!(ids, expected);

        let only_wildcard = store.match_listeners("t1", "invoice.paid").await.unwrap();
        assert_eq!(only_wildcard.len(), 1);
        assert_eq!(only_wildcard[0].id, wildcard.id);

        assert!(store.match_listeners("t3", "order.created").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listeners_survive_save_and_load() {
        let dir = std::env::temp_dir().join(format!("dispatcher-store-{}", Uuid::new_v4()));
        let store = ListenerStore::new(Some(dir.clone()));
        let created = store
            .create(request("t1", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap();

        let reloaded = ListenerStore::new(Some(dir.clone()));
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert_eq!(reloaded.get(&created.id).await.unwrap(), created);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn failed_write_does_not_register_listener() {
        let file = std::env::temp_dir().join(format!("dispatcher-file-{}", Uuid::new_v4()));
        std::fs::write(&file, b"not a directory").unwrap();
        let store = ListenerStore::new(Some(file.join("sub")));

        let err = store
            .create(request("t1", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Io(_)));
        assert!(store.list().await.is_empty());
        assert!(store.match_listeners("t1", "order.created").await.unwrap().is_empty());

        // A retry hits the same write error, not a duplicate.
        let err = store
            .create(request("t1", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Io(_)));

        let _ = std::fs::remove_file(file);
    }

    #[tokio::test]
    async fn failed_write_leaves_update_and_remove_uncommitted() {
        let dir = std::env::temp_dir().join(format!("dispatcher-store-{}", Uuid::new_v4()));
        let store = ListenerStore::new(Some(dir.clone()));
        let created = store
            .create(request("t1", "https://a.example.com/hook", "order.created"))
            .await
            .unwrap();

        // Replace the data file with a directory so every later write fails.
        let path = dir.join(LISTENERS_FILE);
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let err = store
            .update(
                &created.id,
                ListenerPatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Io(_)));
        assert_eq!(store.get(&created.id).await.unwrap(), created);

        assert!(store.remove(&created.id).await.is_err());
        assert_eq!(store.get(&created.id).await.unwrap(), created);
        assert_eq!(store.match_listeners("t1", "order.created").await.unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(dir);
    }
}
