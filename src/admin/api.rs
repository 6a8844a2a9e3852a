//! Rule and configuration management behind the admin endpoints.

use crate::limiter::RuleCache;
use crate::model::{BodyContentType, LimitMode, Rule};
use crate::settings::SettingsService;
use crate::store::{keys, StateStore};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Errors surfaced to admin clients.
#[derive(Debug, Error)]
pub enum AdminError {
    /// The referenced rule does not exist.
    #[error("rule {0} not found")]
    RuleNotFound(Uuid),

    /// The submitted rule is not acceptable.
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// The request body did not parse.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

impl AdminError {
    /// HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::RuleNotFound(_) => 404,
            Self::InvalidRule(_) | Self::InvalidBody(_) => 400,
            Self::Store(_) => 503,
        }
    }
}

/// Result type for admin operations.
pub type AdminResult<T> = Result<T, AdminError>;

/// Partial update for a rule's queue settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueuePatch {
    /// New queue flag.
    pub queue_enabled: Option<bool>,
    /// New queue capacity.
    pub max_queue_size: Option<u32>,
    /// New per-position delay.
    pub delay_per_request_ms: Option<u64>,
}

/// Partial update for a rule's body-identifier settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BodyLimitPatch {
    /// New body-limit flag.
    pub body_limit_enabled: Option<bool>,
    /// New field path.
    pub body_field_path: Option<String>,
    /// New combine mode.
    pub body_limit_type: Option<LimitMode>,
    /// New declared content type.
    pub body_content_type: Option<BodyContentType>,
}

/// Rule CRUD and settings mutation, refreshing the cache on every change.
pub struct AdminApi {
    store: Arc<dyn StateStore>,
    rules: Arc<RuleCache>,
    settings: Arc<SettingsService>,
}

impl std::fmt::Debug for AdminApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminApi").finish()
    }
}

impl AdminApi {
    /// Create the admin API over the given store and caches.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, rules: Arc<RuleCache>, settings: Arc<SettingsService>) -> Self {
        Self {
            store,
            rules,
            settings,
        }
    }

    /// The settings service the config endpoints mutate.
    #[must_use]
    pub fn settings(&self) -> &Arc<SettingsService> {
        &self.settings
    }

    /// All stored rules, sorted by priority.
    pub async fn list_rules(&self) -> AdminResult<Vec<Rule>> {
        let entries = self.store.hash_entries(keys::RATE_LIMIT_RULES).await?;
        let mut rules: Vec<Rule> = entries
            .iter()
            .filter_map(|(_, json)| serde_json::from_str(json).ok())
            .collect();
        rules.sort_by_key(|r| r.priority);
        Ok(rules)
    }

    /// Stored rules that are active, sorted by priority.
    pub async fn list_active_rules(&self) -> AdminResult<Vec<Rule>> {
        Ok(self.list_rules().await?.into_iter().filter(|r| r.active).collect())
    }

    /// Fetch one rule.
    pub async fn get_rule(&self, id: Uuid) -> AdminResult<Rule> {
        let json = self
            .store
            .hash_get(keys::RATE_LIMIT_RULES, &id.to_string())
            .await?
            .ok_or(AdminError::RuleNotFound(id))?;
        serde_json::from_str(&json).map_err(|e| AdminError::InvalidRule(e.to_string()))
    }

    /// Create a rule, assigning an id when the client sent none.
    pub async fn create_rule(&self, mut rule: Rule) -> AdminResult<Rule> {
        if rule.id.is_nil() {
            rule.id = Uuid::new_v4();
        }
        validate_rule(&rule)?;
        self.save(&rule).await?;
        info!(rule_id = %rule.id, pattern = %rule.path_pattern, "rule created");
        Ok(rule)
    }

    /// Replace a rule under the path id.
    pub async fn replace_rule(&self, id: Uuid, mut rule: Rule) -> AdminResult<Rule> {
        self.get_rule(id).await?;
        rule.id = id;
        validate_rule(&rule)?;
        self.save(&rule).await?;
        info!(rule_id = %id, "rule replaced");
        Ok(rule)
    }

    /// Patch a rule's queue settings.
    pub async fn patch_queue(&self, id: Uuid, patch: QueuePatch) -> AdminResult<Rule> {
        let mut rule = self.get_rule(id).await?;
        if let Some(enabled) = patch.queue_enabled {
            rule.queue_enabled = enabled;
        }
        if let Some(size) = patch.max_queue_size {
            rule.max_queue_size = size;
        }
        if let Some(delay) = patch.delay_per_request_ms {
            rule.delay_per_request_ms = delay;
        }
        validate_rule(&rule)?;
        self.save(&rule).await?;
        info!(rule_id = %id, "rule queue settings patched");
        Ok(rule)
    }

    /// Patch a rule's body-identifier settings.
    pub async fn patch_body_limit(&self, id: Uuid, patch: BodyLimitPatch) -> AdminResult<Rule> {
        let mut rule = self.get_rule(id).await?;
        if let Some(enabled) = patch.body_limit_enabled {
            rule.body_limit_enabled = enabled;
        }
        if let Some(path) = patch.body_field_path {
            rule.body_field_path = Some(path);
        }
        if let Some(mode) = patch.body_limit_type {
            rule.body_limit_type = Some(mode);
        }
        if let Some(content_type) = patch.body_content_type {
            rule.body_content_type = Some(content_type);
        }
        validate_rule(&rule)?;
        self.save(&rule).await?;
        info!(rule_id = %id, "rule body-limit settings patched");
        Ok(rule)
    }

    /// Delete a rule.
    pub async fn delete_rule(&self, id: Uuid) -> AdminResult<()> {
        let existed = self
            .store
            .hash_remove(keys::RATE_LIMIT_RULES, &id.to_string())
            .await?;
        if !existed {
            return Err(AdminError::RuleNotFound(id));
        }
        self.refresh().await;
        info!(rule_id = %id, "rule deleted");
        Ok(())
    }

    /// Force a rule-cache reload.
    pub async fn refresh(&self) -> usize {
        self.rules.refresh().await.unwrap_or(0)
    }

    async fn save(&self, rule: &Rule) -> AdminResult<()> {
        let json = serde_json::to_string(rule).map_err(|e| AdminError::InvalidRule(e.to_string()))?;
        self.store
            .hash_set(keys::RATE_LIMIT_RULES, &rule.id.to_string(), &json)
            .await?;
        self.refresh().await;
        Ok(())
    }
}

/// Constraints every stored rule must satisfy.
fn validate_rule(rule: &Rule) -> AdminResult<()> {
    if rule.path_pattern.trim().is_empty() {
        return Err(AdminError::InvalidRule("pathPattern is required".to_string()));
    }
    if rule.allowed_requests == 0 {
        return Err(AdminError::InvalidRule("allowedRequests must be positive".to_string()));
    }
    if rule.window_seconds == 0 {
        return Err(AdminError::InvalidRule("windowSeconds must be positive".to_string()));
    }
    if rule.active && !rule.is_global() {
        let has_target = rule
            .target_uri
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if !has_target {
            return Err(AdminError::InvalidRule(
                "targetUri is required for active rules".to_string(),
            ));
        }
    }
    if rule.queue_enabled && rule.delay_per_request_ms == 0 {
        return Err(AdminError::InvalidRule(
            "delayPerRequestMs must be positive when queueing is enabled".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn api() -> AdminApi {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let rules = Arc::new(RuleCache::new(store.clone()));
        let settings = Arc::new(SettingsService::new(store.clone()));
        AdminApi::new(store, rules, settings)
    }

    fn valid_rule() -> Rule {
        Rule {
            path_pattern: "/api/**".to_string(),
            target_uri: Some("http://127.0.0.1:9000".to_string()),
            allowed_requests: 5,
            window_seconds: 60,
            active: true,
            priority: 10,
            ..Rule::default()
        }
    }

    #[tokio::test]
    async fn create_assigns_an_id_and_activates_the_cache() {
        let api = api();
        let created = api.create_rule(valid_rule()).await.unwrap();
        assert!(!created.id.is_nil());

        let listed = api.list_rules().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
    }

    #[tokio::test]
    async fn replace_keeps_the_path_id() {
        let api = api();
        let created = api.create_rule(valid_rule()).await.unwrap();

        let mut replacement = valid_rule();
        replacement.allowed_requests = 99;
        let replaced = api.replace_rule(created.id, replacement).await.unwrap();
        assert_eq!(replaced.id, created.id);
        assert_eq!(api.get_rule(created.id).await.unwrap().allowed_requests, 99);
    }

    #[tokio::test]
    async fn replace_missing_rule_is_not_found() {
        let api = api();
        assert!(matches!(
            api.replace_rule(Uuid::new_v4(), valid_rule()).await,
            Err(AdminError::RuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn queue_patch_updates_only_named_fields() {
        let api = api();
        let created = api.create_rule(valid_rule()).await.unwrap();

        let patched = api
            .patch_queue(
                created.id,
                QueuePatch {
                    queue_enabled: Some(true),
                    max_queue_size: Some(4),
                    delay_per_request_ms: Some(250),
                },
            )
            .await
            .unwrap();
        assert!(patched.queue_enabled);
        assert_eq!(patched.max_queue_size, 4);
        assert_eq!(patched.allowed_requests, 5, "untouched fields survive");
    }

    #[tokio::test]
    async fn body_limit_patch() {
        let api = api();
        let created = api.create_rule(valid_rule()).await.unwrap();

        let patched = api
            .patch_body_limit(
                created.id,
                BodyLimitPatch {
                    body_limit_enabled: Some(true),
                    body_field_path: Some("user.id".to_string()),
                    body_limit_type: Some(LimitMode::CombineWithIp),
                    body_content_type: Some(BodyContentType::Json),
                },
            )
            .await
            .unwrap();
        assert!(patched.body_limit_enabled);
        assert_eq!(patched.body_field_path.as_deref(), Some("user.id"));
    }

    #[tokio::test]
    async fn delete_removes_and_404s_after() {
        let api = api();
        let created = api.create_rule(valid_rule()).await.unwrap();

        api.delete_rule(created.id).await.unwrap();
        assert!(matches!(
            api.delete_rule(created.id).await,
            Err(AdminError::RuleNotFound(_))
        ));
        assert!(api.list_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn validation_rejects_unusable_rules() {
        let api = api();

        let mut missing_target = valid_rule();
        missing_target.target_uri = None;
        assert!(matches!(
            api.create_rule(missing_target).await,
            Err(AdminError::InvalidRule(_))
        ));

        // A global rule needs no target.
        let mut global = valid_rule();
        global.path_pattern = "/**".to_string();
        global.target_uri = None;
        assert!(api.create_rule(global).await.is_ok());

        let mut zero_quota = valid_rule();
        zero_quota.allowed_requests = 0;
        assert!(api.create_rule(zero_quota).await.is_err());

        let mut queue_no_delay = valid_rule();
        queue_no_delay.queue_enabled = true;
        queue_no_delay.delay_per_request_ms = 0;
        assert!(api.create_rule(queue_no_delay).await.is_err());
    }

    #[tokio::test]
    async fn active_listing_filters_inactive() {
        let api = api();
        api.create_rule(valid_rule()).await.unwrap();
        let mut inactive = valid_rule();
        inactive.active = false;
        inactive.target_uri = None;
        api.create_rule(inactive).await.unwrap();

        assert_eq!(api.list_rules().await.unwrap().len(), 2);
        assert_eq!(api.list_active_rules().await.unwrap().len(), 1);
    }
}
