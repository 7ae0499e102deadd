use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::auth::providers::Principal;
use crate::clock::{Clock, SystemClock};

/// Version written into every profile this crate creates
pub const PROFILE_SCHEMA_VERSION: u32 = 2;

/// Defines the types of profile store errors that can occur
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileStoreError {
    #[error("Profile not found: {0}")]
    NotFound(String),
    #[error("Profile store unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

/// Application role of a user
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

fn default_active() -> bool {
    true
}

/// Per-user profile document keyed by the principal id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    /// Principal id from the identity provider
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Missing roles read as `user`
    #[serde(default)]
    pub role: Role,
    /// Mirror of the provider's verified-email flag
    #[serde(default)]
    pub email_verified: bool,
    /// Business-level verification flag
    #[serde(default)]
    pub is_verified: bool,
    /// Administrative on/off switch; missing reads as active
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Sign-in method that created the profile ("password", "google", ...)
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProfileRecord {
    /// Profile written at registration time; both verification flags start false
    pub fn for_registration(
        id: impl Into<String>,
        email: impl Into<String>,
        display_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            display_name,
            role: Role::User,
            email_verified: false,
            is_verified: false,
            is_active: true,
            provider: Some("password".to_string()),
            schema_version: PROFILE_SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
        }
    }

    /// Profile created when a principal signs in without one.
    /// Both verification flags mirror the provider's current value.
    pub fn synthesized_for(principal: &Principal, email_verified: bool, now: DateTime<Utc>) -> Self {
        Self {
            id: principal.uid.clone(),
            email: principal.email.clone(),
            display_name: principal.display_name.clone(),
            role: Role::User,
            email_verified,
            is_verified: email_verified,
            is_active: true,
            provider: Some(principal.provider_id.clone()),
            schema_version: PROFILE_SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
        }
    }

    /// In-memory stand-in used when the store cannot be read.
    /// It is never persisted.
    pub fn degraded_for(principal: &Principal, now: DateTime<Utc>) -> Self {
        let mut record = Self::synthesized_for(principal, principal.email_verified, now);
        record.schema_version = 0;
        record
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Merge an opportunistic update. Role and active flag are never touched here.
    pub fn apply(&mut self, update: &ProfileUpdate, now: DateTime<Utc>) {
        if let Some(email_verified) = update.email_verified {
            self.email_verified = email_verified;
        }
        if let Some(is_verified) = update.is_verified {
            self.is_verified = is_verified;
        }
        if let Some(display_name) = &update.display_name {
            self.display_name = Some(display_name.clone());
        }
        self.updated_at = now;
    }
}

/// Partial write produced by sign-in and verification sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub email_verified: Option<bool>,
    pub is_verified: Option<bool>,
    pub display_name: Option<String>,
}

impl ProfileUpdate {
    /// Set both verification flags to the provider value
    pub fn verification(verified: bool) -> Self {
        Self {
            email_verified: Some(verified),
            is_verified: Some(verified),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.email_verified.is_none() && self.is_verified.is_none() && self.display_name.is_none()
    }
}

/// Document store holding one profile per principal
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when no profile exists for `id`
    async fn get(&self, id: &str) -> Result<Option<ProfileRecord>, ProfileStoreError>;

    /// Create or fully replace the profile for `record.id`
    async fn set(&self, record: ProfileRecord) -> Result<(), ProfileStoreError>;

    /// Merge `update` into an existing profile and return the result
    async fn update(
        &self,
        id: &str,
        update: ProfileUpdate,
    ) -> Result<ProfileRecord, ProfileStoreError>;

    async fn list_by_role(&self, role: Role) -> Result<Vec<ProfileRecord>, ProfileStoreError>;
}

/// Process-local profile store
pub struct InMemoryProfileStore {
    profiles: Mutex<HashMap<String, ProfileRecord>>,
    writes: AtomicUsize,
    unavailable: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProfileRecord>> {
        self.profiles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<(), ProfileStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProfileStoreError::Unavailable(
                "profile store offline".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert a record without counting it as a write
    pub fn seed(&self, record: ProfileRecord) {
        self.lock().insert(record.id.clone(), record);
    }

    /// Make every call fail with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `set`/`update` calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Read a record directly, bypassing failure injection
    pub fn snapshot(&self, id: &str) -> Option<ProfileRecord> {
        self.lock().get(id).cloned()
    }

    /// Administrative role change
    pub fn set_role(&self, id: &str, role: Role) -> Result<(), ProfileStoreError> {
        let now = self.clock.now();
        let mut profiles = self.lock();
        let record = profiles
            .get_mut(id)
            .ok_or_else(|| ProfileStoreError::NotFound(id.to_string()))?;
        record.role = role;
        record.updated_at = now;
        Ok(())
    }

    /// Administrative enable/disable
    pub fn set_active(&self, id: &str, is_active: bool) -> Result<(), ProfileStoreError> {
        let now = self.clock.now();
        let mut profiles = self.lock();
        let record = profiles
            .get_mut(id)
            .ok_or_else(|| ProfileStoreError::NotFound(id.to_string()))?;
        record.is_active = is_active;
        record.updated_at = now;
        Ok(())
    }

    /// Administrative business verification
    pub fn set_business_verified(&self, id: &str, is_verified: bool) -> Result<(), ProfileStoreError> {
        let now = self.clock.now();
        let mut profiles = self.lock();
        let record = profiles
            .get_mut(id)
            .ok_or_else(|| ProfileStoreError::NotFound(id.to_string()))?;
        record.is_verified = is_verified;
        record.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, id: &str) -> Result<Option<ProfileRecord>, ProfileStoreError> {
        self.ensure_available()?;
        Ok(self.lock().get(id).cloned())
    }

    async fn set(&self, mut record: ProfileRecord) -> Result<(), ProfileStoreError> {
        self.ensure_available()?;
        if record.id.is_empty() {
            return Err(ProfileStoreError::InvalidData(
                "profile id must not be empty".to_string(),
            ));
        }
        record.updated_at = self.clock.now();
        debug!(profile_id = %record.id, "Writing profile");
        self.lock().insert(record.id.clone(), record);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        update: ProfileUpdate,
    ) -> Result<ProfileRecord, ProfileStoreError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut profiles = self.lock();
        let record = profiles.get_mut(id).ok_or_else(|| {
            warn!(profile_id = %id, "Update for missing profile");
            ProfileStoreError::NotFound(id.to_string())
        })?;
        record.apply(&update, now);
        let merged = record.clone();
        drop(profiles);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(merged)
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<ProfileRecord>, ProfileStoreError> {
        self.ensure_available()?;
        let mut matching: Vec<ProfileRecord> = self
            .lock()
            .values()
            .filter(|record| record.role == role)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    fn principal(verified: bool) -> Principal {
        Principal {
            uid: "uid-1".to_string(),
            email: "a@b.com".to_string(),
            display_name: Some("A".to_string()),
            email_verified: verified,
            id_token: "token-1".to_string(),
            provider_id: "password".to_string(),
        }
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{
            "id": "u1",
            "email": "u1@example.com",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z"
        }"#;
        let record: ProfileRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.role, Role::User);
        assert!(record.is_active);
        assert!(!record.email_verified);
        assert!(!record.is_verified);
        assert_eq!(record.schema_version, 0);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn test_synthesized_profile_mirrors_verification() {
        let now = Utc::now();
        let record = ProfileRecord::synthesized_for(&principal(true), true, now);
        assert!(record.email_verified);
        assert!(record.is_verified);
        assert!(record.is_active);
        assert_eq!(record.role, Role::User);
        assert_eq!(record.schema_version, PROFILE_SCHEMA_VERSION);
    }

    #[test]
    fn test_apply_never_touches_role_or_active() {
        let now = Utc::now();
        let mut record = ProfileRecord::for_registration("u1", "u1@x.com", None, now);
        record.role = Role::Admin;
        record.is_active = false;

        record.apply(
            &ProfileUpdate::verification(true).with_display_name(Some("New".to_string())),
            now + Duration::seconds(5),
        );

        assert_eq!(record.role, Role::Admin);
        assert!(!record.is_active);
        assert!(record.email_verified && record.is_verified);
        assert_eq!(record.display_name.as_deref(), Some("New"));
        assert_eq!(record.updated_at, now + Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_in_memory_store_round_trip() {
        let clock = ManualClock::default();
        let store = InMemoryProfileStore::new().with_clock(Arc::new(clock.clone()));

        assert_eq!(store.get("u1").await.unwrap(), None);

        let record = ProfileRecord::for_registration("u1", "u1@x.com", None, clock.now());
        store.set(record).await.unwrap();
        assert_eq!(store.write_count(), 1);

        clock.advance(Duration::minutes(1));
        let merged = store
            .update("u1", ProfileUpdate::verification(true))
            .await
            .unwrap();
        assert!(merged.is_verified);
        assert_eq!(merged.updated_at, clock.now());
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_profile() {
        let store = InMemoryProfileStore::new();
        let result = store.update("ghost", ProfileUpdate::verification(true)).await;
        assert_eq!(result, Err(ProfileStoreError::NotFound("ghost".to_string())));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = InMemoryProfileStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get("u1").await,
            Err(ProfileStoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.get("u1").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_by_role() {
        let store = InMemoryProfileStore::new();
        let now = Utc::now();
        store.seed(ProfileRecord::for_registration("u1", "u1@x.com", None, now));
        store.seed(ProfileRecord::for_registration("u2", "u2@x.com", None, now));
        store.set_role("u2", Role::Admin).unwrap();

        let admins = store.list_by_role(Role::Admin).await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].id, "u2");
        assert_eq!(store.write_count(), 0);
    }
}
