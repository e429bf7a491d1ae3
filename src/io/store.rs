//! HTTP document store client for shared spots and user profiles
//!
//! The backend is a plain document store with one collection for parking
//! spots and one for user profiles. This module owns the `SpotStore` /
//! `ProfileStore` seams the session talks through, plus the REST
//! implementation used in production. Spot ids are generated client-side
//! (UUIDv7) so a published spot is fully formed before the store confirms it.

use crate::domain::types::{PublishedSpot, SpotId, SpotStatus};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Persistence error taxonomy.
///
/// `NotConfigured` degrades publishing/polling to a logged explanation; the
/// others are terminal for a single store call only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    /// Store base URL absent from configuration
    NotConfigured,
    /// Transport failure or non-success status from the store
    Http(String),
    /// Store answered with a payload we could not decode
    Decode(String),
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::NotConfigured => write!(f, "document store is not configured"),
            PersistError::Http(msg) => write!(f, "store request failed: {msg}"),
            PersistError::Decode(msg) => write!(f, "store response invalid: {msg}"),
        }
    }
}

impl std::error::Error for PersistError {}

/// User profile document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub is_searching: bool,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// Write/read access to the shared spot collection
#[async_trait]
pub trait SpotStore: Send + Sync {
    /// Publish a freed spot; exactly one call per confirmed departure
    async fn publish(
        &self,
        latitude: f64,
        longitude: f64,
        owner_id: &str,
    ) -> Result<PublishedSpot, PersistError>;

    /// Current set of free spots, unfiltered for age
    async fn fetch_spots(&self) -> Result<Vec<PublishedSpot>, PersistError>;
}

/// Thin wrapper over the profile collection
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<UserProfile, PersistError>;

    async fn update_position(
        &self,
        user_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), PersistError>;

    async fn set_searching(&self, user_id: &str, searching: bool) -> Result<(), PersistError>;
}

/// REST client for the document store
pub struct HttpDocumentStore {
    client: reqwest::Client,
    base_url: String,
    spots_collection: String,
    users_collection: String,
    api_key: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(
        base_url: &str,
        spots_collection: &str,
        users_collection: &str,
        api_key: Option<&str>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            spots_collection: spots_collection.to_string(),
            users_collection: users_collection.to_string(),
            api_key: api_key.map(str::to_string),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}", self.base_url, collection)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, id)
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, PersistError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(PersistError::Http(format!("store returned {status}")));
        }
        Ok(resp)
    }
}

#[derive(Serialize)]
struct PositionPatch {
    latitude: f64,
    longitude: f64,
}

#[derive(Serialize)]
struct SearchingPatch {
    is_searching: bool,
}

#[async_trait]
impl SpotStore for HttpDocumentStore {
    async fn publish(
        &self,
        latitude: f64,
        longitude: f64,
        owner_id: &str,
    ) -> Result<PublishedSpot, PersistError> {
        let spot = PublishedSpot {
            id: SpotId(Uuid::now_v7().to_string()),
            latitude,
            longitude,
            status: SpotStatus::Free,
            created_at: Utc::now(),
            user_id: owner_id.to_string(),
        };

        let url = self.collection_url(&self.spots_collection);
        let resp = self
            .with_auth(self.client.post(&url).json(&spot))
            .send()
            .await
            .map_err(|e| PersistError::Http(e.to_string()))?;
        Self::check_status(resp).await?;

        debug!(spot_id = %spot.id, url = %url, "spot_document_created");
        Ok(spot)
    }

    async fn fetch_spots(&self) -> Result<Vec<PublishedSpot>, PersistError> {
        let url = self.collection_url(&self.spots_collection);
        let resp = self
            .with_auth(self.client.get(&url).query(&[("status", SpotStatus::Free.as_str())]))
            .send()
            .await
            .map_err(|e| PersistError::Http(e.to_string()))?;
        let resp = Self::check_status(resp).await?;

        resp.json::<Vec<PublishedSpot>>().await.map_err(|e| PersistError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ProfileStore for HttpDocumentStore {
    async fn load(&self, user_id: &str) -> Result<UserProfile, PersistError> {
        let url = self.document_url(&self.users_collection, user_id);
        let resp = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| PersistError::Http(e.to_string()))?;
        let resp = Self::check_status(resp).await?;

        resp.json::<UserProfile>().await.map_err(|e| PersistError::Decode(e.to_string()))
    }

    async fn update_position(
        &self,
        user_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), PersistError> {
        let url = self.document_url(&self.users_collection, user_id);
        let resp = self
            .with_auth(self.client.patch(&url).json(&PositionPatch { latitude, longitude }))
            .send()
            .await
            .map_err(|e| PersistError::Http(e.to_string()))?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn set_searching(&self, user_id: &str, searching: bool) -> Result<(), PersistError> {
        let url = self.document_url(&self.users_collection, user_id);
        let resp = self
            .with_auth(self.client.patch(&url).json(&SearchingPatch { is_searching: searching }))
            .send()
            .await
            .map_err(|e| PersistError::Http(e.to_string()))?;
        Self::check_status(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_error_display() {
        assert_eq!(
            PersistError::NotConfigured.to_string(),
            "document store is not configured"
        );
        assert!(PersistError::Http("503".to_string()).to_string().contains("503"));
    }

    #[test]
    fn test_url_building_strips_trailing_slash() {
        let store =
            HttpDocumentStore::new("https://store.example/api/", "parkings", "users", None)
                .unwrap();
        assert_eq!(store.collection_url("parkings"), "https://store.example/api/parkings");
        assert_eq!(store.document_url("users", "u1"), "https://store.example/api/users/u1");
    }

    #[test]
    fn test_profile_defaults_on_sparse_document() {
        let profile: UserProfile = serde_json::from_str(r#"{"id":"u1"}"#).unwrap();
        assert!(!profile.is_searching);
        assert!(profile.latitude.is_none());
    }
}
