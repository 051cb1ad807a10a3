use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DonationRecord {
    pub id: Uuid,
    pub supporter_name: String,
    pub supporter_email: Option<String>,
    pub amount: f64,
    pub message: Option<String>,
    pub order_id: Option<String>,
    pub unit: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDonation {
    pub supporter_name: String,
    pub supporter_email: Option<String>,
    pub amount: f64,
    pub message: Option<String>,
    pub order_id: Option<String>,
    pub unit: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub id: Uuid,
    pub token: String,
    pub email: Option<String>,
    pub donation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Tokens without an expiry never lapse.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccessToken {
    pub token: String,
    pub email: Option<String>,
    pub donation_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn insert_donation(&self, donation: NewDonation) -> Result<DonationRecord, StoreError>;

    async fn find_donation_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<DonationRecord>, StoreError>;

    async fn insert_access_token(&self, token: NewAccessToken) -> Result<AccessToken, StoreError>;

    async fn find_valid_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, StoreError>;

    async fn latest_token_for_donation(
        &self,
        donation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, StoreError>;
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
struct StoreSnapshot {
    #[serde(default)]
    donations: Vec<DonationRecord>,
    #[serde(default)]
    access_tokens: Vec<AccessToken>,
}

pub struct JsonStore {
    records: Mutex<StoreSnapshot>,
    path: Option<PathBuf>,
}

impl JsonStore {
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(StoreSnapshot::default()),
            path: None,
        }
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let records = load_snapshot(&path).await?;
        Ok(Self {
            records: Mutex::new(records),
            path: Some(path),
        })
    }

    // The lock is held until the snapshot is on disk, and memory only
    // changes once the write succeeded.
    async fn mutate<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StoreSnapshot) -> Result<T, StoreError>,
    {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let result = operation(&mut next)?;

        self.persist(&next).await?;
        *records = next;
        Ok(result)
    }

    async fn persist(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let payload = serde_json::to_string_pretty(snapshot)?;
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload).await?;

        if let Err(error) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(error.into());
        }
        Ok(())
    }
}

async fn load_snapshot(path: &Path) -> Result<StoreSnapshot, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(StoreSnapshot::default()),
        Err(error) => Err(error.into()),
    }
}

#[async_trait]
impl AccessStore for JsonStore {
    async fn insert_donation(&self, donation: NewDonation) -> Result<DonationRecord, StoreError> {
        self.mutate(|records| {
            if let Some(order_id) = donation.order_id.as_deref()
                && records
                    .donations
                    .iter()
                    .any(|existing| existing.order_id.as_deref() == Some(order_id))
            {
                return Err(StoreError::Conflict { field: "order_id" });
            }

            let record = DonationRecord {
                id: Uuid::new_v4(),
                supporter_name: donation.supporter_name,
                supporter_email: donation.supporter_email,
                amount: donation.amount,
                message: donation.message,
                order_id: donation.order_id,
                unit: donation.unit,
                verified: true,
                created_at: Utc::now(),
            };
            records.donations.push(record.clone());
            Ok(record)
        })
        .await
    }

    async fn find_donation_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<DonationRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .donations
            .iter()
            .find(|donation| donation.order_id.as_deref() == Some(order_id))
            .cloned())
    }

    async fn insert_access_token(&self, token: NewAccessToken) -> Result<AccessToken, StoreError> {
        self.mutate(|records| {
            if records
                .access_tokens
                .iter()
                .any(|existing| existing.token == token.token)
            {
                return Err(StoreError::Conflict { field: "token" });
            }

            let record = AccessToken {
                id: Uuid::new_v4(),
                token: token.token,
                email: token.email,
                donation_id: token.donation_id,
                created_at: Utc::now(),
                expires_at: token.expires_at,
            };
            records.access_tokens.push(record.clone());
            Ok(record)
        })
        .await
    }

    async fn find_valid_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .access_tokens
            .iter()
            .find(|candidate| candidate.token == token && candidate.is_valid_at(now))
            .cloned())
    }

    async fn latest_token_for_donation(
        &self,
        donation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .access_tokens
            .iter()
            .filter(|token| token.donation_id == Some(donation_id) && token.is_valid_at(now))
            .max_by_key(|token| token.created_at)
            .cloned())
    }
}

#[cfg(test)]
impl JsonStore {
    pub(crate) async fn donation_count(&self) -> usize {
        self.records.lock().await.donations.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;

    fn donation(order_id: &str, name: &str) -> NewDonation {
        NewDonation {
            supporter_name: name.to_string(),
            supporter_email: Some(format!("{name}@example.test")),
            amount: 5_000.0,
            message: None,
            order_id: Some(order_id.to_string()),
            unit: "gulali".to_string(),
        }
    }

    fn token(value: &str, expires_at: Option<DateTime<Utc>>) -> NewAccessToken {
        NewAccessToken {
            token: value.to_string(),
            email: None,
            donation_id: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn duplicate_order_id_conflicts_and_keeps_first() {
        let store = JsonStore::in_memory();
        store.insert_donation(donation("TRX-1", "first")).await.unwrap();

        let error = store
            .insert_donation(donation("TRX-1", "second"))
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::Conflict { field: "order_id" }));

        assert_eq!(store.donation_count().await, 1);
        let stored = store.find_donation_by_order_id("TRX-1").await.unwrap().unwrap();
        assert_eq!(stored.supporter_name, "first");
        assert!(stored.verified);
    }

    #[tokio::test]
    async fn donations_without_order_id_never_conflict() {
        let store = JsonStore::in_memory();
        let mut anonymous = donation("unused", "anon");
        anonymous.order_id = None;

        store.insert_donation(anonymous.clone()).await.unwrap();
        store.insert_donation(anonymous).await.unwrap();
        assert_eq!(store.donation_count().await, 2);
    }

    #[tokio::test]
    async fn token_validity_follows_expiry() {
        let store = JsonStore::in_memory();
        let now = Utc::now();
        store.insert_access_token(token("forever", None)).await.unwrap();
        store
            .insert_access_token(token("later", Some(now + Duration::days(1))))
            .await
            .unwrap();
        store
            .insert_access_token(token("lapsed", Some(now - Duration::seconds(1))))
            .await
            .unwrap();

        assert!(store.find_valid_token("forever", now).await.unwrap().is_some());
        assert!(store.find_valid_token("later", now).await.unwrap().is_some());
        assert!(store.find_valid_token("lapsed", now).await.unwrap().is_none());
        assert!(store.find_valid_token("unknown", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_token_value_conflicts() {
        let store = JsonStore::in_memory();
        store.insert_access_token(token("same", None)).await.unwrap();
        let error = store
            .insert_access_token(token("same", None))
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::Conflict { field: "token" }));
    }

    #[tokio::test]
    async fn tokens_are_looked_up_per_donation() {
        let store = JsonStore::in_memory();
        let first = store.insert_donation(donation("A", "a")).await.unwrap();
        let second = store.insert_donation(donation("B", "b")).await.unwrap();

        let mut for_first = token("token-a", None);
        for_first.donation_id = Some(first.id);
        store.insert_access_token(for_first).await.unwrap();

        let mut for_second = token("token-b", None);
        for_second.donation_id = Some(second.id);
        store.insert_access_token(for_second).await.unwrap();

        let now = Utc::now();
        let found = store
            .latest_token_for_donation(first.id, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.token, "token-a");
        assert!(
            store
                .latest_token_for_donation(Uuid::new_v4(), now)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("data").join("access.json");

        {
            let store = JsonStore::open(&path).await.unwrap();
            store.insert_donation(donation("PERSIST", "p")).await.unwrap();
            store.insert_access_token(token("persisted", None)).await.unwrap();
        }

        let reopened = JsonStore::open(&path).await.unwrap();
        assert!(
            reopened
                .find_donation_by_order_id("PERSIST")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            reopened
                .find_valid_token("persisted", Utc::now())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_are_all_persisted() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("access.json");
        let store = Arc::new(JsonStore::open(&path).await.unwrap());

        let writers: Vec<_> = (0..48)
            .map(|index| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .insert_donation(donation(&format!("TRX-{index}"), "fan"))
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let reopened = JsonStore::open(&path).await.unwrap();
        assert_eq!(reopened.donation_count().await, 48);
        for index in 0..48 {
            let order_id = format!("TRX-{index}");
            assert!(
                reopened
                    .find_donation_by_order_id(&order_id)
                    .await
                    .unwrap()
                    .is_some(),
                "missing {order_id}"
            );
        }

        let mut entries = tokio::fs::read_dir(temp.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names, vec![std::ffi::OsString::from("access.json")]);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_record_behind() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("data");
        let path = dir.join("access.json");
        let store = JsonStore::open(&path).await.unwrap();

        tokio::fs::remove_dir_all(&dir).await.unwrap();
        let error = store
            .insert_donation(donation("TRX-LOST", "first"))
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::Io(_)));
        assert_eq!(store.donation_count().await, 0);
        assert!(
            store
                .find_donation_by_order_id("TRX-LOST")
                .await
                .unwrap()
                .is_none()
        );

        tokio::fs::create_dir_all(&dir).await.unwrap();
        let retried = store
            .insert_donation(donation("TRX-LOST", "first"))
            .await
            .unwrap();
        assert_eq!(retried.order_id.as_deref(), Some("TRX-LOST"));
        assert_eq!(store.donation_count().await, 1);
    }
}
