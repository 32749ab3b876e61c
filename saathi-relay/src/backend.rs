//! Collaborator seams of the relay: who belongs to which group, and where
//! locations live.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use saathi_proto::{GroupId, RosterEntry, UserId};
use saathi_store::Store;

#[async_trait]
pub trait MembershipResolver: Send + Sync {
    async fn find_user_group(&self, user_id: UserId) -> anyhow::Result<Option<GroupId>>;
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Returns `false` when a newer point is already stored and this one
    /// was dropped.
    async fn upsert_location(
        &self,
        user_id: UserId,
        latitude: f64,
        longitude: f64,
        captured_at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Latest point of every member of `group`, most recent first.
    async fn group_roster(&self, group: &str) -> anyhow::Result<Vec<RosterEntry>>;
}

/// Both seams over the shared SQLite store.
#[derive(Clone)]
pub struct StoreBackend {
    store: Arc<Store>,
}

impl StoreBackend {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    async fn blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Store) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .context("store task panicked")?
    }
}

#[async_trait]
impl MembershipResolver for StoreBackend {
    async fn find_user_group(&self, user_id: UserId) -> anyhow::Result<Option<GroupId>> {
        self.blocking(move |store| store.find_user_group(user_id))
            .await
    }
}

#[async_trait]
impl LocationStore for StoreBackend {
    async fn upsert_location(
        &self,
        user_id: UserId,
        latitude: f64,
        longitude: f64,
        captured_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        self.blocking(move |store| {
            store.upsert_location(user_id, latitude, longitude, captured_at)
        })
        .await
    }

    async fn group_roster(&self, group: &str) -> anyhow::Result<Vec<RosterEntry>> {
        let group = group.to_string();
        self.blocking(move |store| store.group_roster(&group)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k9::assert_equal;
    use saathi_store::NewUser;

    #[tokio::test]
    async fn store_backend_round_trips_through_sqlite() {
        let store = Arc::new(Store::in_memory().unwrap());
        let group = store.create_group().unwrap();
        let user = store
            .create_user(&NewUser {
                full_name: "Asha".to_string(),
                mobile_number: "9000000001".to_string(),
                group_code: Some(group.clone()),
                ..Default::default()
            })
            .unwrap();

        let backend = StoreBackend::new(store);
        assert_equal!(
            backend.find_user_group(user).await.unwrap(),
            Some(group.clone())
        );
        assert_equal!(backend.find_user_group(999).await.unwrap(), None);

        assert!(backend
            .upsert_location(user, 22.71, 75.85, Utc::now())
            .await
            .unwrap());
        let roster = backend.group_roster(&group).await.unwrap();
        assert_equal!(roster.len(), 1);
        assert_equal!(roster[0].user_id, user);
        assert_equal!(roster[0].full_name.as_deref(), Some("Asha"));
    }
}
