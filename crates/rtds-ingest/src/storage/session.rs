//! Per-owner ephemeral stores
//!
//! Each owner gets its own store the first time a chunk is written for it;
//! reads never open a session. Only the collaborator that owns the session
//! tears it down.

use rtds_common::OwnerId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{MemoryRecordStore, RecordStore};

/// `owner -> ephemeral store` handles
#[derive(Default)]
pub struct SessionRegistry {
    stores: RwLock<HashMap<OwnerId, Arc<dyn RecordStore>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The owner's store, created empty on first use
    pub async fn get_or_create(&self, owner: &OwnerId) -> Arc<dyn RecordStore> {
        if let Some(store) = self.stores.read().await.get(owner) {
            return store.clone();
        }

        let mut stores = self.stores.write().await;
        stores
            .entry(owner.clone())
            .or_insert_with(|| {
                info!(owner = %owner, "Opened ephemeral session store");
                Arc::new(MemoryRecordStore::new())
            })
            .clone()
    }

    /// The owner's store if a session is open
    pub async fn get(&self, owner: &OwnerId) -> Option<Arc<dyn RecordStore>> {
        self.stores.read().await.get(owner).cloned()
    }

    /// Install a specific store for an owner, replacing any open session
    pub async fn insert(&self, owner: OwnerId, store: Arc<dyn RecordStore>) {
        self.stores.write().await.insert(owner, store);
    }

    /// Destroy the owner's session data. Returns false if none was open.
    pub async fn end_session(&self, owner: &OwnerId) -> bool {
        let removed = self.stores.write().await.remove(owner);
        match removed {
            Some(store) => {
                store.close().await;
                info!(owner = %owner, "Ended ephemeral session");
                true
            },
            None => false,
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.stores.read().await.len()
    }
}
