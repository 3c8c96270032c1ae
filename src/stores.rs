use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::MlError;

/// A user-owned group of items, as the wider application stores it.
#[derive(Debug, Clone)]
pub struct GroupRecord {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    /// Application-level guard: a group with models must be deleted before
    /// it can be retrained.
    pub has_model: bool,
}

/// One tradable item with its raw price history envelope.
#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub id: i64,
    pub name: String,
    pub price_history: Value,
}

/// Mapping from an item to the fingerprint of its current artifact set.
#[derive(Debug, Clone)]
pub struct ModelIndexRecord {
    pub owner_id: i64,
    pub group_id: i64,
    pub item_id: i64,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// Relational group/item storage. Owned by the wider application; the engine
/// only depends on this read/flag surface.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn get_group(&self, group_id: i64) -> Result<Option<GroupRecord>, MlError>;

    async fn get_group_items(
        &self,
        owner_id: i64,
        group_id: i64,
    ) -> Result<Vec<ItemRecord>, MlError>;

    async fn set_has_model(&self, group_id: i64, has_model: bool) -> Result<(), MlError>;
}

/// Relational model-index storage. The engine writes a record only after the
/// artifact set has been fully persisted.
#[async_trait]
pub trait ModelIndexStore: Send + Sync {
    async fn save_index(&self, record: ModelIndexRecord) -> Result<(), MlError>;

    /// Most recent record for the item, by creation time.
    async fn get_index(
        &self,
        owner_id: i64,
        item_id: i64,
    ) -> Result<Option<ModelIndexRecord>, MlError>;

    /// Remove every record for the group. Returns whether anything existed.
    async fn delete_index(&self, owner_id: i64, group_id: i64) -> Result<bool, MlError>;
}

/// In-memory stand-in for the relational group store, used by the binary and
/// the tests.
#[derive(Default)]
pub struct InMemoryGroupStore {
    groups: RwLock<HashMap<i64, GroupRecord>>,
    items: RwLock<HashMap<i64, Vec<ItemRecord>>>,
}

impl InMemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_group(&self, group: GroupRecord) {
        self.groups.write().insert(group.id, group);
    }

    pub fn insert_item(&self, group_id: i64, item: ItemRecord) {
        self.items.write().entry(group_id).or_default().push(item);
    }
}

#[async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn get_group(&self, group_id: i64) -> Result<Option<GroupRecord>, MlError> {
        Ok(self.groups.read().get(&group_id).cloned())
    }

    async fn get_group_items(
        &self,
        owner_id: i64,
        group_id: i64,
    ) -> Result<Vec<ItemRecord>, MlError> {
        let owned = self
            .groups
            .read()
            .get(&group_id)
            .map(|g| g.owner_id == owner_id)
            .unwrap_or(false);
        if !owned {
            return Ok(Vec::new());
        }
        Ok(self
            .items
            .read()
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_has_model(&self, group_id: i64, has_model: bool) -> Result<(), MlError> {
        if let Some(group) = self.groups.write().get_mut(&group_id) {
            group.has_model = has_model;
        }
        Ok(())
    }
}

/// In-memory stand-in for the relational model index.
#[derive(Default)]
pub struct InMemoryModelIndexStore {
    records: RwLock<Vec<ModelIndexRecord>>,
}

impl InMemoryModelIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelIndexStore for InMemoryModelIndexStore {
    async fn save_index(&self, record: ModelIndexRecord) -> Result<(), MlError> {
        self.records.write().push(record);
        Ok(())
    }

    async fn get_index(
        &self,
        owner_id: i64,
        item_id: i64,
    ) -> Result<Option<ModelIndexRecord>, MlError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.owner_id == owner_id && r.item_id == item_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn delete_index(&self, owner_id: i64, group_id: i64) -> Result<bool, MlError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| !(r.owner_id == owner_id && r.group_id == group_id));
        Ok(records.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(item_id: i64, fingerprint: &str, minute: u32) -> ModelIndexRecord {
        ModelIndexRecord {
            owner_id: 7,
            group_id: 1,
            item_id,
            fingerprint: fingerprint.to_string(),
            created_at: chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, minute, 0)
                .unwrap()
                .and_utc(),
        }
    }

    #[tokio::test]
    async fn index_returns_most_recent_record() {
        let store = InMemoryModelIndexStore::new();
        store.save_index(record(101, "old0000000000000", 0)).await.unwrap();
        store.save_index(record(101, "new0000000000000", 5)).await.unwrap();

        let found = store.get_index(7, 101).await.unwrap().unwrap();
        assert_eq!(found.fingerprint, "new0000000000000");
    }

    #[tokio::test]
    async fn delete_index_reports_whether_anything_existed() {
        let store = InMemoryModelIndexStore::new();
        assert!(!store.delete_index(7, 1).await.unwrap());

        store.save_index(record(101, "fp00000000000000", 0)).await.unwrap();
        assert!(store.delete_index(7, 1).await.unwrap());
        assert!(store.get_index(7, 101).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn group_items_require_ownership() {
        let store = InMemoryGroupStore::new();
        store.insert_group(GroupRecord {
            id: 1,
            owner_id: 7,
            name: "Knives".to_string(),
            has_model: false,
        });
        store.insert_item(
            1,
            ItemRecord {
                id: 101,
                name: "Falchion Knife".to_string(),
                price_history: json!({"prices": []}),
            },
        );

        assert_eq!(store.get_group_items(7, 1).await.unwrap().len(), 1);
        assert!(store.get_group_items(8, 1).await.unwrap().is_empty());
    }
}
