use crate::error::{Result, SearchError};
use async_trait::async_trait;
use pocket_protocol::{ChangeKind, Item, ItemEmbedding, TagFilter};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// The record store as seen by the search core.
///
/// The store stays authoritative; the core only reads items and writes back
/// embeddings it generated.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Every item carrying all tags in `tags`.
    async fn list_items(&self, tags: &TagFilter) -> Result<Vec<Item>>;

    async fn get_item(&self, id: &str) -> Result<Option<Item>> {
        let items = self.list_items(&TagFilter::any()).await?;
        Ok(items.into_iter().find(|item| item.id == id))
    }

    /// Persists a freshly generated embedding. Stores that cannot hold one may ignore it.
    async fn store_embedding(&self, _id: &str, _embedding: ItemEmbedding) -> Result<()> {
        Ok(())
    }
}

/// In-process item store, used by the CLI and tests.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: RwLock<BTreeMap<String, Item>>,
}

impl MemoryItemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items<I: IntoIterator<Item = Item>>(items: I) -> Self {
        Self {
            items: RwLock::new(items.into_iter().map(|item| (item.id.clone(), item)).collect()),
        }
    }

    /// Inserts or replaces an item, reporting which of the two happened.
    pub fn upsert(&self, item: Item) -> ChangeKind {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        match items.insert(item.id.clone(), item) {
            Some(_) => ChangeKind::Updated,
            None => ChangeKind::Added,
        }
    }

    pub fn remove(&self, id: &str) -> Option<Item> {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ItemSource for MemoryItemStore {
    async fn list_items(&self, tags: &TagFilter) -> Result<Vec<Item>> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.values().filter(|item| tags.matches(item)).cloned().collect())
    }

    async fn get_item(&self, id: &str) -> Result<Option<Item>> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(id).cloned())
    }

    async fn store_embedding(&self, id: &str, embedding: ItemEmbedding) -> Result<()> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let item = items
            .get_mut(id)
            .ok_or_else(|| SearchError::Source(format!("cannot store embedding: no item '{id}'")))?;
        item.embedding = Some(embedding);
        Ok(())
    }
}
