//! Persistence seam for taxonomies, nodes, and items.
//!
//! The engine talks to storage through [`TaxonomyStore`]; everything above
//! it is backend-agnostic. Dual-sided operations (a classification lives on
//! both the item and the node) are store methods so each backend can make
//! them atomic. [`MemoryStore`] keeps the whole dataset behind one `RwLock`,
//! which makes every method trivially atomic.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use taxa_types::{ClassNode, Item, ItemId, NodeId, Taxonomy, TaxonomyId};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("taxonomy {0} not found")]
    TaxonomyNotFound(TaxonomyId),
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    #[error("item {0} not found")]
    ItemNotFound(ItemId),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

type StoreResult<T> = Result<T, StoreError>;

/// Storage operations the engine needs. Reads return owned snapshots; the
/// walker re-reads the node set per frontier, so concurrent tree edits are
/// observed at frontier granularity rather than mid-frontier.
pub trait TaxonomyStore: Send + Sync {
    fn get_taxonomy(
        &self,
        id: &TaxonomyId,
    ) -> impl Future<Output = StoreResult<Taxonomy>> + Send;

    fn update_taxonomy(&self, taxonomy: Taxonomy) -> impl Future<Output = StoreResult<()>> + Send;

    /// Every node of the taxonomy, root included, in no particular order.
    fn list_nodes(
        &self,
        taxonomy_id: &TaxonomyId,
    ) -> impl Future<Output = StoreResult<Vec<ClassNode>>> + Send;

    fn get_node(
        &self,
        taxonomy_id: &TaxonomyId,
        node_id: &NodeId,
    ) -> impl Future<Output = StoreResult<ClassNode>> + Send;

    fn insert_node(&self, node: ClassNode) -> impl Future<Output = StoreResult<()>> + Send;

    fn update_node(&self, node: ClassNode) -> impl Future<Output = StoreResult<()>> + Send;

    /// Deletes a leaf node and strips its classification links from items.
    /// Refuses to delete the root or a node that still has children.
    fn delete_node(
        &self,
        taxonomy_id: &TaxonomyId,
        node_id: &NodeId,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn get_item(&self, id: &ItemId) -> impl Future<Output = StoreResult<Item>> + Send;

    fn insert_item(&self, item: Item) -> impl Future<Output = StoreResult<()>> + Send;

    /// Up to `limit` of the taxonomy owner's items that have no
    /// classification under any node of the taxonomy.
    fn unclassified_items(
        &self,
        taxonomy_id: &TaxonomyId,
        limit: usize,
    ) -> impl Future<Output = StoreResult<Vec<Item>>> + Send;

    /// Writes the `(item, node)` link on both sides. Idempotent: a second
    /// call overwrites confidence and preserves curation flags.
    fn upsert_classification(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
        confidence: f64,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Removes the `(item, node)` link from both sides.
    fn remove_classification(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Flips the verified flag on both sides of an existing link.
    fn set_verified(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
        verified: bool,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Flips the few-shot flag on both sides of an existing link.
    fn set_few_shot(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
        few_shot: bool,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}

#[derive(Debug, Default)]
struct MemoryInner {
    taxonomies: HashMap<TaxonomyId, Taxonomy>,
    nodes: HashMap<TaxonomyId, HashMap<NodeId, ClassNode>>,
    items: HashMap<ItemId, Item>,
}

/// In-memory [`TaxonomyStore`], the default backend and the test harness.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a taxonomy along with its root node.
    pub async fn create_taxonomy(&self, taxonomy: Taxonomy) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.taxonomies.contains_key(&taxonomy.id) {
            return Err(StoreError::Conflict(format!(
                "taxonomy {} already exists",
                taxonomy.id
            )));
        }
        let root = ClassNode::root(taxonomy.id.clone(), taxonomy.owner.clone());
        inner
            .nodes
            .entry(taxonomy.id.clone())
            .or_default()
            .insert(root.id.clone(), root);
        inner.taxonomies.insert(taxonomy.id.clone(), taxonomy);
        Ok(())
    }
}

impl MemoryInner {
    fn node_map(&self, taxonomy_id: &TaxonomyId) -> StoreResult<&HashMap<NodeId, ClassNode>> {
        self.nodes
            .get(taxonomy_id)
            .ok_or_else(|| StoreError::TaxonomyNotFound(taxonomy_id.clone()))
    }

    fn node_mut(
        &mut self,
        taxonomy_id: &TaxonomyId,
        node_id: &NodeId,
    ) -> StoreResult<&mut ClassNode> {
        self.nodes
            .get_mut(taxonomy_id)
            .ok_or_else(|| StoreError::TaxonomyNotFound(taxonomy_id.clone()))?
            .get_mut(node_id)
            .ok_or_else(|| StoreError::NodeNotFound(node_id.clone()))
    }

    fn item_mut(&mut self, item_id: &ItemId) -> StoreResult<&mut Item> {
        self.items
            .get_mut(item_id)
            .ok_or_else(|| StoreError::ItemNotFound(item_id.clone()))
    }
}

impl TaxonomyStore for MemoryStore {
    async fn get_taxonomy(&self, id: &TaxonomyId) -> StoreResult<Taxonomy> {
        self.inner
            .read()
            .await
            .taxonomies
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::TaxonomyNotFound(id.clone()))
    }

    async fn update_taxonomy(&self, taxonomy: Taxonomy) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.taxonomies.contains_key(&taxonomy.id) {
            return Err(StoreError::TaxonomyNotFound(taxonomy.id.clone()));
        }
        inner.taxonomies.insert(taxonomy.id.clone(), taxonomy);
        Ok(())
    }

    async fn list_nodes(&self, taxonomy_id: &TaxonomyId) -> StoreResult<Vec<ClassNode>> {
        let inner = self.inner.read().await;
        Ok(inner.node_map(taxonomy_id)?.values().cloned().collect())
    }

    async fn get_node(
        &self,
        taxonomy_id: &TaxonomyId,
        node_id: &NodeId,
    ) -> StoreResult<ClassNode> {
        let inner = self.inner.read().await;
        inner
            .node_map(taxonomy_id)?
            .get(node_id)
            .cloned()
            .ok_or_else(|| StoreError::NodeNotFound(node_id.clone()))
    }

    async fn insert_node(&self, node: ClassNode) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.taxonomies.contains_key(&node.taxonomy_id) {
            return Err(StoreError::TaxonomyNotFound(node.taxonomy_id.clone()));
        }
        let map = inner.nodes.entry(node.taxonomy_id.clone()).or_default();
        if map.contains_key(&node.id) {
            return Err(StoreError::Conflict(format!("node {} already exists", node.id)));
        }
        if let Some(parent_id) = &node.parent_id {
            if !map.contains_key(parent_id) {
                return Err(StoreError::NodeNotFound(parent_id.clone()));
            }
        }
        map.insert(node.id.clone(), node);
        Ok(())
    }

    async fn update_node(&self, node: ClassNode) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner.node_mut(&node.taxonomy_id, &node.id)?;
        *slot = node;
        Ok(())
    }

    async fn delete_node(&self, taxonomy_id: &TaxonomyId, node_id: &NodeId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let map = inner
            .nodes
            .get_mut(taxonomy_id)
            .ok_or_else(|| StoreError::TaxonomyNotFound(taxonomy_id.clone()))?;
        let node = map
            .get(node_id)
            .ok_or_else(|| StoreError::NodeNotFound(node_id.clone()))?;
        if node.is_root() {
            return Err(StoreError::Conflict("cannot delete the root node".into()));
        }
        if map.values().any(|n| n.parent_id.as_ref() == Some(node_id)) {
            return Err(StoreError::Conflict(format!(
                "node {node_id} still has children"
            )));
        }
        let removed = map.remove(node_id);
        if let Some(removed) = removed {
            for entry in &removed.items {
                if let Some(item) = inner.items.get_mut(&entry.item_id) {
                    item.remove_classification(node_id);
                }
            }
        }
        Ok(())
    }

    async fn get_item(&self, id: &ItemId) -> StoreResult<Item> {
        self.inner
            .read()
            .await
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ItemNotFound(id.clone()))
    }

    async fn insert_item(&self, item: Item) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.items.contains_key(&item.id) {
            return Err(StoreError::Conflict(format!("item {} already exists", item.id)));
        }
        inner.items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn unclassified_items(
        &self,
        taxonomy_id: &TaxonomyId,
        limit: usize,
    ) -> StoreResult<Vec<Item>> {
        let inner = self.inner.read().await;
        let taxonomy = inner
            .taxonomies
            .get(taxonomy_id)
            .ok_or_else(|| StoreError::TaxonomyNotFound(taxonomy_id.clone()))?;
        let node_ids: Vec<&NodeId> = inner.node_map(taxonomy_id)?.keys().collect();
        let mut pulled: Vec<Item> = inner
            .items
            .values()
            .filter(|item| item.owner == taxonomy.owner)
            .filter(|item| {
                !item
                    .classified_as
                    .iter()
                    .any(|c| node_ids.contains(&&c.node_id))
            })
            .cloned()
            .collect();
        // Stable pull order so repeated batches are deterministic.
        pulled.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        pulled.truncate(limit);
        Ok(pulled)
    }

    async fn upsert_classification(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
        confidence: f64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        // Validate both sides before touching either.
        inner.node_mut(taxonomy_id, node_id)?;
        inner.item_mut(item_id)?;
        inner
            .node_mut(taxonomy_id, node_id)?
            .upsert_item(item_id, confidence);
        inner
            .item_mut(item_id)?
            .upsert_classification(node_id, confidence);
        Ok(())
    }

    async fn remove_classification(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.node_mut(taxonomy_id, node_id)?.remove_item(item_id);
        inner.item_mut(item_id)?.remove_classification(node_id);
        Ok(())
    }

    async fn set_verified(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
        verified: bool,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let node = inner.node_mut(taxonomy_id, node_id)?;
        let entry = node
            .item_entry_mut(item_id)
            .ok_or_else(|| StoreError::ItemNotFound(item_id.clone()))?;
        entry.verified = verified;
        let item = inner.item_mut(item_id)?;
        let link = item
            .classified_as
            .iter_mut()
            .find(|c| &c.node_id == node_id)
            .ok_or_else(|| StoreError::NodeNotFound(node_id.clone()))?;
        link.verified = verified;
        Ok(())
    }

    async fn set_few_shot(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
        few_shot: bool,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let node = inner.node_mut(taxonomy_id, node_id)?;
        let entry = node
            .item_entry_mut(item_id)
            .ok_or_else(|| StoreError::ItemNotFound(item_id.clone()))?;
        entry.few_shot_example = few_shot;
        let item = inner.item_mut(item_id)?;
        let link = item
            .classified_as
            .iter_mut()
            .find(|c| &c.node_id == node_id)
            .ok_or_else(|| StoreError::NodeNotFound(node_id.clone()))?;
        link.few_shot_example = few_shot;
        Ok(())
    }
}
