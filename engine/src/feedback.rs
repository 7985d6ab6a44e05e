//! Human feedback over classification results.
//!
//! All operations are dual-sided edits of an `(item, node)` link, delegated
//! to the store's atomic methods. Feedback deliberately does not take the
//! taxonomy's run lock: a correction landing mid-run is an idempotent
//! single-link write, and the store serializes it against the walker's.

use std::sync::Arc;

use taxa_types::{ItemId, NodeId, TaxonomyId};
use tracing::info;

use crate::error::EngineError;
use crate::store::TaxonomyStore;

/// Confidence assigned to manually added classifications. Human say-so
/// outranks any ensemble vote.
pub const MANUAL_CONFIDENCE: f64 = 1.0;

pub struct FeedbackIntegrator<S> {
    store: Arc<S>,
}

impl<S: TaxonomyStore> FeedbackIntegrator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Marks an existing link as human-verified. Verified links are ground
    /// truth: the health monitor excludes them from weakness statistics.
    pub async fn verify(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
    ) -> Result<(), EngineError> {
        self.store
            .set_verified(taxonomy_id, item_id, node_id, true)
            .await?;
        info!(%item_id, %node_id, "classification verified");
        Ok(())
    }

    /// Clears the verified flag, returning the link to ensemble custody.
    pub async fn unverify(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
    ) -> Result<(), EngineError> {
        self.store
            .set_verified(taxonomy_id, item_id, node_id, false)
            .await?;
        Ok(())
    }

    /// Manually classifies an item under a node at full confidence. On an
    /// existing link this only raises the confidence; flags survive.
    pub async fn add_classification(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
    ) -> Result<(), EngineError> {
        self.store
            .upsert_classification(taxonomy_id, item_id, node_id, MANUAL_CONFIDENCE)
            .await?;
        info!(%item_id, %node_id, "classification added manually");
        Ok(())
    }

    /// Removes a link the ensemble got wrong, from both sides.
    pub async fn remove_classification(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
    ) -> Result<(), EngineError> {
        self.store
            .remove_classification(taxonomy_id, item_id, node_id)
            .await?;
        info!(%item_id, %node_id, "classification removed");
        Ok(())
    }

    /// Curates the item as a few-shot example for the node: future votes on
    /// the node's frontier will carry its content as context.
    pub async fn mark_few_shot(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
    ) -> Result<(), EngineError> {
        self.store
            .set_few_shot(taxonomy_id, item_id, node_id, true)
            .await?;
        Ok(())
    }

    pub async fn unmark_few_shot(
        &self,
        taxonomy_id: &TaxonomyId,
        item_id: &ItemId,
        node_id: &NodeId,
    ) -> Result<(), EngineError> {
        self.store
            .set_few_shot(taxonomy_id, item_id, node_id, false)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use taxa_types::{ClassNode, Item, NodeId, Taxonomy};

    use super::*;
    use crate::store::{MemoryStore, TaxonomyStore};

    async fn setup() -> (FeedbackIntegrator<MemoryStore>, Arc<MemoryStore>, Taxonomy, ClassNode, Item) {
        let store = Arc::new(MemoryStore::new());
        let taxonomy = Taxonomy::new("alice", "intents", "customer intent");
        store.create_taxonomy(taxonomy.clone()).await.unwrap();
        let node = ClassNode::new(taxonomy.id.clone(), "alice", NodeId::root(), "Billing", "");
        store.insert_node(node.clone()).await.unwrap();
        let item = Item::new("alice", "the invoice is wrong");
        store.insert_item(item.clone()).await.unwrap();
        let feedback = FeedbackIntegrator::new(Arc::clone(&store));
        (feedback, store, taxonomy, node, item)
    }

    #[tokio::test]
    async fn manual_add_then_verify() {
        let (feedback, store, taxonomy, node, item) = setup().await;

        feedback
            .add_classification(&taxonomy.id, &item.id, &node.id)
            .await
            .unwrap();
        feedback
            .verify(&taxonomy.id, &item.id, &node.id)
            .await
            .unwrap();

        let stored = store.get_item(&item.id).await.unwrap();
        let link = stored.classification(&node.id).unwrap();
        assert!((link.confidence - MANUAL_CONFIDENCE).abs() < f64::EPSILON);
        assert!(link.verified);
        let stored_node = store.get_node(&taxonomy.id, &node.id).await.unwrap();
        assert!(stored_node.item_entry(&item.id).unwrap().verified);
    }

    #[tokio::test]
    async fn manual_add_preserves_existing_flags() {
        let (feedback, store, taxonomy, node, item) = setup().await;
        store
            .upsert_classification(&taxonomy.id, &item.id, &node.id, 0.6)
            .await
            .unwrap();
        feedback
            .mark_few_shot(&taxonomy.id, &item.id, &node.id)
            .await
            .unwrap();

        feedback
            .add_classification(&taxonomy.id, &item.id, &node.id)
            .await
            .unwrap();

        let stored = store.get_item(&item.id).await.unwrap();
        let link = stored.classification(&node.id).unwrap();
        assert!(link.few_shot_example);
        assert!((link.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn remove_clears_both_sides_and_requeues_item() {
        let (feedback, store, taxonomy, node, item) = setup().await;
        feedback
            .add_classification(&taxonomy.id, &item.id, &node.id)
            .await
            .unwrap();

        feedback
            .remove_classification(&taxonomy.id, &item.id, &node.id)
            .await
            .unwrap();

        let stored = store.get_item(&item.id).await.unwrap();
        assert!(!stored.is_classified());
        let stored_node = store.get_node(&taxonomy.id, &node.id).await.unwrap();
        assert!(stored_node.item_entry(&item.id).is_none());
        // With no links left the item is pulled by the next batch again.
        let pending = store.unclassified_items(&taxonomy.id, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn verify_without_link_is_an_error() {
        let (feedback, _store, taxonomy, node, item) = setup().await;
        let result = feedback.verify(&taxonomy.id, &item.id, &node.id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn few_shot_round_trip_updates_node_curation() {
        let (feedback, store, taxonomy, node, item) = setup().await;
        feedback
            .add_classification(&taxonomy.id, &item.id, &node.id)
            .await
            .unwrap();

        feedback
            .mark_few_shot(&taxonomy.id, &item.id, &node.id)
            .await
            .unwrap();
        let stored_node = store.get_node(&taxonomy.id, &node.id).await.unwrap();
        assert_eq!(stored_node.few_shot_item_ids(), vec![item.id.clone()]);

        feedback
            .unmark_few_shot(&taxonomy.id, &item.id, &node.id)
            .await
            .unwrap();
        let stored_node = store.get_node(&taxonomy.id, &node.id).await.unwrap();
        assert!(stored_node.few_shot_item_ids().is_empty());
    }
}
