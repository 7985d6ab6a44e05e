//! Category nodes and their item associations.

use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, NodeId, TaxonomyId};

/// One item classified under a node, with the confidence the ensemble
/// assigned and the human-curation flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemUnderNode {
    pub item_id: ItemId,
    /// Fraction of answering providers that chose this node, in [0, 1].
    pub confidence: f64,
    /// Human-verified links are ground truth; the health monitor excludes
    /// them from confidence averaging.
    #[serde(default)]
    pub verified: bool,
    /// Marked items are injected as few-shot context into future vote
    /// calls for this node's sibling frontier.
    #[serde(default)]
    pub few_shot_example: bool,
}

impl ItemUnderNode {
    #[must_use]
    pub fn new(item_id: ItemId, confidence: f64) -> Self {
        Self {
            item_id,
            confidence,
            verified: false,
            few_shot_example: false,
        }
    }
}

/// One category in a taxonomy tree.
///
/// The node graph is a tree rooted at [`NodeId::root()`]: every non-root
/// node has exactly one parent and cycles are impossible by construction
/// of the children index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassNode {
    pub id: NodeId,
    pub taxonomy_id: TaxonomyId,
    pub owner: String,
    /// `None` only for the root node.
    pub parent_id: Option<NodeId>,
    pub label: String,
    pub description: String,
    pub items: Vec<ItemUnderNode>,
}

impl ClassNode {
    #[must_use]
    pub fn new(
        taxonomy_id: TaxonomyId,
        owner: impl Into<String>,
        parent_id: NodeId,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: NodeId::generate(),
            taxonomy_id,
            owner: owner.into(),
            parent_id: Some(parent_id),
            label: label.into(),
            description: description.into(),
            items: Vec::new(),
        }
    }

    /// The single root of a taxonomy's tree.
    #[must_use]
    pub fn root(taxonomy_id: TaxonomyId, owner: impl Into<String>) -> Self {
        Self {
            id: NodeId::root(),
            taxonomy_id,
            owner: owner.into(),
            parent_id: None,
            label: "Root".to_owned(),
            description: "The root node of the taxonomy.".to_owned(),
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Upsert an item association. Re-classification overwrites the
    /// confidence but preserves the verified/few-shot flags.
    pub fn upsert_item(&mut self, item_id: &ItemId, confidence: f64) {
        if let Some(existing) = self.items.iter_mut().find(|e| &e.item_id == item_id) {
            existing.confidence = confidence;
        } else {
            self.items.push(ItemUnderNode::new(item_id.clone(), confidence));
        }
    }

    /// Remove an item association; returns whether one existed.
    pub fn remove_item(&mut self, item_id: &ItemId) -> bool {
        let before = self.items.len();
        self.items.retain(|e| &e.item_id != item_id);
        self.items.len() != before
    }

    #[must_use]
    pub fn item_entry(&self, item_id: &ItemId) -> Option<&ItemUnderNode> {
        self.items.iter().find(|e| &e.item_id == item_id)
    }

    pub fn item_entry_mut(&mut self, item_id: &ItemId) -> Option<&mut ItemUnderNode> {
        self.items.iter_mut().find(|e| &e.item_id == item_id)
    }

    /// Item ids curated as few-shot examples for this node.
    #[must_use]
    pub fn few_shot_item_ids(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|e| e.few_shot_example)
            .map(|e| e.item_id.clone())
            .collect()
    }
}
