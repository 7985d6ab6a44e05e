//! Items and their classification records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, NodeId};

/// One `(item, node)` classification link.
///
/// At most one entry exists per node on a given item; classification is an
/// idempotent upsert, never an append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub node_id: NodeId,
    pub confidence: f64,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub few_shot_example: bool,
    pub updated_at: DateTime<Utc>,
}

impl Classification {
    #[must_use]
    pub fn new(node_id: NodeId, confidence: f64) -> Self {
        Self {
            node_id,
            confidence,
            verified: false,
            few_shot_example: false,
            updated_at: Utc::now(),
        }
    }
}

/// One unit of free text being classified.
///
/// An item may be classified under multiple nodes simultaneously: the tree
/// walk fans out to every sibling whose aggregated confidence clears the
/// majority threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub owner: String,
    pub content: String,
    pub classified_as: Vec<Classification>,
}

impl Item {
    #[must_use]
    pub fn new(owner: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: ItemId::generate(),
            owner: owner.into(),
            content: content.into(),
            classified_as: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_classified(&self) -> bool {
        !self.classified_as.is_empty()
    }

    #[must_use]
    pub fn classification(&self, node_id: &NodeId) -> Option<&Classification> {
        self.classified_as.iter().find(|c| &c.node_id == node_id)
    }

    /// Idempotent upsert: overwrites confidence and `updated_at` for an
    /// existing link, preserving the verified/few-shot flags.
    pub fn upsert_classification(&mut self, node_id: &NodeId, confidence: f64) {
        if let Some(existing) = self
            .classified_as
            .iter_mut()
            .find(|c| &c.node_id == node_id)
        {
            existing.confidence = confidence;
            existing.updated_at = Utc::now();
        } else {
            self.classified_as
                .push(Classification::new(node_id.clone(), confidence));
        }
    }

    /// Remove a classification link; returns whether one existed.
    pub fn remove_classification(&mut self, node_id: &NodeId) -> bool {
        let before = self.classified_as.len();
        self.classified_as.retain(|c| &c.node_id != node_id);
        self.classified_as.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::Item;
    use crate::ids::NodeId;

    #[test]
    fn upsert_is_idempotent_and_preserves_flags() {
        let mut item = Item::new("alice", "some text");
        let node = NodeId::from("n1");

        item.upsert_classification(&node, 0.6);
        item.classified_as[0].verified = true;
        item.upsert_classification(&node, 0.8);

        assert_eq!(item.classified_as.len(), 1);
        let link = item.classification(&node).unwrap();
        assert!((link.confidence - 0.8).abs() < f64::EPSILON);
        assert!(link.verified);
    }

    #[test]
    fn supports_multi_label() {
        let mut item = Item::new("alice", "some text");
        item.upsert_classification(&NodeId::from("a"), 1.0);
        item.upsert_classification(&NodeId::from("b"), 0.7);
        assert_eq!(item.classified_as.len(), 2);
    }
}
