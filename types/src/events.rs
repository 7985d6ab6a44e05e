//! The ordered progress-event contract exposed to session observers.
//!
//! Events for a single item are emitted in the order
//! frontier → result → done, with a monotonically increasing per-item
//! sequence number. Events across different items interleave without a
//! global order guarantee. Absorbed errors travel in the `diagnostics`
//! field of the relevant event, never silently dropped.

use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, NodeId, SessionId, TaxonomyId};
use crate::vote::NodeProposal;

/// One node accepted at a frontier, with its aggregated confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedNode {
    pub node_id: NodeId,
    pub confidence: f64,
}

/// Terminal disposition of one item's walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Every branch terminated normally.
    Completed,
    /// The invocation budget ran out; remaining frontiers were skipped.
    PartiallyClassified,
    /// The item's walk failed; the batch continued without it.
    Failed,
}

/// Progress events for one classification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A run started; carries the batch being processed.
    SessionStarted {
        taxonomy_id: TaxonomyId,
        session_id: SessionId,
        item_ids: Vec<ItemId>,
    },
    /// Voting is about to start for an item at a frontier.
    ItemFrontier {
        taxonomy_id: TaxonomyId,
        session_id: SessionId,
        item_id: ItemId,
        seq: u64,
        /// Sibling node ids about to be voted on.
        frontier: Vec<NodeId>,
    },
    /// A frontier resolved for an item.
    ItemResult {
        taxonomy_id: TaxonomyId,
        session_id: SessionId,
        item_id: ItemId,
        seq: u64,
        accepted: Vec<AcceptedNode>,
        rejected: Vec<NodeId>,
        /// Nodes that received zero answered votes: no data, distinct from
        /// voted-against.
        unclassified: Vec<NodeId>,
        /// The next frontiers opened by this result, if any.
        next_frontier: Vec<NodeId>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        diagnostics: Vec<String>,
    },
    /// Terminal marker for one item.
    ItemDone {
        taxonomy_id: TaxonomyId,
        session_id: SessionId,
        item_id: ItemId,
        seq: u64,
        outcome: ItemOutcome,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        diagnostics: Vec<String>,
    },
    /// The whole batch completed.
    SessionDone {
        taxonomy_id: TaxonomyId,
        session_id: SessionId,
        items_processed: usize,
        items_failed: usize,
    },
    /// The run hit an unrecoverable error and released its lock.
    SessionFailed {
        taxonomy_id: TaxonomyId,
        session_id: SessionId,
        error: String,
    },
    /// The health monitor produced a structural proposal for a weak node.
    NodeExaminationProposal {
        taxonomy_id: TaxonomyId,
        node_id: NodeId,
        proposal: NodeProposal,
        /// Whether the proposal was already applied (automatic mode) or
        /// awaits confirmation.
        applied: bool,
    },
}

impl SessionEvent {
    #[must_use]
    pub fn taxonomy_id(&self) -> &TaxonomyId {
        match self {
            SessionEvent::SessionStarted { taxonomy_id, .. }
            | SessionEvent::ItemFrontier { taxonomy_id, .. }
            | SessionEvent::ItemResult { taxonomy_id, .. }
            | SessionEvent::ItemDone { taxonomy_id, .. }
            | SessionEvent::SessionDone { taxonomy_id, .. }
            | SessionEvent::SessionFailed { taxonomy_id, .. }
            | SessionEvent::NodeExaminationProposal { taxonomy_id, .. } => taxonomy_id,
        }
    }

    #[must_use]
    pub fn item_id(&self) -> Option<&ItemId> {
        match self {
            SessionEvent::ItemFrontier { item_id, .. }
            | SessionEvent::ItemResult { item_id, .. }
            | SessionEvent::ItemDone { item_id, .. } => Some(item_id),
            _ => None,
        }
    }

    /// Per-item sequence number, where applicable.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        match self {
            SessionEvent::ItemFrontier { seq, .. }
            | SessionEvent::ItemResult { seq, .. }
            | SessionEvent::ItemDone { seq, .. } => Some(*seq),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SessionEvent;
    use crate::ids::{ItemId, SessionId, TaxonomyId};

    #[test]
    fn events_tag_with_snake_case_kind() {
        let event = SessionEvent::ItemDone {
            taxonomy_id: TaxonomyId::from("t"),
            session_id: SessionId::from("s"),
            item_id: ItemId::from("i"),
            seq: 3,
            outcome: super::ItemOutcome::Completed,
            diagnostics: Vec::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "item_done");
        assert_eq!(json["outcome"], "completed");
        // Empty diagnostics stay off the wire.
        assert!(json.get("diagnostics").is_none());
    }

    #[test]
    fn accessors_cover_item_events() {
        let event = SessionEvent::ItemFrontier {
            taxonomy_id: TaxonomyId::from("t"),
            session_id: SessionId::from("s"),
            item_id: ItemId::from("i"),
            seq: 0,
            frontier: Vec::new(),
        };
        assert_eq!(event.item_id().unwrap().as_str(), "i");
        assert_eq!(event.seq(), Some(0));
        assert_eq!(event.taxonomy_id().as_str(), "t");
    }
}
