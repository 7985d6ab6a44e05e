//! Per-item descent through the taxonomy tree.
//!
//! The walk starts at the root's children and works frontier by frontier:
//! vote on a sibling set, accept every candidate whose confidence clears
//! the threshold, persist each acceptance immediately, and enqueue accepted
//! nodes that have children of their own. Rejection of a parent prunes its
//! entire subtree. The node set is re-read per frontier, so a node deleted
//! mid-run simply abandons that branch with a diagnostic.

use std::collections::{HashMap, HashSet, VecDeque};

use taxa_types::{
    AcceptedNode, CandidateNode, ClassNode, Item, ItemId, ItemOutcome, NodeId, SessionEvent,
    SessionId, Taxonomy, TaxonomyId, VoteRequest, format_example, MAX_EXAMPLES_PER_NODE,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::aggregate::FrontierTally;
use crate::dispatch::{Dispatcher, InvocationBudget, VoteClient};
use crate::error::EngineError;
use crate::store::{StoreError, TaxonomyStore};

/// Point-in-time view of a taxonomy's node tree, indexed by parent.
/// Children are ordered by label so candidate lists are deterministic.
pub(crate) struct TreeSnapshot {
    ids: HashSet<NodeId>,
    children: HashMap<NodeId, Vec<ClassNode>>,
}

impl TreeSnapshot {
    pub(crate) fn build(nodes: Vec<ClassNode>) -> Self {
        let ids = nodes.iter().map(|n| n.id.clone()).collect();
        let mut children: HashMap<NodeId, Vec<ClassNode>> = HashMap::new();
        for node in nodes {
            if let Some(parent_id) = node.parent_id.clone() {
                children.entry(parent_id).or_default().push(node);
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.id.cmp(&b.id)));
        }
        Self { ids, children }
    }

    pub(crate) fn contains(&self, node_id: &NodeId) -> bool {
        self.ids.contains(node_id)
    }

    pub(crate) fn children_of(&self, node_id: &NodeId) -> &[ClassNode] {
        self.children.get(node_id).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn has_children(&self, node_id: &NodeId) -> bool {
        !self.children_of(node_id).is_empty()
    }
}

/// Emits one item's progress events with a monotonically increasing
/// sequence number. A dropped receiver silences events without affecting
/// the run.
pub(crate) struct ItemEvents {
    tx: mpsc::Sender<SessionEvent>,
    taxonomy_id: TaxonomyId,
    session_id: SessionId,
    item_id: ItemId,
    seq: u64,
}

impl ItemEvents {
    pub(crate) fn new(
        tx: mpsc::Sender<SessionEvent>,
        taxonomy_id: TaxonomyId,
        session_id: SessionId,
        item_id: ItemId,
    ) -> Self {
        Self {
            tx,
            taxonomy_id,
            session_id,
            item_id,
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    async fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).await.is_err() {
            debug!(item_id = %self.item_id, "event receiver dropped");
        }
    }

    async fn frontier(&mut self, frontier: Vec<NodeId>) {
        let seq = self.next_seq();
        self.emit(SessionEvent::ItemFrontier {
            taxonomy_id: self.taxonomy_id.clone(),
            session_id: self.session_id.clone(),
            item_id: self.item_id.clone(),
            seq,
            frontier,
        })
        .await;
    }

    async fn result(
        &mut self,
        accepted: Vec<AcceptedNode>,
        rejected: Vec<NodeId>,
        unclassified: Vec<NodeId>,
        next_frontier: Vec<NodeId>,
        diagnostics: Vec<String>,
    ) {
        let seq = self.next_seq();
        self.emit(SessionEvent::ItemResult {
            taxonomy_id: self.taxonomy_id.clone(),
            session_id: self.session_id.clone(),
            item_id: self.item_id.clone(),
            seq,
            accepted,
            rejected,
            unclassified,
            next_frontier,
            diagnostics,
        })
        .await;
    }

    pub(crate) async fn done(&mut self, outcome: ItemOutcome, diagnostics: Vec<String>) {
        let seq = self.next_seq();
        self.emit(SessionEvent::ItemDone {
            taxonomy_id: self.taxonomy_id.clone(),
            session_id: self.session_id.clone(),
            item_id: self.item_id.clone(),
            seq,
            outcome,
            diagnostics,
        })
        .await;
    }
}

/// Final disposition of one item's walk.
#[derive(Debug)]
pub(crate) struct WalkReport {
    pub outcome: ItemOutcome,
    /// Every node that accepted the item, across all frontiers.
    pub accepted_nodes: Vec<NodeId>,
    pub diagnostics: Vec<String>,
}

pub(crate) struct Walker<'a, S, V> {
    pub store: &'a S,
    pub client: &'a V,
    pub dispatcher: &'a Dispatcher,
    pub taxonomy: &'a Taxonomy,
}

impl<S: TaxonomyStore, V: VoteClient> Walker<'_, S, V> {
    /// Walks one item from the root down. Per-branch problems are absorbed
    /// into diagnostics; an `Err` here means the whole item failed.
    pub(crate) async fn walk_item(
        &self,
        item: &Item,
        events: &mut ItemEvents,
    ) -> Result<WalkReport, EngineError> {
        let threshold = self.taxonomy.classifier.majority_threshold;
        let mut budget = InvocationBudget::new(self.taxonomy.classifier.total_invocations);
        let mut queue = VecDeque::from([NodeId::root()]);
        let mut accepted_nodes = Vec::new();
        let mut walk_diagnostics = Vec::new();
        let mut skipped_frontiers = 0usize;

        while let Some(parent) = queue.pop_front() {
            // Fresh snapshot per frontier so concurrent tree edits are seen.
            let snapshot = TreeSnapshot::build(self.store.list_nodes(&self.taxonomy.id).await?);
            if !snapshot.contains(&parent) {
                warn!(node_id = %parent, item_id = %item.id, "node deleted mid-run, abandoning branch");
                walk_diagnostics.push(format!("node {parent} was deleted mid-run; branch abandoned"));
                continue;
            }
            let children = snapshot.children_of(&parent);
            if children.is_empty() {
                continue;
            }
            if budget.is_exhausted() {
                skipped_frontiers += 1;
                continue;
            }

            events
                .frontier(children.iter().map(|c| c.id.clone()).collect())
                .await;
            let request = self.vote_request(item, children).await?;
            let outcomes = self
                .dispatcher
                .dispatch_frontier(self.client, &request, &mut budget)
                .await;
            let tally = FrontierTally::tally(&outcomes);

            let mut accepted = Vec::new();
            let mut rejected = Vec::new();
            let mut unclassified = Vec::new();
            let mut next_frontier = Vec::new();
            let mut diagnostics = tally.failures().to_vec();

            for child in children {
                let score = tally.score(&child.id);
                if !score.has_data() {
                    unclassified.push(child.id.clone());
                    continue;
                }
                if score.value() >= threshold {
                    match self
                        .store
                        .upsert_classification(&self.taxonomy.id, &item.id, &child.id, score.value())
                        .await
                    {
                        Ok(()) => {
                            accepted.push(AcceptedNode {
                                node_id: child.id.clone(),
                                confidence: score.value(),
                            });
                            accepted_nodes.push(child.id.clone());
                            if snapshot.has_children(&child.id) {
                                next_frontier.extend(
                                    snapshot.children_of(&child.id).iter().map(|n| n.id.clone()),
                                );
                                queue.push_back(child.id.clone());
                            }
                        }
                        Err(StoreError::Unavailable(msg)) => {
                            return Err(EngineError::StoreUnavailable(msg));
                        }
                        Err(err) => {
                            // Node vanished between the vote and the write.
                            diagnostics.push(format!("accept of node {} dropped: {err}", child.id));
                        }
                    }
                } else {
                    rejected.push(child.id.clone());
                }
            }

            events
                .result(accepted, rejected, unclassified, next_frontier, diagnostics)
                .await;
        }

        let outcome = if skipped_frontiers > 0 {
            walk_diagnostics.push(format!(
                "invocation budget exhausted; {skipped_frontiers} frontier(s) skipped"
            ));
            ItemOutcome::PartiallyClassified
        } else {
            ItemOutcome::Completed
        };
        Ok(WalkReport {
            outcome,
            accepted_nodes,
            diagnostics: walk_diagnostics,
        })
    }

    /// Builds the vote request for one frontier, resolving each candidate's
    /// curated few-shot items into formatted example strings.
    async fn vote_request(
        &self,
        item: &Item,
        children: &[ClassNode],
    ) -> Result<VoteRequest, EngineError> {
        let mut candidates = Vec::with_capacity(children.len());
        for child in children {
            let mut examples = Vec::new();
            for example_id in child
                .few_shot_item_ids()
                .into_iter()
                .take(MAX_EXAMPLES_PER_NODE)
            {
                match self.store.get_item(&example_id).await {
                    Ok(example) => examples.push(format_example(&example.content)),
                    Err(StoreError::Unavailable(msg)) => {
                        return Err(EngineError::StoreUnavailable(msg));
                    }
                    Err(_) => {
                        // Stale few-shot pointer; vote without it.
                        debug!(item_id = %example_id, node_id = %child.id, "few-shot item missing");
                    }
                }
            }
            candidates.push(CandidateNode {
                id: child.id.clone(),
                label: child.label.clone(),
                description: child.description.clone(),
                examples,
            });
        }
        Ok(VoteRequest {
            item_content: item.content.clone(),
            aspect: self.taxonomy.aspect.clone(),
            rules: self.taxonomy.rules.clone(),
            candidates,
        })
    }
}
