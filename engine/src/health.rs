//! Node health monitoring and taxonomy evolution.
//!
//! A node is weak when the ensemble keeps disagreeing about it: low average
//! confidence or a wide confidence spread across its non-verified items.
//! Weak nodes are sent to a provider for a structural proposal (split into
//! children, relabel, redescribe). With a human in the loop the proposal is
//! only announced; otherwise it is applied directly. Examined nodes are
//! recorded back onto the taxonomy so re-examination is opt-in.

use std::sync::Arc;

use taxa_types::{
    ClassNode, NodeId, NodeProposal, ProposalRequest, SessionEvent, SessionId, Taxonomy,
    TaxonomyId, format_example,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, DispatcherConfig, VoteClient};
use crate::error::EngineError;
use crate::locks::{RunGuard, RunLocks};
use crate::store::{StoreError, TaxonomyStore};

/// Average non-verified confidence at or below this marks a node weak.
pub const EXAMINE_CONFIDENCE_FLOOR: f64 = 0.6;
/// Nodes with fewer items than this are never flagged by signal; the
/// sample is too small to judge.
pub const MIN_ITEMS_TO_EXAMINE: usize = 10;
/// Confidence spread (max minus min) at or above this marks disagreement.
pub const DISAGREEMENT_SPREAD: f64 = 0.5;
/// Item contents sampled into one proposal request.
pub const MAX_PROPOSAL_SAMPLES: usize = 20;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub confidence_floor: f64,
    pub min_items: usize,
    pub disagreement_spread: f64,
    pub max_samples: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            confidence_floor: EXAMINE_CONFIDENCE_FLOOR,
            min_items: MIN_ITEMS_TO_EXAMINE,
            disagreement_spread: DISAGREEMENT_SPREAD,
            max_samples: MAX_PROPOSAL_SAMPLES,
        }
    }
}

/// Why a node was selected for examination.
#[derive(Debug, Clone, PartialEq)]
pub enum WeakSignal {
    /// Average confidence over non-verified items at or below the floor.
    LowConfidence { average: f64 },
    /// Non-verified confidences span at least the disagreement spread.
    HighDisagreement { spread: f64 },
}

/// Signal detection over one node's item associations. Verified links are
/// ground truth and excluded from the statistics. Returns `None` when the
/// node is healthy or the sample is too small to judge.
#[must_use]
pub fn weak_signal(node: &ClassNode, config: &HealthConfig) -> Option<WeakSignal> {
    if node.items.len() < config.min_items {
        return None;
    }
    let confidences: Vec<f64> = node
        .items
        .iter()
        .filter(|e| !e.verified)
        .map(|e| e.confidence)
        .collect();
    if confidences.is_empty() {
        return None;
    }
    let average = confidences.iter().sum::<f64>() / confidences.len() as f64;
    if average <= config.confidence_floor {
        return Some(WeakSignal::LowConfidence { average });
    }
    let max = confidences.iter().copied().fold(f64::MIN, f64::max);
    let min = confidences.iter().copied().fold(f64::MAX, f64::min);
    let spread = max - min;
    if spread >= config.disagreement_spread {
        return Some(WeakSignal::HighDisagreement { spread });
    }
    None
}

/// Result of examining one node.
#[derive(Debug)]
pub struct ExaminationOutcome {
    pub node_id: NodeId,
    /// `None` when examination was forced rather than signal-driven.
    pub signal: Option<WeakSignal>,
    pub proposal: NodeProposal,
    pub applied: bool,
    /// Ids of children created when the proposal was applied.
    pub created_node_ids: Vec<NodeId>,
}

/// Which nodes an examination pass considers.
pub(crate) enum Selection<'a> {
    /// All nodes, filtered by weak signal.
    Weak,
    /// Only the listed nodes, still filtered by weak signal. Used by the
    /// post-batch automatic pass over nodes the batch touched.
    WeakWithin(&'a [NodeId]),
    /// Exactly the listed nodes, signals ignored. Re-examines even nodes
    /// already marked examined.
    Forced(&'a [NodeId]),
}

/// Borrowed collaborators for one examination pass, shared between the
/// public monitor and the session's automatic post-batch pass.
pub(crate) struct ExaminationPass<'a, S, V> {
    pub store: &'a S,
    pub client: &'a V,
    pub dispatcher: &'a Dispatcher,
    pub events: &'a mpsc::Sender<SessionEvent>,
    pub config: &'a HealthConfig,
}

impl<S: TaxonomyStore, V: VoteClient> ExaminationPass<'_, S, V> {
    /// Runs one pass while `guard` holds the taxonomy's run lock. Updates
    /// `taxonomy` in place (examined bookkeeping) and persists it.
    pub(crate) async fn run(
        &self,
        taxonomy: &mut Taxonomy,
        selection: Selection<'_>,
        guard: &RunGuard,
    ) -> Result<Vec<ExaminationOutcome>, EngineError> {
        let mut nodes = self.store.list_nodes(&taxonomy.id).await?;
        nodes.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.id.cmp(&b.id)));
        let auto_apply = !taxonomy.classifier.use_human_in_the_loop;
        let mut outcomes = Vec::new();

        for node in &nodes {
            if node.is_root() || taxonomy.classifier.is_excluded_from_examination(&node.id) {
                continue;
            }
            let forced = match &selection {
                Selection::Weak => false,
                Selection::WeakWithin(scope) => {
                    if !scope.contains(&node.id) {
                        continue;
                    }
                    false
                }
                Selection::Forced(list) => {
                    if !list.contains(&node.id) {
                        continue;
                    }
                    true
                }
            };
            if !forced && taxonomy.classifier.is_examined(&node.id) {
                continue;
            }
            let signal = weak_signal(node, self.config);
            if !forced && signal.is_none() {
                continue;
            }
            guard.ensure_held()?;

            let request = self.proposal_request(node, taxonomy).await?;
            let proposal = match self.dispatcher.dispatch_proposal(self.client, &request).await {
                Ok(proposal) => proposal,
                Err(err) => {
                    // Left unmarked so a later pass retries it.
                    warn!(node_id = %node.id, error = %err, "proposal call failed, skipping node");
                    continue;
                }
            };
            taxonomy.classifier.mark_examined([node.id.clone()]);
            if proposal.is_empty() {
                debug!(node_id = %node.id, "examined, no structural change proposed");
                outcomes.push(ExaminationOutcome {
                    node_id: node.id.clone(),
                    signal,
                    proposal,
                    applied: false,
                    created_node_ids: Vec::new(),
                });
                continue;
            }

            let (applied, created_node_ids) = if auto_apply {
                let created = apply_proposal(self.store, node, &proposal).await?;
                (true, created)
            } else {
                (false, Vec::new())
            };
            info!(
                node_id = %node.id,
                children = proposal.new_children.len(),
                applied,
                "node examination produced a proposal"
            );
            let _ = self
                .events
                .send(SessionEvent::NodeExaminationProposal {
                    taxonomy_id: taxonomy.id.clone(),
                    node_id: node.id.clone(),
                    proposal: proposal.clone(),
                    applied,
                })
                .await;
            outcomes.push(ExaminationOutcome {
                node_id: node.id.clone(),
                signal,
                proposal,
                applied,
                created_node_ids,
            });
        }

        self.store.update_taxonomy(taxonomy.clone()).await?;
        Ok(outcomes)
    }

    /// Samples contents of items under the node into a proposal request.
    async fn proposal_request(
        &self,
        node: &ClassNode,
        taxonomy: &Taxonomy,
    ) -> Result<ProposalRequest, EngineError> {
        let mut item_samples = Vec::new();
        for entry in node.items.iter().take(self.config.max_samples) {
            match self.store.get_item(&entry.item_id).await {
                Ok(item) => item_samples.push(format_example(&item.content)),
                Err(StoreError::Unavailable(msg)) => {
                    return Err(EngineError::StoreUnavailable(msg));
                }
                Err(_) => {
                    debug!(item_id = %entry.item_id, "item missing while sampling, skipped");
                }
            }
        }
        Ok(ProposalRequest {
            node_id: node.id.clone(),
            label: node.label.clone(),
            description: node.description.clone(),
            aspect: taxonomy.aspect.clone(),
            rules: taxonomy.rules.clone(),
            item_samples,
        })
    }
}

/// Writes a proposal's structural edits: new children under the node, and
/// any relabel/redescribe of the node itself. Children whose label already
/// exists among the node's current children are skipped.
pub(crate) async fn apply_proposal<S: TaxonomyStore>(
    store: &S,
    node: &ClassNode,
    proposal: &NodeProposal,
) -> Result<Vec<NodeId>, EngineError> {
    let siblings = store.list_nodes(&node.taxonomy_id).await?;
    let existing_labels: Vec<&str> = siblings
        .iter()
        .filter(|n| n.parent_id.as_ref() == Some(&node.id))
        .map(|n| n.label.as_str())
        .collect();

    let mut created = Vec::new();
    for child in &proposal.new_children {
        if existing_labels
            .iter()
            .any(|label| label.eq_ignore_ascii_case(&child.label))
        {
            debug!(node_id = %node.id, label = %child.label, "proposed child already exists");
            continue;
        }
        let new_node = ClassNode::new(
            node.taxonomy_id.clone(),
            node.owner.clone(),
            node.id.clone(),
            child.label.clone(),
            child.description.clone(),
        );
        let new_id = new_node.id.clone();
        store.insert_node(new_node).await?;
        created.push(new_id);
    }

    if proposal.new_label.is_some() || proposal.new_description.is_some() {
        let mut updated = store.get_node(&node.taxonomy_id, &node.id).await?;
        if let Some(label) = &proposal.new_label {
            updated.label = label.clone();
        }
        if let Some(description) = &proposal.new_description {
            updated.description = description.clone();
        }
        store.update_node(updated).await?;
    }
    Ok(created)
}

/// Public entry point for taxonomy evolution: scans for weak nodes, asks a
/// provider for structural proposals, and either applies or announces them.
/// Takes the taxonomy's run lock; examination never overlaps a run.
pub struct NodeHealthMonitor<S, V> {
    store: Arc<S>,
    client: Arc<V>,
    locks: RunLocks,
    events: mpsc::Sender<SessionEvent>,
    config: HealthConfig,
    dispatcher_config: DispatcherConfig,
}

impl<S: TaxonomyStore, V: VoteClient> NodeHealthMonitor<S, V> {
    pub fn new(
        store: Arc<S>,
        client: Arc<V>,
        locks: RunLocks,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            store,
            client,
            locks,
            events,
            config: HealthConfig::default(),
            dispatcher_config: DispatcherConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: HealthConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher_config = config;
        self
    }

    /// Examines every node that shows a weak signal and has not been
    /// examined before.
    pub async fn examine_taxonomy(
        &self,
        taxonomy_id: &TaxonomyId,
    ) -> Result<Vec<ExaminationOutcome>, EngineError> {
        self.examine(taxonomy_id, Selection::Weak).await
    }

    /// Examines exactly the listed nodes, ignoring weak signals and the
    /// examined bookkeeping. Excluded nodes stay excluded.
    pub async fn examine_nodes(
        &self,
        taxonomy_id: &TaxonomyId,
        node_ids: &[NodeId],
    ) -> Result<Vec<ExaminationOutcome>, EngineError> {
        self.examine(taxonomy_id, Selection::Forced(node_ids)).await
    }

    async fn examine(
        &self,
        taxonomy_id: &TaxonomyId,
        selection: Selection<'_>,
    ) -> Result<Vec<ExaminationOutcome>, EngineError> {
        let session_id = SessionId::generate();
        let guard = self.locks.try_acquire(taxonomy_id, &session_id)?;
        let mut taxonomy = self.store.get_taxonomy(taxonomy_id).await?;
        taxonomy.classifier.validate()?;
        let dispatcher = Dispatcher::new(
            taxonomy.classifier.models.clone(),
            self.dispatcher_config.clone(),
        );
        let pass = ExaminationPass {
            store: self.store.as_ref(),
            client: self.client.as_ref(),
            dispatcher: &dispatcher,
            events: &self.events,
            config: &self.config,
        };
        pass.run(&mut taxonomy, selection, &guard).await
    }

    /// Seeds a taxonomy's first layer of child nodes, proposed from a
    /// sample of its unclassified items. The proposal goes through the same
    /// confirmation path as an examination: applied directly, or only
    /// announced when a human is in the loop. Depth grows afterwards as the
    /// created children are themselves examined and split.
    pub async fn bootstrap_taxonomy(
        &self,
        taxonomy_id: &TaxonomyId,
    ) -> Result<ExaminationOutcome, EngineError> {
        let session_id = SessionId::generate();
        let _guard = self.locks.try_acquire(taxonomy_id, &session_id)?;
        let taxonomy = self.store.get_taxonomy(taxonomy_id).await?;
        taxonomy.classifier.validate()?;
        let root = self.store.get_node(taxonomy_id, &NodeId::root()).await?;

        let items = self
            .store
            .unclassified_items(taxonomy_id, self.config.max_samples)
            .await?;
        let request = ProposalRequest {
            node_id: root.id.clone(),
            label: root.label.clone(),
            description: root.description.clone(),
            aspect: taxonomy.aspect.clone(),
            rules: taxonomy.rules.clone(),
            item_samples: items.iter().map(|i| format_example(&i.content)).collect(),
        };
        let dispatcher = Dispatcher::new(
            taxonomy.classifier.models.clone(),
            self.dispatcher_config.clone(),
        );
        let mut proposal = dispatcher
            .dispatch_proposal(self.client.as_ref(), &request)
            .await?;
        // The root keeps its label and description.
        proposal.new_label = None;
        proposal.new_description = None;

        if proposal.is_empty() {
            debug!(taxonomy_id = %taxonomy_id, "no initial structure proposed");
            return Ok(ExaminationOutcome {
                node_id: root.id,
                signal: None,
                proposal,
                applied: false,
                created_node_ids: Vec::new(),
            });
        }

        let (applied, created_node_ids) = if taxonomy.classifier.use_human_in_the_loop {
            (false, Vec::new())
        } else {
            let created = apply_proposal(self.store.as_ref(), &root, &proposal).await?;
            (true, created)
        };
        info!(
            taxonomy_id = %taxonomy_id,
            children = proposal.new_children.len(),
            applied,
            "initial taxonomy structure proposed"
        );
        let _ = self
            .events
            .send(SessionEvent::NodeExaminationProposal {
                taxonomy_id: taxonomy_id.clone(),
                node_id: root.id.clone(),
                proposal: proposal.clone(),
                applied,
            })
            .await;
        Ok(ExaminationOutcome {
            node_id: root.id,
            signal: None,
            proposal,
            applied,
            created_node_ids,
        })
    }

    /// Applies a previously announced proposal after human confirmation.
    /// Returns the ids of the children it created.
    pub async fn apply_confirmed_proposal(
        &self,
        taxonomy_id: &TaxonomyId,
        node_id: &NodeId,
        proposal: &NodeProposal,
    ) -> Result<Vec<NodeId>, EngineError> {
        let session_id = SessionId::generate();
        let _guard = self.locks.try_acquire(taxonomy_id, &session_id)?;
        let node = self.store.get_node(taxonomy_id, node_id).await?;
        let created = apply_proposal(self.store.as_ref(), &node, proposal).await?;
        let _ = self
            .events
            .send(SessionEvent::NodeExaminationProposal {
                taxonomy_id: taxonomy_id.clone(),
                node_id: node_id.clone(),
                proposal: proposal.clone(),
                applied: true,
            })
            .await;
        Ok(created)
    }
}
