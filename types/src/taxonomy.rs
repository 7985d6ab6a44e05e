//! Taxonomy and classifier run configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{NodeId, TaxonomyId};
use crate::model::ModelName;

/// Default number of items pulled per classification batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Default majority threshold a node must clear to accept an item.
pub const DEFAULT_MAJORITY_THRESHOLD: f64 = 0.5;
/// Default per-item budget of provider invocations.
pub const DEFAULT_TOTAL_INVOCATIONS: u32 = 20;

/// Rejected at session start; no partial run is created.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("majority threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),
    #[error("invalid classifier config: {0}")]
    InvalidConfig(String),
}

/// Live classifier configuration embedded in a [`Taxonomy`].
///
/// Consumed by the session manager at run start; mutating it is only safe
/// between runs. The `examined_node_ids` set is written back by the node
/// health monitor so re-examination is opt-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Items pulled per batch; also caps item-level and vote-level
    /// worker-pool concurrency.
    pub batch_size: usize,
    /// Voting ensemble. Each frontier gathers votes split across these.
    pub models: Vec<ModelName>,
    /// Minimum confidence to accept an item under a node. Boundary
    /// (`confidence == threshold`) accepts.
    pub majority_threshold: f64,
    /// Per-item cap on provider invocations across all frontiers.
    pub total_invocations: u32,
    /// When set, proposals wait for human confirmation instead of being
    /// applied automatically.
    pub use_human_in_the_loop: bool,
    /// Run the node health monitor over touched nodes after each batch.
    pub auto_examine: bool,
    /// Nodes the health monitor must always skip.
    pub node_ids_not_to_examine: Vec<NodeId>,
    /// Nodes already examined; skipped unless re-examination is forced.
    pub examined_node_ids: Vec<NodeId>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            models: ModelName::default_ensemble(),
            majority_threshold: DEFAULT_MAJORITY_THRESHOLD,
            total_invocations: DEFAULT_TOTAL_INVOCATIONS,
            use_human_in_the_loop: false,
            auto_examine: false,
            node_ids_not_to_examine: Vec::new(),
            examined_node_ids: Vec::new(),
        }
    }
}

impl ClassifierConfig {
    /// Validate before a run. Errors here mean no session is created.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.majority_threshold) || self.majority_threshold.is_nan() {
            return Err(ConfigError::InvalidThreshold(self.majority_threshold));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.total_invocations == 0 {
            return Err(ConfigError::InvalidConfig(
                "total_invocations must be > 0".into(),
            ));
        }
        if self.models.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one model is required".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_excluded_from_examination(&self, node_id: &NodeId) -> bool {
        self.node_ids_not_to_examine.contains(node_id)
    }

    #[must_use]
    pub fn is_examined(&self, node_id: &NodeId) -> bool {
        self.examined_node_ids.contains(node_id)
    }

    /// Record nodes as examined, keeping the list free of duplicates.
    pub fn mark_examined(&mut self, node_ids: impl IntoIterator<Item = NodeId>) {
        for id in node_ids {
            if !self.examined_node_ids.contains(&id) {
                self.examined_node_ids.push(id);
            }
        }
    }
}

/// A named, owned classification scheme: a rooted tree of nodes plus run
/// configuration. One taxonomy owns exactly one node tree and is the unit
/// of session-exclusivity locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taxonomy {
    pub id: TaxonomyId,
    pub owner: String,
    pub name: String,
    /// Free-text description of the intent the tree classifies along.
    pub aspect: String,
    /// Ordered string constraints shown to every vote call.
    pub rules: Vec<String>,
    pub classifier: ClassifierConfig,
}

impl Taxonomy {
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>, aspect: impl Into<String>) -> Self {
        Self {
            id: TaxonomyId::generate(),
            owner: owner.into(),
            name: name.into(),
            aspect: aspect.into(),
            rules: Vec::new(),
            classifier: ClassifierConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClassifierConfig, ConfigError};
    use crate::ids::NodeId;

    #[test]
    fn default_config_is_valid() {
        assert!(ClassifierConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = ClassifierConfig::default();
        config.majority_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold(t)) if (t - 1.5).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn rejects_empty_ensemble_and_zero_budget() {
        let mut config = ClassifierConfig::default();
        config.models.clear();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));

        let mut config = ClassifierConfig::default();
        config.total_invocations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn mark_examined_deduplicates() {
        let mut config = ClassifierConfig::default();
        config.mark_examined([NodeId::from("a"), NodeId::from("a"), NodeId::from("b")]);
        config.mark_examined([NodeId::from("b")]);
        assert_eq!(config.examined_node_ids.len(), 2);
        assert!(config.is_examined(&NodeId::from("a")));
    }
}
