//! Wire shapes for the uniform provider call contracts.
//!
//! Two call shapes exist: a *vote* (classify one item among a frontier of
//! sibling candidate nodes) and a *proposal* (suggest structural edits for
//! one weak node). Every provider implements both with the same request
//! and response types; routing is by [`crate::Provider`].

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// Few-shot examples injected per candidate node.
pub const MAX_EXAMPLES_PER_NODE: usize = 4;
/// Example contents are truncated to this many characters.
pub const EXAMPLE_MAX_CHARS: usize = 1000;

/// Flatten and truncate an example item's content for prompt injection.
#[must_use]
pub fn format_example(content: &str) -> String {
    let flattened = content.replace('\n', " ");
    let trimmed = flattened.trim();
    if trimmed.chars().count() > EXAMPLE_MAX_CHARS {
        let truncated: String = trimmed.chars().take(EXAMPLE_MAX_CHARS).collect();
        format!("{truncated}...")
    } else {
        trimmed.to_owned()
    }
}

/// One sibling node offered to a provider as a classification candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateNode {
    pub id: NodeId,
    pub label: String,
    pub description: String,
    /// Pre-formatted few-shot example contents, at most
    /// [`MAX_EXAMPLES_PER_NODE`].
    pub examples: Vec<String>,
}

/// A single vote call: one item against one frontier of sibling candidates.
///
/// The provider answers once for the whole frontier, choosing the subset of
/// candidates the item belongs under (possibly none).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub item_content: String,
    /// The taxonomy's free-text intent description.
    pub aspect: String,
    /// Ordered string constraints the taxonomy imposes on every vote.
    pub rules: Vec<String>,
    pub candidates: Vec<CandidateNode>,
}

impl VoteRequest {
    #[must_use]
    pub fn candidate(&self, id: &NodeId) -> Option<&CandidateNode> {
        self.candidates.iter().find(|c| &c.id == id)
    }
}

/// A provider's answer to one vote call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteResponse {
    /// Candidate ids the provider chose; empty means the item belongs under
    /// none of the candidates (still an answered vote).
    pub chosen: Vec<NodeId>,
    pub rationale: Option<String>,
}

/// A structural-proposal call for one weak node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub node_id: NodeId,
    pub label: String,
    pub description: String,
    pub aspect: String,
    /// Taxonomy rules the proposed structure must respect.
    pub rules: Vec<String>,
    /// Contents of items currently classified under the node, shared as
    /// context across providers.
    pub item_samples: Vec<String>,
}

/// One proposed child node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedChild {
    pub label: String,
    pub description: String,
}

/// A provider's structural proposal for one weak node.
///
/// Returned for confirmation before persistence, except in automatic mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeProposal {
    /// New children to split the node's items across.
    pub new_children: Vec<ProposedChild>,
    /// Suggested replacement label, when the current one is misleading.
    pub new_label: Option<String>,
    /// Suggested replacement description.
    pub new_description: Option<String>,
    pub rationale: Option<String>,
}

impl NodeProposal {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_children.is_empty() && self.new_label.is_none() && self.new_description.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::{EXAMPLE_MAX_CHARS, format_example};

    #[test]
    fn format_example_flattens_newlines() {
        assert_eq!(format_example("a\nb\nc"), "a b c");
    }

    #[test]
    fn format_example_truncates_with_ellipsis() {
        let long = "x".repeat(EXAMPLE_MAX_CHARS + 50);
        let formatted = format_example(&long);
        assert_eq!(formatted.chars().count(), EXAMPLE_MAX_CHARS + 3);
        assert!(formatted.ends_with("..."));
    }

    #[test]
    fn format_example_keeps_short_content() {
        assert_eq!(format_example("  short  "), "short");
    }
}
