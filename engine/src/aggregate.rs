//! Frontier vote aggregation.
//!
//! Confidence for a candidate is the fraction of answering providers that
//! chose it. Timed-out and failed calls shrink the denominator; an answer
//! that chose no candidate ("none of these") still counts in it. A node
//! with zero answers across the frontier is unclassifiable, which is
//! distinct from being voted against.

use std::collections::HashMap;

use taxa_types::{ModelName, NodeId, VoteResponse};

/// One provider invocation's contribution to a frontier.
#[derive(Debug, Clone)]
pub enum VoteOutcome {
    /// The provider answered. `chosen` may be empty, meaning it judged no
    /// candidate applicable.
    Answer {
        model: ModelName,
        response: VoteResponse,
    },
    /// The provider produced no usable answer (timeout, transport failure,
    /// unparseable output). Excluded from the denominator.
    NoAnswer { model: ModelName, reason: String },
}

/// Aggregated score for one candidate node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeConfidence {
    /// Answers that chose this node.
    pub chosen: usize,
    /// All usable answers for the frontier.
    pub answered: usize,
}

impl NodeConfidence {
    /// `chosen / answered`, or 0 when nothing answered.
    #[must_use]
    pub fn value(&self) -> f64 {
        if self.answered == 0 {
            0.0
        } else {
            self.chosen as f64 / self.answered as f64
        }
    }

    /// Whether any provider answered at all. Without data the node is
    /// unclassifiable rather than rejected.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.answered > 0
    }
}

/// Tally of one frontier's votes. Insensitive to vote arrival order.
#[derive(Debug)]
pub struct FrontierTally {
    answered: usize,
    chosen_counts: HashMap<NodeId, usize>,
    failures: Vec<String>,
}

impl FrontierTally {
    #[must_use]
    pub fn tally(outcomes: &[VoteOutcome]) -> Self {
        let mut answered = 0;
        let mut chosen_counts: HashMap<NodeId, usize> = HashMap::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                VoteOutcome::Answer { response, .. } => {
                    answered += 1;
                    for node_id in &response.chosen {
                        *chosen_counts.entry(node_id.clone()).or_insert(0) += 1;
                    }
                }
                VoteOutcome::NoAnswer { model, reason } => {
                    failures.push(format!("{}: {reason}", model.id()));
                }
            }
        }
        Self {
            answered,
            chosen_counts,
            failures,
        }
    }

    #[must_use]
    pub fn answered(&self) -> usize {
        self.answered
    }

    #[must_use]
    pub fn score(&self, node_id: &NodeId) -> NodeConfidence {
        NodeConfidence {
            chosen: self.chosen_counts.get(node_id).copied().unwrap_or(0),
            answered: self.answered,
        }
    }

    /// Human-readable reasons for discarded invocations, for diagnostics.
    #[must_use]
    pub fn failures(&self) -> &[String] {
        &self.failures
    }
}

#[cfg(test)]
mod tests {
    use taxa_types::{ModelName, Provider, VoteResponse};

    use super::*;

    fn model(id: &str) -> ModelName {
        ModelName::with_provider(id, Provider::OpenAI)
    }

    fn answer(id: &str, chosen: &[&str]) -> VoteOutcome {
        VoteOutcome::Answer {
            model: model(id),
            response: VoteResponse {
                chosen: chosen.iter().map(|c| NodeId::from(*c)).collect(),
                rationale: None,
            },
        }
    }

    fn no_answer(id: &str, reason: &str) -> VoteOutcome {
        VoteOutcome::NoAnswer {
            model: model(id),
            reason: reason.to_owned(),
        }
    }

    #[test]
    fn unanimous_and_zero_scores() {
        let outcomes = [
            answer("m1", &["a"]),
            answer("m2", &["a"]),
            answer("m3", &["a"]),
        ];
        let tally = FrontierTally::tally(&outcomes);
        assert!((tally.score(&NodeId::from("a")).value() - 1.0).abs() < f64::EPSILON);
        assert!((tally.score(&NodeId::from("b")).value()).abs() < f64::EPSILON);
        assert!(tally.score(&NodeId::from("b")).has_data());
    }

    #[test]
    fn empty_answer_counts_in_denominator() {
        // Two of three answered with "a"; the third answered "none".
        let outcomes = [answer("m1", &["a"]), answer("m2", &["a"]), answer("m3", &[])];
        let tally = FrontierTally::tally(&outcomes);
        let score = tally.score(&NodeId::from("a"));
        assert_eq!(score.answered, 3);
        assert!((score.value() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn failures_shrink_denominator() {
        // One provider timed out, so confidence is over the two answers.
        let outcomes = [
            answer("m1", &["a"]),
            answer("m2", &["a"]),
            no_answer("m3", "vote timed out"),
        ];
        let tally = FrontierTally::tally(&outcomes);
        let score = tally.score(&NodeId::from("a"));
        assert_eq!(score.answered, 2);
        assert!((score.value() - 1.0).abs() < f64::EPSILON);
        assert_eq!(tally.failures().len(), 1);
    }

    #[test]
    fn no_answers_means_no_data() {
        let outcomes = [no_answer("m1", "boom"), no_answer("m2", "boom")];
        let tally = FrontierTally::tally(&outcomes);
        let score = tally.score(&NodeId::from("a"));
        assert!(!score.has_data());
        assert!((score.value()).abs() < f64::EPSILON);
    }

    #[test]
    fn order_of_outcomes_is_irrelevant() {
        let mut outcomes = vec![
            answer("m1", &["a", "b"]),
            answer("m2", &["b"]),
            no_answer("m3", "x"),
            answer("m4", &[]),
        ];
        let forward = FrontierTally::tally(&outcomes);
        outcomes.reverse();
        let reversed = FrontierTally::tally(&outcomes);
        for id in ["a", "b", "c"] {
            assert_eq!(
                forward.score(&NodeId::from(id)),
                reversed.score(&NodeId::from(id))
            );
        }
    }

    #[test]
    fn multi_label_votes_score_each_candidate() {
        let outcomes = [answer("m1", &["a", "b"]), answer("m2", &["a"])];
        let tally = FrontierTally::tally(&outcomes);
        assert!((tally.score(&NodeId::from("a")).value() - 1.0).abs() < f64::EPSILON);
        assert!((tally.score(&NodeId::from("b")).value() - 0.5).abs() < f64::EPSILON);
    }
}
