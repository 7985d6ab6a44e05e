//! Core domain types for taxa.
//!
//! This crate is IO-free and async-free: ids, the taxonomy/node/item data
//! model, classifier run configuration, the provider call shapes, and the
//! session event contract. Everything that talks to the network lives in
//! `taxa-providers`; everything that orchestrates lives in `taxa-engine`.

pub mod events;
pub mod ids;
pub mod item;
pub mod model;
pub mod node;
pub mod taxonomy;
pub mod vote;

pub use events::{AcceptedNode, ItemOutcome, SessionEvent};
pub use ids::{ItemId, NodeId, SessionId, TaxonomyId};
pub use item::{Classification, Item};
pub use model::{ModelName, ModelParseError, Provider};
pub use node::{ClassNode, ItemUnderNode};
pub use taxonomy::{
    ClassifierConfig, ConfigError, DEFAULT_BATCH_SIZE, DEFAULT_MAJORITY_THRESHOLD,
    DEFAULT_TOTAL_INVOCATIONS, Taxonomy,
};
pub use vote::{
    CandidateNode, EXAMPLE_MAX_CHARS, MAX_EXAMPLES_PER_NODE, NodeProposal, ProposalRequest,
    ProposedChild, VoteRequest, VoteResponse, format_example,
};
