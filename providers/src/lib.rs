//! Model provider vote clients with a uniform call contract.
//!
//! # Architecture
//!
//! The crate is organized around a provider dispatch pattern:
//!
//! - [`ProviderPool`] - Unified entry point holding credentials and retry
//!   policy, dispatching to provider-specific implementations
//! - [`openai`] - OpenAI Chat Completions client (JSON-schema structured
//!   output)
//! - [`claude`] - Anthropic Messages API client (forced tool call for
//!   structured output)
//!
//! Two call shapes exist, shared by every provider:
//!
//! | Call | Input | Output |
//! |------|-------|--------|
//! | vote | one item + one frontier of sibling candidate nodes | the chosen candidate subset (possibly empty) |
//! | propose | one weak node + item samples | structural edit proposal |
//!
//! # Error Handling
//!
//! Transport errors and retryable statuses are retried within [`retry`]'s
//! bound; anything that still fails surfaces as a [`ProviderError`]. The
//! engine demotes vote failures to non-answers, so a single provider
//! failure never aborts a batch.

pub mod claude;
pub mod openai;
pub mod retry;

use std::sync::OnceLock;
use std::time::Duration;

use serde_json::json;

use taxa_types::{ModelName, NodeId, NodeProposal, Provider, ProposalRequest, VoteRequest,
    VoteResponse};

pub use taxa_types;

/// Canonical OpenAI Chat Completions endpoint base.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";
/// Canonical Anthropic API base.
pub const ANTHROPIC_API_BASE_URL: &str = "https://api.anthropic.com/v1";

const CONNECT_TIMEOUT_SECS: u64 = 30;
/// Per-call ceiling; a vote that takes longer is treated as a non-answer.
pub const CALL_TIMEOUT_SECS: u64 = 60;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        base_client_builder().build().unwrap_or_else(|e| {
            tracing::error!("Failed to build hardened HTTP client: {e}. Using minimal fallback.");
            reqwest::Client::builder()
                .https_only(true)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("Minimal hardened HTTP client must build; cannot proceed without TLS")
        })
    })
}

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .https_only(true)
}

/// Client variant that accepts plain-http endpoints, for tests against
/// local mock servers.
pub fn insecure_test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("test HTTP client must build")
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{} API key not configured (set {})", .0.display_name(), .0.env_var())]
    MissingApiKey(Provider),
    #[error("provider request timed out")]
    Timeout,
    #[error("API error {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("connection error after {attempts} attempts: {source}")]
    Connection {
        attempts: u32,
        source: reqwest::Error,
    },
    #[error("request error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            ProviderError::Timeout => true,
            ProviderError::Transport(e) => e.is_timeout(),
            ProviderError::Connection { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

pub(crate) async fn into_response(
    outcome: retry::RetryOutcome,
) -> Result<reqwest::Response, ProviderError> {
    match outcome {
        retry::RetryOutcome::Success(response) => Ok(response),
        retry::RetryOutcome::HttpError(response) => {
            let status = response.status();
            let body = read_capped_error_body(response).await;
            Err(ProviderError::Http { status, body })
        }
        retry::RetryOutcome::ConnectionError { attempts, source } => {
            if source.is_timeout() {
                Err(ProviderError::Timeout)
            } else {
                Err(ProviderError::Connection { attempts, source })
            }
        }
        retry::RetryOutcome::NonRetryable(e) => {
            if e.is_timeout() {
                Err(ProviderError::Timeout)
            } else {
                Err(ProviderError::Transport(e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt construction, shared across providers.
// ---------------------------------------------------------------------------

const VOTE_IMPORTANT_NOTES: &str = "\
- An item can be classified into multiple nodes horizontally.
- If the item doesn't belong to any of the candidate nodes, don't shoehorn it into one. Return an empty list.
- Examine all the candidate nodes one by one, judging whether the item belongs to each node or not.";

pub(crate) fn format_candidates(request: &VoteRequest) -> String {
    request
        .candidates
        .iter()
        .map(|candidate| {
            let mut lines = vec![
                format!("Id: {}", candidate.id),
                format!("Label: {}", candidate.label),
                format!("Description: {}", candidate.description),
            ];
            if !candidate.examples.is_empty() {
                let examples = candidate
                    .examples
                    .iter()
                    .map(|e| format!("- {e}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                lines.push(format!("Exemplary Items:\n{examples}"));
            }
            lines.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub(crate) fn vote_system_prompt(request: &VoteRequest) -> String {
    let mut prompt = format!(
        "You are a classification agent. You will be given an item and classify it \
         into one or more candidate nodes of a taxonomy.\n\n\
         This taxonomy is created for the following aspect:\n{}\n\n\
         Here are the candidate nodes:\n\n{}",
        request.aspect,
        format_candidates(request),
    );
    if !request.rules.is_empty() {
        let rules = request
            .rules
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str(&format!("\n\nTaxonomy rules:\n{rules}"));
    }
    prompt.push_str(&format!("\n\nImportant Notes!\n{VOTE_IMPORTANT_NOTES}"));
    prompt
}

pub(crate) fn vote_user_prompt(request: &VoteRequest) -> String {
    format!(
        "Here is the item you need to classify:\n<Item>\n{}\n</Item>\n\n\
         Important Notes!\n{VOTE_IMPORTANT_NOTES}",
        request.item_content
    )
}

pub(crate) fn proposal_system_prompt(request: &ProposalRequest) -> String {
    let mut prompt = format!(
        "You are a taxonomy curator. A category node needs structural work: either \
         its items fit it poorly or ambiguously, or it has no children yet to \
         organize incoming items. Propose a structural improvement - new child \
         nodes to split the items across, and/or a clearer label and description. \
         Only propose children that are clearly supported by the item samples.\n\n\
         This taxonomy is created for the following aspect:\n{}\n\n\
         The node:\nLabel: {}\nDescription: {}",
        request.aspect, request.label, request.description
    );
    if !request.rules.is_empty() {
        let rules = request
            .rules
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str(&format!(
            "\n\nThe proposed structure must follow these rules:\n{rules}"
        ));
    }
    prompt
}

pub(crate) fn proposal_user_prompt(request: &ProposalRequest) -> String {
    let samples = request
        .item_samples
        .iter()
        .map(|s| format!("<Item>{s}</Item>"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Here are items currently classified under the node:\n{samples}")
}

// ---------------------------------------------------------------------------
// Structured-output schemas and verdict reconciliation.
// ---------------------------------------------------------------------------

/// JSON schema for a vote verdict, shared between OpenAI response_format
/// and the Claude tool definition.
pub(crate) fn vote_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "rationale": {
                "type": "string",
                "description": "Think carefully and holistically which nodes are the most appropriate for the item."
            },
            "node_labels": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Labels of the chosen nodes; empty if the item belongs to none."
            },
            "node_ids": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Ids of the chosen nodes, aligned with node_labels; empty if the item belongs to none."
            }
        },
        "required": ["rationale", "node_labels", "node_ids"],
        "additionalProperties": false
    })
}

pub(crate) fn proposal_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "rationale": { "type": "string" },
            "new_children": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "label": { "type": "string" },
                        "description": { "type": "string" }
                    },
                    "required": ["label", "description"],
                    "additionalProperties": false
                }
            },
            "new_label": { "type": ["string", "null"] },
            "new_description": { "type": ["string", "null"] }
        },
        "required": ["rationale", "new_children", "new_label", "new_description"],
        "additionalProperties": false
    })
}

/// Raw verdict as returned by a provider, before id validation.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct RawVote {
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub node_labels: Vec<String>,
    #[serde(default)]
    pub node_ids: Vec<String>,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct RawProposal {
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub new_children: Vec<taxa_types::ProposedChild>,
    #[serde(default)]
    pub new_label: Option<String>,
    #[serde(default)]
    pub new_description: Option<String>,
}

/// Validate a raw verdict against the candidate set.
///
/// Models sometimes return a wrong id for a correct label; when the label
/// matches a candidate, its id wins. Pairs matching nothing are dropped
/// with a warning, and duplicates are removed.
pub(crate) fn reconcile_vote(request: &VoteRequest, raw: RawVote) -> VoteResponse {
    let mut chosen: Vec<NodeId> = Vec::new();
    let labels = raw
        .node_labels
        .iter()
        .map(String::as_str)
        .chain(std::iter::repeat(""));

    for (id, label) in raw.node_ids.iter().zip(labels) {
        let id = NodeId::from(id.as_str());
        let by_id = request.candidate(&id);
        let resolved = match by_id {
            Some(candidate) if label.is_empty() || candidate.label == label => Some(id),
            _ => {
                // Wrong or unknown id; fall back to label lookup.
                let by_label = request
                    .candidates
                    .iter()
                    .find(|c| c.label == label)
                    .map(|c| c.id.clone());
                if by_label.is_none() {
                    tracing::warn!(node_id = %id, label, "Vote chose an unknown node; dropping");
                }
                by_label
            }
        };
        if let Some(id) = resolved
            && !chosen.contains(&id)
        {
            chosen.push(id);
        }
    }

    VoteResponse {
        chosen,
        rationale: (!raw.rationale.is_empty()).then_some(raw.rationale),
    }
}

pub(crate) fn reconcile_proposal(raw: RawProposal) -> NodeProposal {
    NodeProposal {
        new_children: raw.new_children,
        new_label: raw.new_label.filter(|l| !l.trim().is_empty()),
        new_description: raw.new_description.filter(|d| !d.trim().is_empty()),
        rationale: (!raw.rationale.is_empty()).then_some(raw.rationale),
    }
}

// ---------------------------------------------------------------------------
// Provider pool.
// ---------------------------------------------------------------------------

/// Credentials, endpoints and retry policy for the closed provider set.
///
/// Selected by configuration at run start; each provider exposes the same
/// vote/proposal contract, and routing is by the model's [`Provider`].
///
/// ```rust
/// use taxa_providers::ProviderPool;
///
/// let pool = ProviderPool::new().with_openai_key("sk-test");
/// # let _ = pool;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProviderPool {
    openai_api_key: Option<String>,
    anthropic_api_key: Option<String>,
    openai_base_url: Option<String>,
    anthropic_base_url: Option<String>,
    retry: Option<retry::RetryConfig>,
    use_test_client: bool,
}

impl ProviderPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read API keys from the conventional environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            openai_api_key: std::env::var(Provider::OpenAI.env_var()).ok(),
            anthropic_api_key: std::env::var(Provider::Claude.env_var()).ok(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_openai_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_anthropic_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(key.into());
        self
    }

    /// Override an endpoint base URL. Also switches to a client that
    /// accepts plain http, so mock servers work in tests.
    #[must_use]
    pub fn with_base_url(mut self, provider: Provider, base_url: impl Into<String>) -> Self {
        match provider {
            Provider::OpenAI => self.openai_base_url = Some(base_url.into()),
            Provider::Claude => self.anthropic_base_url = Some(base_url.into()),
        }
        self.use_test_client = true;
        self
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: retry::RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub(crate) fn client(&self) -> reqwest::Client {
        if self.use_test_client {
            insecure_test_client()
        } else {
            http_client().clone()
        }
    }

    pub(crate) fn retry_config(&self) -> retry::RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    pub(crate) fn base_url(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAI => self
                .openai_base_url
                .as_deref()
                .unwrap_or(OPENAI_API_BASE_URL),
            Provider::Claude => self
                .anthropic_base_url
                .as_deref()
                .unwrap_or(ANTHROPIC_API_BASE_URL),
        }
    }

    pub(crate) fn api_key(&self, provider: Provider) -> Result<&str, ProviderError> {
        let key = match provider {
            Provider::OpenAI => self.openai_api_key.as_deref(),
            Provider::Claude => self.anthropic_api_key.as_deref(),
        };
        key.ok_or(ProviderError::MissingApiKey(provider))
    }

    /// Issue one vote call for one item against one frontier.
    pub async fn vote(
        &self,
        model: &ModelName,
        request: &VoteRequest,
    ) -> Result<VoteResponse, ProviderError> {
        match model.provider() {
            Provider::OpenAI => openai::vote(self, model, request).await,
            Provider::Claude => claude::vote(self, model, request).await,
        }
    }

    /// Request a structural proposal for one weak node.
    pub async fn propose(
        &self,
        model: &ModelName,
        request: &ProposalRequest,
    ) -> Result<NodeProposal, ProviderError> {
        match model.provider() {
            Provider::OpenAI => openai::propose(self, model, request).await,
            Provider::Claude => claude::propose(self, model, request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProviderPool, RawVote, proposal_system_prompt, reconcile_vote, vote_system_prompt};
    use taxa_types::{CandidateNode, NodeId, Provider, ProposalRequest, VoteRequest};

    fn request() -> VoteRequest {
        VoteRequest {
            item_content: "a pair of running shoes".into(),
            aspect: "product categories".into(),
            rules: vec!["prefer specific categories".into()],
            candidates: vec![
                CandidateNode {
                    id: NodeId::from("n-apparel"),
                    label: "Apparel".into(),
                    description: "Clothing and wearables".into(),
                    examples: vec!["a wool sweater".into()],
                },
                CandidateNode {
                    id: NodeId::from("n-sports"),
                    label: "Sports".into(),
                    description: "Sporting goods".into(),
                    examples: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let pool = ProviderPool::new();
        assert!(pool.api_key(Provider::OpenAI).is_err());
        let pool = pool.with_openai_key("sk-test");
        assert_eq!(pool.api_key(Provider::OpenAI).unwrap(), "sk-test");
    }

    #[test]
    fn system_prompt_carries_aspect_rules_and_examples() {
        let prompt = vote_system_prompt(&request());
        assert!(prompt.contains("product categories"));
        assert!(prompt.contains("prefer specific categories"));
        assert!(prompt.contains("a wool sweater"));
        assert!(prompt.contains("Id: n-apparel"));
    }

    #[test]
    fn proposal_prompt_carries_node_context_and_rules() {
        let prompt = proposal_system_prompt(&ProposalRequest {
            node_id: NodeId::from("n-misc"),
            label: "Miscellaneous".into(),
            description: "everything else".into(),
            aspect: "product categories".into(),
            rules: vec!["no more than five children per node".into()],
            item_samples: Vec::new(),
        });
        assert!(prompt.contains("Miscellaneous"));
        assert!(prompt.contains("product categories"));
        assert!(prompt.contains("no more than five children per node"));
    }

    #[test]
    fn reconcile_keeps_valid_ids() {
        let raw = RawVote {
            rationale: "fits both".into(),
            node_labels: vec!["Apparel".into(), "Sports".into()],
            node_ids: vec!["n-apparel".into(), "n-sports".into()],
        };
        let response = reconcile_vote(&request(), raw);
        assert_eq!(
            response.chosen,
            vec![NodeId::from("n-apparel"), NodeId::from("n-sports")]
        );
        assert_eq!(response.rationale.as_deref(), Some("fits both"));
    }

    #[test]
    fn reconcile_repairs_wrong_id_via_label() {
        let raw = RawVote {
            rationale: String::new(),
            node_labels: vec!["Sports".into()],
            node_ids: vec!["bogus-id".into()],
        };
        let response = reconcile_vote(&request(), raw);
        assert_eq!(response.chosen, vec![NodeId::from("n-sports")]);
    }

    #[test]
    fn reconcile_drops_unknown_pairs_and_duplicates() {
        let raw = RawVote {
            rationale: String::new(),
            node_labels: vec!["Nonsense".into(), "Apparel".into(), "Apparel".into()],
            node_ids: vec!["zzz".into(), "n-apparel".into(), "n-apparel".into()],
        };
        let response = reconcile_vote(&request(), raw);
        assert_eq!(response.chosen, vec![NodeId::from("n-apparel")]);
    }

    #[test]
    fn empty_vote_is_a_valid_answer() {
        let raw = RawVote {
            rationale: "belongs to none".into(),
            node_labels: Vec::new(),
            node_ids: Vec::new(),
        };
        let response = reconcile_vote(&request(), raw);
        assert!(response.chosen.is_empty());
    }
}
