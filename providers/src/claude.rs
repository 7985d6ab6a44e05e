//! Anthropic Messages API client.
//!
//! Claude does not support JSON-schema response formats, so structured
//! verdicts are obtained by defining a single tool and forcing the model
//! to call it (`tool_choice`), then reading the tool input.

use std::time::Duration;

use serde_json::json;

use taxa_types::{ModelName, NodeProposal, ProposalRequest, VoteRequest, VoteResponse};

use crate::{
    CALL_TIMEOUT_SECS, ProviderError, ProviderPool, RawProposal, RawVote, into_response,
    proposal_schema, proposal_system_prompt, proposal_user_prompt, reconcile_proposal,
    reconcile_vote, retry, vote_schema, vote_system_prompt, vote_user_prompt,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

const VOTE_TOOL: &str = "submit_vote";
const PROPOSAL_TOOL: &str = "submit_proposal";

struct ClaudeRequestBodyInput<'a> {
    model: &'a ModelName,
    system_prompt: &'a str,
    user_prompt: &'a str,
    tool_name: &'a str,
    tool_description: &'a str,
    schema: serde_json::Value,
}

fn build_body(input: ClaudeRequestBodyInput<'_>) -> serde_json::Value {
    let ClaudeRequestBodyInput {
        model,
        system_prompt,
        user_prompt,
        tool_name,
        tool_description,
        schema,
    } = input;

    json!({
        "model": model.id(),
        "max_tokens": MAX_TOKENS,
        "system": system_prompt,
        "messages": [
            { "role": "user", "content": user_prompt }
        ],
        "tools": [{
            "name": tool_name,
            "description": tool_description,
            "input_schema": schema
        }],
        "tool_choice": { "type": "tool", "name": tool_name }
    })
}

/// Find the forced tool call in a Messages response and parse its input.
fn parse_tool_input<T: serde::de::DeserializeOwned>(
    payload: &serde_json::Value,
    tool_name: &str,
) -> Result<T, ProviderError> {
    let blocks = payload
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing content blocks".into()))?;

    let input = blocks
        .iter()
        .find(|b| b["type"] == "tool_use" && b["name"] == tool_name)
        .map(|b| &b["input"])
        .ok_or_else(|| {
            ProviderError::InvalidResponse(format!("no {tool_name} tool_use block in response"))
        })?;

    serde_json::from_value(input.clone())
        .map_err(|e| ProviderError::InvalidResponse(format!("malformed tool input: {e}")))
}

async fn call(
    pool: &ProviderPool,
    body: serde_json::Value,
) -> Result<serde_json::Value, ProviderError> {
    let api_key = pool.api_key(taxa_types::Provider::Claude)?.to_owned();
    let url = format!("{}/messages", pool.base_url(taxa_types::Provider::Claude));
    let client = pool.client();

    let outcome = retry::send_with_retry(
        || {
            client
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .timeout(Duration::from_secs(CALL_TIMEOUT_SECS))
                .json(&body)
        },
        &pool.retry_config(),
    )
    .await;

    let response = into_response(outcome).await?;
    response
        .json::<serde_json::Value>()
        .await
        .map_err(ProviderError::from)
}

pub async fn vote(
    pool: &ProviderPool,
    model: &ModelName,
    request: &VoteRequest,
) -> Result<VoteResponse, ProviderError> {
    let body = build_body(ClaudeRequestBodyInput {
        model,
        system_prompt: &vote_system_prompt(request),
        user_prompt: &vote_user_prompt(request),
        tool_name: VOTE_TOOL,
        tool_description: "Submit the classification verdict for the item.",
        schema: vote_schema(),
    });
    let payload = call(pool, body).await?;
    let raw: RawVote = parse_tool_input(&payload, VOTE_TOOL)?;
    Ok(reconcile_vote(request, raw))
}

pub async fn propose(
    pool: &ProviderPool,
    model: &ModelName,
    request: &ProposalRequest,
) -> Result<NodeProposal, ProviderError> {
    let body = build_body(ClaudeRequestBodyInput {
        model,
        system_prompt: &proposal_system_prompt(request),
        user_prompt: &proposal_user_prompt(request),
        tool_name: PROPOSAL_TOOL,
        tool_description: "Submit the structural proposal for the weak node.",
        schema: proposal_schema(),
    });
    let payload = call(pool, body).await?;
    let raw: RawProposal = parse_tool_input(&payload, PROPOSAL_TOOL)?;
    Ok(reconcile_proposal(raw))
}
