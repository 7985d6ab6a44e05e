//! OpenAI Chat Completions client.
//!
//! Votes and proposals use the Chat Completions API with a strict
//! JSON-schema `response_format`, so the verdict comes back as a single
//! parseable JSON message.

use std::time::Duration;

use serde_json::json;

use taxa_types::{ModelName, NodeProposal, ProposalRequest, VoteRequest, VoteResponse};

use crate::{
    CALL_TIMEOUT_SECS, ProviderError, ProviderPool, RawProposal, RawVote, into_response,
    proposal_schema, proposal_system_prompt, proposal_user_prompt, reconcile_proposal,
    reconcile_vote, retry, vote_schema, vote_system_prompt, vote_user_prompt,
};

const MAX_COMPLETION_TOKENS: u32 = 2048;

fn build_body(
    model: &ModelName,
    system_prompt: &str,
    user_prompt: &str,
    schema_name: &str,
    schema: serde_json::Value,
) -> serde_json::Value {
    json!({
        "model": model.id(),
        "max_completion_tokens": MAX_COMPLETION_TOKENS,
        "messages": [
            { "role": "system", "content": system_prompt },
            { "role": "user", "content": user_prompt }
        ],
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": schema_name,
                "strict": true,
                "schema": schema
            }
        }
    })
}

/// Extract the assistant message content from a Chat Completions response
/// and parse it as `T`.
fn parse_completion<T: serde::de::DeserializeOwned>(
    payload: &serde_json::Value,
) -> Result<T, ProviderError> {
    let content = payload
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ProviderError::InvalidResponse("missing choices[0].message.content".into())
        })?;
    serde_json::from_str(content)
        .map_err(|e| ProviderError::InvalidResponse(format!("malformed verdict JSON: {e}")))
}

async fn call(
    pool: &ProviderPool,
    body: serde_json::Value,
) -> Result<serde_json::Value, ProviderError> {
    let api_key = pool.api_key(taxa_types::Provider::OpenAI)?.to_owned();
    let url = format!(
        "{}/chat/completions",
        pool.base_url(taxa_types::Provider::OpenAI)
    );
    let client = pool.client();

    let outcome = retry::send_with_retry(
        || {
            client
                .post(&url)
                .bearer_auth(&api_key)
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
    let body = build_body(
        model,
        &vote_system_prompt(request),
        &vote_user_prompt(request),
        "frontier_vote",
        vote_schema(),
    );
    let payload = call(pool, body).await?;
    let raw: RawVote = parse_completion(&payload)?;
    Ok(reconcile_vote(request, raw))
}

pub async fn propose(
    pool: &ProviderPool,
    model: &ModelName,
    request: &ProposalRequest,
) -> Result<NodeProposal, ProviderError> {
    let body = build_body(
        model,
        &proposal_system_prompt(request),
        &proposal_user_prompt(request),
        "node_proposal",
        proposal_schema(),
    );
    let payload = call(pool, body).await?;
    let raw: RawProposal = parse_completion(&payload)?;
    Ok(reconcile_proposal(raw))
}

#[cfg(test)]
mod tests {
    use super::{build_body, parse_completion};
    use crate::{ProviderPool, RawVote, vote_schema};
    use serde_json::json;
    use taxa_types::{CandidateNode, ModelName, NodeId, Provider, VoteRequest};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model() -> ModelName {
        ModelName::parse("gpt-4o-mini").unwrap()
    }

    fn request() -> VoteRequest {
        VoteRequest {
            item_content: "item text".into(),
            aspect: "aspect".into(),
            rules: Vec::new(),
            candidates: vec![CandidateNode {
                id: NodeId::from("n1"),
                label: "One".into(),
                description: "first".into(),
                examples: Vec::new(),
            }],
        }
    }

    #[test]
    fn body_is_strict_json_schema() {
        let body = build_body(&model(), "sys", "user", "frontier_vote", vote_schema());
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");
    }

    #[test]
    fn parses_verdict_from_message_content() {
        let payload = json!({
            "choices": [{
                "message": {
                    "content": "{\"rationale\":\"r\",\"node_labels\":[\"One\"],\"node_ids\":[\"n1\"]}"
                }
            }]
        });
        let raw: RawVote = parse_completion(&payload).unwrap();
        assert_eq!(raw.node_ids, vec!["n1"]);
    }

    #[test]
    fn missing_content_is_invalid_response() {
        let payload = json!({ "choices": [] });
        let result: Result<RawVote, _> = parse_completion(&payload);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn vote_round_trip_against_mock_server() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "content": "{\"rationale\":\"fits\",\"node_labels\":[\"One\"],\"node_ids\":[\"n1\"]}"
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let pool = ProviderPool::new()
            .with_openai_key("sk-test")
            .with_base_url(Provider::OpenAI, server.uri());

        let response = super::vote(&pool, &model(), &request()).await.unwrap();
        assert_eq!(response.chosen, vec![NodeId::from("n1")]);
    }

    #[tokio::test]
    async fn http_error_surfaces_status_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let pool = ProviderPool::new()
            .with_openai_key("sk-wrong")
            .with_base_url(Provider::OpenAI, server.uri());

        let err = super::vote(&pool, &model(), &request()).await.unwrap_err();
        match err {
            crate::ProviderError::Http { status, body } => {
                assert_eq!(status.as_u16(), 401);
                assert!(body.contains("bad key"));
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }
}
