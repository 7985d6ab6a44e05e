//! Vote dispatch across the model ensemble.
//!
//! The dispatcher turns one frontier into a set of concurrent provider
//! invocations: it splits the per-frontier vote count across the configured
//! models, caps in-flight calls with a semaphore, wraps each call in an
//! independent timeout, and charges the item's invocation budget for every
//! call it schedules. Provider failures never surface as errors here; they
//! come back as [`VoteOutcome::NoAnswer`] and shrink the denominator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use taxa_providers::{ProviderError, ProviderPool};
use taxa_types::{ModelName, NodeProposal, ProposalRequest, VoteRequest, VoteResponse};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::aggregate::VoteOutcome;

/// Seam between the engine and the provider layer. Implemented for
/// [`ProviderPool`] in production and for scripted fakes in tests.
pub trait VoteClient: Send + Sync {
    fn vote(
        &self,
        model: &ModelName,
        request: &VoteRequest,
    ) -> impl Future<Output = Result<VoteResponse, ProviderError>> + Send;

    fn propose(
        &self,
        model: &ModelName,
        request: &ProposalRequest,
    ) -> impl Future<Output = Result<NodeProposal, ProviderError>> + Send;
}

impl VoteClient for ProviderPool {
    async fn vote(
        &self,
        model: &ModelName,
        request: &VoteRequest,
    ) -> Result<VoteResponse, ProviderError> {
        ProviderPool::vote(self, model, request).await
    }

    async fn propose(
        &self,
        model: &ModelName,
        request: &ProposalRequest,
    ) -> Result<NodeProposal, ProviderError> {
        ProviderPool::propose(self, model, request).await
    }
}

/// Remaining provider invocations for one item's walk. Every scheduled
/// call is charged, answered or not.
#[derive(Debug, Clone, Copy)]
pub struct InvocationBudget {
    remaining: u32,
}

impl InvocationBudget {
    #[must_use]
    pub fn new(total: u32) -> Self {
        Self { remaining: total }
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Takes up to `wanted` invocations, returning how many were granted.
    pub fn take_up_to(&mut self, wanted: u32) -> u32 {
        let granted = wanted.min(self.remaining);
        self.remaining -= granted;
        granted
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Independent timeout per provider call. A call that overruns is
    /// abandoned and tallied as no answer.
    pub vote_timeout: Duration,
    /// Votes gathered per frontier, split across the ensemble. `None`
    /// means one call per configured model.
    pub votes_per_frontier: Option<u32>,
    /// Cap on concurrently in-flight provider calls.
    pub max_concurrent_votes: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            vote_timeout: Duration::from_secs(60),
            votes_per_frontier: None,
            max_concurrent_votes: taxa_types::DEFAULT_BATCH_SIZE,
        }
    }
}

/// Splits `count` calls across the ensemble: floor share for everyone,
/// remainder to the head of the list.
fn schedule_models(models: &[ModelName], count: u32) -> Vec<ModelName> {
    if models.is_empty() {
        return Vec::new();
    }
    let per_model = count as usize / models.len();
    let remainder = count as usize % models.len();
    let mut scheduled = Vec::with_capacity(count as usize);
    for (i, model) in models.iter().enumerate() {
        let share = per_model + usize::from(i < remainder);
        for _ in 0..share {
            scheduled.push(model.clone());
        }
    }
    scheduled
}

#[derive(Debug)]
pub struct Dispatcher {
    models: Vec<ModelName>,
    config: DispatcherConfig,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(models: Vec<ModelName>, config: DispatcherConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_votes.max(1)));
        Self {
            models,
            config,
            permits,
        }
    }

    #[must_use]
    pub fn models(&self) -> &[ModelName] {
        &self.models
    }

    /// Gathers votes for one frontier, charging `budget` for each scheduled
    /// call. Returns fewer outcomes than the configured vote count when the
    /// budget runs short, and none at all when it is already exhausted.
    pub async fn dispatch_frontier<V: VoteClient>(
        &self,
        client: &V,
        request: &VoteRequest,
        budget: &mut InvocationBudget,
    ) -> Vec<VoteOutcome> {
        let wanted = self
            .config
            .votes_per_frontier
            .unwrap_or(self.models.len() as u32);
        let granted = budget.take_up_to(wanted);
        let scheduled = schedule_models(&self.models, granted);
        debug!(
            wanted,
            granted,
            remaining = budget.remaining(),
            candidates = request.candidates.len(),
            "dispatching frontier votes"
        );

        let calls = scheduled.into_iter().map(|model| {
            let permits = Arc::clone(&self.permits);
            async move {
                let _permit = match permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return VoteOutcome::NoAnswer {
                            model,
                            reason: "dispatcher shut down".to_owned(),
                        };
                    }
                };
                match tokio::time::timeout(self.config.vote_timeout, client.vote(&model, request))
                    .await
                {
                    Ok(Ok(response)) => VoteOutcome::Answer { model, response },
                    Ok(Err(err)) => VoteOutcome::NoAnswer {
                        model,
                        reason: err.to_string(),
                    },
                    Err(_) => VoteOutcome::NoAnswer {
                        model,
                        reason: format!(
                            "vote timed out after {}s",
                            self.config.vote_timeout.as_secs()
                        ),
                    },
                }
            }
        });
        futures_util::future::join_all(calls).await
    }

    /// One evolution-proposal call, made with the head of the ensemble
    /// under the same timeout discipline as votes.
    pub async fn dispatch_proposal<V: VoteClient>(
        &self,
        client: &V,
        request: &ProposalRequest,
    ) -> Result<NodeProposal, ProviderError> {
        let model = self
            .models
            .first()
            .ok_or_else(|| ProviderError::InvalidResponse("empty model ensemble".to_owned()))?;
        match tokio::time::timeout(self.config.vote_timeout, client.propose(model, request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        }
    }
}
