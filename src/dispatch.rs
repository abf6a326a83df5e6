//! Outbound message dispatch.
//!
//! One send: ask the migration state for the current traffic percentage,
//! route the caller to a provider, invoke that provider through the retry
//! executor, and record the terminal outcome into the metrics counters the
//! health monitor reads. The provider strategy is resolved once when the
//! dispatcher is constructed; `auto` defers to the consistent-hash router
//! per call, the pinned strategies never look at migration state again.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::debug;

use crate::health::MetricsSink;
use crate::migration::{MigrationStateMachine, TransitionError};
use crate::provider::{DeliveryReceipt, MessageProvider, OutboundMessage, ProviderKind};
use crate::reliability::{CancelToken, ClassifiedError, ErrorKind, RetryExecutor};
use crate::routing::{self, RoutingDecision};

/// How the dispatcher picks a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStrategy {
    /// Consistent-hash routing against the live migration percentage.
    #[default]
    Auto,
    /// Pin every send to the legacy provider.
    Legacy,
    /// Pin every send to the new provider.
    New,
}

impl std::str::FromStr for ProviderStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ProviderStrategy::Auto),
            "legacy" => Ok(ProviderStrategy::Legacy),
            "new" => Ok(ProviderStrategy::New),
            other => Err(format!(
                "unknown provider strategy '{other}' (expected auto, legacy, or new)"
            )),
        }
    }
}

/// Successful dispatch result.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub receipt: DeliveryReceipt,
    pub provider: ProviderKind,
    /// Routing decision, absent when the strategy pinned the provider.
    pub decision: Option<RoutingDecision>,
}

/// Dispatch failure.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The migration state could not be read; no attempt was made.
    #[error("failed to read migration state")]
    State(#[source] TransitionError),
    /// The provider call failed terminally (classified).
    #[error(transparent)]
    Delivery(#[from] ClassifiedError),
}

/// Routes and executes outbound sends against the two providers.
pub struct Dispatcher {
    legacy: Arc<dyn MessageProvider>,
    new: Arc<dyn MessageProvider>,
    executor: RetryExecutor,
    state: Arc<MigrationStateMachine>,
    metrics: Arc<dyn MetricsSink>,
    /// `Some` when the strategy pinned a provider at construction.
    pinned: Option<ProviderKind>,
}

impl Dispatcher {
    pub fn new(
        legacy: Arc<dyn MessageProvider>,
        new: Arc<dyn MessageProvider>,
        executor: RetryExecutor,
        state: Arc<MigrationStateMachine>,
        metrics: Arc<dyn MetricsSink>,
        strategy: ProviderStrategy,
    ) -> Self {
        let pinned = match strategy {
            ProviderStrategy::Auto => None,
            ProviderStrategy::Legacy => Some(ProviderKind::Legacy),
            ProviderStrategy::New => Some(ProviderKind::New),
        };
        Self {
            legacy,
            new,
            executor,
            state,
            metrics,
            pinned,
        }
    }

    /// Shared handle to the retry executor (and its circuit breaker).
    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Send a message on behalf of `caller_key`.
    ///
    /// # Errors
    ///
    /// `State` when the migration flags cannot be read (no attempt made);
    /// `Delivery` with the classified error when the provider call failed
    /// terminally.
    pub async fn send(
        &self,
        caller_key: &str,
        message: &OutboundMessage,
    ) -> Result<SendOutcome, SendError> {
        self.dispatch(caller_key, message, None).await
    }

    /// Like [`send`](Self::send), aborting between retry attempts when the
    /// token is cancelled.
    pub async fn send_with_cancel(
        &self,
        caller_key: &str,
        message: &OutboundMessage,
        cancel: &CancelToken,
    ) -> Result<SendOutcome, SendError> {
        self.dispatch(caller_key, message, Some(cancel)).await
    }

    async fn dispatch(
        &self,
        caller_key: &str,
        message: &OutboundMessage,
        cancel: Option<&CancelToken>,
    ) -> Result<SendOutcome, SendError> {
        let (provider, decision) = match self.pinned {
            Some(kind) => (kind, None),
            None => {
                let status = self.state.status().await.map_err(SendError::State)?;
                let decision = routing::route(caller_key, status.effective_percentage());
                (decision.provider, Some(decision))
            },
        };
        let destination = provider.as_str();
        debug!(
            caller_key,
            provider = destination,
            bucket = decision.as_ref().map(|d| d.bucket),
            "dispatching message"
        );

        let target: &Arc<dyn MessageProvider> = match provider {
            ProviderKind::Legacy => &self.legacy,
            ProviderKind::New => &self.new,
        };

        let started = Instant::now();
        let result = match cancel {
            Some(token) => {
                self.executor
                    .execute_with_cancel(destination, || target.send(message), token)
                    .await
            },
            None => self.executor.execute(destination, || target.send(message)).await,
        };
        let elapsed = started.elapsed();

        match result {
            Ok(receipt) => {
                self.metrics.record_call(destination, true, elapsed, None);
                Ok(SendOutcome {
                    receipt,
                    provider,
                    decision,
                })
            },
            Err(classified) => {
                // Cancellation is the caller's doing, not a provider
                // failure; it stays out of the health counters.
                if classified.kind != ErrorKind::Cancelled {
                    self.metrics
                        .record_call(destination, false, elapsed, Some(classified.kind));
                }
                Err(classified.into())
            },
        }
    }
}
