//! Action handler implementations.
//!
//! This module contains the trait every handler implements and the result shape all of
//! them produce, plus one concrete handler per action kind.

pub mod await_action;
pub mod delegated;
pub mod redirect;
pub mod sdk;
pub mod three_ds2;

use crate::errors::{ActionError, FailureKind};
use crate::types::Action;
use crate::utils::generate_action_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Per-dispatch context passed explicitly to handlers.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Correlation identifier used in every log event of this action
    pub action_id: String,
    /// When the dispatcher accepted the action
    pub started_at: DateTime<Utc>,
}

impl ActionContext {
    /// Creates a context with a fresh correlation identifier.
    pub fn new() -> Self {
        Self {
            action_id: generate_action_id(),
            started_at: Utc::now(),
        }
    }

    /// Time spent on this action so far.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

impl Default for ActionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Details to resubmit to the backend's payment-details call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDetails {
    /// Key/value details
    pub details: Map<String, Value>,
    /// Server-generated payment data from the originating action
    pub payment_data: Option<String>,
}

impl ActionDetails {
    /// Creates details from a map and optional payment data.
    pub fn new(details: Map<String, Value>, payment_data: Option<String>) -> Self {
        Self {
            details,
            payment_data,
        }
    }

    /// Creates details holding a single string entry.
    pub fn single(key: &str, value: impl Into<String>, payment_data: Option<String>) -> Self {
        let mut details = Map::new();
        details.insert(key.to_string(), Value::String(value.into()));
        Self::new(details, payment_data)
    }
}

/// Terminal failure of a handler.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    /// Name of the handler that failed
    pub handler: String,
    /// The error that ended the action
    pub underlying: Arc<ActionError>,
}

impl HandlerFailure {
    /// Classification of the failure.
    pub fn kind(&self) -> FailureKind {
        self.underlying.kind()
    }
}

/// Normalized outcome of one handler run.
#[derive(Debug, Clone)]
pub enum HandlerResult {
    /// Resubmit these details
    Details(ActionDetails),
    /// Terminal failure or cancellation
    Failure(HandlerFailure),
}

impl HandlerResult {
    /// Builds a failure attributed to `handler`.
    pub fn failure(handler: &str, error: ActionError) -> Self {
        HandlerResult::Failure(HandlerFailure {
            handler: handler.to_string(),
            underlying: Arc::new(error),
        })
    }

    /// Failure kind, `None` for details.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            HandlerResult::Details(_) => None,
            HandlerResult::Failure(failure) => Some(failure.kind()),
        }
    }

    /// Details, `None` for failures.
    pub fn details(&self) -> Option<&ActionDetails> {
        match self {
            HandlerResult::Details(details) => Some(details),
            HandlerResult::Failure(_) => None,
        }
    }
}

/// Trait implemented by every action handler.
///
/// A handler executes one action kind end-to-end. It may suspend for a long time
/// (presentation, native SDK callback, redirect callback) and must release any state
/// it holds when its future is dropped.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Returns the name of this handler, used in failures and logs.
    fn name(&self) -> &str;

    /// Whether this handler executes the given action.
    fn can_handle(&self, action: &Action) -> bool;

    /// Called on every handler once the dispatcher accepts a new action, before it is
    /// routed. `next` is `None` for a payload rejected before routing.
    ///
    /// Handlers that keep state between actions release it here unless `next`
    /// continues it.
    fn superseded(&self, _next: Option<&Action>) {}

    /// Executes the action.
    ///
    /// # Arguments
    ///
    /// * `action` - An action for which [`Self::can_handle`] returned `true`
    /// * `context` - Per-dispatch context
    async fn handle(&self, action: &Action, context: &ActionContext) -> HandlerResult;
}
