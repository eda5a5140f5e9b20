//! Action dispatch.
//!
//! The dispatcher selects the unique handler for an action, runs it with at most one
//! action in flight, and hands the reconciled outcome to the configured
//! [`OutcomeSubmitter`].

use crate::errors::{ActionError, Result};
use crate::handlers::{ActionContext, ActionHandler, HandlerResult};
use crate::reconciler::{reconcile, NormalizedOutcome, OutcomeSubmitter};
use crate::types::Action;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Handler name attributed to failures raised before any handler ran.
pub const DISPATCHER: &str = "dispatcher";

struct InFlight {
    action_id: String,
    cancel: Option<oneshot::Sender<()>>,
}

/// Routes actions to handlers, one at a time.
#[derive(Default)]
pub struct ActionDispatcher {
    handlers: Vec<Arc<dyn ActionHandler>>,
    submitter: Option<Arc<dyn OutcomeSubmitter>>,
    in_flight: Mutex<Option<InFlight>>,
}

impl ActionDispatcher {
    /// Creates a dispatcher with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler.
    pub fn with_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Adds a handler.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        debug!(handler = handler.name(), "handler registered");
        self.handlers.push(handler);
    }

    /// Sets the collaborator that receives every outcome.
    pub fn with_submitter(mut self, submitter: Arc<dyn OutcomeSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Names of the registered handlers, in registration order.
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    /// Correlation id of the action in flight, if any.
    pub fn in_flight(&self) -> Option<String> {
        self.slot().as_ref().map(|in_flight| in_flight.action_id.clone())
    }

    /// Runs the action to completion.
    ///
    /// Returns [`ActionError::ConcurrentAction`] without touching the running action when
    /// another action is in flight. Every other outcome, including unsupported actions
    /// and ambiguous handler registrations, is reconciled, delivered and returned.
    pub async fn dispatch(&self, action: &Action) -> Result<NormalizedOutcome> {
        let context = ActionContext::new();
        let (cancel, cancelled) = oneshot::channel();
        self.acquire(&context, cancel)?;
        let guard = InFlightGuard {
            slot: &self.in_flight,
            action_id: context.action_id.clone(),
        };
        self.supersede(Some(action));

        let result = match self.select_handler(action) {
            Ok(handler) => {
                info!(
                    action_id = %context.action_id,
                    handler = handler.name(),
                    action_type = action.action_type(),
                    "dispatching action"
                );
                tokio::select! {
                    result = handler.handle(action, &context) => result,
                    Ok(()) = cancelled => {
                        info!(action_id = %context.action_id, handler = handler.name(), "action cancelled");
                        HandlerResult::failure(handler.name(), ActionError::UserCancelled)
                    }
                }
            }
            Err(e) => {
                warn!(action_id = %context.action_id, action_type = action.action_type(), "{}", e);
                HandlerResult::failure(DISPATCHER, e)
            }
        };
        drop(guard);

        info!(
            action_id = %context.action_id,
            elapsed_ms = context.elapsed().num_milliseconds(),
            failure = ?result.failure_kind(),
            "action finished"
        );
        Ok(self.deliver(&result).await)
    }

    /// Reconciles and delivers a failure raised outside any handler, such as an action
    /// payload that could not be decoded.
    ///
    /// Like [`Self::dispatch`], fails with [`ActionError::ConcurrentAction`] and delivers
    /// nothing while another action is in flight.
    pub async fn reject(&self, handler: &str, error: ActionError) -> Result<NormalizedOutcome> {
        let context = ActionContext::new();
        let (cancel, _cancelled) = oneshot::channel();
        self.acquire(&context, cancel)?;
        let guard = InFlightGuard {
            slot: &self.in_flight,
            action_id: context.action_id.clone(),
        };
        self.supersede(None);
        drop(guard);

        warn!(action_id = %context.action_id, handler, error = %error, "action rejected");
        Ok(self.deliver(&HandlerResult::failure(handler, error)).await)
    }

    /// Cancels the action in flight. Returns `false` when there is nothing to cancel.
    pub fn cancel(&self) -> bool {
        let cancel = self
            .slot()
            .as_mut()
            .and_then(|in_flight| in_flight.cancel.take());
        match cancel {
            Some(cancel) => cancel.send(()).is_ok(),
            None => false,
        }
    }

    fn supersede(&self, next: Option<&Action>) {
        for handler in &self.handlers {
            handler.superseded(next);
        }
    }

    fn select_handler(&self, action: &Action) -> Result<&Arc<dyn ActionHandler>> {
        let matching: Vec<&Arc<dyn ActionHandler>> = self
            .handlers
            .iter()
            .filter(|handler| handler.can_handle(action))
            .collect();

        match matching.as_slice() {
            [] => Err(ActionError::UnsupportedAction(action.action_type().to_string())),
            [handler] => Ok(*handler),
            many => Err(ActionError::AmbiguousHandler {
                action: action.action_type().to_string(),
                handlers: many.iter().map(|handler| handler.name().to_string()).collect(),
            }),
        }
    }

    fn acquire(&self, context: &ActionContext, cancel: oneshot::Sender<()>) -> Result<()> {
        let mut slot = self.slot();
        if let Some(in_flight) = slot.as_ref() {
            warn!(
                action_id = %context.action_id,
                in_flight = %in_flight.action_id,
                "dispatch while another action is in flight"
            );
            return Err(ActionError::ConcurrentAction(in_flight.action_id.clone()));
        }
        *slot = Some(InFlight {
            action_id: context.action_id.clone(),
            cancel: Some(cancel),
        });
        Ok(())
    }

    async fn deliver(&self, result: &HandlerResult) -> NormalizedOutcome {
        let outcome = reconcile(result);
        if let Some(submitter) = &self.submitter {
            submitter.deliver(&outcome).await;
        }
        outcome
    }

    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees the dispatcher when the dispatch ends or its future is dropped.
struct InFlightGuard<'a> {
    slot: &'a Mutex<Option<InFlight>>,
    action_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .is_some_and(|in_flight| in_flight.action_id == self.action_id)
        {
            *slot = None;
        }
    }
}
