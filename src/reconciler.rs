//! Result reconciliation.
//!
//! Every handler result is mapped onto a [`NormalizedOutcome`]: details to resubmit, a
//! classified failure, or a cancellation. The mapping is pure.

use crate::errors::FailureKind;
use crate::handlers::HandlerResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of the backend's payment-details call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentDetailsRequest {
    /// Details produced by the handler
    pub details: Map<String, Value>,

    /// Payment data of the originating action
    #[serde(rename = "paymentData", default, skip_serializing_if = "Option::is_none")]
    pub payment_data: Option<String>,
}

/// A classified terminal failure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActionFailure {
    /// Classification
    pub kind: FailureKind,
    /// Handler that failed
    pub handler: String,
    /// Human readable description
    pub message: String,
    /// Whether a fresh action from the backend can still succeed
    pub recoverable: bool,
}

/// What the caller should do after an action finished.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum NormalizedOutcome {
    /// Submit these details to the backend
    Submit(PaymentDetailsRequest),
    /// The action failed
    Failed(ActionFailure),
    /// The action was cancelled by the user or the caller
    Cancelled {
        /// Handler that was running
        handler: String,
    },
}

impl NormalizedOutcome {
    /// Failure kind, with `UserCancelled` for cancellations.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            NormalizedOutcome::Submit(_) => None,
            NormalizedOutcome::Failed(failure) => Some(failure.kind),
            NormalizedOutcome::Cancelled { .. } => Some(FailureKind::UserCancelled),
        }
    }

    /// The details request, if the action succeeded.
    pub fn submission(&self) -> Option<&PaymentDetailsRequest> {
        match self {
            NormalizedOutcome::Submit(request) => Some(request),
            _ => None,
        }
    }
}

/// Maps a handler result onto a normalized outcome.
///
/// # Examples
///
/// ```
/// use checkout_actions::handlers::{ActionDetails, HandlerResult};
/// use checkout_actions::reconciler::{reconcile, NormalizedOutcome};
///
/// let result = HandlerResult::Details(ActionDetails::single("payload", "p", Some("pd".into())));
/// let NormalizedOutcome::Submit(request) = reconcile(&result) else { unreachable!() };
/// assert_eq!(request.payment_data.as_deref(), Some("pd"));
/// ```
pub fn reconcile(result: &HandlerResult) -> NormalizedOutcome {
    match result {
        HandlerResult::Details(details) => NormalizedOutcome::Submit(PaymentDetailsRequest {
            details: details.details.clone(),
            payment_data: details.payment_data.clone(),
        }),
        HandlerResult::Failure(failure) => match failure.kind() {
            FailureKind::UserCancelled => NormalizedOutcome::Cancelled {
                handler: failure.handler.clone(),
            },
            kind => NormalizedOutcome::Failed(ActionFailure {
                kind,
                handler: failure.handler.clone(),
                message: failure.underlying.to_string(),
                recoverable: kind.is_recoverable(),
            }),
        },
    }
}

/// Receives every normalized outcome, exactly once per action.
#[async_trait]
pub trait OutcomeSubmitter: Send + Sync {
    /// Handles the outcome, typically by calling the payment-details endpoint.
    async fn deliver(&self, outcome: &NormalizedOutcome);
}
