//! Await and QR code actions.
//!
//! Both actions wait for the shopper to confirm the payment somewhere else (a banking
//! app, another device). The handler optionally shows a waiting or QR screen and polls
//! the payment status until it is final.

use crate::capabilities::{
    CapabilityError, PaymentStatus, PaymentStatusProvider, PresentationEvent, PresentationRequest, Presenter,
};
use crate::config::AwaitConfig;
use crate::errors::{ActionError, Result};
use crate::handlers::{ActionContext, ActionDetails, ActionHandler, HandlerResult};
use crate::types::Action;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name reported by this handler.
pub const AWAIT_HANDLER: &str = "await";

/// Polls the payment status for `await` and `qrCode` actions.
pub struct AwaitHandler {
    provider: Arc<dyn PaymentStatusProvider>,
    presenter: Option<Arc<dyn Presenter>>,
    config: AwaitConfig,
}

impl AwaitHandler {
    /// Creates a handler that polls without showing a screen.
    pub fn new(provider: Arc<dyn PaymentStatusProvider>, config: AwaitConfig) -> Self {
        Self {
            provider,
            presenter: None,
            config,
        }
    }

    /// Shows a waiting / QR screen while polling. Closing or declining it cancels the
    /// action; any other answer leaves polling running.
    pub fn with_presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    async fn wait_for_payment(
        &self,
        payment_data: &str,
        request: PresentationRequest,
        context: &ActionContext,
    ) -> HandlerResult {
        info!(
            action_id = %context.action_id,
            max_wait_ms = self.config.max_wait_ms,
            "waiting for payment confirmation"
        );

        let polling = tokio::time::timeout(self.config.max_wait(), self.poll(payment_data, context));
        tokio::pin!(polling);
        let outcome = match &self.presenter {
            Some(presenter) => {
                let outcome = tokio::select! {
                    outcome = &mut polling => outcome,
                    event = presenter.present(request) => match event {
                        PresentationEvent::Dismissed | PresentationEvent::Declined => {
                            info!(action_id = %context.action_id, ?event, "waiting screen closed");
                            return HandlerResult::failure(AWAIT_HANDLER, ActionError::UserCancelled);
                        }
                        other => {
                            debug!(action_id = %context.action_id, event = ?other, "waiting screen answered, still polling");
                            (&mut polling).await
                        }
                    },
                };
                presenter.dismiss().await;
                outcome
            }
            None => polling.await,
        };

        match outcome {
            Ok(Ok(status)) => {
                let mut details = Map::new();
                if let Some(payload) = status.payload {
                    details.insert("payload".to_string(), Value::String(payload));
                }
                HandlerResult::Details(ActionDetails::new(details, Some(payment_data.to_string())))
            }
            Ok(Err(e)) => {
                warn!(action_id = %context.action_id, error = %e, "payment status polling failed");
                HandlerResult::failure(AWAIT_HANDLER, e)
            }
            Err(_) => {
                warn!(action_id = %context.action_id, "no final payment status before timeout");
                HandlerResult::failure(AWAIT_HANDLER, ActionError::TimeoutExceeded)
            }
        }
    }

    async fn poll(&self, payment_data: &str, context: &ActionContext) -> Result<PaymentStatus> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let status = self
                .provider
                .payment_status(payment_data)
                .await
                .map_err(|e| match e {
                    CapabilityError::Cancelled => ActionError::UserCancelled,
                    other => ActionError::SubmissionFailed(other.to_string()),
                })?;
            debug!(
                action_id = %context.action_id,
                attempts,
                result_code = ?status.result_code,
                "payment status polled"
            );
            if status.result_code.is_final() {
                return Ok(status);
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}

#[async_trait]
impl ActionHandler for AwaitHandler {
    fn name(&self) -> &str {
        AWAIT_HANDLER
    }

    fn can_handle(&self, action: &Action) -> bool {
        matches!(action, Action::Await(_) | Action::QrCode(_))
    }

    async fn handle(&self, action: &Action, context: &ActionContext) -> HandlerResult {
        match action {
            Action::Await(await_action) => {
                let request = PresentationRequest::Await {
                    payment_method_type: await_action.payment_method_type.clone(),
                };
                self.wait_for_payment(&await_action.payment_data, request, context)
                    .await
            }
            Action::QrCode(qr_code) => {
                let request = PresentationRequest::QrCode {
                    payment_method_type: qr_code.payment_method_type.clone(),
                    qr_code_data: qr_code.qr_code_data.clone(),
                    url: qr_code.url.clone(),
                };
                self.wait_for_payment(&qr_code.payment_data, request, context)
                    .await
            }
            other => HandlerResult::failure(
                AWAIT_HANDLER,
                ActionError::UnsupportedAction(other.action_type().to_string()),
            ),
        }
    }
}
