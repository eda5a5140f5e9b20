//! Delegated authentication.
//!
//! Registration and approval prompts are shared by the 3DS2 orchestrator and by the
//! standalone `delegatedAuthentication` action. A declined, dismissed or failed prompt
//! never fails the action that offered it.

use crate::capabilities::{
    DelegatedAuthenticationService, PresentationEvent, PresentationRequest, Presenter,
    PromptCountdown,
};
use crate::config::DelegatedAuthenticationConfig;
use crate::errors::ActionError;
use crate::handlers::{ActionContext, ActionDetails, ActionHandler, HandlerResult};
use crate::types::{Action, DelegatedAuthenticationAction};
use async_trait::async_trait;
use serde_json::Map;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name reported by the standalone registration handler.
pub const DELEGATED_AUTHENTICATION_HANDLER: &str = "delegatedAuthentication";

/// Detail key carrying the delegated-authentication SDK output.
pub const SDK_OUTPUT_KEY: &str = "delegatedAuthenticationSDKOutput";

/// Presents delegated-authentication prompts and drives the capability on consent.
#[derive(Clone)]
pub struct DelegatedAuthenticationPrompts {
    service: Arc<dyn DelegatedAuthenticationService>,
    presenter: Arc<dyn Presenter>,
    config: DelegatedAuthenticationConfig,
}

impl DelegatedAuthenticationPrompts {
    /// Creates prompts over the given capability and presenter.
    pub fn new(
        service: Arc<dyn DelegatedAuthenticationService>,
        presenter: Arc<dyn Presenter>,
        config: DelegatedAuthenticationConfig,
    ) -> Self {
        Self {
            service,
            presenter,
            config,
        }
    }

    /// Offers to approve the payment with an existing credential.
    ///
    /// Returns the approval output, or `None` when there is no credential or the user
    /// did not approve. A `RemoveCredentials` answer deletes the stored credentials.
    pub async fn approve(&self, sdk_input: &str, context: &ActionContext) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        if !self.service.has_credential(sdk_input).await {
            debug!(action_id = %context.action_id, "no delegated-authentication credential on device");
            return None;
        }

        let countdown = PromptCountdown::start(self.config.prompt_timeout());
        let event = self
            .presenter
            .present(PresentationRequest::DelegatedAuthenticationApproval { countdown })
            .await;
        self.presenter.dismiss().await;
        info!(action_id = %context.action_id, ?event, "delegated-authentication approval prompt answered");

        match event {
            PresentationEvent::Confirmed => match self.service.authenticate(sdk_input).await {
                Ok(output) => Some(output),
                Err(e) => {
                    warn!(action_id = %context.action_id, error = %e, "delegated-authentication approval failed");
                    None
                }
            },
            PresentationEvent::RemoveCredentials => {
                if let Err(e) = self.service.remove_credentials().await {
                    warn!(action_id = %context.action_id, error = %e, "removing credentials failed");
                }
                None
            }
            PresentationEvent::Declined | PresentationEvent::Dismissed => None,
        }
    }

    /// Offers to register a credential on an eligible device without one.
    ///
    /// Returns the registration output, or `None` when the device is not eligible or the
    /// user did not consent.
    pub async fn offer_registration(&self, sdk_input: &str, context: &ActionContext) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        if !self.service.is_supported().await {
            debug!(action_id = %context.action_id, "device does not support delegated authentication");
            return None;
        }
        if self.service.has_credential(sdk_input).await {
            debug!(action_id = %context.action_id, "credential already registered");
            return None;
        }

        let countdown = PromptCountdown::start(self.config.prompt_timeout());
        let event = self
            .presenter
            .present(PresentationRequest::DelegatedAuthenticationRegistration { countdown })
            .await;
        self.presenter.dismiss().await;
        info!(action_id = %context.action_id, ?event, "delegated-authentication registration prompt answered");

        if event != PresentationEvent::Confirmed {
            return None;
        }
        match self.service.register(sdk_input).await {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(action_id = %context.action_id, error = %e, "delegated-authentication registration failed");
                None
            }
        }
    }

    /// Removes a credential registered for an authentication that then failed, since its
    /// output never reaches the backend.
    pub async fn discard_registration(&self, context: &ActionContext) {
        warn!(
            action_id = %context.action_id,
            "authentication failed after delegated-authentication registration, removing credential"
        );
        if let Err(e) = self.service.remove_credentials().await {
            warn!(action_id = %context.action_id, error = %e, "removing credentials failed");
        }
    }
}

/// Handles standalone `delegatedAuthentication` registration actions.
pub struct DelegatedAuthenticationHandler {
    prompts: DelegatedAuthenticationPrompts,
}

impl DelegatedAuthenticationHandler {
    /// Creates the handler.
    pub fn new(prompts: DelegatedAuthenticationPrompts) -> Self {
        Self { prompts }
    }

    async fn register(&self, action: &DelegatedAuthenticationAction, context: &ActionContext) -> HandlerResult {
        let mut details = Map::new();
        if let Some(output) = self.prompts.offer_registration(&action.token, context).await {
            details.insert(SDK_OUTPUT_KEY.to_string(), output.into());
        }
        HandlerResult::Details(ActionDetails::new(details, action.payment_data.clone()))
    }
}

#[async_trait]
impl ActionHandler for DelegatedAuthenticationHandler {
    fn name(&self) -> &str {
        DELEGATED_AUTHENTICATION_HANDLER
    }

    fn can_handle(&self, action: &Action) -> bool {
        matches!(action, Action::DelegatedAuthenticationRegistration(_))
    }

    async fn handle(&self, action: &Action, context: &ActionContext) -> HandlerResult {
        match action {
            Action::DelegatedAuthenticationRegistration(registration) => {
                self.register(registration, context).await
            }
            other => HandlerResult::failure(
                DELEGATED_AUTHENTICATION_HANDLER,
                ActionError::UnsupportedAction(other.action_type().to_string()),
            ),
        }
    }
}
