//! The action component.
//!
//! [`ActionComponent`] wires a configuration and the injected capabilities into the
//! handlers and the dispatcher. A handler is registered only when the capabilities it
//! needs were provided.

use crate::capabilities::{
    DelegatedAuthenticationService, FingerprintSubmitter, PaymentStatusProvider, Presenter,
    RedirectOpener, RedirectResultExchange, SdkLauncher, ThreeDS2Service,
};
use crate::config::ActionComponentConfig;
use crate::dispatcher::ActionDispatcher;
use crate::errors::Result;
use crate::handlers::await_action::AwaitHandler;
use crate::handlers::delegated::{DelegatedAuthenticationHandler, DelegatedAuthenticationPrompts};
use crate::handlers::redirect::{RedirectOrchestrator, ResumeOutcome};
use crate::handlers::sdk::SdkActionHandler;
use crate::handlers::three_ds2::{ThreeDS2Orchestrator, ThreeDS2Phase};
use crate::handlers::ActionHandler;
use crate::reconciler::{NormalizedOutcome, OutcomeSubmitter};
use crate::types::Action;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Handler name attributed to payloads that fail to decode.
pub const DECODER: &str = "decoder";

/// Entry point for the host application.
///
/// # Examples
///
/// ```no_run
/// use checkout_actions::component::ActionComponent;
/// use checkout_actions::config::ActionComponentConfig;
/// use url::Url;
///
/// # async fn run(opener: std::sync::Arc<dyn checkout_actions::capabilities::RedirectOpener>) -> checkout_actions::Result<()> {
/// let config = ActionComponentConfig::new(Url::parse("myshop://checkout")?);
/// let component = ActionComponent::builder(config)
///     .redirect_opener(opener)
///     .build()?;
///
/// let outcome = component
///     .handle_json(&serde_json::json!({"type": "redirect", "url": "https://bank.example.com"}))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ActionComponent {
    config: ActionComponentConfig,
    dispatcher: ActionDispatcher,
    redirect: Option<Arc<RedirectOrchestrator>>,
    three_ds2: Option<Arc<ThreeDS2Orchestrator>>,
}

impl ActionComponent {
    /// Starts building a component.
    pub fn builder(config: ActionComponentConfig) -> ActionComponentBuilder {
        ActionComponentBuilder::new(config)
    }

    /// Configuration the component was built with.
    pub fn config(&self) -> &ActionComponentConfig {
        &self.config
    }

    /// The underlying dispatcher.
    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Decodes and runs a raw action payload.
    ///
    /// A payload that does not decode is reported as a `DecodeError` outcome rather than
    /// an `Err`; `Err` is reserved for dispatching while another action is in flight,
    /// whether or not the payload decodes.
    pub async fn handle_json(&self, raw: &Value) -> Result<NormalizedOutcome> {
        match Action::decode(raw) {
            Ok(action) => self.handle(&action).await,
            Err(e) => self.dispatcher.reject(DECODER, e).await,
        }
    }

    /// Runs a decoded action.
    pub async fn handle(&self, action: &Action) -> Result<NormalizedOutcome> {
        self.dispatcher.dispatch(action).await
    }

    /// Routes a callback URL received by the host application.
    pub async fn resume(&self, url: &Url) -> ResumeOutcome {
        match &self.redirect {
            Some(redirect) => redirect.resume(url).await,
            None => ResumeOutcome::NotMine,
        }
    }

    /// Cancels the action in flight and releases a 3DS2 session parked for a challenge.
    ///
    /// Returns `false` when there was nothing to cancel or release.
    pub fn cancel(&self) -> bool {
        let cancelled = self.dispatcher.cancel();
        let released = self
            .three_ds2
            .as_ref()
            .is_some_and(|three_ds2| three_ds2.release_parked());
        cancelled || released
    }

    /// Phase of the 3DS2 session, `None` when 3DS2 is not configured.
    pub fn three_ds2_phase(&self) -> Option<ThreeDS2Phase> {
        self.three_ds2.as_ref().map(|three_ds2| three_ds2.current_phase())
    }

    /// Whether a redirect is waiting for its callback.
    pub fn has_pending_redirect(&self) -> bool {
        self.redirect
            .as_ref()
            .is_some_and(|redirect| redirect.has_pending())
    }
}

/// Collects capabilities for an [`ActionComponent`].
pub struct ActionComponentBuilder {
    config: ActionComponentConfig,
    redirect_opener: Option<Arc<dyn RedirectOpener>>,
    redirect_exchange: Option<Arc<dyn RedirectResultExchange>>,
    three_ds2_service: Option<Arc<dyn ThreeDS2Service>>,
    fingerprint_submitter: Option<Arc<dyn FingerprintSubmitter>>,
    delegated_authentication: Option<Arc<dyn DelegatedAuthenticationService>>,
    presenter: Option<Arc<dyn Presenter>>,
    status_provider: Option<Arc<dyn PaymentStatusProvider>>,
    sdk_launchers: Vec<Arc<dyn SdkLauncher>>,
    outcome_submitter: Option<Arc<dyn OutcomeSubmitter>>,
    extra_handlers: Vec<Arc<dyn ActionHandler>>,
}

impl ActionComponentBuilder {
    /// Creates a builder with no capabilities.
    pub fn new(config: ActionComponentConfig) -> Self {
        Self {
            config,
            redirect_opener: None,
            redirect_exchange: None,
            three_ds2_service: None,
            fingerprint_submitter: None,
            delegated_authentication: None,
            presenter: None,
            status_provider: None,
            sdk_launchers: Vec::new(),
            outcome_submitter: None,
            extra_handlers: Vec::new(),
        }
    }

    /// Enables redirects.
    pub fn redirect_opener(mut self, opener: Arc<dyn RedirectOpener>) -> Self {
        self.redirect_opener = Some(opener);
        self
    }

    /// Resolves native redirects through the backend.
    pub fn redirect_exchange(mut self, exchange: Arc<dyn RedirectResultExchange>) -> Self {
        self.redirect_exchange = Some(exchange);
        self
    }

    /// Enables 3DS2.
    pub fn three_ds2_service(mut self, service: Arc<dyn ThreeDS2Service>) -> Self {
        self.three_ds2_service = Some(service);
        self
    }

    /// Enables the native 3DS2 flow.
    pub fn fingerprint_submitter(mut self, submitter: Arc<dyn FingerprintSubmitter>) -> Self {
        self.fingerprint_submitter = Some(submitter);
        self
    }

    /// Enables delegated authentication; requires a presenter as well.
    pub fn delegated_authentication(mut self, service: Arc<dyn DelegatedAuthenticationService>) -> Self {
        self.delegated_authentication = Some(service);
        self
    }

    /// Enables prompts and waiting screens.
    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Enables await and QR code actions.
    pub fn payment_status_provider(mut self, provider: Arc<dyn PaymentStatusProvider>) -> Self {
        self.status_provider = Some(provider);
        self
    }

    /// Adds a payment-method SDK launcher.
    pub fn sdk_launcher(mut self, launcher: Arc<dyn SdkLauncher>) -> Self {
        self.sdk_launchers.push(launcher);
        self
    }

    /// Receives every outcome.
    pub fn outcome_submitter(mut self, submitter: Arc<dyn OutcomeSubmitter>) -> Self {
        self.outcome_submitter = Some(submitter);
        self
    }

    /// Registers an additional handler next to the built-in ones.
    pub fn handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.extra_handlers.push(handler);
        self
    }

    /// Validates the configuration and builds the component.
    pub fn build(self) -> Result<ActionComponent> {
        self.config.validate()?;
        let config = self.config;
        let mut dispatcher = ActionDispatcher::new();

        let redirect = self.redirect_opener.map(|opener| {
            let orchestrator = RedirectOrchestrator::new(opener, config.return_url.clone());
            Arc::new(match self.redirect_exchange {
                Some(exchange) => orchestrator.with_exchange(exchange),
                None => orchestrator,
            })
        });
        if let Some(redirect) = &redirect {
            dispatcher.register(redirect.clone());
        }

        let prompts = match (self.delegated_authentication, &self.presenter) {
            (Some(service), Some(presenter)) => Some(DelegatedAuthenticationPrompts::new(
                service,
                presenter.clone(),
                config.delegated_authentication.clone(),
            )),
            _ => None,
        };

        let three_ds2 = self.three_ds2_service.map(|service| {
            let mut orchestrator = ThreeDS2Orchestrator::new(service, config.three_ds2.clone());
            if let Some(prompts) = &prompts {
                orchestrator = orchestrator.with_delegated_authentication(prompts.clone());
            }
            if let Some(submitter) = self.fingerprint_submitter {
                orchestrator = orchestrator.with_fingerprint_submitter(submitter);
            }
            if let Some(redirect) = &redirect {
                orchestrator = orchestrator.with_redirect(redirect.clone());
            }
            Arc::new(orchestrator)
        });
        if let Some(three_ds2) = &three_ds2 {
            dispatcher.register(three_ds2.clone());
        }

        if let Some(prompts) = prompts {
            dispatcher.register(Arc::new(DelegatedAuthenticationHandler::new(prompts)));
        }

        if let Some(provider) = self.status_provider {
            let mut handler = AwaitHandler::new(provider, config.await_polling.clone());
            if let Some(presenter) = &self.presenter {
                handler = handler.with_presenter(presenter.clone());
            }
            dispatcher.register(Arc::new(handler));
        }

        if !self.sdk_launchers.is_empty() {
            dispatcher.register(Arc::new(SdkActionHandler::new(self.sdk_launchers)));
        }

        for handler in self.extra_handlers {
            dispatcher.register(handler);
        }

        if let Some(submitter) = self.outcome_submitter {
            dispatcher = dispatcher.with_submitter(submitter);
        }

        info!(handlers = ?dispatcher.handler_names(), "action component ready");

        Ok(ActionComponent {
            config,
            dispatcher,
            redirect,
            three_ds2,
        })
    }
}
