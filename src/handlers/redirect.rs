//! Redirect orchestration.
//!
//! A redirect hands the shopper to an external browser or app and suspends until the
//! host application receives the return URL and calls [`RedirectOrchestrator::resume`].
//! There is no timeout: the redirect resolves through a callback or through
//! cancellation. At most one redirect is pending at a time.

use crate::capabilities::{CapabilityError, RedirectOpener, RedirectResultExchange};
use crate::errors::{ActionError, Result};
use crate::handlers::{ActionContext, ActionDetails, ActionHandler, HandlerResult};
use crate::types::{Action, RedirectAction, RedirectType};
use crate::utils::{extract_redirect_details, same_origin};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

/// Name reported by this handler.
pub const REDIRECT_HANDLER: &str = "redirect";

/// What [`RedirectOrchestrator::resume`] did with a callback URL.
#[derive(Debug, Clone)]
pub enum ResumeOutcome {
    /// The URL completed the pending redirect
    Handled(HandlerResult),
    /// The URL does not match the return URL; route it elsewhere
    NotMine,
    /// The URL matches the return URL but no redirect is pending, typically because the
    /// process was relaunched while the shopper was away
    Lost,
}

struct PendingRedirect {
    id: u64,
    action_id: String,
    payment_data: Option<String>,
    redirect_type: RedirectType,
    native_redirect_data: Option<String>,
    created_at: DateTime<Utc>,
    completion: oneshot::Sender<HandlerResult>,
}

/// Drives browser and app-to-app redirects.
pub struct RedirectOrchestrator {
    opener: Arc<dyn RedirectOpener>,
    exchange: Option<Arc<dyn RedirectResultExchange>>,
    return_url: Url,
    pending: Mutex<Option<PendingRedirect>>,
    next_id: AtomicU64,
}

impl RedirectOrchestrator {
    /// Creates an orchestrator whose callbacks must match `return_url`'s scheme and host.
    pub fn new(opener: Arc<dyn RedirectOpener>, return_url: Url) -> Self {
        Self {
            opener,
            exchange: None,
            return_url,
            pending: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Sets the backend exchange used to resolve native redirects.
    pub fn with_exchange(mut self, exchange: Arc<dyn RedirectResultExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Whether a redirect is waiting for its callback.
    pub fn has_pending(&self) -> bool {
        self.slot().is_some()
    }

    /// When the pending redirect was started, if any.
    pub fn pending_since(&self) -> Option<DateTime<Utc>> {
        self.slot().as_ref().map(|pending| pending.created_at)
    }

    /// Starts the redirect and suspends until it is resumed.
    ///
    /// Fails with [`ActionError::ConcurrentRedirect`] before any platform hand-off when
    /// another redirect is pending. Dropping the returned future clears the pending state.
    pub async fn redirect(&self, action: &RedirectAction, context: &ActionContext) -> HandlerResult {
        let (completion, receiver) = oneshot::channel();

        let id = match self.register(action, context, completion) {
            Ok(id) => id,
            Err(e) => {
                warn!(action_id = %context.action_id, "redirect rejected: {}", e);
                return HandlerResult::failure(REDIRECT_HANDLER, e);
            }
        };
        let _guard = PendingGuard {
            slot: &self.pending,
            id,
        };

        if let Err(e) = self.open(action).await {
            warn!(action_id = %context.action_id, error = %e, "redirect hand-off failed");
            return HandlerResult::failure(REDIRECT_HANDLER, e);
        }

        info!(
            action_id = %context.action_id,
            redirect_type = action.redirect_type.as_str(),
            "redirect opened, waiting for callback"
        );

        match receiver.await {
            Ok(result) => result,
            Err(_) => HandlerResult::failure(
                REDIRECT_HANDLER,
                ActionError::RelaunchLostState("redirect completion was dropped".to_string()),
            ),
        }
    }

    /// Routes a callback URL received by the host application.
    ///
    /// A URL whose scheme or host differs from the return URL yields
    /// [`ResumeOutcome::NotMine`] and leaves the pending redirect untouched.
    pub async fn resume(&self, url: &Url) -> ResumeOutcome {
        if !same_origin(&self.return_url, url) {
            debug!(%url, "callback URL not for the redirect handler");
            return ResumeOutcome::NotMine;
        }

        let pending = self.slot().take();
        let Some(pending) = pending else {
            warn!(%url, "callback URL arrived with no pending redirect");
            return ResumeOutcome::Lost;
        };

        let waited = Utc::now() - pending.created_at;
        info!(
            action_id = %pending.action_id,
            waited_secs = waited.num_seconds(),
            "resuming redirect"
        );

        let result = self.build_result(&pending, url).await;
        // The suspended redirect may have been cancelled in the meantime.
        let _ = pending.completion.send(result.clone());
        ResumeOutcome::Handled(result)
    }

    fn register(
        &self,
        action: &RedirectAction,
        context: &ActionContext,
        completion: oneshot::Sender<HandlerResult>,
    ) -> Result<u64> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(ActionError::ConcurrentRedirect);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *slot = Some(PendingRedirect {
            id,
            action_id: context.action_id.clone(),
            payment_data: action.payment_data.clone(),
            redirect_type: action.redirect_type,
            native_redirect_data: action.native_redirect_data.clone(),
            created_at: Utc::now(),
            completion,
        });
        Ok(id)
    }

    async fn open(&self, action: &RedirectAction) -> Result<()> {
        match action.redirect_type {
            RedirectType::Redirect => self.opener.open_url(&action.url).await,
            RedirectType::NativeRedirect => match self.opener.open_app(&action.url).await {
                Ok(true) => Ok(()),
                Ok(false) => {
                    info!(url = %action.url, "no app claims native redirect, using browser");
                    self.opener.open_url(&action.url).await
                }
                Err(e) => Err(e),
            },
        }
        .map_err(|e| match e {
            CapabilityError::Cancelled => ActionError::UserCancelled,
            other => ActionError::RedirectFailed(other.to_string()),
        })
    }

    async fn build_result(&self, pending: &PendingRedirect, url: &Url) -> HandlerResult {
        if pending.redirect_type == RedirectType::NativeRedirect {
            if let (Some(exchange), Some(data)) = (&self.exchange, &pending.native_redirect_data) {
                let query = url.query().unwrap_or_default();
                return match exchange.exchange(data, query).await {
                    Ok(redirect_result) => HandlerResult::Details(ActionDetails::single(
                        "redirectResult",
                        redirect_result,
                        pending.payment_data.clone(),
                    )),
                    Err(e) => HandlerResult::failure(
                        REDIRECT_HANDLER,
                        ActionError::SubmissionFailed(e.to_string()),
                    ),
                };
            }
        }

        match extract_redirect_details(url) {
            Ok(details) => HandlerResult::Details(ActionDetails::new(
                details,
                pending.payment_data.clone(),
            )),
            Err(e) => HandlerResult::failure(REDIRECT_HANDLER, e),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<PendingRedirect>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the pending redirect it registered, on every exit path.
struct PendingGuard<'a> {
    slot: &'a Mutex<Option<PendingRedirect>>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|pending| pending.id) == Some(self.id) {
            *slot = None;
        }
    }
}

#[async_trait]
impl ActionHandler for RedirectOrchestrator {
    fn name(&self) -> &str {
        REDIRECT_HANDLER
    }

    fn can_handle(&self, action: &Action) -> bool {
        matches!(action, Action::Redirect(_))
    }

    async fn handle(&self, action: &Action, context: &ActionContext) -> HandlerResult {
        match action {
            Action::Redirect(redirect) => self.redirect(redirect, context).await,
            other => HandlerResult::failure(
                REDIRECT_HANDLER,
                ActionError::UnsupportedAction(other.action_type().to_string()),
            ),
        }
    }
}
