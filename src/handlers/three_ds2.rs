//! 3DS2 orchestration.
//!
//! The orchestrator owns one authentication session at a time and walks it through
//! fingerprinting, fingerprint submission, the optional challenge and the challenge
//! result. The classic flow splits fingerprint and challenge into two actions and parks
//! the session in [`ThreeDS2Phase::AwaitingChallenge`] between them; the native flow
//! submits the fingerprint itself and runs any follow-up challenge in the same action.
//!
//! A parked session lives only until the next action: any action other than the
//! challenge, a rejected payload or a cancellation releases it.

use crate::capabilities::{CapabilityError, ChallengeParameters, FingerprintSubmission, FingerprintSubmitter, ThreeDS2Service};
use crate::config::ThreeDS2Config;
use crate::errors::{ActionError, Result};
use crate::handlers::delegated::DelegatedAuthenticationPrompts;
use crate::handlers::redirect::RedirectOrchestrator;
use crate::handlers::{ActionContext, ActionDetails, ActionHandler, HandlerResult};
use crate::types::{
    Action, ChallengeResultPayload, ChallengeToken, FingerprintPayload, FingerprintToken,
    ThreeDS2ChallengeAction, ThreeDS2FingerprintAction, ThreeDS2Flow, TRANSACTION_STATUS_SUCCESS,
};
use crate::utils::{decode_base64_json, encode_base64_json};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Name reported by this handler.
pub const THREE_DS2_HANDLER: &str = "threeDS2";

/// Detail key of a classic fingerprint.
pub const FINGERPRINT_KEY: &str = "threeds2.fingerprint";
/// Detail key of a classic challenge result.
pub const CHALLENGE_RESULT_KEY: &str = "threeds2.challengeResult";
/// Detail key of a native-flow challenge result.
pub const THREE_DS_RESULT_KEY: &str = "threeDSResult";

/// Phase of the authentication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreeDS2Phase {
    /// No session, or a session that has not started
    Idle,
    /// Native SDK is creating the device fingerprint
    Fingerprinting,
    /// Fingerprint is being handed to the backend
    SubmittingFingerprint,
    /// Classic flow: fingerprint returned, waiting for the challenge action
    AwaitingChallenge,
    /// Native SDK is running the challenge
    Challenging,
    /// Challenge result is being built
    SubmittingChallengeResult,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
}

impl ThreeDS2Phase {
    /// Name used in logs and transition errors.
    pub fn as_str(self) -> &'static str {
        match self {
            ThreeDS2Phase::Idle => "idle",
            ThreeDS2Phase::Fingerprinting => "fingerprinting",
            ThreeDS2Phase::SubmittingFingerprint => "submittingFingerprint",
            ThreeDS2Phase::AwaitingChallenge => "awaitingChallenge",
            ThreeDS2Phase::Challenging => "challenging",
            ThreeDS2Phase::SubmittingChallengeResult => "submittingChallengeResult",
            ThreeDS2Phase::Completed => "completed",
            ThreeDS2Phase::Failed => "failed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Completed` and `Failed` are terminal.
    pub fn can_transition_to(self, next: ThreeDS2Phase) -> bool {
        use ThreeDS2Phase::*;
        match (self, next) {
            (Completed, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Idle, Fingerprinting) => true,
            (Fingerprinting, SubmittingFingerprint) => true,
            (SubmittingFingerprint, AwaitingChallenge | Challenging | Completed) => true,
            (AwaitingChallenge, Challenging) => true,
            (Challenging, SubmittingChallengeResult) => true,
            (SubmittingChallengeResult, Completed) => true,
            _ => false,
        }
    }

    /// Whether the session has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, ThreeDS2Phase::Completed | ThreeDS2Phase::Failed)
    }
}

impl fmt::Display for ThreeDS2Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct AuthenticationSession {
    id: u64,
    action_id: String,
    phase: ThreeDS2Phase,
    sdk_transaction_id: Option<String>,
    authorisation_token: Option<String>,
    started_at: Instant,
}

/// Drives 3DS2 fingerprint and challenge actions.
pub struct ThreeDS2Orchestrator {
    service: Arc<dyn ThreeDS2Service>,
    config: ThreeDS2Config,
    delegated: Option<DelegatedAuthenticationPrompts>,
    submitter: Option<Arc<dyn FingerprintSubmitter>>,
    redirect: Option<Arc<RedirectOrchestrator>>,
    session: Mutex<Option<AuthenticationSession>>,
    next_id: AtomicU64,
}

impl ThreeDS2Orchestrator {
    /// Creates an orchestrator for the classic flow.
    pub fn new(service: Arc<dyn ThreeDS2Service>, config: ThreeDS2Config) -> Self {
        Self {
            service,
            config,
            delegated: None,
            submitter: None,
            redirect: None,
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enables delegated-authentication approval and registration prompts.
    pub fn with_delegated_authentication(mut self, prompts: DelegatedAuthenticationPrompts) -> Self {
        self.delegated = Some(prompts);
        self
    }

    /// Sets the backend call used by the native flow.
    pub fn with_fingerprint_submitter(mut self, submitter: Arc<dyn FingerprintSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Sets the orchestrator that runs redirects requested after a native fingerprint.
    pub fn with_redirect(mut self, redirect: Arc<RedirectOrchestrator>) -> Self {
        self.redirect = Some(redirect);
        self
    }

    /// Phase of the live session, [`ThreeDS2Phase::Idle`] once it has been released.
    pub fn current_phase(&self) -> ThreeDS2Phase {
        self.slot()
            .as_ref()
            .map_or(ThreeDS2Phase::Idle, |session| session.phase)
    }

    /// Time since the live session started.
    pub fn session_elapsed(&self) -> Option<Duration> {
        self.slot().as_ref().map(|session| session.started_at.elapsed())
    }

    /// Releases a session parked between a classic fingerprint and its challenge.
    ///
    /// Returns `false` when no session is parked.
    pub fn release_parked(&self) -> bool {
        let mut slot = self.slot();
        match slot.as_ref() {
            Some(session) if session.phase == ThreeDS2Phase::AwaitingChallenge => {
                info!(action_id = %session.action_id, "releasing parked 3DS2 session");
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Runs a fingerprint action.
    ///
    /// A classic fingerprint returns `threeds2.fingerprint` details and keeps the session
    /// for the challenge action that may follow.
    pub async fn fingerprint(&self, action: &ThreeDS2FingerprintAction, context: &ActionContext) -> HandlerResult {
        let id = self.begin(action, context);
        let _guard = SessionGuard {
            slot: &self.session,
            id,
            keep_parked: true,
        };

        match self.run_fingerprint(id, action, context).await {
            Ok(result) => result,
            Err(e) => self.fail(id, context, e),
        }
    }

    /// Runs a challenge action against the session kept by the preceding fingerprint.
    pub async fn challenge(&self, action: &ThreeDS2ChallengeAction, context: &ActionContext) -> HandlerResult {
        let Some(id) = self.resume_session(action, context) else {
            warn!(action_id = %context.action_id, "challenge without a 3DS2 transaction");
            return HandlerResult::failure(
                THREE_DS2_HANDLER,
                ActionError::RelaunchLostState("no 3DS2 transaction awaiting a challenge".to_string()),
            );
        };
        let _guard = SessionGuard {
            slot: &self.session,
            id,
            keep_parked: false,
        };

        match self.run_challenge(id, action, context).await {
            Ok(result) => result,
            Err(e) => self.fail(id, context, e),
        }
    }

    async fn run_fingerprint(
        &self,
        id: u64,
        action: &ThreeDS2FingerprintAction,
        context: &ActionContext,
    ) -> Result<HandlerResult> {
        self.transition(id, ThreeDS2Phase::Fingerprinting)?;

        let token: FingerprintToken = decode_base64_json(&action.token)
            .map_err(|e| ActionError::InvalidToken(format!("fingerprint token: {}", e)))?;

        let parameters = self
            .service
            .create_fingerprint(&token)
            .await
            .map_err(native_error)?;
        self.update(id, |session| {
            session.sdk_transaction_id = Some(parameters.sdk_transaction_identifier.clone())
        });

        let delegated_output = match (&self.delegated, &token.delegated_authentication_input) {
            (Some(prompts), Some(input)) => prompts.approve(input, context).await,
            _ => None,
        };

        let payload = FingerprintPayload {
            sdk_enc_data: parameters.device_information,
            sdk_app_id: parameters.sdk_application_identifier,
            sdk_transaction_id: parameters.sdk_transaction_identifier,
            sdk_reference_number: parameters.sdk_reference_number,
            sdk_ephemeral_public_key: serde_json::from_str(&parameters.sdk_ephemeral_public_key)
                .unwrap_or(Value::String(parameters.sdk_ephemeral_public_key)),
            message_version: parameters.message_version.or(token.message_version),
            delegated_authentication_output: delegated_output,
        };
        let fingerprint = encode_base64_json(&payload)?;

        self.transition(id, ThreeDS2Phase::SubmittingFingerprint)?;

        match action.flow {
            ThreeDS2Flow::Classic => {
                self.transition(id, ThreeDS2Phase::AwaitingChallenge)?;
                Ok(HandlerResult::Details(ActionDetails::single(
                    FINGERPRINT_KEY,
                    fingerprint,
                    action.payment_data.clone(),
                )))
            }
            ThreeDS2Flow::Native => self.submit_fingerprint(id, action, &fingerprint, context).await,
        }
    }

    async fn submit_fingerprint(
        &self,
        id: u64,
        action: &ThreeDS2FingerprintAction,
        fingerprint: &str,
        context: &ActionContext,
    ) -> Result<HandlerResult> {
        let submitter = self.submitter.as_ref().ok_or_else(|| {
            ActionError::ConfigError("native 3DS2 flow requires a fingerprint submitter".to_string())
        })?;

        let submission = submitter
            .submit_fingerprint(fingerprint, action.payment_data.as_deref())
            .await
            .map_err(|e| match e {
                CapabilityError::Cancelled => ActionError::UserCancelled,
                other => ActionError::SubmissionFailed(other.to_string()),
            })?;

        match submission {
            FingerprintSubmission::Completed(details) => {
                self.transition(id, ThreeDS2Phase::Completed)?;
                Ok(HandlerResult::Details(ActionDetails::new(
                    details,
                    action.payment_data.clone(),
                )))
            }
            FingerprintSubmission::Action(Action::ThreeDS2Challenge(challenge)) => {
                debug!(action_id = %context.action_id, "fingerprint submission requires a challenge");
                self.run_challenge(id, &challenge, context).await
            }
            FingerprintSubmission::Action(Action::Redirect(redirect)) => {
                let orchestrator = self
                    .redirect
                    .as_ref()
                    .ok_or_else(|| ActionError::UnsupportedAction(redirect.redirect_type.as_str().to_string()))?;
                debug!(action_id = %context.action_id, "fingerprint submission requires a redirect");

                let result = orchestrator.redirect(&redirect, context).await;
                let phase = match result {
                    HandlerResult::Details(_) => ThreeDS2Phase::Completed,
                    HandlerResult::Failure(_) => ThreeDS2Phase::Failed,
                };
                self.transition(id, phase)?;
                Ok(result)
            }
            FingerprintSubmission::Action(other) => {
                Err(ActionError::UnsupportedAction(other.action_type().to_string()))
            }
        }
    }

    async fn run_challenge(
        &self,
        id: u64,
        action: &ThreeDS2ChallengeAction,
        context: &ActionContext,
    ) -> Result<HandlerResult> {
        let token: ChallengeToken = decode_base64_json(&action.token)
            .map_err(|e| ActionError::InvalidToken(format!("challenge token: {}", e)))?;

        let (sdk_transaction_id, session_token) = self
            .read(id, |session| {
                (session.sdk_transaction_id.clone(), session.authorisation_token.clone())
            })
            .ok_or_else(|| ActionError::RelaunchLostState("3DS2 session was released".to_string()))?;
        let sdk_transaction_id = sdk_transaction_id
            .ok_or_else(|| ActionError::RelaunchLostState("no 3DS2 transaction identifier".to_string()))?;

        let delegated_output = match (&self.delegated, &token.delegated_authentication_input) {
            (Some(prompts), Some(input)) => prompts.offer_registration(input, context).await,
            _ => None,
        };

        self.transition(id, ThreeDS2Phase::Challenging)?;

        let requestor_app_url = self.config.requestor_app_url.clone().or_else(|| {
            token
                .requestor_app_url
                .as_deref()
                .and_then(|url| Url::parse(url).ok())
        });
        let parameters = ChallengeParameters {
            token,
            sdk_transaction_identifier: sdk_transaction_id,
            requestor_app_url,
        };
        let result = match self.service.handle_challenge(&parameters).await {
            Ok(result) => result,
            Err(e) => {
                self.discard_registration(&delegated_output, context).await;
                return Err(native_error(e));
            }
        };

        self.transition(id, ThreeDS2Phase::SubmittingChallengeResult)?;
        info!(
            action_id = %context.action_id,
            trans_status = %result.transaction_status,
            "challenge finished"
        );

        if result.transaction_status != TRANSACTION_STATUS_SUCCESS {
            self.discard_registration(&delegated_output, context).await;
            return Err(ActionError::AuthenticationFailed(result.transaction_status));
        }

        let details = match action.flow {
            ThreeDS2Flow::Classic => {
                let payload = ChallengeResultPayload {
                    transaction_status: result.transaction_status,
                    authorisation_token: None,
                    delegated_authentication_output: delegated_output,
                };
                ActionDetails::single(
                    CHALLENGE_RESULT_KEY,
                    encode_base64_json(&payload)?,
                    action.payment_data.clone(),
                )
            }
            ThreeDS2Flow::Native => {
                let payload = ChallengeResultPayload {
                    transaction_status: result.transaction_status,
                    authorisation_token: action.authorisation_token.clone().or(session_token),
                    delegated_authentication_output: delegated_output,
                };
                ActionDetails::single(
                    THREE_DS_RESULT_KEY,
                    encode_base64_json(&payload)?,
                    action.payment_data.clone(),
                )
            }
        };

        self.transition(id, ThreeDS2Phase::Completed)?;
        Ok(HandlerResult::Details(details))
    }

    async fn discard_registration(&self, delegated_output: &Option<String>, context: &ActionContext) {
        if let (Some(prompts), Some(_)) = (&self.delegated, delegated_output) {
            prompts.discard_registration(context).await;
        }
    }

    fn begin(&self, action: &ThreeDS2FingerprintAction, context: &ActionContext) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.slot();
        if let Some(previous) = slot.as_ref() {
            info!(
                action_id = %context.action_id,
                previous_action_id = %previous.action_id,
                phase = previous.phase.as_str(),
                "replacing previous 3DS2 session"
            );
        }
        *slot = Some(AuthenticationSession {
            id,
            action_id: context.action_id.clone(),
            phase: ThreeDS2Phase::Idle,
            sdk_transaction_id: None,
            authorisation_token: action.authorisation_token.clone(),
            started_at: Instant::now(),
        });
        id
    }

    fn resume_session(&self, action: &ThreeDS2ChallengeAction, context: &ActionContext) -> Option<u64> {
        let mut slot = self.slot();
        let session = slot
            .as_mut()
            .filter(|session| session.phase == ThreeDS2Phase::AwaitingChallenge)?;
        debug!(
            action_id = %context.action_id,
            fingerprint_action_id = %session.action_id,
            "challenge resumes 3DS2 session"
        );
        session.action_id = context.action_id.clone();
        if action.authorisation_token.is_some() {
            session.authorisation_token = action.authorisation_token.clone();
        }
        Some(session.id)
    }

    fn transition(&self, id: u64, to: ThreeDS2Phase) -> Result<()> {
        let mut slot = self.slot();
        let session = slot
            .as_mut()
            .filter(|session| session.id == id)
            .ok_or_else(|| ActionError::RelaunchLostState("3DS2 session was released".to_string()))?;

        let from = session.phase;
        if !from.can_transition_to(to) {
            return Err(ActionError::IllegalTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        info!(action_id = %session.action_id, from = from.as_str(), to = to.as_str(), "3DS2 transition");
        session.phase = to;
        Ok(())
    }

    fn fail(&self, id: u64, context: &ActionContext, error: ActionError) -> HandlerResult {
        warn!(action_id = %context.action_id, error = %error, "3DS2 action failed");
        if let Err(e) = self.transition(id, ThreeDS2Phase::Failed) {
            debug!(action_id = %context.action_id, "session not moved to failed: {}", e);
        }
        HandlerResult::failure(THREE_DS2_HANDLER, error)
    }

    fn update(&self, id: u64, apply: impl FnOnce(&mut AuthenticationSession)) {
        if let Some(session) = self.slot().as_mut().filter(|session| session.id == id) {
            apply(session);
        }
    }

    fn read<T>(&self, id: u64, read: impl FnOnce(&AuthenticationSession) -> T) -> Option<T> {
        self.slot()
            .as_ref()
            .filter(|session| session.id == id)
            .map(read)
    }

    fn slot(&self) -> MutexGuard<'_, Option<AuthenticationSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn native_error(error: CapabilityError) -> ActionError {
    match error {
        CapabilityError::Cancelled => ActionError::UserCancelled,
        other => ActionError::NativeSdk(other.to_string()),
    }
}

/// Releases the session on exit. A fingerprint guard leaves a session parked awaiting
/// its challenge; a challenge guard always releases.
struct SessionGuard<'a> {
    slot: &'a Mutex<Option<AuthenticationSession>>,
    id: u64,
    keep_parked: bool,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let release = slot.as_ref().is_some_and(|session| {
            session.id == self.id
                && !(self.keep_parked && session.phase == ThreeDS2Phase::AwaitingChallenge)
        });
        if release {
            *slot = None;
        }
    }
}

#[async_trait]
impl ActionHandler for ThreeDS2Orchestrator {
    fn name(&self) -> &str {
        THREE_DS2_HANDLER
    }

    fn can_handle(&self, action: &Action) -> bool {
        matches!(action, Action::ThreeDS2Fingerprint(_) | Action::ThreeDS2Challenge(_))
    }

    fn superseded(&self, next: Option<&Action>) {
        if !matches!(next, Some(Action::ThreeDS2Challenge(_))) {
            self.release_parked();
        }
    }

    async fn handle(&self, action: &Action, context: &ActionContext) -> HandlerResult {
        match action {
            Action::ThreeDS2Fingerprint(fingerprint) => self.fingerprint(fingerprint, context).await,
            Action::ThreeDS2Challenge(challenge) => self.challenge(challenge, context).await,
            other => HandlerResult::failure(
                THREE_DS2_HANDLER,
                ActionError::UnsupportedAction(other.action_type().to_string()),
            ),
        }
    }
}
