//! Integration tests for the checkout-actions library.
//!
//! These tests drive complete action flows through the component with fake platform
//! capabilities: redirects resumed from callback URLs, classic and native 3DS2, delegated
//! authentication, await polling and cancellation.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use url::Url;

use checkout_actions::{
    capabilities::{
        AuthenticationRequestParameters, CapabilityError, ChallengeParameters, ChallengeResult,
        DelegatedAuthenticationService, FingerprintSubmission, FingerprintSubmitter,
        PaymentResultCode, PaymentStatus, PaymentStatusProvider, PresentationEvent,
        PresentationRequest, Presenter, RedirectOpener, ThreeDS2Service,
    },
    handlers::redirect::RedirectOrchestrator,
    handlers::three_ds2::{ThreeDS2Phase, CHALLENGE_RESULT_KEY, FINGERPRINT_KEY, THREE_DS_RESULT_KEY},
    types::{ChallengeResultPayload, FingerprintPayload, RedirectAction, RedirectType},
    utils::{decode_base64_json, encode_base64_json},
    Action, ActionComponent, ActionComponentConfig, ActionContext, ActionError, FailureKind,
    NormalizedOutcome, OutcomeSubmitter, ResumeOutcome,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn config() -> ActionComponentConfig {
    ActionComponentConfig::new(Url::parse("myshop://checkout").unwrap())
        .with_await_polling(Duration::from_millis(1), Duration::from_secs(5))
}

#[derive(Default)]
struct RecordingOpener {
    opened: Mutex<Vec<Url>>,
}

impl RecordingOpener {
    fn count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

#[async_trait]
impl RedirectOpener for RecordingOpener {
    async fn open_url(&self, url: &Url) -> Result<(), CapabilityError> {
        self.opened.lock().unwrap().push(url.clone());
        Ok(())
    }

    async fn open_app(&self, _url: &Url) -> Result<bool, CapabilityError> {
        Ok(false)
    }
}

#[derive(Default)]
struct RecordingSubmitter {
    outcomes: Mutex<Vec<NormalizedOutcome>>,
}

#[async_trait]
impl OutcomeSubmitter for RecordingSubmitter {
    async fn deliver(&self, outcome: &NormalizedOutcome) {
        self.outcomes.lock().unwrap().push(outcome.clone());
    }
}

struct FakeThreeDS2 {
    trans_status: &'static str,
    challenges: AtomicUsize,
}

impl FakeThreeDS2 {
    fn new(trans_status: &'static str) -> Arc<Self> {
        Arc::new(Self {
            trans_status,
            challenges: AtomicUsize::new(0),
        })
    }
}

fn device_parameters(token: &checkout_actions::types::FingerprintToken) -> AuthenticationRequestParameters {
    AuthenticationRequestParameters {
        device_information: format!("device-for-{}", token.directory_server_id),
        sdk_application_identifier: "9063b12c-fcde-43c7-b28e-8d0af5520e8a".to_string(),
        sdk_transaction_identifier: "b60c9879-ac77-4918-a317-7b01c4317053".to_string(),
        sdk_reference_number: "3DS_LOA_SDK_ADBV_739485_94783".to_string(),
        sdk_ephemeral_public_key: r#"{"kty":"EC","crv":"P-256","x":"x","y":"y"}"#.to_string(),
        message_version: None,
    }
}

#[async_trait]
impl ThreeDS2Service for FakeThreeDS2 {
    async fn create_fingerprint(
        &self,
        token: &checkout_actions::types::FingerprintToken,
    ) -> Result<AuthenticationRequestParameters, CapabilityError> {
        Ok(device_parameters(token))
    }

    async fn handle_challenge(
        &self,
        parameters: &ChallengeParameters,
    ) -> Result<ChallengeResult, CapabilityError> {
        assert_eq!(
            parameters.sdk_transaction_identifier,
            "b60c9879-ac77-4918-a317-7b01c4317053"
        );
        self.challenges.fetch_add(1, Ordering::SeqCst);
        Ok(ChallengeResult {
            transaction_status: self.trans_status.to_string(),
        })
    }
}

/// Native SDK whose challenge screen stays open until the action is cancelled.
#[derive(Default)]
struct StalledChallenge {
    challenging: AtomicBool,
}

#[async_trait]
impl ThreeDS2Service for StalledChallenge {
    async fn create_fingerprint(
        &self,
        token: &checkout_actions::types::FingerprintToken,
    ) -> Result<AuthenticationRequestParameters, CapabilityError> {
        Ok(device_parameters(token))
    }

    async fn handle_challenge(
        &self,
        _parameters: &ChallengeParameters,
    ) -> Result<ChallengeResult, CapabilityError> {
        self.challenging.store(true, Ordering::SeqCst);
        std::future::pending().await
    }
}

struct RegisteringService {
    registered: AtomicUsize,
}

#[async_trait]
impl DelegatedAuthenticationService for RegisteringService {
    async fn is_supported(&self) -> bool {
        true
    }

    async fn has_credential(&self, _sdk_input: &str) -> bool {
        self.registered.load(Ordering::SeqCst) > 0
    }

    async fn register(&self, _sdk_input: &str) -> Result<String, CapabilityError> {
        self.registered.fetch_add(1, Ordering::SeqCst);
        Ok("da-registration-output".to_string())
    }

    async fn authenticate(&self, _sdk_input: &str) -> Result<String, CapabilityError> {
        Ok("da-approval-output".to_string())
    }

    async fn remove_credentials(&self) -> Result<(), CapabilityError> {
        self.registered.store(0, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedPresenter {
    answer: PresentationEvent,
    shown: Mutex<Vec<PresentationRequest>>,
}

impl ScriptedPresenter {
    fn new(answer: PresentationEvent) -> Arc<Self> {
        Arc::new(Self {
            answer,
            shown: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Presenter for ScriptedPresenter {
    async fn present(&self, request: PresentationRequest) -> PresentationEvent {
        let waiting_screen = matches!(
            request,
            PresentationRequest::Await { .. } | PresentationRequest::QrCode { .. }
        );
        self.shown.lock().unwrap().push(request);
        if waiting_screen {
            // waiting screens stay up until polling finishes
            std::future::pending::<()>().await;
        }
        self.answer
    }

    async fn dismiss(&self) {}
}

/// Records every prompt and never answers.
#[derive(Default)]
struct SilentPresenter {
    shown: Mutex<Vec<PresentationRequest>>,
}

#[async_trait]
impl Presenter for SilentPresenter {
    async fn present(&self, request: PresentationRequest) -> PresentationEvent {
        self.shown.lock().unwrap().push(request);
        std::future::pending().await
    }

    async fn dismiss(&self) {}
}

fn fingerprint_token(with_delegated_input: bool) -> String {
    let mut token = json!({
        "directoryServerId": "F013371337",
        "directoryServerPublicKey": "eyJrdHkiOiJSU0EifQ",
        "threeDSMessageVersion": "2.2.0"
    });
    if with_delegated_input {
        token["delegatedAuthenticationSDKInput"] = json!("da-input");
    }
    encode_base64_json(&token).unwrap()
}

fn challenge_token(with_delegated_input: bool) -> String {
    let mut token = json!({
        "acsReferenceNumber": "ADYEN-ACS-SIMULATOR",
        "acsSignedContent": "eyJhbGciOiJQUzI1NiJ9",
        "acsTransID": "a91b2bbf-f6c0-4e51-9a09-0b4dd6b5a2ee",
        "acsURL": "https://acs.example.com/challenge",
        "messageVersion": "2.2.0",
        "threeDSServerTransID": "8f2b4f3e-2d7e-4a10-8f3b-5c6a0a7d8e9f"
    });
    if with_delegated_input {
        token["delegatedAuthenticationSDKInput"] = json!("da-input");
    }
    encode_base64_json(&token).unwrap()
}

async fn wait_until(condition: impl Fn() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[test]
fn test_redirect_decode_encode_is_lossless() {
    let raw = json!({
        "type": "redirect",
        "url": "https://bank.example.com/auth?session=1&step=2",
        "paymentData": "Ab02b4c0!BQABAgA="
    });

    let action = assert_ok!(Action::decode(&raw));
    let encoded = assert_ok!(action.encode());
    assert_eq!(encoded["url"], raw["url"]);
    assert_eq!(encoded["paymentData"], raw["paymentData"]);
    assert_eq!(assert_ok!(Action::decode(&encoded)), action);
}

#[test]
fn test_unrecognized_redirect_type_is_browser_redirect() {
    let redirect: RedirectAction = serde_json::from_value(json!({
        "type": "appSwitch",
        "url": "https://bank.example.com/auth"
    }))
    .unwrap();
    assert_eq!(redirect.redirect_type, RedirectType::Redirect);
}

#[test]
fn test_decode_errors_name_the_problem() {
    let err = assert_err!(Action::decode(&json!({"type": "redirect"})));
    assert!(err.to_string().contains("url"));

    let err = assert_err!(Action::decode(&json!({"type": "giftcard"})));
    assert!(matches!(err, ActionError::UnknownActionType(ref t) if t == "giftcard"));
}

#[tokio::test]
async fn test_redirect_round_trip() {
    init_tracing();
    let opener = Arc::new(RecordingOpener::default());
    let submitter = Arc::new(RecordingSubmitter::default());
    let component = Arc::new(
        ActionComponent::builder(config())
            .redirect_opener(opener.clone())
            .outcome_submitter(submitter.clone())
            .build()
            .unwrap(),
    );

    let running = {
        let component = component.clone();
        tokio::spawn(async move {
            component
                .handle_json(&json!({
                    "type": "redirect",
                    "url": "https://bank.example.com/auth",
                    "paymentData": "pd-redirect"
                }))
                .await
        })
    };
    wait_until(|| component.has_pending_redirect()).await;
    assert_eq!(opener.count(), 1);

    let callback = Url::parse("myshop://checkout?redirectResult=X6XtfGC3%21Y").unwrap();
    let resumed = component.resume(&callback).await;
    assert!(matches!(resumed, ResumeOutcome::Handled(_)));

    let outcome = assert_ok!(running.await.unwrap());
    let request = outcome.submission().unwrap();
    assert_eq!(request.details["redirectResult"], "X6XtfGC3!Y");
    assert_eq!(request.payment_data.as_deref(), Some("pd-redirect"));
    assert!(!component.has_pending_redirect());
    assert_eq!(submitter.outcomes.lock().unwrap().as_slice(), &[outcome]);
}

#[tokio::test]
async fn test_dispatch_while_busy_is_rejected() {
    init_tracing();
    let component = Arc::new(
        ActionComponent::builder(config())
            .redirect_opener(Arc::new(RecordingOpener::default()))
            .payment_status_provider(Arc::new(StatusAfter::new(0)))
            .build()
            .unwrap(),
    );

    let running = {
        let component = component.clone();
        tokio::spawn(async move {
            component
                .handle_json(&json!({"type": "redirect", "url": "https://bank.example.com"}))
                .await
        })
    };
    wait_until(|| component.has_pending_redirect()).await;

    let second = component
        .handle_json(&json!({"type": "await", "paymentMethodType": "mbway", "paymentData": "pd"}))
        .await;
    let err = assert_err!(second);
    assert_eq!(err.kind(), FailureKind::ConcurrentActionError);
    assert!(component.has_pending_redirect());

    assert!(component.cancel());
    let outcome = assert_ok!(running.await.unwrap());
    assert_eq!(outcome.failure_kind(), Some(FailureKind::UserCancelled));
    assert!(!component.has_pending_redirect());
}

#[tokio::test]
async fn test_undecodable_payload_while_busy_is_rejected() {
    init_tracing();
    let submitter = Arc::new(RecordingSubmitter::default());
    let component = Arc::new(
        ActionComponent::builder(config())
            .redirect_opener(Arc::new(RecordingOpener::default()))
            .outcome_submitter(submitter.clone())
            .build()
            .unwrap(),
    );

    let running = {
        let component = component.clone();
        tokio::spawn(async move {
            component
                .handle_json(&json!({"type": "redirect", "url": "https://bank.example.com"}))
                .await
        })
    };
    wait_until(|| component.has_pending_redirect()).await;

    let err = assert_err!(component.handle_json(&json!({"type": "giftcard"})).await);
    assert_eq!(err.kind(), FailureKind::ConcurrentActionError);
    assert!(submitter.outcomes.lock().unwrap().is_empty());
    assert!(component.has_pending_redirect());

    let callback = Url::parse("myshop://checkout?redirectResult=abc").unwrap();
    assert!(matches!(component.resume(&callback).await, ResumeOutcome::Handled(_)));
    let outcome = assert_ok!(running.await.unwrap());
    assert_eq!(submitter.outcomes.lock().unwrap().as_slice(), &[outcome]);
}

#[tokio::test]
async fn test_second_redirect_rejected_before_hand_off() {
    init_tracing();
    let opener = Arc::new(RecordingOpener::default());
    let orchestrator = Arc::new(RedirectOrchestrator::new(
        opener.clone(),
        Url::parse("myshop://checkout").unwrap(),
    ));
    let action = RedirectAction::new(Url::parse("https://bank.example.com").unwrap(), None);

    let first = {
        let orchestrator = orchestrator.clone();
        let action = action.clone();
        tokio::spawn(async move { orchestrator.redirect(&action, &ActionContext::new()).await })
    };
    wait_until(|| orchestrator.has_pending()).await;

    let second = orchestrator.redirect(&action, &ActionContext::new()).await;
    assert_eq!(second.failure_kind(), Some(FailureKind::ConcurrentRedirect));
    assert_eq!(opener.count(), 1);

    first.abort();
}

#[tokio::test]
async fn test_foreign_callback_leaves_pending_redirect() {
    init_tracing();
    let component = Arc::new(
        ActionComponent::builder(config())
            .redirect_opener(Arc::new(RecordingOpener::default()))
            .build()
            .unwrap(),
    );
    let running = {
        let component = component.clone();
        tokio::spawn(async move {
            component
                .handle_json(&json!({"type": "redirect", "url": "https://bank.example.com", "paymentData": "pd"}))
                .await
        })
    };
    wait_until(|| component.has_pending_redirect()).await;

    let foreign = Url::parse("https://shop.example.com/checkout?redirectResult=abc").unwrap();
    assert!(matches!(component.resume(&foreign).await, ResumeOutcome::NotMine));
    assert!(component.has_pending_redirect());

    let ours = Url::parse("myshop://checkout?payload=p").unwrap();
    assert!(matches!(component.resume(&ours).await, ResumeOutcome::Handled(_)));
    let outcome = assert_ok!(running.await.unwrap());
    assert_eq!(outcome.submission().unwrap().details["payload"], "p");
}

#[tokio::test]
async fn test_relaunch_loses_pending_redirect() {
    init_tracing();
    // A fresh instance stands in for the relaunched process.
    let component = ActionComponent::builder(config())
        .redirect_opener(Arc::new(RecordingOpener::default()))
        .build()
        .unwrap();

    let callback = Url::parse("myshop://checkout?redirectResult=abc").unwrap();
    assert!(matches!(component.resume(&callback).await, ResumeOutcome::Lost));
}

#[tokio::test]
async fn test_fingerprint_only_flow() {
    init_tracing();
    let component = ActionComponent::builder(config())
        .three_ds2_service(FakeThreeDS2::new("Y"))
        .build()
        .unwrap();

    let outcome = assert_ok!(
        component
            .handle_json(&json!({
                "type": "threeDS2Fingerprint",
                "token": fingerprint_token(false),
                "paymentData": "pd-3ds"
            }))
            .await
    );

    let request = outcome.submission().unwrap();
    assert_eq!(request.payment_data.as_deref(), Some("pd-3ds"));
    let fingerprint = request.details[FINGERPRINT_KEY].as_str().unwrap();
    let payload: FingerprintPayload = decode_base64_json(fingerprint).unwrap();
    assert_eq!(payload.sdk_enc_data, "device-for-F013371337");
    assert_eq!(payload.sdk_ephemeral_public_key["crv"], "P-256");
    assert_eq!(payload.message_version.as_deref(), Some("2.2.0"));
}

#[tokio::test]
async fn test_parked_session_ends_with_next_action() {
    init_tracing();
    let service = FakeThreeDS2::new("Y");
    let component = ActionComponent::builder(config())
        .three_ds2_service(service.clone())
        .payment_status_provider(Arc::new(StatusAfter::new(0)))
        .build()
        .unwrap();

    assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Fingerprint", "token": fingerprint_token(false), "paymentData": "pd-1"}))
            .await
    );
    assert_eq!(component.three_ds2_phase(), Some(ThreeDS2Phase::AwaitingChallenge));

    // the backend answered the fingerprint with a final result; the next payment starts
    assert_ok!(
        component
            .handle_json(&json!({"type": "await", "paymentMethodType": "mbway", "paymentData": "pd-await"}))
            .await
    );
    assert_eq!(component.three_ds2_phase(), Some(ThreeDS2Phase::Idle));

    let outcome = assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Challenge", "token": challenge_token(false), "paymentData": "pd-2"}))
            .await
    );
    assert_eq!(outcome.failure_kind(), Some(FailureKind::RelaunchLostState));
    assert_eq!(service.challenges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_releases_parked_session() {
    init_tracing();
    let component = ActionComponent::builder(config())
        .three_ds2_service(FakeThreeDS2::new("Y"))
        .build()
        .unwrap();

    assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Fingerprint", "token": fingerprint_token(false)}))
            .await
    );
    assert!(component.cancel());
    assert_eq!(component.three_ds2_phase(), Some(ThreeDS2Phase::Idle));
    assert!(!component.cancel());
}

#[tokio::test]
async fn test_cancel_during_challenge() {
    init_tracing();
    let service = Arc::new(StalledChallenge::default());
    let component = Arc::new(
        ActionComponent::builder(config())
            .three_ds2_service(service.clone())
            .build()
            .unwrap(),
    );

    assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Fingerprint", "token": fingerprint_token(false)}))
            .await
    );
    let running = {
        let component = component.clone();
        tokio::spawn(async move {
            component
                .handle_json(&json!({"type": "threeDS2Challenge", "token": challenge_token(false)}))
                .await
        })
    };
    wait_until(|| service.challenging.load(Ordering::SeqCst)).await;
    assert_eq!(component.three_ds2_phase(), Some(ThreeDS2Phase::Challenging));

    assert!(component.cancel());
    let outcome = assert_ok!(running.await.unwrap());
    assert_eq!(
        outcome,
        NormalizedOutcome::Cancelled {
            handler: "threeDS2".to_string()
        }
    );
    assert_eq!(component.three_ds2_phase(), Some(ThreeDS2Phase::Idle));
}

#[tokio::test]
async fn test_cancel_during_registration_prompt() {
    init_tracing();
    let service = FakeThreeDS2::new("Y");
    let delegated = Arc::new(RegisteringService {
        registered: AtomicUsize::new(0),
    });
    let presenter = Arc::new(SilentPresenter::default());
    let component = Arc::new(
        ActionComponent::builder(config())
            .three_ds2_service(service.clone())
            .delegated_authentication(delegated.clone())
            .presenter(presenter.clone())
            .build()
            .unwrap(),
    );

    assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Fingerprint", "token": fingerprint_token(true)}))
            .await
    );
    let running = {
        let component = component.clone();
        tokio::spawn(async move {
            component
                .handle_json(&json!({"type": "threeDS2Challenge", "token": challenge_token(true)}))
                .await
        })
    };
    wait_until(|| !presenter.shown.lock().unwrap().is_empty()).await;

    assert!(component.cancel());
    let outcome = assert_ok!(running.await.unwrap());
    assert_eq!(outcome.failure_kind(), Some(FailureKind::UserCancelled));
    assert_eq!(component.three_ds2_phase(), Some(ThreeDS2Phase::Idle));
    assert_eq!(delegated.registered.load(Ordering::SeqCst), 0);
    assert_eq!(service.challenges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_classic_challenge_flow() {
    init_tracing();
    let component = ActionComponent::builder(config())
        .three_ds2_service(FakeThreeDS2::new("Y"))
        .build()
        .unwrap();

    assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Fingerprint", "token": fingerprint_token(false)}))
            .await
    );
    let outcome = assert_ok!(
        component
            .handle_json(&json!({
                "type": "threeDS2Challenge",
                "token": challenge_token(false),
                "paymentData": "pd-challenge"
            }))
            .await
    );

    let request = outcome.submission().unwrap();
    let encoded = request.details[CHALLENGE_RESULT_KEY].as_str().unwrap();
    let result: ChallengeResultPayload = decode_base64_json(encoded).unwrap();
    assert_eq!(result.transaction_status, "Y");
    assert_eq!(request.payment_data.as_deref(), Some("pd-challenge"));
    assert_eq!(component.three_ds2_phase(), Some(ThreeDS2Phase::Idle));
}

#[tokio::test]
async fn test_non_success_challenge_status_fails() {
    init_tracing();
    let component = ActionComponent::builder(config())
        .three_ds2_service(FakeThreeDS2::new("N"))
        .build()
        .unwrap();

    assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Fingerprint", "token": fingerprint_token(false)}))
            .await
    );
    let outcome = assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Challenge", "token": challenge_token(false)}))
            .await
    );

    let NormalizedOutcome::Failed(failure) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(failure.kind, FailureKind::AuthenticationFailed);
    assert!(failure.message.ends_with('N'));
}

#[tokio::test]
async fn test_challenge_offers_delegated_registration() {
    init_tracing();
    let service = Arc::new(RegisteringService {
        registered: AtomicUsize::new(0),
    });
    let presenter = ScriptedPresenter::new(PresentationEvent::Confirmed);
    let component = ActionComponent::builder(config())
        .three_ds2_service(FakeThreeDS2::new("Y"))
        .delegated_authentication(service.clone())
        .presenter(presenter.clone())
        .build()
        .unwrap();

    assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Fingerprint", "token": fingerprint_token(true)}))
            .await
    );
    // no credential yet, so nothing was offered for approval
    assert!(presenter.shown.lock().unwrap().is_empty());

    let outcome = assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Challenge", "token": challenge_token(true)}))
            .await
    );
    let encoded = outcome.submission().unwrap().details[CHALLENGE_RESULT_KEY]
        .as_str()
        .unwrap()
        .to_string();
    let result: ChallengeResultPayload = decode_base64_json(&encoded).unwrap();
    assert_eq!(
        result.delegated_authentication_output.as_deref(),
        Some("da-registration-output")
    );
    assert_eq!(service.registered.load(Ordering::SeqCst), 1);
    assert!(matches!(
        presenter.shown.lock().unwrap().as_slice(),
        [PresentationRequest::DelegatedAuthenticationRegistration { .. }]
    ));
}

#[tokio::test]
async fn test_failed_challenge_removes_new_credential() {
    init_tracing();
    let service = Arc::new(RegisteringService {
        registered: AtomicUsize::new(0),
    });
    let presenter = ScriptedPresenter::new(PresentationEvent::Confirmed);
    let component = ActionComponent::builder(config())
        .three_ds2_service(FakeThreeDS2::new("N"))
        .delegated_authentication(service.clone())
        .presenter(presenter.clone())
        .build()
        .unwrap();

    assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Fingerprint", "token": fingerprint_token(true)}))
            .await
    );
    let outcome = assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Challenge", "token": challenge_token(true)}))
            .await
    );

    assert_eq!(outcome.failure_kind(), Some(FailureKind::AuthenticationFailed));
    // registration was confirmed, then undone when the challenge failed
    assert!(matches!(
        presenter.shown.lock().unwrap().as_slice(),
        [PresentationRequest::DelegatedAuthenticationRegistration { .. }]
    ));
    assert_eq!(service.registered.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_declined_registration_does_not_fail_challenge() {
    init_tracing();
    let service = Arc::new(RegisteringService {
        registered: AtomicUsize::new(0),
    });
    let component = ActionComponent::builder(config())
        .three_ds2_service(FakeThreeDS2::new("Y"))
        .delegated_authentication(service.clone())
        .presenter(ScriptedPresenter::new(PresentationEvent::Declined))
        .build()
        .unwrap();

    assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Fingerprint", "token": fingerprint_token(true)}))
            .await
    );
    let outcome = assert_ok!(
        component
            .handle_json(&json!({"type": "threeDS2Challenge", "token": challenge_token(true)}))
            .await
    );
    assert!(outcome.submission().is_some());
    assert_eq!(service.registered.load(Ordering::SeqCst), 0);
}

struct ChallengingSubmitter;

#[async_trait]
impl FingerprintSubmitter for ChallengingSubmitter {
    async fn submit_fingerprint(
        &self,
        fingerprint: &str,
        payment_data: Option<&str>,
    ) -> Result<FingerprintSubmission, CapabilityError> {
        let payload: FingerprintPayload =
            decode_base64_json(fingerprint).map_err(|e| CapabilityError::Failed(e.to_string()))?;
        assert_eq!(payload.sdk_app_id, "9063b12c-fcde-43c7-b28e-8d0af5520e8a");
        assert_eq!(payment_data, Some("pd-native"));

        let challenge = Action::decode(&json!({
            "type": "threeDS2",
            "subtype": "challenge",
            "token": challenge_token(false),
            "authorisationToken": "auth-token",
            "paymentData": "pd-native"
        }))
        .map_err(|e| CapabilityError::Failed(e.to_string()))?;
        Ok(FingerprintSubmission::Action(challenge))
    }
}

#[tokio::test]
async fn test_native_flow_runs_follow_up_challenge() {
    init_tracing();
    let service = FakeThreeDS2::new("Y");
    let component = ActionComponent::builder(config())
        .three_ds2_service(service.clone())
        .fingerprint_submitter(Arc::new(ChallengingSubmitter))
        .build()
        .unwrap();

    let outcome = assert_ok!(
        component
            .handle_json(&json!({
                "type": "threeDS2",
                "subtype": "fingerprint",
                "token": fingerprint_token(false),
                "paymentData": "pd-native"
            }))
            .await
    );

    let request = outcome.submission().unwrap();
    let encoded = request.details[THREE_DS_RESULT_KEY].as_str().unwrap();
    let result: ChallengeResultPayload = decode_base64_json(encoded).unwrap();
    assert_eq!(result.transaction_status, "Y");
    assert_eq!(result.authorisation_token.as_deref(), Some("auth-token"));
    assert_eq!(service.challenges.load(Ordering::SeqCst), 1);
    assert_eq!(component.three_ds2_phase(), Some(ThreeDS2Phase::Idle));
}

struct StatusAfter {
    pending_polls: usize,
    polls: AtomicUsize,
}

impl StatusAfter {
    fn new(pending_polls: usize) -> Self {
        Self {
            pending_polls,
            polls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentStatusProvider for StatusAfter {
    async fn payment_status(&self, payment_data: &str) -> Result<PaymentStatus, CapabilityError> {
        assert_eq!(payment_data, "pd-await");
        if self.polls.fetch_add(1, Ordering::SeqCst) < self.pending_polls {
            return Ok(PaymentStatus {
                result_code: PaymentResultCode::Pending,
                payload: None,
            });
        }
        Ok(PaymentStatus {
            result_code: PaymentResultCode::Authorised,
            payload: Some("await-payload".to_string()),
        })
    }
}

#[tokio::test]
async fn test_await_polls_until_final() {
    init_tracing();
    let presenter = ScriptedPresenter::new(PresentationEvent::Dismissed);
    let component = ActionComponent::builder(config())
        .payment_status_provider(Arc::new(StatusAfter::new(3)))
        .presenter(presenter.clone())
        .build()
        .unwrap();

    let outcome = assert_ok!(
        component
            .handle_json(&json!({
                "type": "await",
                "paymentMethodType": "mbway",
                "paymentData": "pd-await"
            }))
            .await
    );

    let request = outcome.submission().unwrap();
    assert_eq!(request.details["payload"], "await-payload");
    assert_eq!(request.payment_data.as_deref(), Some("pd-await"));
    assert!(matches!(
        presenter.shown.lock().unwrap().as_slice(),
        [PresentationRequest::Await { payment_method_type }] if payment_method_type == "mbway"
    ));
}

#[tokio::test]
async fn test_unsupported_action_is_delivered() {
    init_tracing();
    let submitter = Arc::new(RecordingSubmitter::default());
    let component = ActionComponent::builder(config())
        .outcome_submitter(submitter.clone())
        .build()
        .unwrap();

    let outcome = assert_ok!(
        component
            .handle_json(&json!({"type": "sdk", "paymentMethodType": "twint", "sdkData": {}}))
            .await
    );
    assert_eq!(outcome.failure_kind(), Some(FailureKind::UnsupportedAction));
    assert_eq!(submitter.outcomes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_decode_failure_is_delivered() {
    init_tracing();
    let submitter = Arc::new(RecordingSubmitter::default());
    let component = ActionComponent::builder(config())
        .outcome_submitter(submitter.clone())
        .build()
        .unwrap();

    let outcome = assert_ok!(component.handle_json(&json!({"type": "threeDS2Fingerprint"})).await);
    let NormalizedOutcome::Failed(failure) = &outcome else {
        panic!("expected failure");
    };
    assert_eq!(failure.kind, FailureKind::DecodeError);
    assert!(!failure.recoverable);
    assert_eq!(submitter.outcomes.lock().unwrap().as_slice(), &[outcome]);
}

#[test]
fn test_outcome_wire_format() {
    let mut details = Map::new();
    details.insert("redirectResult".to_string(), Value::from("abc"));
    let outcome = NormalizedOutcome::Submit(checkout_actions::PaymentDetailsRequest {
        details,
        payment_data: Some("pd".to_string()),
    });
    assert_eq!(
        serde_json::to_value(&outcome).unwrap(),
        json!({"outcome": "submit", "details": {"redirectResult": "abc"}, "paymentData": "pd"})
    );
}
