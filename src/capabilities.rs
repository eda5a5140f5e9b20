//! Capability interfaces consumed by the handlers.
//!
//! The core never links a vendor SDK, a UI toolkit or an HTTP client. Everything it needs
//! from the outside world is expressed as one of the traits below and injected when the
//! component is built. Each trait has a single asynchronous completion contract.

use crate::types::{Action, ChallengeToken, FingerprintToken, SdkAction};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Error reported by an injected capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The user closed the native screen
    #[error("cancelled")]
    Cancelled,

    /// The capability is not available on this device
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Any other failure, with the vendor's description
    #[error("{0}")]
    Failed(String),
}

/// Device parameters produced by the native 3DS2 SDK during fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationRequestParameters {
    /// Encrypted device information
    pub device_information: String,
    /// SDK application identifier
    pub sdk_application_identifier: String,
    /// SDK transaction identifier
    pub sdk_transaction_identifier: String,
    /// SDK reference number
    pub sdk_reference_number: String,
    /// Ephemeral public key, JWK encoded as a JSON string
    pub sdk_ephemeral_public_key: String,
    /// Message version negotiated by the SDK
    pub message_version: Option<String>,
}

/// Everything the native 3DS2 SDK needs to run a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeParameters {
    /// Decoded challenge token
    pub token: ChallengeToken,
    /// Transaction identifier created during fingerprinting
    pub sdk_transaction_identifier: String,
    /// App URL for out-of-band app switching
    pub requestor_app_url: Option<Url>,
}

/// Outcome of a native 3DS2 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResult {
    /// 3DS transaction status ("Y" on success)
    pub transaction_status: String,
}

/// Native 3DS2 authentication SDK.
#[async_trait]
pub trait ThreeDS2Service: Send + Sync {
    /// Creates a transaction and returns the device fingerprint.
    async fn create_fingerprint(
        &self,
        token: &FingerprintToken,
    ) -> Result<AuthenticationRequestParameters, CapabilityError>;

    /// Runs the challenge for the transaction created by [`Self::create_fingerprint`].
    ///
    /// The returned future may resolve after an arbitrary delay, including after the
    /// host application was backgrounded.
    async fn handle_challenge(
        &self,
        parameters: &ChallengeParameters,
    ) -> Result<ChallengeResult, CapabilityError>;
}

/// Biometric / device-bound delegated authentication.
#[async_trait]
pub trait DelegatedAuthenticationService: Send + Sync {
    /// Whether the device can hold a delegated-authentication credential.
    async fn is_supported(&self) -> bool;

    /// Whether a credential matching the SDK input is already registered.
    async fn has_credential(&self, sdk_input: &str) -> bool;

    /// Registers a new credential and returns the SDK output for the backend.
    async fn register(&self, sdk_input: &str) -> Result<String, CapabilityError>;

    /// Approves the payment with the registered credential.
    async fn authenticate(&self, sdk_input: &str) -> Result<String, CapabilityError>;

    /// Deletes every registered credential.
    async fn remove_credentials(&self) -> Result<(), CapabilityError>;
}

/// Platform hand-off to an external browser or app.
#[async_trait]
pub trait RedirectOpener: Send + Sync {
    /// Opens the URL in the external browser.
    async fn open_url(&self, url: &Url) -> Result<(), CapabilityError>;

    /// Opens the URL in the app that claims it. Returns `false` when no app does.
    async fn open_app(&self, url: &Url) -> Result<bool, CapabilityError>;
}

/// Data-only description of a screen the UI layer should show.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationRequest {
    /// Offer to register a delegated-authentication credential
    DelegatedAuthenticationRegistration {
        /// Countdown advertised to the user
        countdown: PromptCountdown,
    },
    /// Offer to approve the payment with a registered credential
    DelegatedAuthenticationApproval {
        /// Countdown advertised to the user
        countdown: PromptCountdown,
    },
    /// Waiting screen for an await action
    Await {
        /// Payment method being awaited
        payment_method_type: String,
    },
    /// QR code screen
    QrCode {
        /// Payment method
        payment_method_type: String,
        /// Data to render
        qr_code_data: String,
        /// Deep link equivalent, if any
        url: Option<Url>,
    },
}

/// What the user did with a presented screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationEvent {
    /// Primary button
    Confirmed,
    /// Secondary button ("not now")
    Declined,
    /// The user asked to forget the registered credential
    RemoveCredentials,
    /// The screen was closed without a choice
    Dismissed,
}

/// Countdown shown on a prompt. Owned by the UI; exposed for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptCountdown {
    started_at: Instant,
    duration: Duration,
}

impl PromptCountdown {
    /// Starts a countdown now.
    pub fn start(duration: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            duration,
        }
    }

    /// Total duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time since the prompt was shown.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time left, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.elapsed())
    }
}

/// UI layer.
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Shows the screen and resolves with the user's choice.
    ///
    /// Waiting screens (await, QR) resolve only when the user closes them.
    async fn present(&self, request: PresentationRequest) -> PresentationEvent;

    /// Removes whatever screen is currently shown.
    async fn dismiss(&self);
}

/// Response of the backend to a submitted 3DS2 fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub enum FingerprintSubmission {
    /// Authentication finished; submit these details
    Completed(Map<String, Value>),
    /// The backend requires a further action (challenge or redirect)
    Action(Action),
}

/// Backend call used by the native 3DS2 flow to submit a fingerprint.
#[async_trait]
pub trait FingerprintSubmitter: Send + Sync {
    /// Submits the Base64 fingerprint and returns the backend's follow-up.
    async fn submit_fingerprint(
        &self,
        fingerprint: &str,
        payment_data: Option<&str>,
    ) -> Result<FingerprintSubmission, CapabilityError>;
}

/// Backend call that trades native-redirect data for a redirect result.
#[async_trait]
pub trait RedirectResultExchange: Send + Sync {
    /// Returns the `redirectResult` value for the given native redirect.
    async fn exchange(
        &self,
        native_redirect_data: &str,
        query: &str,
    ) -> Result<String, CapabilityError>;
}

/// Result code reported by the payment status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentResultCode {
    /// Keep polling
    Pending,
    /// Received, final for the purpose of polling
    Received,
    /// Authorised
    Authorised,
    /// Refused
    Refused,
    /// Cancelled by the shopper
    Cancelled,
    /// Any other final code
    Error,
}

impl PaymentResultCode {
    /// Whether polling should stop.
    pub fn is_final(self) -> bool {
        !matches!(self, PaymentResultCode::Pending)
    }
}

/// Status returned by a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentStatus {
    /// Result code
    pub result_code: PaymentResultCode,
    /// Opaque payload to submit once the status is final
    pub payload: Option<String>,
}

/// Backend call used by await and QR actions.
#[async_trait]
pub trait PaymentStatusProvider: Send + Sync {
    /// Fetches the current status for the payment.
    async fn payment_status(&self, payment_data: &str) -> Result<PaymentStatus, CapabilityError>;
}

/// Adapter around a payment-method specific native SDK.
#[async_trait]
pub trait SdkLauncher: Send + Sync {
    /// Whether this launcher drives the given payment method.
    fn supports(&self, payment_method_type: &str) -> bool;

    /// Launches the SDK and returns the details to submit.
    async fn launch(&self, action: &SdkAction) -> Result<Map<String, Value>, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown() {
        let countdown = PromptCountdown::start(Duration::from_secs(60));
        assert_eq!(countdown.duration(), Duration::from_secs(60));
        assert!(countdown.remaining() <= Duration::from_secs(60));
        assert!(countdown.elapsed() < Duration::from_secs(60));

        let expired = PromptCountdown::start(Duration::ZERO);
        assert_eq!(expired.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_result_code_final() {
        assert!(!PaymentResultCode::Pending.is_final());
        assert!(PaymentResultCode::Authorised.is_final());
        assert!(PaymentResultCode::Refused.is_final());
    }

    #[test]
    fn test_challenge_parameters_compare() {
        fn assert_eq_impl<T: Eq>(_: &T) {}

        let token: ChallengeToken = serde_json::from_value(serde_json::json!({
            "acsReferenceNumber": "ADYEN-ACS-SIMULATOR",
            "acsSignedContent": "eyJhbGciOiJQUzI1NiJ9",
            "acsTransID": "a91b2bbf",
            "messageVersion": "2.2.0",
            "threeDSServerTransID": "8f2b4f3e"
        }))
        .unwrap();
        let parameters = ChallengeParameters {
            token,
            sdk_transaction_identifier: "b60c9879".to_string(),
            requestor_app_url: None,
        };
        assert_eq_impl(&parameters);

        let mut other = parameters.clone();
        assert_eq!(parameters, other);
        other.token.acs_transaction_id = "another".to_string();
        assert_ne!(parameters, other);
    }
}
