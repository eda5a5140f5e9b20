//! Error types for the checkout-actions library.
//!
//! This module defines every error that can occur while decoding or resolving an
//! action, plus the [`FailureKind`] taxonomy reported across the outbound boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for action handling.
#[derive(Error, Debug)]
pub enum ActionError {
    /// Error during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error during Base64 encoding/decoding
    #[error("Base64 error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// Error parsing URL
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// The action payload could not be decoded into the named action kind
    #[error("Invalid {action} action: {reason}")]
    Decode {
        /// Action type being decoded
        action: String,
        /// What was wrong, naming the offending field when known
        reason: String,
    },

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// The `type` discriminator names no known action
    #[error("Unknown action type: {0}")]
    UnknownActionType(String),

    /// A 3DS2 or delegated-authentication token was malformed
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// No registered handler accepts the action
    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    /// More than one registered handler accepts the action
    #[error("Ambiguous handlers for {action}: {handlers:?}")]
    AmbiguousHandler {
        /// Action type
        action: String,
        /// Names of every matching handler
        handlers: Vec<String>,
    },

    /// An action was dispatched while another one was still in flight
    #[error("Action already in flight: {0}")]
    ConcurrentAction(String),

    /// A redirect was started while another redirect is pending
    #[error("A redirect is already pending")]
    ConcurrentRedirect,

    /// Failure reported by a native authentication capability
    #[error("Native SDK error: {0}")]
    NativeSdk(String),

    /// The 3DS2 challenge finished with a non-success transaction status
    #[error("Authentication failed with transaction status: {0}")]
    AuthenticationFailed(String),

    /// The user or the caller cancelled the action
    #[error("Cancelled by user")]
    UserCancelled,

    /// A callback arrived with no matching in-memory state
    #[error("No pending state for callback: {0}")]
    RelaunchLostState(String),

    /// The callback URL did not carry a recognised result
    #[error("Invalid redirect URL: {0}")]
    InvalidRedirectUrl(String),

    /// The platform could not open the redirect target
    #[error("Redirect failed: {0}")]
    RedirectFailed(String),

    /// Handing a result to the backend collaborator failed
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    /// A 3DS2 state transition that the state machine does not allow
    #[error("Illegal 3DS2 transition from {from} to {to}")]
    IllegalTransition {
        /// Phase the session was in
        from: String,
        /// Requested phase
        to: String,
    },

    /// Timeout exceeded
    #[error("Timeout exceeded")]
    TimeoutExceeded,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// Result type alias for action handling.
pub type Result<T> = std::result::Result<T, ActionError>;

/// Failure taxonomy reported to the caller after reconciliation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Malformed or missing action field
    DecodeError,
    /// No handler matches the action
    UnsupportedAction,
    /// Handler registry or component misconfiguration
    Configuration,
    /// Dispatch while another action was in flight
    ConcurrentActionError,
    /// Redirect while another redirect was pending
    ConcurrentRedirect,
    /// Native authentication or delegated-authentication failure
    NativeSdkError,
    /// Non-success 3DS2 transaction status
    AuthenticationFailed,
    /// Explicit cancellation
    UserCancelled,
    /// Callback with no matching pending state
    RelaunchLostState,
    /// Await polling exceeded its maximum duration
    Timeout,
    /// A backend collaborator rejected a submission
    SubmissionFailed,
}

impl FailureKind {
    /// Whether re-dispatching a fresh action from the backend can succeed.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            FailureKind::NativeSdkError
                | FailureKind::UserCancelled
                | FailureKind::RelaunchLostState
                | FailureKind::Timeout
                | FailureKind::SubmissionFailed
                | FailureKind::AuthenticationFailed
        )
    }
}

impl ActionError {
    /// Classifies this error into the outbound failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            ActionError::JsonError(_)
            | ActionError::Base64Error(_)
            | ActionError::UrlParseError(_)
            | ActionError::Decode { .. }
            | ActionError::MissingField(_)
            | ActionError::UnknownActionType(_)
            | ActionError::InvalidToken(_)
            | ActionError::InvalidRedirectUrl(_) => FailureKind::DecodeError,
            ActionError::UnsupportedAction(_) => FailureKind::UnsupportedAction,
            ActionError::AmbiguousHandler { .. }
            | ActionError::ConfigError(_)
            | ActionError::IllegalTransition { .. } => FailureKind::Configuration,
            ActionError::ConcurrentAction(_) => FailureKind::ConcurrentActionError,
            ActionError::ConcurrentRedirect => FailureKind::ConcurrentRedirect,
            ActionError::NativeSdk(_) | ActionError::RedirectFailed(_) | ActionError::Other(_) => {
                FailureKind::NativeSdkError
            }
            ActionError::AuthenticationFailed(_) => FailureKind::AuthenticationFailed,
            ActionError::UserCancelled => FailureKind::UserCancelled,
            ActionError::RelaunchLostState(_) => FailureKind::RelaunchLostState,
            ActionError::TimeoutExceeded => FailureKind::Timeout,
            ActionError::SubmissionFailed(_) => FailureKind::SubmissionFailed,
        }
    }
}
