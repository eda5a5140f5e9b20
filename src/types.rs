//! Core type definitions for server-issued actions.
//!
//! This module contains the closed [`Action`] model decoded from the payment backend's
//! response, together with the 3DS2 token formats carried inside those actions and the
//! payloads produced from them.

use crate::errors::{ActionError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use url::Url;

/// Transaction status reported by a successful 3DS2 challenge.
pub const TRANSACTION_STATUS_SUCCESS: &str = "Y";

/// A server-issued instruction describing the flow the client must run next.
///
/// Exactly one variant is populated; actions are immutable once decoded.
///
/// # Examples
///
/// ```
/// use checkout_actions::types::{Action, RedirectType};
/// use serde_json::json;
///
/// let action = Action::decode(&json!({
///     "type": "redirect",
///     "url": "https://bank.example.com/auth",
///     "paymentData": "Ab02b4c0"
/// })).unwrap();
///
/// match action {
///     Action::Redirect(redirect) => assert_eq!(redirect.redirect_type, RedirectType::Redirect),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Browser or app-to-app redirect
    Redirect(RedirectAction),
    /// 3DS2 device fingerprinting
    ThreeDS2Fingerprint(ThreeDS2FingerprintAction),
    /// 3DS2 interactive challenge
    ThreeDS2Challenge(ThreeDS2ChallengeAction),
    /// Standalone delegated-authentication registration
    DelegatedAuthenticationRegistration(DelegatedAuthenticationAction),
    /// Wait for an asynchronous confirmation (e.g. banking app approval)
    Await(AwaitAction),
    /// Show a QR code and wait for confirmation
    QrCode(QrCodeAction),
    /// Hand off to a payment-method specific native SDK
    Sdk(SdkAction),
}

impl Action {
    /// Decodes an action from the opaque JSON payload returned by the backend.
    ///
    /// The `type` field selects the variant. Missing required fields fail with an error
    /// naming the field; an unknown `type` fails with [`ActionError::UnknownActionType`].
    pub fn decode(raw: &Value) -> Result<Action> {
        let object = raw.as_object().ok_or_else(|| ActionError::Decode {
            action: "unknown".to_string(),
            reason: "payload is not a JSON object".to_string(),
        })?;

        let action_type = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::MissingField("type".to_string()))?;

        match action_type {
            "redirect" | "nativeRedirect" => Ok(Action::Redirect(decode_variant(raw, action_type)?)),
            "threeDS2Fingerprint" => {
                let action: ThreeDS2FingerprintAction = decode_variant(raw, action_type)?;
                Ok(Action::ThreeDS2Fingerprint(ThreeDS2FingerprintAction {
                    flow: ThreeDS2Flow::Classic,
                    ..action
                }))
            }
            "threeDS2Challenge" => {
                let action: ThreeDS2ChallengeAction = decode_variant(raw, action_type)?;
                Ok(Action::ThreeDS2Challenge(ThreeDS2ChallengeAction {
                    flow: ThreeDS2Flow::Classic,
                    ..action
                }))
            }
            "threeDS2" => match object.get("subtype").and_then(Value::as_str) {
                Some("fingerprint") => {
                    let action: ThreeDS2FingerprintAction = decode_variant(raw, action_type)?;
                    Ok(Action::ThreeDS2Fingerprint(ThreeDS2FingerprintAction {
                        flow: ThreeDS2Flow::Native,
                        ..action
                    }))
                }
                Some("challenge") => {
                    let action: ThreeDS2ChallengeAction = decode_variant(raw, action_type)?;
                    Ok(Action::ThreeDS2Challenge(ThreeDS2ChallengeAction {
                        flow: ThreeDS2Flow::Native,
                        ..action
                    }))
                }
                other => Err(ActionError::Decode {
                    action: action_type.to_string(),
                    reason: format!("unknown subtype {:?}", other),
                }),
            },
            "delegatedAuthentication" => Ok(Action::DelegatedAuthenticationRegistration(
                decode_variant(raw, action_type)?,
            )),
            "await" => Ok(Action::Await(decode_variant(raw, action_type)?)),
            "qrCode" => Ok(Action::QrCode(decode_variant(raw, action_type)?)),
            "sdk" => Ok(Action::Sdk(decode_variant(raw, action_type)?)),
            other => Err(ActionError::UnknownActionType(other.to_string())),
        }
    }

    /// Decodes an action from a JSON string.
    pub fn from_json(json: &str) -> Result<Action> {
        let raw: Value = serde_json::from_str(json)?;
        Action::decode(&raw)
    }

    /// Re-encodes the action into the backend's JSON shape.
    pub fn encode(&self) -> Result<Value> {
        let (mut value, subtype) = match self {
            Action::Redirect(action) => (serde_json::to_value(action)?, None),
            Action::ThreeDS2Fingerprint(action) => (
                serde_json::to_value(action)?,
                (action.flow == ThreeDS2Flow::Native).then_some("fingerprint"),
            ),
            Action::ThreeDS2Challenge(action) => (
                serde_json::to_value(action)?,
                (action.flow == ThreeDS2Flow::Native).then_some("challenge"),
            ),
            Action::DelegatedAuthenticationRegistration(action) => (serde_json::to_value(action)?, None),
            Action::Await(action) => (serde_json::to_value(action)?, None),
            Action::QrCode(action) => (serde_json::to_value(action)?, None),
            Action::Sdk(action) => (serde_json::to_value(action)?, None),
        };

        if let Some(object) = value.as_object_mut() {
            object.insert("type".to_string(), Value::from(self.action_type()));
            if let Some(subtype) = subtype {
                object.insert("subtype".to_string(), Value::from(subtype));
            }
        }

        Ok(value)
    }

    /// The `type` discriminator this action is encoded with.
    pub fn action_type(&self) -> &'static str {
        match self {
            Action::Redirect(action) => action.redirect_type.as_str(),
            Action::ThreeDS2Fingerprint(action) => match action.flow {
                ThreeDS2Flow::Classic => "threeDS2Fingerprint",
                ThreeDS2Flow::Native => "threeDS2",
            },
            Action::ThreeDS2Challenge(action) => match action.flow {
                ThreeDS2Flow::Classic => "threeDS2Challenge",
                ThreeDS2Flow::Native => "threeDS2",
            },
            Action::DelegatedAuthenticationRegistration(_) => "delegatedAuthentication",
            Action::Await(_) => "await",
            Action::QrCode(_) => "qrCode",
            Action::Sdk(_) => "sdk",
        }
    }

    /// The server-issued `paymentData` threaded through this action, if any.
    pub fn payment_data(&self) -> Option<&str> {
        match self {
            Action::Redirect(action) => action.payment_data.as_deref(),
            Action::ThreeDS2Fingerprint(action) => action.payment_data.as_deref(),
            Action::ThreeDS2Challenge(action) => action.payment_data.as_deref(),
            Action::DelegatedAuthenticationRegistration(action) => action.payment_data.as_deref(),
            Action::Await(action) => Some(&action.payment_data),
            Action::QrCode(action) => Some(&action.payment_data),
            Action::Sdk(action) => action.payment_data.as_deref(),
        }
    }
}

fn decode_variant<T: DeserializeOwned>(raw: &Value, action: &str) -> Result<T> {
    serde_json::from_value(raw.clone()).map_err(|e| ActionError::Decode {
        action: action.to_string(),
        reason: e.to_string(),
    })
}

/// Whether a redirect goes through the browser or hands off to another app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectType {
    /// Browser redirect
    #[default]
    Redirect,
    /// App-to-app hand-off
    NativeRedirect,
}

impl RedirectType {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            RedirectType::Redirect => "redirect",
            RedirectType::NativeRedirect => "nativeRedirect",
        }
    }
}

// Any unrecognised or non-string value decodes as a plain redirect.
impl<'de> Deserialize<'de> for RedirectType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value.as_str() {
            Some("nativeRedirect") => RedirectType::NativeRedirect,
            _ => RedirectType::Redirect,
        })
    }
}

impl Serialize for RedirectType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Describes an action in which the user is redirected to a URL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RedirectAction {
    /// The URL to which to redirect the user
    pub url: Url,

    /// Server-generated payment data to submit with the redirect result
    #[serde(rename = "paymentData", default, skip_serializing_if = "Option::is_none")]
    pub payment_data: Option<String>,

    /// Browser redirect or app-to-app hand-off
    #[serde(rename = "type", default)]
    pub redirect_type: RedirectType,

    /// Opaque data exchanged for a redirect result after a native redirect
    #[serde(rename = "nativeRedirectData", default, skip_serializing_if = "Option::is_none")]
    pub native_redirect_data: Option<String>,
}

impl RedirectAction {
    /// Creates a browser redirect action.
    pub fn new(url: Url, payment_data: Option<String>) -> Self {
        Self {
            url,
            payment_data,
            redirect_type: RedirectType::Redirect,
            native_redirect_data: None,
        }
    }
}

/// Which 3DS2 integration produced the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreeDS2Flow {
    /// Separate `threeDS2Fingerprint` / `threeDS2Challenge` actions, each resubmitted
    /// to the merchant backend.
    #[default]
    Classic,
    /// A single `threeDS2` action whose fingerprint is submitted directly and whose
    /// challenge (if any) follows within the same action.
    Native,
}

/// 3DS2 device fingerprinting action.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ThreeDS2FingerprintAction {
    /// Base64 encoded fingerprint token
    pub token: String,

    /// Server-generated payment data
    #[serde(rename = "paymentData", default, skip_serializing_if = "Option::is_none")]
    pub payment_data: Option<String>,

    /// Token authorising the follow-up challenge result (native flow)
    #[serde(rename = "authorisationToken", default, skip_serializing_if = "Option::is_none")]
    pub authorisation_token: Option<String>,

    /// Integration flavour, derived from the `type` discriminator
    #[serde(skip)]
    pub flow: ThreeDS2Flow,
}

/// 3DS2 challenge action.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ThreeDS2ChallengeAction {
    /// Base64 encoded challenge token
    pub token: String,

    /// Server-generated payment data
    #[serde(rename = "paymentData", default, skip_serializing_if = "Option::is_none")]
    pub payment_data: Option<String>,

    /// Token echoed back in the challenge result (native flow)
    #[serde(rename = "authorisationToken", default, skip_serializing_if = "Option::is_none")]
    pub authorisation_token: Option<String>,

    /// Integration flavour, derived from the `type` discriminator
    #[serde(skip)]
    pub flow: ThreeDS2Flow,
}

/// Standalone delegated-authentication registration action.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DelegatedAuthenticationAction {
    /// Opaque SDK input for the delegated-authentication capability
    pub token: String,

    /// Server-generated payment data
    #[serde(rename = "paymentData", default, skip_serializing_if = "Option::is_none")]
    pub payment_data: Option<String>,
}

/// Await action: the shopper confirms the payment elsewhere.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AwaitAction {
    /// Payment method being awaited (e.g. "mbway", "blik")
    #[serde(rename = "paymentMethodType")]
    pub payment_method_type: String,

    /// Server-generated payment data, used to poll the status
    #[serde(rename = "paymentData")]
    pub payment_data: String,
}

/// QR code action: display the code and wait for confirmation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QrCodeAction {
    /// Payment method (e.g. "pix", "promptpay")
    #[serde(rename = "paymentMethodType")]
    pub payment_method_type: String,

    /// Data to render as a QR code
    #[serde(rename = "qrCodeData")]
    pub qr_code_data: String,

    /// Server-generated payment data, used to poll the status
    #[serde(rename = "paymentData")]
    pub payment_data: String,

    /// Optional deep link equivalent of the QR code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
}

/// Action handled by a payment-method specific native SDK.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SdkAction {
    /// Payment method whose SDK must be launched (e.g. "wechatpaySDK", "twint")
    #[serde(rename = "paymentMethodType")]
    pub payment_method_type: String,

    /// SDK specific data
    #[serde(rename = "sdkData", default)]
    pub sdk_data: Value,

    /// Server-generated payment data
    #[serde(rename = "paymentData", default, skip_serializing_if = "Option::is_none")]
    pub payment_data: Option<String>,
}

/// Decoded content of a 3DS2 fingerprint token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FingerprintToken {
    /// Directory server identifier
    #[serde(rename = "directoryServerId")]
    pub directory_server_id: String,

    /// Directory server public key
    #[serde(rename = "directoryServerPublicKey")]
    pub directory_server_public_key: String,

    /// Directory server root certificates
    #[serde(rename = "directoryServerRootCertificates", default, skip_serializing_if = "Option::is_none")]
    pub directory_server_root_certificates: Option<String>,

    /// 3DS message version requested by the server
    #[serde(rename = "threeDSMessageVersion", default, skip_serializing_if = "Option::is_none")]
    pub message_version: Option<String>,

    /// 3DS server transaction identifier
    #[serde(rename = "threeDSServerTransID", default, skip_serializing_if = "Option::is_none")]
    pub server_transaction_id: Option<String>,

    /// Present when a delegated-authentication credential may be approved
    #[serde(rename = "delegatedAuthenticationSDKInput", default, skip_serializing_if = "Option::is_none")]
    pub delegated_authentication_input: Option<String>,
}

/// Decoded content of a 3DS2 challenge token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChallengeToken {
    /// ACS reference number
    #[serde(rename = "acsReferenceNumber")]
    pub acs_reference_number: String,

    /// ACS signed content
    #[serde(rename = "acsSignedContent")]
    pub acs_signed_content: String,

    /// ACS transaction identifier
    #[serde(rename = "acsTransID")]
    pub acs_transaction_id: String,

    /// ACS URL
    #[serde(rename = "acsURL", default, skip_serializing_if = "Option::is_none")]
    pub acs_url: Option<String>,

    /// 3DS message version
    #[serde(rename = "messageVersion")]
    pub message_version: String,

    /// 3DS server transaction identifier
    #[serde(rename = "threeDSServerTransID")]
    pub server_transaction_id: String,

    /// App URL for out-of-band app switching
    #[serde(rename = "threeDSRequestorAppURL", default, skip_serializing_if = "Option::is_none")]
    pub requestor_app_url: Option<String>,

    /// Present when the device may register a delegated-authentication credential
    #[serde(rename = "delegatedAuthenticationSDKInput", default, skip_serializing_if = "Option::is_none")]
    pub delegated_authentication_input: Option<String>,
}

/// Fingerprint produced for the backend, Base64 encoded before submission.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FingerprintPayload {
    /// Encrypted device information
    #[serde(rename = "sdkEncData")]
    pub sdk_enc_data: String,

    /// SDK application identifier
    #[serde(rename = "sdkAppID")]
    pub sdk_app_id: String,

    /// SDK transaction identifier
    #[serde(rename = "sdkTransID")]
    pub sdk_transaction_id: String,

    /// SDK reference number
    #[serde(rename = "sdkReferenceNumber")]
    pub sdk_reference_number: String,

    /// Ephemeral public key as a JWK object
    #[serde(rename = "sdkEphemPubKey")]
    pub sdk_ephemeral_public_key: Value,

    /// Negotiated message version
    #[serde(rename = "messageVersion", default, skip_serializing_if = "Option::is_none")]
    pub message_version: Option<String>,

    /// Delegated-authentication approval output
    #[serde(rename = "delegatedAuthenticationSDKOutput", default, skip_serializing_if = "Option::is_none")]
    pub delegated_authentication_output: Option<String>,
}

/// Challenge result produced for the backend, Base64 encoded before submission.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChallengeResultPayload {
    /// 3DS transaction status
    #[serde(rename = "transStatus")]
    pub transaction_status: String,

    /// Authorisation token echoed back (native flow)
    #[serde(rename = "authorisationToken", default, skip_serializing_if = "Option::is_none")]
    pub authorisation_token: Option<String>,

    /// Delegated-authentication registration output
    #[serde(rename = "delegatedAuthenticationSDKOutput", default, skip_serializing_if = "Option::is_none")]
    pub delegated_authentication_output: Option<String>,
}
