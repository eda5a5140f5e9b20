//! # checkout-actions
//!
//! The action orchestration core of a client-side payment SDK.
//!
//! When a payment needs more than a single request (a bank redirect, a 3DS2 device
//! fingerprint or challenge, an app-to-app hand-off, a QR code), the payment backend
//! answers with an *action*. This crate decodes the action, routes it to the handler that
//! owns that flow, drives the flow through injected platform capabilities, and produces a
//! normalized outcome: details to resubmit to the backend, or a classified failure.
//!
//! ## Features
//!
//! - **Action model**: closed [`types::Action`] model decoded from the backend's JSON
//! - **Dispatcher**: one action in flight, unique handler per action, explicit cancellation
//! - **3DS2**: classic and native flows with optional delegated authentication
//! - **Redirects**: browser and app-to-app redirects resumed from a callback URL
//! - **Await / QR / SDK**: polling handlers and payment-method SDK hand-off
//! - **Injectable**: every platform dependency is an async trait in [`capabilities`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use checkout_actions::component::ActionComponent;
//! use checkout_actions::config::ActionComponentConfig;
//! use checkout_actions::handlers::redirect::ResumeOutcome;
//! use std::sync::Arc;
//! use url::Url;
//!
//! # async fn example(opener: Arc<dyn checkout_actions::capabilities::RedirectOpener>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ActionComponentConfig::new(Url::parse("myshop://checkout")?);
//! let component = Arc::new(
//!     ActionComponent::builder(config)
//!         .redirect_opener(opener)
//!         .build()?,
//! );
//!
//! let running = {
//!     let component = component.clone();
//!     tokio::spawn(async move {
//!         component
//!             .handle_json(&serde_json::json!({
//!                 "type": "redirect",
//!                 "url": "https://bank.example.com/auth",
//!                 "paymentData": "Ab02b4c0"
//!             }))
//!             .await
//!     })
//! };
//!
//! // Later, when the operating system hands the return URL to the app:
//! let url = Url::parse("myshop://checkout?redirectResult=X6Xtf")?;
//! if let ResumeOutcome::NotMine = component.resume(&url).await {
//!     // route the URL elsewhere
//! }
//! let outcome = running.await??;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Action Flow
//!
//! 1. **Decode**: the raw payload becomes an [`types::Action`] or a decode failure
//! 2. **Dispatch**: the dispatcher selects the unique handler that accepts the action
//! 3. **Handle**: the handler drives its flow, suspending on prompts and callbacks
//! 4. **Reconcile**: the handler result becomes a [`reconciler::NormalizedOutcome`]
//! 5. **Deliver**: the outcome is handed to the configured outcome submitter
//!
//! In-memory state (a pending redirect, a parked 3DS2 session) does not survive a process
//! relaunch; a callback that arrives afterwards is reported as lost rather than resumed.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod capabilities;
pub mod component;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod handlers;
pub mod reconciler;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use component::{ActionComponent, ActionComponentBuilder};
pub use config::ActionComponentConfig;
pub use errors::{ActionError, FailureKind, Result};
pub use handlers::redirect::ResumeOutcome;
pub use handlers::{ActionContext, ActionDetails, ActionHandler, HandlerResult};
pub use reconciler::{ActionFailure, NormalizedOutcome, OutcomeSubmitter, PaymentDetailsRequest};
pub use types::{Action, RedirectAction, RedirectType, TRANSACTION_STATUS_SUCCESS};
