//! Example redirect flow.
//!
//! This example runs a redirect action end-to-end: the action is decoded and dispatched,
//! the "browser" is opened through a console opener, and a simulated return URL resumes
//! the flow and produces the payment-details request.
//!
//! Run with:
//! ```bash
//! cargo run --example redirect_flow
//! ```
//!
//! Environment variables:
//! - RETURN_URL: URL the shopper returns to (default: myshop://checkout)

use anyhow::Context;
use async_trait::async_trait;
use checkout_actions::capabilities::{CapabilityError, RedirectOpener};
use checkout_actions::{ActionComponent, ActionComponentConfig, NormalizedOutcome, OutcomeSubmitter, ResumeOutcome};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Prints the URL instead of opening a browser.
struct ConsoleOpener;

#[async_trait]
impl RedirectOpener for ConsoleOpener {
    async fn open_url(&self, url: &Url) -> Result<(), CapabilityError> {
        println!("🌐 Opening browser at {}", url);
        Ok(())
    }

    async fn open_app(&self, url: &Url) -> Result<bool, CapabilityError> {
        println!("📱 No app installed for {}", url);
        Ok(false)
    }
}

/// Prints the request that would be sent to the payment-details endpoint.
struct ConsoleSubmitter;

#[async_trait]
impl OutcomeSubmitter for ConsoleSubmitter {
    async fn deliver(&self, outcome: &NormalizedOutcome) {
        match serde_json::to_string_pretty(outcome) {
            Ok(body) => println!("📤 Outcome:\n{}", body),
            Err(e) => eprintln!("❌ Could not serialize outcome: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let return_url = std::env::var("RETURN_URL").unwrap_or_else(|_| "myshop://checkout".to_string());
    let config = ActionComponentConfig::new(Url::parse(&return_url).context("invalid RETURN_URL")?);

    let component = Arc::new(
        ActionComponent::builder(config)
            .redirect_opener(Arc::new(ConsoleOpener))
            .outcome_submitter(Arc::new(ConsoleSubmitter))
            .build()?,
    );

    println!("🚀 Handling redirect action");
    let running = {
        let component = component.clone();
        tokio::spawn(async move {
            component
                .handle_json(&json!({
                    "type": "redirect",
                    "url": "https://checkoutshopper-test.example.com/threeds2/redirect?MD=M2RzMg%3D%3D",
                    "paymentData": "Ab02b4c0!BQABAgCW5sxB4e"
                }))
                .await
        })
    };

    // Simulate the shopper coming back from the bank a little later.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut callback = Url::parse(&return_url)?;
    callback.set_query(Some("redirectResult=X6XtfGC3%21Y6B8"));

    match component.resume(&callback).await {
        ResumeOutcome::Handled(_) => println!("✅ Callback handled"),
        ResumeOutcome::NotMine => println!("↪️  Callback belongs to someone else"),
        ResumeOutcome::Lost => println!("⚠️  Callback arrived with no pending redirect"),
    }

    let outcome = running.await??;
    if let Some(request) = outcome.submission() {
        println!("💳 Submit details: {}", serde_json::to_string(request)?);
    }

    Ok(())
}
