//! Payment-method specific native SDK actions.

use crate::capabilities::{CapabilityError, SdkLauncher};
use crate::errors::ActionError;
use crate::handlers::{ActionContext, ActionDetails, ActionHandler, HandlerResult};
use crate::types::{Action, SdkAction};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Name reported by this handler.
pub const SDK_HANDLER: &str = "sdk";

/// Routes `sdk` actions to the launcher that supports their payment method.
#[derive(Default)]
pub struct SdkActionHandler {
    launchers: Vec<Arc<dyn SdkLauncher>>,
}

impl SdkActionHandler {
    /// Creates a handler over the given launchers.
    pub fn new(launchers: Vec<Arc<dyn SdkLauncher>>) -> Self {
        Self { launchers }
    }

    /// Adds a launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn SdkLauncher>) -> Self {
        self.launchers.push(launcher);
        self
    }

    /// Whether no launcher is registered.
    pub fn is_empty(&self) -> bool {
        self.launchers.is_empty()
    }

    fn launcher_for(&self, payment_method_type: &str) -> Option<&Arc<dyn SdkLauncher>> {
        self.launchers
            .iter()
            .find(|launcher| launcher.supports(payment_method_type))
    }

    async fn launch(&self, action: &SdkAction, context: &ActionContext) -> HandlerResult {
        let Some(launcher) = self.launcher_for(&action.payment_method_type) else {
            return HandlerResult::failure(
                SDK_HANDLER,
                ActionError::UnsupportedAction(format!("sdk/{}", action.payment_method_type)),
            );
        };

        info!(
            action_id = %context.action_id,
            payment_method_type = %action.payment_method_type,
            "launching payment method SDK"
        );
        match launcher.launch(action).await {
            Ok(details) => HandlerResult::Details(ActionDetails::new(details, action.payment_data.clone())),
            Err(CapabilityError::Cancelled) => HandlerResult::failure(SDK_HANDLER, ActionError::UserCancelled),
            Err(e) => {
                warn!(action_id = %context.action_id, error = %e, "payment method SDK failed");
                HandlerResult::failure(SDK_HANDLER, ActionError::NativeSdk(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl ActionHandler for SdkActionHandler {
    fn name(&self) -> &str {
        SDK_HANDLER
    }

    fn can_handle(&self, action: &Action) -> bool {
        match action {
            Action::Sdk(sdk) => self.launcher_for(&sdk.payment_method_type).is_some(),
            _ => false,
        }
    }

    async fn handle(&self, action: &Action, context: &ActionContext) -> HandlerResult {
        match action {
            Action::Sdk(sdk) => self.launch(sdk, context).await,
            other => HandlerResult::failure(
                SDK_HANDLER,
                ActionError::UnsupportedAction(other.action_type().to_string()),
            ),
        }
    }
}
