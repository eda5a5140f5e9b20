//! Configuration for the action component.
//!
//! Configurations are built in code with `new` + `with_*` builders, or loaded from JSON
//! with [`ActionComponentConfig::from_json`].

use crate::errors::{ActionError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Top-level configuration shared by every handler.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActionComponentConfig {
    /// URL the shopper returns to after a redirect; its scheme and host form the
    /// callback matcher.
    #[serde(rename = "returnUrl")]
    pub return_url: Url,

    /// 3DS2 settings
    #[serde(rename = "threeDS2", default)]
    pub three_ds2: ThreeDS2Config,

    /// Delegated-authentication settings
    #[serde(rename = "delegatedAuthentication", default)]
    pub delegated_authentication: DelegatedAuthenticationConfig,

    /// Await / QR polling settings
    #[serde(rename = "await", default)]
    pub await_polling: AwaitConfig,
}

impl ActionComponentConfig {
    /// Creates a configuration with default handler settings.
    ///
    /// # Examples
    ///
    /// ```
    /// use checkout_actions::config::ActionComponentConfig;
    /// use url::Url;
    ///
    /// let config = ActionComponentConfig::new(Url::parse("myshop://checkout").unwrap());
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn new(return_url: Url) -> Self {
        Self {
            return_url,
            three_ds2: ThreeDS2Config::default(),
            delegated_authentication: DelegatedAuthenticationConfig::default(),
            await_polling: AwaitConfig::default(),
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the 3DS2 requestor app URL used for out-of-band app switching.
    pub fn with_requestor_app_url(mut self, url: Url) -> Self {
        self.three_ds2.requestor_app_url = Some(url);
        self
    }

    /// Enables or disables delegated authentication.
    pub fn with_delegated_authentication(mut self, enabled: bool) -> Self {
        self.delegated_authentication.enabled = enabled;
        self
    }

    /// Sets how long the delegated-authentication prompts advertise as their countdown.
    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.delegated_authentication.prompt_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the await polling interval and maximum wait.
    pub fn with_await_polling(mut self, interval: Duration, max_wait: Duration) -> Self {
        self.await_polling.poll_interval_ms = interval.as_millis() as u64;
        self.await_polling.max_wait_ms = max_wait.as_millis() as u64;
        self
    }

    /// Checks the configuration for values the handlers cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.return_url.cannot_be_a_base() && self.return_url.host_str().is_none() {
            return Err(ActionError::ConfigError(format!(
                "return URL {} has no host to match callbacks against",
                self.return_url
            )));
        }
        if self.await_polling.poll_interval_ms == 0 {
            return Err(ActionError::ConfigError(
                "await poll interval must be positive".to_string(),
            ));
        }
        if self.await_polling.max_wait_ms < self.await_polling.poll_interval_ms {
            return Err(ActionError::ConfigError(
                "await max wait must be at least one poll interval".to_string(),
            ));
        }
        Ok(())
    }
}

/// 3DS2 settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ThreeDS2Config {
    /// App URL passed to the challenge for out-of-band authentication apps
    #[serde(rename = "requestorAppUrl", default, skip_serializing_if = "Option::is_none")]
    pub requestor_app_url: Option<Url>,
}

/// Delegated-authentication settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DelegatedAuthenticationConfig {
    /// Whether registration/approval prompts are offered at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Countdown advertised to the UI for each prompt, in seconds
    #[serde(rename = "promptTimeoutSecs", default = "default_prompt_timeout_secs")]
    pub prompt_timeout_secs: u64,
}

impl DelegatedAuthenticationConfig {
    /// Countdown advertised for prompts.
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }
}

impl Default for DelegatedAuthenticationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prompt_timeout_secs: default_prompt_timeout_secs(),
        }
    }
}

/// Await / QR polling settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AwaitConfig {
    /// Delay between two status polls, in milliseconds
    #[serde(rename = "pollIntervalMs", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum time spent waiting for a final status, in milliseconds
    #[serde(rename = "maxWaitMs", default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl AwaitConfig {
    /// Delay between two status polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Maximum time spent waiting for a final status.
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for AwaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_prompt_timeout_secs() -> u64 {
    90
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_max_wait_ms() -> u64 {
    15 * 60 * 1_000
}
