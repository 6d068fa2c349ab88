//! reCAPTCHA verification for the login form.
//!
//! Only active when both a site key and a secret are configured. A verify
//! endpoint that cannot be reached counts as a failed challenge.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::config::RecaptchaSettings;

/// JSON response from `POST /recaptcha/api/siteverify`.
#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

#[derive(Clone)]
pub struct Recaptcha {
    client: reqwest::Client,
    settings: RecaptchaSettings,
}

impl Recaptcha {
    pub fn new(settings: RecaptchaSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self { client, settings }
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled()
    }

    pub fn host(&self) -> &str {
        &self.settings.host
    }

    /// Public site key, handed to the login page.
    pub fn site_key(&self) -> &str {
        &self.settings.key
    }

    /// Check a challenge response. Always true when reCAPTCHA is disabled.
    pub async fn verify(&self, response: &str) -> bool {
        if !self.enabled() {
            return true;
        }
        if response.is_empty() {
            return false;
        }

        let url = format!(
            "{}/recaptcha/api/siteverify",
            self.settings.host.trim_end_matches('/')
        );
        let result = self
            .client
            .post(&url)
            .form(&[
                ("secret", self.settings.secret.as_str()),
                ("response", response),
            ])
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "recaptcha verify request failed");
                return false;
            }
        };

        match resp.json::<SiteVerifyResponse>().await {
            Ok(body) => {
                if !body.success {
                    warn!(codes = ?body.error_codes, "recaptcha rejected");
                }
                body.success
            }
            Err(e) => {
                warn!(error = %e, "recaptcha verify response unreadable");
                false
            }
        }
    }
}
