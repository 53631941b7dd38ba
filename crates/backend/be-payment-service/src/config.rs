use secrecy::SecretString;

use crate::error::PaymentError;

pub const DEFAULT_CHAPA_BASE_URL: &str = "https://api.chapa.co";
pub const DEFAULT_APP_BASE_URL: &str = "http://localhost:5000";

#[derive(Debug)]
pub struct PaymentConfig {
    pub chapa_base_url: String,
    /// Absent secrets are tolerated at startup and reported when a gateway
    /// call is attempted.
    pub chapa_secret_key: Option<SecretString>,
    pub chapa_public_key: Option<String>,
    pub app_base_url: String,
}

impl PaymentConfig {
    pub fn from_env() -> Result<Self, PaymentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, PaymentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let chapa_base_url = non_empty("CHAPA_BASE_URL")
            .unwrap_or_else(|| DEFAULT_CHAPA_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if !chapa_base_url.starts_with("http://") && !chapa_base_url.starts_with("https://") {
            return Err(PaymentError::Config(format!(
                "CHAPA_BASE_URL '{chapa_base_url}' must be an http(s) URL"
            )));
        }

        let app_base_url = non_empty("APP_BASE_URL")
            .unwrap_or_else(|| DEFAULT_APP_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            chapa_base_url,
            chapa_secret_key: non_empty("CHAPA_SECRET_KEY").map(SecretString::from),
            chapa_public_key: non_empty("CHAPA_PUBLIC_KEY"),
            app_base_url,
        })
    }

    /// Where the provider sends the payer back after checkout.
    pub fn default_callback_url(&self) -> String {
        format!("{}/api/payments/chapa/verify", self.app_base_url)
    }
}
