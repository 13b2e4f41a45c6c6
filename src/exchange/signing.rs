//! Request signing for the venue's private REST API.
//!
//! The venue's published scheme: HMAC-SHA256 over
//! `timestamp + METHOD + path + body` with the shared secret,
//! base64-encoded, sent alongside API-key, timestamp, and passphrase
//! headers.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;

use crate::error::{QuorumError, Result};

type HmacSha256 = Hmac<Sha256>;

/// API credentials for signed requests
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl ApiCredentials {
    pub fn new(api_key: String, secret: String, passphrase: String) -> Self {
        Self {
            api_key,
            secret,
            passphrase,
        }
    }
}

/// HMAC authentication helper for private endpoints
#[derive(Clone)]
pub struct HmacSigner {
    credentials: ApiCredentials,
}

impl HmacSigner {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self { credentials }
    }

    /// Build the message to sign for a request
    fn build_message(timestamp: i64, method: &str, path: &str, body: Option<&str>) -> String {
        match body {
            Some(b) if !b.is_empty() => {
                format!("{}{}{}{}", timestamp, method.to_uppercase(), path, b)
            }
            _ => format!("{}{}{}", timestamp, method.to_uppercase(), path),
        }
    }

    /// Create the base64 HMAC-SHA256 signature
    fn sign(&self, message: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret.as_bytes())
            .map_err(|e| QuorumError::Signature(format!("HMAC init failed: {}", e)))?;
        mac.update(message.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Build authentication headers for a request
    pub fn build_headers(
        &self,
        timestamp: i64,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> Result<HeaderMap> {
        let message = Self::build_message(timestamp, method, path, body);
        let signature = self.sign(&message)?;

        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| -> Result<()> {
            headers.insert(
                name,
                HeaderValue::from_str(value)
                    .map_err(|e| QuorumError::Internal(format!("invalid {} header: {}", name, e)))?,
            );
            Ok(())
        };

        put("ACCESS-KEY", &self.credentials.api_key)?;
        put("ACCESS-SIGN", &signature)?;
        put("ACCESS-TIMESTAMP", &timestamp.to_string())?;
        put("ACCESS-PASSPHRASE", &self.credentials.passphrase)?;

        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> HmacSigner {
        HmacSigner::new(ApiCredentials::new(
            "test-key".to_string(),
            "test-secret".to_string(),
            "test-pass".to_string(),
        ))
    }

    #[test]
    fn message_concatenates_timestamp_method_path_body() {
        let msg = HmacSigner::build_message(
            1704067200000,
            "post",
            "/api/v2/mix/order/place-order",
            Some(r#"{"symbol":"BTCUSDT"}"#),
        );
        assert_eq!(
            msg,
            r#"1704067200000POST/api/v2/mix/order/place-order{"symbol":"BTCUSDT"}"#
        );

        let msg_no_body =
            HmacSigner::build_message(1704067200000, "GET", "/api/v2/mix/position/all-position", None);
        assert_eq!(msg_no_body, "1704067200000GET/api/v2/mix/position/all-position");
    }

    #[test]
    fn signature_is_valid_base64() {
        let sig = signer().sign("test message").unwrap();
        assert!(!sig.is_empty());
        assert!(BASE64.decode(&sig).is_ok());
    }

    #[test]
    fn signature_is_deterministic() {
        let a = signer().sign("same input").unwrap();
        let b = signer().sign("same input").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn headers_carry_key_timestamp_passphrase() {
        let headers = signer()
            .build_headers(1704067200000, "GET", "/api/v2/mix/account/accounts", None)
            .unwrap();
        assert_eq!(headers.get("ACCESS-KEY").unwrap(), "test-key");
        assert_eq!(headers.get("ACCESS-TIMESTAMP").unwrap(), "1704067200000");
        assert_eq!(headers.get("ACCESS-PASSPHRASE").unwrap(), "test-pass");
        assert!(headers.contains_key("ACCESS-SIGN"));
    }
}
