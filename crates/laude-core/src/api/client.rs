//! HTTP client for the Remote Identity Gateway.
//!
//! This module provides `GatewayClient`, which talks JSON to the
//! `/api/auth/*` endpoints and implements `IdentityGateway`.

use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ApiError, IdentityGateway};
use crate::models::gateway::{Ack, OtpRequest, OtpVerification};
use crate::models::{OtpIssued, Registration, VerifiedLogin};

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const REGISTER_PATH: &str = "/api/auth/register";
const GENERATE_OTP_PATH: &str = "/api/auth/generate-otp";
const VERIFY_OTP_PATH: &str = "/api/auth/verify-otp";
const LOGOUT_PATH: &str = "/api/auth/logout";
const VALIDATE_PATH: &str = "/api/auth/validate";

/// Gateway client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone, Debug)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Decode a 2xx body, honouring a `success: false` envelope.
    fn decode<T: DeserializeOwned>(path: &str, body: &str) -> Result<T, ApiError> {
        if let Ok(ack) = serde_json::from_str::<Ack>(body) {
            if ack.success == Some(false) {
                return Err(ApiError::Rejected(
                    ack.message
                        .unwrap_or_else(|| "The request was not accepted".to_string()),
                ));
            }
        }
        serde_json::from_str(body)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", path, e)))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&(impl Serialize + Sync)>,
    ) -> Result<T, ApiError> {
        let mut request = self.request(method, path, token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = Self::check_response(request.send().await?).await?;
        let text = response.text().await?;
        debug!(path, "Gateway response received");
        Self::decode(path, &text)
    }
}

impl IdentityGateway for GatewayClient {
    async fn register(&self, registration: &Registration) -> Result<(), ApiError> {
        let _: Ack = self
            .send(Method::POST, REGISTER_PATH, None, Some(registration))
            .await?;
        Ok(())
    }

    async fn generate_otp(&self, email: &str) -> Result<OtpIssued, ApiError> {
        self.send(
            Method::POST,
            GENERATE_OTP_PATH,
            None,
            Some(&OtpRequest { email }),
        )
        .await
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<VerifiedLogin, ApiError> {
        self.send(
            Method::POST,
            VERIFY_OTP_PATH,
            None,
            Some(&OtpVerification {
                email,
                otp_code: code,
            }),
        )
        .await
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        let response = self
            .request(Method::POST, LOGOUT_PATH, Some(token))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    async fn validate(&self, token: &str) -> Result<bool, ApiError> {
        let response = self
            .request(Method::GET, VALIDATE_PATH, Some(token))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(false);
        }

        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        let ack: Ack = serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", VALIDATE_PATH, e)))?;
        Ok(ack.success.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn test_generate_otp_posts_email() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/auth/generate-otp")
                    .json_body(json!({"email": "a@hssmedicine.com"}));
                then.status(200).json_body(json!({
                    "success": true,
                    "message": "OTP sent to a@hssmedicine.com. Valid for 10 minutes.",
                    "expires_in_minutes": 10
                }));
            })
            .await;

        let client = GatewayClient::new(server.base_url()).unwrap();
        let issued = client.generate_otp("a@hssmedicine.com").await.unwrap();

        mock.assert_async().await;
        assert!(issued.success);
        assert_eq!(issued.expires_in_minutes, Some(10));
    }

    #[tokio::test]
    async fn test_verify_otp_returns_login() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/auth/verify-otp")
                    .json_body(json!({"email": "a@hssmedicine.com", "otp_code": "123456"}));
                then.status(200).json_body(json!({
                    "success": true,
                    "message": "Login successful!",
                    "session_token": "tok-1",
                    "user_data": {
                        "user_id": "u-1",
                        "email": "a@hssmedicine.com",
                        "full_name": "Avery Quinn",
                        "department": "Orthopedics",
                        "company_domain": "hssmedicine.com",
                        "is_admin": false,
                        "session_expires": "2030-01-01T08:00:00"
                    }
                }));
            })
            .await;

        let client = GatewayClient::new(server.base_url()).unwrap();
        let login = client.verify_otp("a@hssmedicine.com", "123456").await.unwrap();

        assert_eq!(login.session_token, "tok-1");
        assert_eq!(login.user_data.profile.full_name, "Avery Quinn");
    }

    #[tokio::test]
    async fn test_verify_otp_rejection_carries_detail() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/auth/verify-otp");
                then.status(400)
                    .json_body(json!({"detail": "Invalid or expired OTP"}));
            })
            .await;

        let client = GatewayClient::new(server.base_url()).unwrap();
        let err = client
            .verify_otp("a@hssmedicine.com", "000000")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "Invalid or expired OTP"));
    }

    #[tokio::test]
    async fn test_success_false_envelope_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/auth/generate-otp");
                then.status(200)
                    .json_body(json!({"success": false, "message": "Mail server unavailable"}));
            })
            .await;

        let client = GatewayClient::new(server.base_url()).unwrap();
        let err = client.generate_otp("a@hssmedicine.com").await.unwrap_err();

        assert!(matches!(err, ApiError::Rejected(ref m) if m == "Mail server unavailable"));
    }

    #[tokio::test]
    async fn test_logout_sends_bearer_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/auth/logout")
                    .header("authorization", "Bearer tok-1");
                then.status(200)
                    .json_body(json!({"success": true, "message": "Logged out successfully"}));
            })
            .await;

        let client = GatewayClient::new(format!("{}/", server.base_url())).unwrap();
        client.logout("tok-1").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_validate_maps_unauthorized_to_false() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/auth/validate")
                    .header("authorization", "Bearer good");
                then.status(200).json_body(json!({"success": true}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/auth/validate")
                    .header("authorization", "Bearer stale");
                then.status(401)
                    .json_body(json!({"detail": "Invalid or expired session"}));
            })
            .await;

        let client = GatewayClient::new(server.base_url()).unwrap();
        assert!(client.validate("good").await.unwrap());
        assert!(!client.validate("stale").await.unwrap());
    }

    #[tokio::test]
    async fn test_server_error_surfaces() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/auth/register");
                then.status(500).json_body(json!({"detail": "Registration failed"}));
            })
            .await;

        let client = GatewayClient::new(server.base_url()).unwrap();
        let err = client
            .register(&Registration {
                email: "a@hssmedicine.com".to_string(),
                full_name: "Avery Quinn".to_string(),
                department: "Orthopedics".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::ServerError(ref m) if m == "Registration failed"));
    }
}
