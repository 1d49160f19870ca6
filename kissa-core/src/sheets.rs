//! Spreadsheet sink: one row per completed conversation
//!
//! `ConversationExporter` is the fire-and-forget destination that receives a
//! completed transcript. `GoogleSheetsExporter` authenticates as a service
//! account (RS256 JWT assertion exchanged for an OAuth access token) and
//! appends `[timestamp, user lines, ai lines]` to a pre-provisioned sheet.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::SheetsConfig;
use crate::models::Conversation;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh cached tokens this long before they actually expire.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[async_trait]
pub trait ConversationExporter: Send + Sync {
    async fn export(&self, conversation: &Conversation) -> Result<(), SheetsError>;

    /// Exporter name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum SheetsError {
    #[error("Invalid service account credentials: {0}")]
    Credentials(String),

    #[error("Failed to sign token assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token exchange failed ({code}): {message}")]
    TokenExchange { code: u16, message: String },

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid sheets endpoint: {0}")]
    Endpoint(String),
}

/// `[export timestamp, user utterances, ai utterances]`, each side newline-joined.
pub fn build_row(conversation: &Conversation, timestamp: DateTime<Utc>) -> Vec<String> {
    vec![
        timestamp.to_rfc3339(),
        conversation.user_utterances.join("\n"),
        conversation.ai_utterances.join("\n"),
    ]
}

// ============================================================================
// Service account credentials
// ============================================================================

/// The subset of a Google service-account key file the exporter needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, SheetsError> {
        serde_json::from_str(raw).map_err(|e| SheetsError::Credentials(e.to_string()))
    }

    /// Reads `GOOGLE_CREDENTIALS`. `Ok(None)` when the variable is unset.
    pub fn from_env() -> Result<Option<Self>, SheetsError> {
        match std::env::var("GOOGLE_CREDENTIALS") {
            Ok(raw) if !raw.trim().is_empty() => Self::from_json(&raw).map(Some),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct AppendRequest {
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorResponse {
    error: Option<GoogleErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GoogleSheetsExporter
// ============================================================================

pub struct GoogleSheetsExporter {
    client: Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    append_url: Url,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheetsExporter {
    pub fn new(key: ServiceAccountKey, config: &SheetsConfig) -> Result<Self, SheetsError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        let append_url = append_url(&config.base_url, &config.spreadsheet_id, &config.range)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            key,
            encoding_key,
            append_url,
            token: Mutex::new(None),
        })
    }

    /// A valid access token, reusing the cached one until it nears expiry.
    async fn access_token(&self) -> Result<String, SheetsError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - chrono::Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS) > now {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.exchange_token(now).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn exchange_token(&self, now: DateTime<Utc>) -> Result<CachedToken, SheetsError> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat,
            exp: iat + 3600,
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(code = status.as_u16(), "Service account token exchange rejected");
            return Err(SheetsError::TokenExchange {
                code: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = response.json().await?;
        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + chrono::Duration::seconds(token.expires_in),
        })
    }

    pub async fn append_row(&self, row: Vec<String>) -> Result<(), SheetsError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.append_url.clone())
            .bearer_auth(token)
            .json(&AppendRequest { values: vec![row] })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = serde_json::from_str::<GoogleErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));
            return Err(SheetsError::Api { code, message });
        }

        Ok(())
    }
}

fn append_url(base_url: &str, spreadsheet_id: &str, range: &str) -> Result<Url, SheetsError> {
    let mut url = Url::parse(base_url).map_err(|e| SheetsError::Endpoint(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| SheetsError::Endpoint(base_url.to_string()))?
        .pop_if_empty()
        .extend(["spreadsheets", spreadsheet_id, "values"])
        .push(&format!("{}:append", range));
    url.query_pairs_mut()
        .append_pair("valueInputOption", "RAW")
        .append_pair("insertDataOption", "INSERT_ROWS");
    Ok(url)
}

#[async_trait]
impl ConversationExporter for GoogleSheetsExporter {
    async fn export(&self, conversation: &Conversation) -> Result<(), SheetsError> {
        self.append_row(build_row(conversation, Utc::now())).await
    }

    fn name(&self) -> &str {
        "google-sheets"
    }
}

/// Exporter used when the spreadsheet sink is disabled or unconfigured.
pub struct NoopExporter;

#[async_trait]
impl ConversationExporter for NoopExporter {
    async fn export(&self, conversation: &Conversation) -> Result<(), SheetsError> {
        tracing::debug!(subject = %conversation.name, "Spreadsheet export disabled, skipping");
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_PRIVATE_KEY: &str = include_str!("../tests/fixtures/service_account_key.pem");

    fn sample_conversation() -> Conversation {
        Conversation {
            name: "alice".to_string(),
            user_utterances: vec!["hello".to_string(), "world".to_string()],
            ai_utterances: vec!["panda".to_string(), "penguin".to_string()],
        }
    }

    fn test_exporter(mock_server: &MockServer) -> GoogleSheetsExporter {
        let key = ServiceAccountKey {
            client_email: "exporter@test.iam.gserviceaccount.com".to_string(),
            private_key: TEST_PRIVATE_KEY.to_string(),
            token_uri: format!("{}/token", mock_server.uri()),
        };
        let config = SheetsConfig {
            enabled: true,
            spreadsheet_id: "sheet-123".to_string(),
            range: "Sheet1".to_string(),
            base_url: mock_server.uri(),
        };
        GoogleSheetsExporter::new(key, &config).expect("Failed to create exporter")
    }

    async fn mount_token(mock_server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.test-token",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(expected_calls)
            .mount(mock_server)
            .await;
    }

    #[test]
    fn test_build_row_joins_with_newlines() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let row = build_row(&sample_conversation(), ts);
        assert_eq!(
            row,
            vec![
                "2025-01-02T03:04:05+00:00".to_string(),
                "hello\nworld".to_string(),
                "panda\npenguin".to_string(),
            ]
        );
    }

    #[test]
    fn test_build_row_empty_conversation() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let conversation = Conversation {
            name: "bob".to_string(),
            user_utterances: vec![],
            ai_utterances: vec![],
        };
        let row = build_row(&conversation, ts);
        assert_eq!(row[1], "");
        assert_eq!(row[2], "");
    }

    #[test]
    fn test_service_account_key_defaults_token_uri() {
        let key = ServiceAccountKey::from_json(
            r#"{"type":"service_account","client_email":"a@b.c","private_key":"pem"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
        assert_eq!(key.client_email, "a@b.c");
    }

    #[test]
    fn test_service_account_key_rejects_garbage() {
        assert!(matches!(
            ServiceAccountKey::from_json("not json"),
            Err(SheetsError::Credentials(_))
        ));
    }

    #[test]
    fn test_invalid_private_key_rejected() {
        let key = ServiceAccountKey {
            client_email: "a@b.c".to_string(),
            private_key: "not a pem".to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
        };
        let result = GoogleSheetsExporter::new(key, &SheetsConfig::default());
        assert!(matches!(result, Err(SheetsError::Jwt(_))));
    }

    #[test]
    fn test_append_url_shape() {
        let url = append_url("https://sheets.googleapis.com/v4", "abc", "Sheet1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/Sheet1:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS"
        );
    }

    #[tokio::test]
    async fn test_export_appends_row_with_bearer_token() {
        let mock_server = MockServer::start().await;
        mount_token(&mock_server, 1).await;

        Mock::given(method("POST"))
            .and(path("/spreadsheets/sheet-123/values/Sheet1:append"))
            .and(query_param("valueInputOption", "RAW"))
            .and(header("authorization", "Bearer ya29.test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "spreadsheetId": "sheet-123"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let exporter = test_exporter(&mock_server);
        exporter.export(&sample_conversation()).await.unwrap();
    }

    #[tokio::test]
    async fn test_append_row_sends_values() {
        let mock_server = MockServer::start().await;
        mount_token(&mock_server, 1).await;

        Mock::given(method("POST"))
            .and(path("/spreadsheets/sheet-123/values/Sheet1:append"))
            .and(body_json(serde_json::json!({
                "values": [["ts", "u1\nu2", "a1\na2"]]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let exporter = test_exporter(&mock_server);
        exporter
            .append_row(vec![
                "ts".to_string(),
                "u1\nu2".to_string(),
                "a1\na2".to_string(),
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_token_is_cached_between_exports() {
        let mock_server = MockServer::start().await;
        mount_token(&mock_server, 1).await;

        Mock::given(method("POST"))
            .and(path("/spreadsheets/sheet-123/values/Sheet1:append"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(2)
            .mount(&mock_server)
            .await;

        let exporter = test_exporter(&mock_server);
        exporter.export(&sample_conversation()).await.unwrap();
        exporter.export(&sample_conversation()).await.unwrap();
    }

    #[tokio::test]
    async fn test_token_exchange_failure_surfaces() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&mock_server)
            .await;

        let exporter = test_exporter(&mock_server);
        match exporter.export(&sample_conversation()).await {
            Err(SheetsError::TokenExchange { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "invalid_grant");
            }
            other => panic!("Expected TokenExchange error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_append_api_error_parsed() {
        let mock_server = MockServer::start().await;
        mount_token(&mock_server, 1).await;

        Mock::given(method("POST"))
            .and(path("/spreadsheets/sheet-123/values/Sheet1:append"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": { "code": 403, "message": "The caller does not have permission" }
            })))
            .mount(&mock_server)
            .await;

        let exporter = test_exporter(&mock_server);
        match exporter.export(&sample_conversation()).await {
            Err(SheetsError::Api { code, message }) => {
                assert_eq!(code, 403);
                assert_eq!(message, "The caller does not have permission");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_noop_exporter_succeeds() {
        let exporter = NoopExporter;
        assert!(exporter.export(&sample_conversation()).await.is_ok());
        assert_eq!(exporter.name(), "noop");
    }
}
