//! Gmail REST transport
//!
//! Implements [`MailboxGateway`] on top of the Gmail v1 `users.messages`
//! endpoints. HTTP failures are folded into a readable message and classified
//! into a [`GatewayErrorKind`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_LENGTH};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::{AccountConfig, ServerConfig};
use crate::errors::{AppError, AppResult};
use crate::gateway::{GatewayError, GatewayErrorKind, GatewayResult, MailboxGateway};
use crate::labels::LabelDelta;

pub const DEFAULT_API_BASE_URL: &str = "https://gmail.googleapis.com";

/// 403 reasons Google uses for throttling rather than missing permissions
const QUOTA_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
    "quotaExceeded",
];

/// Gmail API client bound to one account
#[derive(Debug, Clone)]
pub struct GmailClient {
    http: Client,
    base_url: Url,
    user_id: String,
    access_token: SecretString,
}

impl GmailClient {
    /// Build a client for `account` using server-wide endpoint and timeouts
    pub fn from_config(server: &ServerConfig, account: &AccountConfig) -> AppResult<Self> {
        Self::new(
            &server.api_base_url,
            account,
            Duration::from_millis(server.connect_timeout_ms),
            Duration::from_millis(server.request_timeout_ms),
        )
    }

    /// # Errors
    ///
    /// - `InvalidInput` if `api_base_url` is not an absolute http(s) URL
    /// - `Internal` if the HTTP client cannot be constructed
    pub fn new(
        api_base_url: &str,
        account: &AccountConfig,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> AppResult<Self> {
        let base_url = Url::parse(api_base_url.trim()).map_err(|e| {
            AppError::InvalidInput(format!("invalid Gmail API base URL '{api_base_url}': {e}"))
        })?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(AppError::InvalidInput(format!(
                "Gmail API base URL must be an absolute http(s) URL: '{api_base_url}'"
            )));
        }

        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            user_id: account.user_id.clone(),
            access_token: account.access_token.clone(),
        })
    }

    /// `{base}/gmail/v1/users/{user}/messages/{tail...}` with each segment
    /// percent-encoded
    fn messages_url(&self, tail: &[&str]) -> GatewayResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                GatewayError::new(
                    GatewayErrorKind::Rejected,
                    None,
                    "Gmail API base URL cannot carry a path",
                )
            })?;
            path.pop_if_empty();
            path.extend(["gmail", "v1", "users", self.user_id.as_str(), "messages"]);
            path.extend(tail);
        }
        Ok(url)
    }

    async fn execute(&self, request: RequestBuilder, op: &str) -> GatewayResult<Response> {
        let response = request
            .bearer_auth(self.access_token.expose_secret())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| transport_error(op, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_api_error(status, &body))
    }

    async fn post<B: Serialize>(
        &self,
        tail: &[&str],
        body: &B,
        op: &str,
    ) -> GatewayResult<Response> {
        let url = self.messages_url(tail)?;
        self.execute(self.http.post(url).json(body), op).await
    }

    async fn post_empty(&self, tail: &[&str], op: &str) -> GatewayResult<Response> {
        let url = self.messages_url(tail)?;
        self.execute(self.http.post(url).header(CONTENT_LENGTH, "0"), op).await
    }
}

#[async_trait]
impl MailboxGateway for GmailClient {
    async fn get_labels(&self, id: &str) -> GatewayResult<Vec<String>> {
        debug!(message_id = id, "fetching labels");
        let url = self.messages_url(&[id])?;
        let request = self.http.get(url).query(&[("format", "minimal")]);
        let response = self.execute(request, "messages.get").await?;
        let message: GmailMessageLabels = decode(response, "messages.get").await?;
        Ok(message.label_ids)
    }

    async fn batch_modify(&self, ids: &[String], delta: &LabelDelta) -> GatewayResult<()> {
        debug!(count = ids.len(), "batch modify");
        let body = BatchModifyRequest {
            ids,
            add_label_ids: &delta.add,
            remove_label_ids: &delta.remove,
        };
        self.post(&["batchModify"], &body, "messages.batchModify").await?;
        Ok(())
    }

    async fn modify_single(&self, id: &str, delta: &LabelDelta) -> GatewayResult<Vec<String>> {
        debug!(message_id = id, "modify single");
        let body = ModifyRequest {
            add_label_ids: &delta.add,
            remove_label_ids: &delta.remove,
        };
        let response = self.post(&[id, "modify"], &body, "messages.modify").await?;
        let message: GmailMessageLabels = decode(response, "messages.modify").await?;
        Ok(message.label_ids)
    }

    async fn batch_delete(&self, ids: &[String]) -> GatewayResult<()> {
        debug!(count = ids.len(), "batch delete");
        let body = BatchDeleteRequest { ids };
        self.post(&["batchDelete"], &body, "messages.batchDelete").await?;
        Ok(())
    }

    async fn trash(&self, id: &str) -> GatewayResult<Vec<String>> {
        debug!(message_id = id, "trash");
        let response = self.post_empty(&[id, "trash"], "messages.trash").await?;
        let message: GmailMessageLabels = decode(response, "messages.trash").await?;
        Ok(message.label_ids)
    }

    async fn untrash(&self, id: &str) -> GatewayResult<Vec<String>> {
        debug!(message_id = id, "untrash");
        let response = self.post_empty(&[id, "untrash"], "messages.untrash").await?;
        let message: GmailMessageLabels = decode(response, "messages.untrash").await?;
        Ok(message.label_ids)
    }
}

async fn decode<T: DeserializeOwned>(response: Response, op: &str) -> GatewayResult<T> {
    let status = response.status();
    response.json::<T>().await.map_err(|e| {
        GatewayError::new(
            GatewayErrorKind::Malformed,
            Some(status.as_u16()),
            format!("gmail api {op} returned an undecodable response: {e}"),
        )
    })
}

fn transport_error(op: &str, err: &reqwest::Error) -> GatewayError {
    let message = if err.is_timeout() {
        format!("gmail api {op} timed out")
    } else if err.is_connect() {
        format!("gmail api {op} could not connect: {err}")
    } else {
        format!("gmail api {op} failed: {err}")
    };
    GatewayError::new(GatewayErrorKind::Unavailable, None, message)
}

/// Map a non-success status and its body to a classified error
fn classify_api_error(status: StatusCode, body: &str) -> GatewayError {
    let envelope = serde_json::from_str::<GmailApiErrorEnvelope>(body).ok();
    let reasons: Vec<String> = envelope
        .as_ref()
        .and_then(|e| e.error.errors.as_ref())
        .map(|details| details.iter().filter_map(|d| d.reason.clone()).collect())
        .unwrap_or_default();

    let kind = match status.as_u16() {
        400 => GatewayErrorKind::InvalidRequest,
        401 => GatewayErrorKind::Unauthorized,
        403 if reasons.iter().any(|r| QUOTA_REASONS.contains(&r.as_str())) => {
            GatewayErrorKind::RateLimited
        }
        403 => GatewayErrorKind::Unauthorized,
        404 => GatewayErrorKind::NotFound,
        429 => GatewayErrorKind::RateLimited,
        500..=599 => GatewayErrorKind::Unavailable,
        _ => GatewayErrorKind::Rejected,
    };

    let detail = envelope
        .and_then(describe_api_error)
        .unwrap_or_else(|| {
            let body = body.trim();
            if body.is_empty() {
                "no error details in response body".to_owned()
            } else {
                body.to_owned()
            }
        });

    GatewayError::new(
        kind,
        Some(status.as_u16()),
        format!("gmail api request failed ({status}): {detail}"),
    )
}

fn describe_api_error(envelope: GmailApiErrorEnvelope) -> Option<String> {
    let mut parts = Vec::new();

    if let Some(message) = envelope.error.message {
        parts.push(message);
    }
    if let Some(status) = envelope.error.status {
        parts.push(format!("status={status}"));
    }
    if let Some(reason) = envelope
        .error
        .errors
        .and_then(|errors| errors.into_iter().find_map(|detail| detail.reason))
    {
        parts.push(format!("reason={reason}"));
    }

    if parts.is_empty() {
        return None;
    }
    Some(parts.join(", "))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessageLabels {
    #[serde(default)]
    label_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchModifyRequest<'a> {
    ids: &'a [String],
    add_label_ids: &'a [String],
    remove_label_ids: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest<'a> {
    add_label_ids: &'a [String],
    remove_label_ids: &'a [String],
}

#[derive(Debug, Serialize)]
struct BatchDeleteRequest<'a> {
    ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct GmailApiErrorEnvelope {
    error: GmailApiError,
}

#[derive(Debug, Deserialize)]
struct GmailApiError {
    status: Option<String>,
    message: Option<String>,
    errors: Option<Vec<GmailApiErrorDetail>>,
}

#[derive(Debug, Deserialize)]
struct GmailApiErrorDetail {
    reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{GmailClient, classify_api_error};
    use crate::config::AccountConfig;
    use crate::gateway::{GatewayErrorKind, MailboxGateway};
    use crate::labels::LabelDelta;

    fn account(user_id: &str) -> AccountConfig {
        AccountConfig {
            account_id: "default".to_owned(),
            user_id: user_id.to_owned(),
            access_token: SecretString::new("test-token".into()),
        }
    }

    fn client_for(server: &MockServer) -> GmailClient {
        GmailClient::new(
            &server.uri(),
            &account("me"),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
        .expect("client builds")
    }

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[tokio::test]
    async fn get_labels_reads_label_ids_with_minimal_format() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/msg-1"))
            .and(query_param("format", "minimal"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg-1",
                "threadId": "t-1",
                "labelIds": ["INBOX", "UNREAD"]
            })))
            .mount(&server)
            .await;

        let labels = client_for(&server).get_labels("msg-1").await.expect("labels");
        assert_eq!(labels, ids(&["INBOX", "UNREAD"]));
    }

    #[tokio::test]
    async fn get_labels_treats_missing_label_ids_as_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/msg-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg-2" })))
            .mount(&server)
            .await;

        let labels = client_for(&server).get_labels("msg-2").await.expect("labels");
        assert!(labels.is_empty());
    }

    #[tokio::test]
    async fn batch_modify_posts_ids_and_delta() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/batchModify"))
            .and(body_json(json!({
                "ids": ["a", "b"],
                "addLabelIds": ["STARRED"],
                "removeLabelIds": ["UNREAD"]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let delta = LabelDelta::resolve(ids(&["STARRED"]), ids(&["UNREAD"]));
        client_for(&server)
            .batch_modify(&ids(&["a", "b"]), &delta)
            .await
            .expect("batch modify succeeds");
    }

    #[tokio::test]
    async fn batch_modify_not_found_is_classified_for_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/batchModify"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {
                    "code": 404,
                    "message": "Requested entity was not found.",
                    "status": "NOT_FOUND"
                }
            })))
            .mount(&server)
            .await;

        let delta = LabelDelta::resolve(ids(&["STARRED"]), Vec::new());
        let err = client_for(&server)
            .batch_modify(&ids(&["a"]), &delta)
            .await
            .expect_err("must fail");
        assert_eq!(err.kind, GatewayErrorKind::NotFound);
        assert_eq!(err.status, Some(404));
        assert!(err.is_retryable_individually());
        assert!(err.message.contains("Requested entity was not found"));
    }

    #[tokio::test]
    async fn modify_single_returns_resulting_labels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/msg-1/modify"))
            .and(body_json(json!({
                "addLabelIds": [],
                "removeLabelIds": ["INBOX"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg-1",
                "labelIds": ["STARRED"]
            })))
            .mount(&server)
            .await;

        let delta = LabelDelta::resolve(Vec::new(), ids(&["INBOX"]));
        let labels = client_for(&server)
            .modify_single("msg-1", &delta)
            .await
            .expect("modify succeeds");
        assert_eq!(labels, ids(&["STARRED"]));
    }

    #[tokio::test]
    async fn batch_delete_and_trash_use_expected_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/batchDelete"))
            .and(body_json(json!({ "ids": ["x", "y"] })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/x/trash"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "x",
                "labelIds": ["TRASH"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client
            .batch_delete(&ids(&["x", "y"]))
            .await
            .expect("batch delete succeeds");
        let labels = client.trash("x").await.expect("trash succeeds");
        assert_eq!(labels, ids(&["TRASH"]));
    }

    #[tokio::test]
    async fn custom_user_id_is_used_in_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/someone@example.com/messages/m"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "labelIds": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GmailClient::new(
            &server.uri(),
            &account("someone@example.com"),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
        .expect("client builds");
        client.get_labels("m").await.expect("labels");
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let uri = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            format!("http://{}", listener.local_addr().expect("addr"))
        };
        let client = GmailClient::new(
            &uri,
            &account("me"),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
        .expect("client builds");

        let err = client.get_labels("m").await.expect_err("must fail");
        assert_eq!(err.kind, GatewayErrorKind::Unavailable);
        assert!(!err.is_retryable_individually());
    }

    #[test]
    fn quota_forbidden_is_rate_limited_not_unauthorized() {
        let err = classify_api_error(
            StatusCode::FORBIDDEN,
            r#"{"error":{"code":403,"message":"User-rate limit exceeded.","errors":[{"reason":"userRateLimitExceeded"}]}}"#,
        );
        assert_eq!(err.kind, GatewayErrorKind::RateLimited);
        assert!(err.message.contains("reason=userRateLimitExceeded"));

        let err = classify_api_error(
            StatusCode::FORBIDDEN,
            r#"{"error":{"code":403,"message":"Insufficient Permission","errors":[{"reason":"insufficientPermissions"}]}}"#,
        );
        assert_eq!(err.kind, GatewayErrorKind::Unauthorized);
    }

    #[test]
    fn server_errors_and_empty_bodies_are_described() {
        let err = classify_api_error(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(err.kind, GatewayErrorKind::Unavailable);
        assert!(err.message.contains("no error details in response body"));

        let err = classify_api_error(StatusCode::CONFLICT, "plain text");
        assert_eq!(err.kind, GatewayErrorKind::Rejected);
        assert!(err.message.ends_with("plain text"));
    }

    #[test]
    fn rejects_relative_base_url() {
        let err = GmailClient::new(
            "gmail.googleapis.com",
            &account("me"),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("invalid Gmail API base URL"));
    }
}
