//! Bluesky publisher over raw XRPC.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{AuthError, PublishError, PublishedPost, Publisher, truncate_post};

/// Default PDS endpoint.
pub const DEFAULT_PDS_URL: &str = "https://bsky.social";

/// Maximum post length accepted by Bluesky.
pub const BLUESKY_MAX_POST_CHARS: usize = 300;

/// Collection for feed posts.
const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Handle and app password for an account.
#[derive(Clone)]
pub struct Credentials {
    pub handle: String,
    pub app_password: String,
}

impl Credentials {
    /// Build credentials when both parts are present and non-empty.
    pub fn from_parts(handle: Option<String>, app_password: Option<String>) -> Option<Self> {
        match (handle, app_password) {
            (Some(handle), Some(app_password))
                if !handle.trim().is_empty() && !app_password.is_empty() =>
            {
                Some(Self {
                    handle,
                    app_password,
                })
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("handle", &self.handle)
            .field("app_password", &"<redacted>")
            .finish()
    }
}

/// Session information from authentication.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    did: String,
    handle: String,
    access_jwt: String,
    refresh_jwt: String,
}

/// Response from creating a record.
#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    uri: String,
    #[allow(dead_code)]
    cid: String,
}

/// XRPC error response format.
#[derive(Debug, Deserialize)]
struct XrpcError {
    error: String,
    #[serde(default)]
    message: String,
}

/// A non-success response, before it is mapped to a domain error.
#[derive(Debug)]
enum ResponseError {
    RateLimited { retry_after_secs: Option<u64> },
    Xrpc { status: StatusCode, error: String, message: String },
    Status { status: StatusCode, body: String },
    Decode(String),
}

impl ResponseError {
    fn is_expired_token(&self) -> bool {
        matches!(self, Self::Xrpc { error, .. } if error == "ExpiredToken")
    }

    fn into_publish_error(self) -> PublishError {
        match self {
            Self::RateLimited { retry_after_secs } => PublishError::RateLimited { retry_after_secs },
            Self::Xrpc {
                status,
                error,
                message,
            } => {
                let detail = format!("{} - {}", error, message);
                if status == StatusCode::UNAUTHORIZED
                    || matches!(
                        error.as_str(),
                        "AuthenticationRequired" | "InvalidToken" | "ExpiredToken"
                    )
                {
                    PublishError::Credentials(detail)
                } else if status.is_server_error() {
                    PublishError::Transient(detail)
                } else {
                    PublishError::Rejected(detail)
                }
            }
            Self::Status { status, body } => {
                let detail = format!("request failed ({}): {}", status, body);
                if status == StatusCode::UNAUTHORIZED {
                    PublishError::Credentials(detail)
                } else if status.is_server_error() {
                    PublishError::Transient(detail)
                } else {
                    PublishError::Rejected(detail)
                }
            }
            Self::Decode(msg) => PublishError::InvalidResponse(msg),
        }
    }

    fn into_auth_error(self) -> AuthError {
        match self {
            Self::Xrpc {
                status, message, ..
            } if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST => {
                AuthError::Rejected(message)
            }
            Self::Status { status, body }
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST =>
            {
                AuthError::Rejected(format!("login failed ({}): {}", status, body))
            }
            other => AuthError::Unavailable(other.into_publish_error().to_string()),
        }
    }
}

/// Classify a transport error by whether the request could have been delivered.
fn classify_send_error(e: reqwest::Error) -> PublishError {
    if e.is_connect() {
        PublishError::Transient(e.to_string())
    } else {
        PublishError::Network(e.to_string())
    }
}

/// Publishes posts to a Bluesky PDS.
pub struct BlueskyPublisher {
    http: Client,
    pds_url: String,
    credentials: Option<Credentials>,
    session: RwLock<Option<Session>>,
    max_chars: usize,
}

impl BlueskyPublisher {
    /// Create a publisher for the given PDS URL.
    pub fn new(pds_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build tuned HTTP client, using defaults");
                Client::new()
            });

        Self {
            http,
            pds_url: pds_url.into().trim_end_matches('/').to_string(),
            credentials,
            session: RwLock::new(None),
            max_chars: BLUESKY_MAX_POST_CHARS,
        }
    }

    /// Override the post length limit.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn pds_url(&self) -> &str {
        &self.pds_url
    }

    fn xrpc_url(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.pds_url, method)
    }

    async fn refresh_session(&self) -> Result<(), PublishError> {
        let refresh_jwt = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.refresh_jwt.clone())
            .ok_or_else(|| PublishError::Credentials("no session to refresh".to_string()))?;

        let response = self
            .http
            .post(self.xrpc_url("com.atproto.server.refreshSession"))
            .bearer_auth(refresh_jwt)
            .send()
            .await
            .map_err(classify_send_error)?;

        let session: Session = handle_response(response).await.map_err(|e| match e {
            ResponseError::Decode(msg) => PublishError::InvalidResponse(msg),
            other => PublishError::Credentials(format!(
                "session refresh failed: {}",
                other.into_publish_error()
            )),
        })?;

        debug!(did = %session.did, "refreshed session");
        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Outer error: the request never got a response. Inner: the PDS refused it.
    async fn create_post(
        &self,
        text: &str,
    ) -> Result<Result<CreateRecordResponse, ResponseError>, PublishError> {
        #[derive(Serialize)]
        struct PostRecord<'a> {
            #[serde(rename = "$type")]
            kind: &'a str,
            text: &'a str,
            #[serde(rename = "createdAt")]
            created_at: String,
        }

        #[derive(Serialize)]
        struct CreateRequest<'a> {
            repo: &'a str,
            collection: &'a str,
            record: PostRecord<'a>,
        }

        let (did, token) = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| (s.did.clone(), s.access_jwt.clone()))
            .ok_or_else(|| PublishError::Credentials("not authenticated".to_string()))?;

        let request = CreateRequest {
            repo: &did,
            collection: POST_COLLECTION,
            record: PostRecord {
                kind: POST_COLLECTION,
                text,
                created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            },
        };

        let response = self
            .http
            .post(self.xrpc_url("com.atproto.repo.createRecord"))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error)?;

        Ok(handle_response(response).await)
    }
}

#[async_trait]
impl Publisher for BlueskyPublisher {
    #[tracing::instrument(skip(self))]
    async fn authenticate(&self, agent_id: &str) -> Result<(), AuthError> {
        #[derive(Serialize)]
        struct LoginRequest<'a> {
            identifier: &'a str,
            password: &'a str,
        }

        let credentials = self.credentials.as_ref().ok_or_else(|| {
            AuthError::MissingCredentials("no handle or app password configured".to_string())
        })?;

        let response = self
            .http
            .post(self.xrpc_url("com.atproto.server.createSession"))
            .json(&LoginRequest {
                identifier: &credentials.handle,
                password: &credentials.app_password,
            })
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let session: Session = handle_response(response)
            .await
            .map_err(ResponseError::into_auth_error)?;

        info!(
            agent = %agent_id,
            handle = %session.handle,
            did = %session.did,
            "authenticated with bluesky"
        );
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn publish(&self, content: &str) -> Result<PublishedPost, PublishError> {
        if content.trim().is_empty() {
            return Err(PublishError::EmptyContent);
        }
        let text = truncate_post(content, self.max_chars);

        let mut refreshed = false;
        loop {
            match self.create_post(&text).await? {
                Ok(output) => {
                    debug!(uri = %output.uri, "created bluesky post");
                    return Ok(PublishedPost {
                        uri: Some(output.uri),
                    });
                }
                Err(e) if e.is_expired_token() && !refreshed => {
                    refreshed = true;
                    self.refresh_session().await?;
                }
                Err(e) => return Err(e.into_publish_error()),
            }
        }
    }
}

async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ResponseError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        return Err(ResponseError::RateLimited { retry_after_secs });
    }

    if !status.is_success() {
        let body = response
            .text()
            .await
            .map_err(|e| ResponseError::Decode(format!("failed to read response: {}", e)))?;

        if let Ok(xrpc) = serde_json::from_str::<XrpcError>(&body) {
            return Err(ResponseError::Xrpc {
                status,
                error: xrpc.error,
                message: xrpc.message,
            });
        }
        return Err(ResponseError::Status { status, body });
    }

    response
        .json()
        .await
        .map_err(|e| ResponseError::Decode(e.to_string()))
}
