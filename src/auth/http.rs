//! One-shot authorize / deauthorize calls

use serde::{Deserialize, Serialize};

use super::{ClientCredentials, timestamp};
use crate::dispatch::RC_SUCCESS;
use crate::{Error, Result};

/// Response body of authorize / deauthorize
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthResponse {
    /// Result code; 200 is success
    #[serde(default)]
    pub rc: Option<i64>,
    /// Human-readable result message
    #[serde(default)]
    pub rcmsg: Option<String>,
    /// Client UUID (authorize only)
    #[serde(default)]
    pub uuid: Option<String>,
}

impl AuthResponse {
    /// Whether the server accepted the request
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.rc == Some(RC_SUCCESS)
    }
}

#[derive(Debug, Serialize)]
struct AuthorizeBody<'a> {
    client_key: &'a str,
    timestamp: &'a str,
    signature: &'a str,
    userid: &'a str,
    devicemodel: &'a str,
}

/// HTTP client for registering this device with the server
#[derive(Debug, Clone)]
pub struct AuthClient {
    base_url: String,
    client_type: String,
    device_model: String,
    client: reqwest::Client,
}

impl AuthClient {
    /// Client for `server` (`host:port`, or a full `http(s)://` base URL)
    #[must_use]
    pub fn new(server: &str, client_type: &str, device_model: &str) -> Self {
        let base_url = if server.contains("://") {
            server.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", server.trim_end_matches('/'))
        };
        Self {
            base_url,
            client_type: client_type.to_string(),
            device_model: device_model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Base URL requests are sent to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register `credentials` for `user_id`; a success carries the client UUID
    ///
    /// # Errors
    ///
    /// Returns error if signing, the request, or decoding the response fails
    pub async fn authorize(
        &self,
        credentials: &ClientCredentials,
        user_id: &str,
    ) -> Result<AuthResponse> {
        let time = timestamp();
        let signature = credentials.signature(&time)?;
        tracing::debug!(id = %credentials.id, user_id, "authorize");

        let response: AuthResponse = self
            .client
            .post(format!("{}/v2/authorize", self.base_url))
            .header("x-auth-clienttype", &self.client_type)
            .json(&AuthorizeBody {
                client_key: &credentials.key,
                timestamp: &time,
                signature: &signature,
                userid: user_id,
                devicemodel: &self.device_model,
            })
            .send()
            .await?
            .json()
            .await?;

        tracing::info!(rc = response.rc, rcmsg = response.rcmsg.as_deref(), "authorize result");
        Ok(response)
    }

    /// Unregister the client identified by `credentials.uuid`
    ///
    /// # Errors
    ///
    /// Returns error if the credentials carry no UUID, or the request fails
    pub async fn deauthorize(&self, credentials: &ClientCredentials) -> Result<AuthResponse> {
        let uuid = credentials
            .uuid
            .as_deref()
            .ok_or_else(|| Error::Auth("client has no uuid; authorize first".to_string()))?;
        let time = timestamp();
        let signature = credentials.signature(&time)?;
        tracing::debug!(id = %credentials.id, uuid, "deauthorize");

        let response: AuthResponse = self
            .client
            .delete(format!("{}/v2/authorize/{uuid}", self.base_url))
            .header("x-auth-clienttype", &self.client_type)
            .header("x-auth-timestamp", &time)
            .header("x-auth-signature", &signature)
            .send()
            .await?
            .json()
            .await?;

        tracing::info!(rc = response.rc, rcmsg = response.rcmsg.as_deref(), "deauthorize result");
        Ok(response)
    }
}
