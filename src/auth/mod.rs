//! Client credentials and request signing
//!
//! Every authenticated exchange (socket identity response, authorize and
//! deauthorize calls) is signed the same way:
//! `hex(HMAC-SHA256(secret, "{id}:{key}:{timestamp}"))`.

mod http;
mod store;

use std::fmt;

use chrono::{DateTime, Local};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub use http::{AuthClient, AuthResponse};
pub use store::{CredentialStore, StoredClient, generate_user_id};

use crate::protocol::IdentityResponse;
use crate::protocol::message::OP_IDENTITY;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Client type tag sent with every signed exchange
pub const DEFAULT_CLIENT_TYPE: &str = "GINSIDE";

/// Credentials issued for a registered client
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    /// Client id
    pub id: String,
    /// Client key
    pub key: String,
    /// Client secret used as the HMAC key
    pub secret: String,
    /// UUID assigned by a successful authorize call
    #[serde(default)]
    pub uuid: Option<String>,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("uuid", &self.uuid)
            .finish()
    }
}

impl ClientCredentials {
    /// Credentials without a UUID
    #[must_use]
    pub fn new(id: impl Into<String>, key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            secret: secret.into(),
            uuid: None,
        }
    }

    /// Sign `timestamp` with these credentials
    ///
    /// # Errors
    ///
    /// Returns error if the HMAC cannot be keyed
    pub fn signature(&self, timestamp: &str) -> Result<String> {
        sign(&self.secret, &self.id, &self.key, timestamp)
    }

    /// Identity response answering the server's challenge
    ///
    /// # Errors
    ///
    /// Returns error if signing fails
    pub fn identity_response(&self, client_type: &str, timestamp: &str) -> Result<IdentityResponse> {
        Ok(IdentityResponse {
            operation: OP_IDENTITY.to_string(),
            clienttype: client_type.to_string(),
            clientuuid: self.uuid.clone().unwrap_or_default(),
            timestamp: timestamp.to_string(),
            signature: self.signature(timestamp)?,
        })
    }
}

/// `hex(HMAC-SHA256(secret, "{id}:{key}:{timestamp}"))`
///
/// # Errors
///
/// Returns error if the HMAC cannot be keyed
pub fn sign(secret: &str, id: &str, key: &str, timestamp: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Auth(format!("invalid hmac key: {e}")))?;
    mac.update(format!("{id}:{key}:{timestamp}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signing timestamp `YYYYMMDDHHMMSSmmm` on the local clock
#[must_use]
pub fn timestamp() -> String {
    format_timestamp(&Local::now())
}

/// Format a signing timestamp
#[must_use]
pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format("%Y%m%d%H%M%S%3f").to_string()
}
