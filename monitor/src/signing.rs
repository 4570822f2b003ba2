//! Request signing for the device platform's OpenAPI.
//!
//! Every call carries `client_id`, `t`, `nonce`, `sign_method` and `sign`
//! headers. The signature is an uppercase hex HMAC-SHA256 over
//!
//! ```text
//! client_id + access_token + t + nonce + METHOD + "\n" + sha256(body) + "\n" + "" + "\n" + path
//! ```
//!
//! keyed by the client secret. The canonical headers segment is always empty.

use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};

pub const SIGN_METHOD: &str = "HMAC-SHA256";

const NONCE_LEN: usize = 26;

type HmacSha256 = Hmac<Sha256>;

/// Everything that went into one request's signature. Built fresh per call.
#[derive(Debug, Clone)]
pub struct SignedRequestContext {
    pub client_id: String,
    pub timestamp: String,
    pub nonce: String,
    pub method: String,
    pub url: String,
    pub body_hash: String,
    pub signature: String,
}

pub fn body_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

pub fn string_to_sign(
    client_id: &str,
    access_token: &str,
    timestamp: &str,
    nonce: &str,
    method: &str,
    body_hash: &str,
    path: &str,
) -> String {
    format!(
        "{client_id}{access_token}{timestamp}{nonce}{}\n{body_hash}\n\n{path}",
        method.to_uppercase()
    )
}

/// Signs a string with the client secret.
pub fn hmac_sha256_upper(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Signing(format!("invalid HMAC key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

/// Credentials used to sign requests.
#[derive(Clone)]
pub struct Signer {
    client_id: String,
    client_secret: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

impl Signer {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Computes the signature for one request. Pure over its inputs; the
    /// caller supplies a fresh timestamp and nonce per request.
    pub fn sign_request(
        &self,
        method: &str,
        path: &str,
        access_token: Option<&str>,
        timestamp: &str,
        nonce: &str,
        body: Option<&str>,
    ) -> Result<String> {
        let hash = body_hash(body.unwrap_or(""));
        let payload = string_to_sign(
            &self.client_id,
            access_token.unwrap_or(""),
            timestamp,
            nonce,
            method,
            &hash,
            path,
        );
        hmac_sha256_upper(&self.client_secret, &payload)
    }

    /// Builds the full signing context for a request made at `now_ms`.
    pub fn context(
        &self,
        method: &str,
        path: &str,
        access_token: Option<&str>,
        now_ms: i64,
        body: Option<&str>,
    ) -> Result<SignedRequestContext> {
        let timestamp = now_ms.to_string();
        let nonce = generate_nonce();
        let signature =
            self.sign_request(method, path, access_token, &timestamp, &nonce, body)?;

        Ok(SignedRequestContext {
            client_id: self.client_id.clone(),
            timestamp,
            nonce,
            method: method.to_uppercase(),
            url: path.to_string(),
            body_hash: body_hash(body.unwrap_or("")),
            signature,
        })
    }
}

/// Short random alphanumeric token. Only uniqueness matters here, it exists
/// to defeat replay on the remote side.
pub fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}
