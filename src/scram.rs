//! SCRAM-SHA-256 client (RFC 5802, RFC 7677).
//!
//! PostgreSQL ignores the SCRAM user name (the startup `user` wins), so the
//! client-first-message is sent with an empty `n=`. Channel binding is not
//! used: the GS2 header is always `n,,`.

use std::sync::atomic::{Ordering, compiler_fence};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const GS2_HEADER: &str = "n,,";
/// base64 of the GS2 header
const CHANNEL_BINDING: &str = "biws";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// SCRAM exchange failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScramError {
    #[error("server-first-message is missing attribute '{0}'")]
    MissingAttribute(char),
    #[error("invalid iteration count: {0}")]
    InvalidIterationCount(String),
    #[error("invalid base64 in {0}")]
    InvalidBase64(&'static str),
    #[error("server nonce does not extend the client nonce")]
    NonceMismatch,
    #[error("server reported error: {0}")]
    ServerError(String),
    #[error("malformed server-final-message: {0}")]
    InvalidServerFinal(String),
    #[error("server signature does not match")]
    SignatureMismatch,
    #[error("server message is not valid UTF-8")]
    InvalidUtf8,
    #[error("server-final-message received before server-first-message")]
    OutOfOrder,
}

/// State of one SCRAM-SHA-256 authentication attempt.
///
/// Secrets are overwritten with zeros on drop.
pub struct ScramClient {
    password: Vec<u8>,
    client_first_bare: String,
    nonce_len: usize,
    auth_message: Option<String>,
    salted_password: [u8; KEY_LEN],
    client_key: [u8; KEY_LEN],
    stored_key: [u8; KEY_LEN],
}

impl ScramClient {
    /// Start an exchange with a fresh 24-character alphanumeric nonce.
    pub fn new(password: &str) -> Self {
        let nonce: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        Self::with_nonce("", password, &nonce)
    }

    /// Start an exchange with a fixed user name and nonce.
    pub fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        let client_first_bare = format!("n={user},r={nonce}");
        Self {
            password: password.as_bytes().to_vec(),
            nonce_len: nonce.len(),
            client_first_bare,
            auth_message: None,
            salted_password: [0; KEY_LEN],
            client_key: [0; KEY_LEN],
            stored_key: [0; KEY_LEN],
        }
    }

    fn client_nonce(&self) -> &str {
        let start = self.client_first_bare.len() - self.nonce_len;
        &self.client_first_bare[start..]
    }

    /// `n,,n=,r=<nonce>`
    pub fn client_first_message(&self) -> String {
        format!("{GS2_HEADER}{}", self.client_first_bare)
    }

    /// Process server-first-message (`r=..,s=..,i=..`) and build client-final-message.
    pub fn client_final_message(&mut self, server_first: &[u8]) -> Result<String, ScramError> {
        let server_first =
            simdutf8::basic::from_utf8(server_first).map_err(|_| ScramError::InvalidUtf8)?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(value);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(value);
            }
        }

        let nonce = nonce.ok_or(ScramError::MissingAttribute('r'))?;
        let salt = salt.ok_or(ScramError::MissingAttribute('s'))?;
        let iterations = iterations.ok_or(ScramError::MissingAttribute('i'))?;

        let iterations: u32 = match iterations.parse() {
            Ok(n) if n > 0 => n,
            _ => return Err(ScramError::InvalidIterationCount(iterations.to_string())),
        };
        if !nonce.starts_with(self.client_nonce()) || nonce.len() <= self.nonce_len {
            return Err(ScramError::NonceMismatch);
        }
        let salt = BASE64
            .decode(salt)
            .map_err(|_| ScramError::InvalidBase64("salt"))?;

        // Hi(password, salt, i) is PBKDF2 with HMAC-SHA-256 and one output block
        pbkdf2::pbkdf2_hmac::<Sha256>(&self.password, &salt, iterations, &mut self.salted_password);
        self.client_key = hmac(&self.salted_password, b"Client Key");
        self.stored_key = Sha256::digest(self.client_key).into();

        let without_proof = format!("c={CHANNEL_BINDING},r={nonce}");
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare);
        let signature = hmac(&self.stored_key, auth_message.as_bytes());
        self.auth_message = Some(auth_message);

        let mut proof = [0u8; KEY_LEN];
        for (out, (key, sig)) in proof
            .iter_mut()
            .zip(self.client_key.iter().zip(signature.iter()))
        {
            *out = key ^ sig;
        }

        Ok(format!("{without_proof},p={}", BASE64.encode(proof)))
    }

    /// Check server-final-message (`v=<signature>` or `e=<error>`).
    pub fn verify_server_final(&self, server_final: &[u8]) -> Result<(), ScramError> {
        let server_final =
            simdutf8::basic::from_utf8(server_final).map_err(|_| ScramError::InvalidUtf8)?;
        let auth_message = self.auth_message.as_ref().ok_or(ScramError::OutOfOrder)?;

        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerError(error.to_string()));
        }
        let verifier = server_final
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or_else(|| ScramError::InvalidServerFinal(server_final.to_string()))?;
        let received = BASE64
            .decode(verifier)
            .map_err(|_| ScramError::InvalidBase64("server signature"))?;

        let server_key = hmac(&self.salted_password, b"Server Key");
        let expected = hmac(&server_key, auth_message.as_bytes());
        if received.as_slice() != expected.as_slice() {
            return Err(ScramError::SignatureMismatch);
        }
        Ok(())
    }
}

impl Drop for ScramClient {
    fn drop(&mut self) {
        self.password.fill(0);
        self.salted_password.fill(0);
        self.client_key.fill(0);
        self.stored_key.fill(0);
        compiler_fence(Ordering::SeqCst);
    }
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; KEY_LEN] {
    // HMAC accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return [0; KEY_LEN];
    };
    mac.update(data);
    mac.finalize().into_bytes().into()
}
