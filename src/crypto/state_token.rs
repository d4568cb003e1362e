//! Signed state tokens
//!
//! A state token carries a short payload (a pull request identity) through
//! the OAuth `state` parameter and through links posted on check runs. The
//! wire format is `base64url(salt ++ payload ++ hmac)`:
//!
//! - `salt` is [`SALT_LENGTH`] random bytes so equal payloads produce
//!   different tokens,
//! - `hmac` is HMAC-SHA256 over `salt ++ payload`, keyed with a signing key
//!   derived from the configured secret.
//!
//! Tokens carry no expiry. A token names one revision of one pull request,
//! and a new push produces a new revision and therefore a new token.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const SALT_LENGTH: usize = 3;
pub const MAC_LENGTH: usize = 32;

/// HKDF `info` used to derive the signing key. Matches the key schedule of
/// tokens issued by the previous deployment.
const SIGNING_INFO: &[u8] = b"services.mozilla.com/tokenlib/v1/signing";

const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature does not match")]
    InvalidSignature,

    #[error("salt must be {expected} bytes, got {actual}")]
    InvalidSalt { expected: usize, actual: usize },
}

/// Issues and verifies state tokens.
///
/// Cheap to clone; the signing key is shared.
#[derive(Clone)]
pub struct StateTokenManager {
    signing_key: Arc<[u8; MAC_LENGTH]>,
}

impl std::fmt::Debug for StateTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTokenManager").finish_non_exhaustive()
    }
}

impl StateTokenManager {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            signing_key: Arc::new(derive_signing_key(secret.as_ref())),
        }
    }

    /// Encode `payload` with a fresh random salt.
    pub fn encode(&self, payload: &[u8]) -> String {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        self.encode_bytes(payload, &salt)
    }

    /// Encode `payload` with a caller supplied salt.
    pub fn encode_with_salt(&self, payload: &[u8], salt: &[u8]) -> Result<String, StateTokenError> {
        if salt.len() != SALT_LENGTH {
            return Err(StateTokenError::InvalidSalt {
                expected: SALT_LENGTH,
                actual: salt.len(),
            });
        }
        Ok(self.encode_bytes(payload, salt))
    }

    fn encode_bytes(&self, payload: &[u8], salt: &[u8]) -> String {
        let mut data = Vec::with_capacity(salt.len() + payload.len() + MAC_LENGTH);
        data.extend_from_slice(salt);
        data.extend_from_slice(payload);
        let mac = self.signature(&data);
        data.extend_from_slice(&mac);
        TOKEN_ENGINE.encode(data)
    }

    /// Verify `token` and return its payload with the salt stripped.
    pub fn decode(&self, token: &str) -> Result<Vec<u8>, StateTokenError> {
        let data = TOKEN_ENGINE
            .decode(token.trim())
            .map_err(|e| StateTokenError::Malformed(e.to_string()))?;

        if data.len() < SALT_LENGTH + MAC_LENGTH {
            return Err(StateTokenError::Malformed(format!(
                "token is {} bytes, shorter than salt and signature",
                data.len()
            )));
        }

        let (signed, received) = data.split_at(data.len() - MAC_LENGTH);
        let expected = self.signature(signed);
        if !bool::from(expected.as_slice().ct_eq(received)) {
            debug!("State token signature mismatch");
            return Err(StateTokenError::InvalidSignature);
        }

        Ok(signed[SALT_LENGTH..].to_vec())
    }

    pub fn encode_str(&self, payload: &str) -> String {
        self.encode(payload.as_bytes())
    }

    /// Verify `token` and interpret the payload as UTF-8.
    pub fn decode_str(&self, token: &str) -> Result<String, StateTokenError> {
        let payload = self.decode(token)?;
        String::from_utf8(payload).map_err(|e| StateTokenError::Malformed(e.to_string()))
    }

    fn signature(&self, data: &[u8]) -> [u8; MAC_LENGTH] {
        hmac_sha256(self.signing_key.as_slice(), data)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; MAC_LENGTH] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HKDF-SHA256 with no salt, expanded to one HMAC key.
fn derive_signing_key(secret: &[u8]) -> [u8; MAC_LENGTH] {
    let mut key = [0u8; MAC_LENGTH];
    Hkdf::<Sha256>::new(None, secret)
        .expand(SIGNING_INFO, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_roundtrip(
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            salt in proptest::array::uniform3(any::<u8>()),
        ) {
            let tm = StateTokenManager::new("proptest");
            let token = tm.encode_with_salt(&payload, &salt).unwrap();
            prop_assert_eq!(tm.decode(&token).unwrap(), payload);
        }

        #[test]
        fn prop_tokens_are_url_safe(payload in "[ -~]{0,64}") {
            let token = StateTokenManager::new("proptest").encode_str(&payload);
            prop_assert!(token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='));
        }

        #[test]
        fn prop_any_bit_flip_in_signature_fails(
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            index in 0usize..MAC_LENGTH,
            bit in 0u8..8,
        ) {
            let tm = StateTokenManager::new("proptest");
            let token = tm.encode_with_salt(&payload, b"xyz").unwrap();
            let mut raw = TOKEN_ENGINE.decode(&token).unwrap();
            let at = raw.len() - MAC_LENGTH + index;
            raw[at] ^= 1 << bit;
            prop_assert_eq!(
                tm.decode(&TOKEN_ENGINE.encode(&raw)),
                Err(StateTokenError::InvalidSignature)
            );
        }
    }
}
