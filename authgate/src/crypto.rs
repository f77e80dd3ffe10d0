//! Authenticated encryption for the OAuth `state` parameter and stateless session cookies.
//!
//! Payloads are sealed with AES-256-GCM under a random 96-bit nonce and encoded as
//! URL-safe base64 without padding (`nonce || ciphertext || tag`), so the output can be
//! used verbatim as a cookie value or a query parameter.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::errors::{Error, Result};

/// Minimum length of the configured secret, in bytes.
pub const MIN_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct StateCodec {
    cipher: Aes256Gcm,
}

impl fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCodec").field("cipher", &"<redacted>").finish()
    }
}

impl StateCodec {
    /// Builds a codec from a raw secret.
    ///
    /// Secrets shorter than [`MIN_KEY_LEN`] are rejected. A secret of exactly 32 bytes is
    /// used as the AES key directly; longer secrets are condensed with SHA-256.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.len() < MIN_KEY_LEN {
            return Err(Error::InvalidKey {
                min: MIN_KEY_LEN,
                actual: secret.len(),
            });
        }

        let cipher = if secret.len() == MIN_KEY_LEN {
            Aes256Gcm::new_from_slice(secret)
        } else {
            let digest = Sha256::digest(secret);
            Aes256Gcm::new_from_slice(&digest)
        }
        .map_err(|e| Error::Internal {
            operation: format!("create cipher: {e}"),
        })?;

        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self.cipher.encrypt(&nonce, plaintext).map_err(|e| Error::Internal {
            operation: format!("encrypt payload: {e}"),
        })?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(general_purpose::URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Opens a value produced by [`StateCodec::encrypt`]. Any format or tag mismatch is
    /// reported as [`Error::Decryption`].
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let sealed = general_purpose::URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| Error::Decryption)?;

        if sealed.len() <= NONCE_LEN {
            return Err(Error::Decryption);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decryption)
    }

    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = serde_json::to_vec(value).map_err(|e| Error::Internal {
            operation: format!("serialize payload: {e}"),
        })?;
        self.encrypt(&json)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, encoded: &str) -> Result<T> {
        let plaintext = self.decrypt(encoded)?;
        serde_json::from_slice(&plaintext).map_err(|_| Error::Decryption)
    }
}
