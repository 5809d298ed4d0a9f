//! Envelope encryption for conversation messages
//!
//! AES-256-GCM with a per-process master key. Every ciphertext is bound to
//! an AAD triple `{conversationId, messageId, userId}`; decryption with any
//! other triple fails authentication. The wire form is
//! `base64(nonce || ciphertext+tag)`.

use aes_gcm::aead::{Aead, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

/// Master key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

// ============================================================================
// ERRORS
// ============================================================================

/// Crypto error type.
///
/// Deliberately carries no plaintext and no provider detail.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid master key: {0}")]
    InvalidKey(String),
    #[error("encryption failed")]
    EncryptFailed,
    /// Wrong key, corrupted ciphertext, or AAD mismatch; the GCM tag check
    /// cannot tell these apart.
    #[error("decryption failed")]
    DecryptFailed,
    #[error("malformed ciphertext")]
    Malformed,
}

// ============================================================================
// AAD
// ============================================================================

/// The authenticated context a message ciphertext is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAad<'a> {
    pub conversation_id: &'a str,
    pub message_id: &'a str,
    pub user_id: &'a str,
}

impl MessageAad<'_> {
    /// Canonical byte encoding. Unit separators keep `("a","b|c")` and
    /// `("a|b","c")` distinct.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.conversation_id.len() + self.message_id.len() + self.user_id.len() + 2,
        );
        out.extend_from_slice(self.conversation_id.as_bytes());
        out.push(0x1f);
        out.extend_from_slice(self.message_id.as_bytes());
        out.push(0x1f);
        out.extend_from_slice(self.user_id.as_bytes());
        out
    }
}

// ============================================================================
// CIPHER
// ============================================================================

/// Envelope cipher over a single master key.
#[derive(Clone)]
pub struct EnvelopeCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("EnvelopeCipher").finish_non_exhaustive()
    }
}

impl EnvelopeCipher {
    /// Build from raw key bytes (must be exactly 32).
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        })
    }

    /// Build from a hex-encoded key string.
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Self::new(&bytes)
    }

    /// Generate a random ephemeral key (dev mode; data does not survive a
    /// process restart with a different key).
    pub fn ephemeral() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Encrypt `plaintext` bound to `aad`. Returns base64 `nonce||ct`.
    pub fn encrypt(&self, plaintext: &str, aad: &MessageAad<'_>) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ct = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &aad.to_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut framed = Vec::with_capacity(nonce.len() + ct.len());
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&ct);
        Ok(B64.encode(framed))
    }

    /// Decrypt a base64 `nonce||ct` produced by [`encrypt`](Self::encrypt)
    /// with the exact same AAD triple.
    pub fn decrypt(&self, ciphertext_b64: &str, aad: &MessageAad<'_>) -> Result<String, CryptoError> {
        let framed = B64.decode(ciphertext_b64).map_err(|_| CryptoError::Malformed)?;
        if framed.len() < 12 {
            return Err(CryptoError::Malformed);
        }
        let (nonce, ct) = framed.split_at(12);
        let plain = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ct,
                    aad: &aad.to_bytes(),
                },
            )
            .map_err(|_| CryptoError::DecryptFailed)?;
        String::from_utf8(plain).map_err(|_| CryptoError::Malformed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
