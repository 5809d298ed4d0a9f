//! Error taxonomy
//!
//! One public error enum per failure class the engine can surface to a
//! caller, plus leaf enums for the individual backends. Handler layers map
//! `EngineError` kinds to transport status codes; backend-native error text
//! never crosses that boundary.

use crate::crypto::CryptoError;
use crate::llm::LlmError;
use crate::search::SearchError;
use crate::store::StoreError;

// ============================================================================
// ENGINE ERROR
// ============================================================================

/// Top-level error surfaced by engine operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad input shape, sizes, enums, tag syntax
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or invalid auth context
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown id, or soft-deleted
    #[error("not found: {0}")]
    NotFound(String),

    /// Conditional write failed (already-exists, concurrent status change)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Upstream throttling after retries
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Decryption failed for the message being written (AAD mismatch)
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Uncategorized, including partial side effects on capture
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short kind name matching the taxonomy table (stable for clients).
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::NotFound(_) => "not-found",
            EngineError::Conflict(_) => "conflict",
            EngineError::RateLimited(_) => "rate-limited",
            EngineError::DecryptionFailed(_) => "decryption-failed",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            StoreError::NotFound(msg) => EngineError::NotFound(msg),
            // Database/IO details stay server-side; the client sees the kind only.
            other => {
                tracing::error!(error = %other, "store failure");
                EngineError::Internal("storage failure".to_string())
            }
        }
    }
}

impl From<SearchError> for EngineError {
    fn from(e: SearchError) -> Self {
        tracing::error!(error = %e, "search index failure");
        EngineError::Internal("search index failure".to_string())
    }
}

impl From<LlmError> for EngineError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::RateLimited { .. } => {
                EngineError::RateLimited("model backend throttled".to_string())
            }
            other => {
                tracing::error!(error = %other, "model backend failure");
                EngineError::Internal("model backend failure".to_string())
            }
        }
    }
}

impl From<CryptoError> for EngineError {
    fn from(e: CryptoError) -> Self {
        EngineError::DecryptionFailed(e.to_string())
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// TESTS
// ============================================================================
