//! Signing error codes returned by verifiers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric codes carried in the JSON-RPC `error.code` of a rejected
/// signing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigErrorCode {
    InvalidParams,
    InvalidRecord,
    DuplicateSign,
    TxUnconfirmed,
    TxNotFound,
    BlockSyncUncompleted,
    TxCompleted,
    Unknown,
}

impl SigErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            SigErrorCode::InvalidParams => 1000,
            SigErrorCode::InvalidRecord => 1001,
            SigErrorCode::DuplicateSign => 1002,
            SigErrorCode::TxUnconfirmed => 1003,
            SigErrorCode::TxNotFound => 1004,
            SigErrorCode::BlockSyncUncompleted => 1005,
            SigErrorCode::TxCompleted => 1006,
            SigErrorCode::Unknown => 9999,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1000 => SigErrorCode::InvalidParams,
            1001 => SigErrorCode::InvalidRecord,
            1002 => SigErrorCode::DuplicateSign,
            1003 => SigErrorCode::TxUnconfirmed,
            1004 => SigErrorCode::TxNotFound,
            1005 => SigErrorCode::BlockSyncUncompleted,
            1006 => SigErrorCode::TxCompleted,
            _ => SigErrorCode::Unknown,
        }
    }

    /// Codes that mean "ask again later" rather than "this proposal is wrong".
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SigErrorCode::TxNotFound
                | SigErrorCode::TxUnconfirmed
                | SigErrorCode::BlockSyncUncompleted
                | SigErrorCode::Unknown
        )
    }
}

/// A verifier's refusal to sign.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?} ({}): {message}", code.code())]
pub struct SignError {
    pub code: SigErrorCode,
    pub message: String,
    /// Record the refusal is about, when it concerns a single one.
    pub ref_id: Option<String>,
}

impl SignError {
    pub fn new(code: SigErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            ref_id: None,
        }
    }

    /// Attributes the refusal to `ref_id`, keeping an earlier attribution.
    pub fn for_record(mut self, ref_id: &str) -> Self {
        if self.ref_id.is_none() {
            self.ref_id = Some(ref_id.to_string());
        }
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(SigErrorCode::InvalidParams, message)
    }

    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::new(SigErrorCode::InvalidRecord, message)
    }
}
