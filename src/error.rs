use thiserror::Error;
use time::OffsetDateTime;

use crate::validation::HandleValidation;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Outcomes of the allocator, ledger and bootstrap that callers branch on.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid handle '{candidate}': {}", .report.errors.join("; "))]
    Validation {
        candidate: String,
        report: HandleValidation,
    },

    #[error("handle '{handle}' is already taken")]
    HandleTaken { handle: String },

    #[error("no free handle derived from '{base}' after {attempts} attempts")]
    AllocationExhausted { base: String, attempts: usize },

    #[error("message quota of {capacity} exhausted")]
    QuotaExceeded {
        capacity: u32,
        next_reset: OffsetDateTime,
    },

    #[error("no profile for uid '{uid}'")]
    ProfileNotFound { uid: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl Error {
    pub fn validation(candidate: impl Into<String>, report: HandleValidation) -> Self {
        Self::Validation {
            candidate: candidate.into(),
            report,
        }
    }

    pub fn handle_taken(handle: impl Into<String>) -> Self {
        Self::HandleTaken {
            handle: handle.into(),
        }
    }

    pub fn profile_not_found(uid: impl Into<String>) -> Self {
        Self::ProfileNotFound { uid: uid.into() }
    }

    /// Whether repeating the same call later may succeed without the caller
    /// changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("{0}")]
    Unavailable(String),

    #[error("corrupt record for '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_handle;

    #[test]
    fn only_store_failures_are_retryable() {
        assert!(Error::from(StoreError::Timeout(std::time::Duration::from_secs(1))).is_retryable());
        assert!(Error::from(StoreError::Unavailable("down".into())).is_retryable());

        assert!(!Error::handle_taken("alice").is_retryable());
        assert!(!Error::profile_not_found("u1").is_retryable());
        assert!(
            !Error::QuotaExceeded {
                capacity: 5,
                next_reset: OffsetDateTime::UNIX_EPOCH,
            }
            .is_retryable()
        );
    }

    #[test]
    fn validation_message_lists_errors() {
        let err = Error::validation("a!", validate_handle("a!"));
        let msg = err.to_string();
        assert!(msg.starts_with("invalid handle 'a!'"));
        assert!(msg.contains("at least 3"));
    }
}
