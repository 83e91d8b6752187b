//! Unified error handling for the fleetmgr crate
//!
//! Domain errors from the store, supervisor, guard and config layers are
//! folded into a single [`Error`] enum. Each error maps onto an
//! [`ErrorCategory`], which tells the control loops how to react.
//!
//! # Usage
//!
//! ```rust,ignore
//! use fleetmgr::error::{Error, ErrorCategory};
//!
//! fn react(err: &Error) {
//!     match err.category() {
//!         ErrorCategory::RecoverableTransient => { /* pause, retry quietly */ }
//!         ErrorCategory::UnrecoverableSelfFault => { /* alert and exit */ }
//!         _ => { /* log, alert, carry on */ }
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::alerts::AlertError;
pub use crate::config::ConfigError;
pub use crate::guard::{ServiceError, ZombieReason};
pub use crate::health::proof_of_life::ProofOfLifeError;
pub use crate::store::StoreError;
pub use crate::supervisor::SupervisorError;

/// Result type used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The store rejected an operation; the current unit of work is abandoned
    FatalImmediate,
    /// Transport-level loss of the store; pause and retry without alerting
    RecoverableTransient,
    /// Anything else inside a loop pass; log, alert, continue
    RecoverableLogged,
    /// This process can no longer trust itself and must exit
    UnrecoverableSelfFault,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FatalImmediate => "fatal-immediate",
            Self::RecoverableTransient => "recoverable-transient",
            Self::RecoverableLogged => "recoverable-logged",
            Self::UnrecoverableSelfFault => "unrecoverable-self-fault",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type for the fleetmgr crate
#[derive(Error, Debug)]
pub enum Error {
    /// Data store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Adapter instance supervision errors
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// Alert emission errors
    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed heartbeat payload
    #[error("Proof of life error: {0}")]
    ProofOfLife(#[from] ProofOfLifeError),

    /// This instance was found to be a zombie and could not restart itself
    #[error("instance is a zombie ({reason}) and the service restart failed: {source}")]
    SelfZombie {
        reason: ZombieReason,
        #[source]
        source: ServiceError,
    },

    /// Local clock never agreed with the store's clock
    #[error("system clock not synchronized with data store after {attempts} attempts (last skew {skew_ms}ms)")]
    ClockNotSynced { attempts: u32, skew_ms: i64 },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Classify this error for the control loops
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) if e.is_connectivity() => ErrorCategory::RecoverableTransient,
            Self::Store(_) | Self::Config(_) => ErrorCategory::FatalImmediate,
            Self::SelfZombie { .. } | Self::ClockNotSynced { .. } => {
                ErrorCategory::UnrecoverableSelfFault
            }
            Self::Supervisor(SupervisorError::Store(e)) if e.is_connectivity() => {
                ErrorCategory::RecoverableTransient
            }
            Self::Supervisor(_)
            | Self::Alert(_)
            | Self::ProofOfLife(_)
            | Self::Io(_)
            | Self::Other { .. } => ErrorCategory::RecoverableLogged,
        }
    }

    /// Check if the loop that hit this error may keep running
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RecoverableTransient | ErrorCategory::RecoverableLogged
        )
    }

    /// Check if this error means the store is unreachable
    pub fn is_connectivity_loss(&self) -> bool {
        self.category() == ErrorCategory::RecoverableTransient
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_is_transient() {
        let err: Error = StoreError::connectivity("claim", "refused").into();
        assert_eq!(err.category(), ErrorCategory::RecoverableTransient);
        assert!(err.is_connectivity_loss());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_store_status_is_fatal() {
        let err: Error = StoreError::status("claim", "UNEXPECTED_FAILURE", "x").into();
        assert_eq!(err.category(), ErrorCategory::FatalImmediate);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_supervisor_connectivity_is_transient() {
        let err: Error =
            SupervisorError::Store(StoreError::connectivity("find_adapter", "down")).into();
        assert!(err.is_connectivity_loss());
    }

    #[test]
    fn test_self_zombie_is_unrecoverable() {
        let err = Error::SelfZombie {
            reason: ZombieReason::AdapterMissing,
            source: ServiceError::ExitStatus {
                unit: "fleet-manager.service".to_string(),
                code: Some(5),
            },
        };
        assert_eq!(err.category(), ErrorCategory::UnrecoverableSelfFault);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_other_is_logged() {
        let err = Error::other("unexpected");
        assert_eq!(err.category(), ErrorCategory::RecoverableLogged);
        assert_eq!(err.to_string(), "unexpected");
    }
}
