// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for casura-core.
//!
//! Provides a unified error type with stable machine-readable codes that the
//! HTTP layer maps to status codes and structured response bodies.

use std::fmt;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur during command or query processing.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// Malformed input to a command or query builder. No mutation performed.
    Validation {
        /// The field or operation that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A referenced id does not resolve to a live entity.
    NotFound {
        /// The entity kind (e.g. "case execution", "historic decision instance").
        kind: &'static str,
        /// The id that was not found.
        id: String,
    },

    /// Optimistic version check failed at commit time.
    ///
    /// Recoverable: the command submission boundary retries up to the
    /// configured attempt count before surfacing this error.
    Concurrency {
        /// The execution whose version was stale.
        entity_id: String,
    },

    /// The authenticated subject lacks a required permission.
    Authorization {
        /// The user id of the subject, if authenticated.
        user_id: Option<String>,
        /// The permission that was required.
        permission: String,
        /// The resource the permission was required on.
        resource: String,
    },

    /// A state machine trigger is not valid from the current state.
    IllegalTransition {
        /// The execution the trigger targeted.
        execution_id: String,
        /// The current lifecycle state.
        state: String,
        /// The attempted trigger.
        trigger: String,
    },

    /// Database operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Concurrency { .. } => "CONCURRENT_MODIFICATION",
            Self::Authorization { .. } => "AUTHORIZATION_DENIED",
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether this error is a concurrency conflict that may succeed on retry.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }

    /// Shorthand for a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a not-found error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::NotFound { kind, id } => {
                let mut chars = kind.chars();
                match chars.next() {
                    Some(first) => write!(
                        f,
                        "{}{} with id '{}' does not exist",
                        first.to_uppercase(),
                        chars.as_str(),
                        id
                    ),
                    None => write!(f, "Entity with id '{}' does not exist", id),
                }
            }
            Self::Concurrency { entity_id } => {
                write!(
                    f,
                    "Execution '{}' was updated concurrently, command aborted",
                    entity_id
                )
            }
            Self::Authorization {
                user_id,
                permission,
                resource,
            } => {
                write!(
                    f,
                    "User '{}' is not authorized to '{}' on {}",
                    user_id.as_deref().unwrap_or("<anonymous>"),
                    permission,
                    resource
                )
            }
            Self::IllegalTransition {
                execution_id,
                state,
                trigger,
            } => {
                write!(
                    f,
                    "Cannot apply trigger '{}' to execution '{}' in state '{}'",
                    trigger, execution_id, state
                )
            }
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (
                EngineError::validation("name", "must not be empty"),
                "VALIDATION_ERROR",
            ),
            (
                EngineError::not_found("case execution", "exec-1"),
                "NOT_FOUND",
            ),
            (
                EngineError::Concurrency {
                    entity_id: "exec-1".to_string(),
                },
                "CONCURRENT_MODIFICATION",
            ),
            (
                EngineError::Authorization {
                    user_id: Some("kermit".to_string()),
                    permission: "UPDATE".to_string(),
                    resource: "case instance 'case-1'".to_string(),
                },
                "AUTHORIZATION_DENIED",
            ),
            (
                EngineError::IllegalTransition {
                    execution_id: "exec-1".to_string(),
                    state: "available".to_string(),
                    trigger: "complete".to_string(),
                },
                "ILLEGAL_TRANSITION",
            ),
            (
                EngineError::Database {
                    operation: "insert".to_string(),
                    details: "connection refused".to_string(),
                },
                "DATABASE_ERROR",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty(), "Message should not be empty");
        }
    }

    #[test]
    fn test_not_found_display_matches_rest_contract() {
        // The REST layer relies on this exact phrasing for 404 bodies.
        let err = EngineError::not_found("historic decision instance", "aDecisionInstId");
        assert_eq!(
            err.to_string(),
            "Historic decision instance with id 'aDecisionInstId' does not exist"
        );
    }

    #[test]
    fn test_illegal_transition_display() {
        let err = EngineError::IllegalTransition {
            execution_id: "exec-42".to_string(),
            state: "available".to_string(),
            trigger: "complete".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot apply trigger 'complete' to execution 'exec-42' in state 'available'"
        );
    }

    #[test]
    fn test_authorization_display_anonymous() {
        let err = EngineError::Authorization {
            user_id: None,
            permission: "READ".to_string(),
            resource: "tenant 'tenant1'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "User '<anonymous>' is not authorized to 'READ' on tenant 'tenant1'"
        );
    }

    #[test]
    fn test_is_concurrency() {
        assert!(
            EngineError::Concurrency {
                entity_id: "x".to_string()
            }
            .is_concurrency()
        );
        assert!(!EngineError::validation("f", "m").is_concurrency());
    }
}
