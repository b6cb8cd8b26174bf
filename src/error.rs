//! Error handling module
//!
//! Caller-facing error taxonomy and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{AccountId, AccountNameError, AmountError};
use crate::publisher::PublishError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Taxonomy tag of an [`AppError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientFunds,
    Persistence,
    Publish,
}

/// Errors returned by ledger operations
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Account not found: {0}")]
    NotFound(AccountId),

    #[error("Insufficient funds in account {account_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        account_id: AccountId,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            AppError::Persistence(_) => ErrorKind::Persistence,
            AppError::Publish(_) => ErrorKind::Publish,
        }
    }
}

impl From<AmountError> for AppError {
    fn from(err: AmountError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<AccountNameError> for AppError {
    fn from(err: AccountNameError) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", Some(msg.clone()))
            }

            // 404 Not Found
            AppError::NotFound(id) => {
                (StatusCode::NOT_FOUND, "account_not_found", Some(id.to_string()))
            }

            // 422 Unprocessable Entity
            AppError::InsufficientFunds { available, .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_funds",
                Some(format!("available balance {}", available.normalize())),
            ),

            // 503 when waiting on a contended row ran out of time
            AppError::Persistence(StoreError::LockTimeout(id)) => {
                tracing::warn!(account_id = %id, "Lock wait timed out");
                (StatusCode::SERVICE_UNAVAILABLE, "lock_timeout", None)
            }

            // 500 Internal Server Error
            AppError::Persistence(e) => {
                tracing::error!("Persistence error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error", None)
            }

            // 502 Bad Gateway
            AppError::Publish(e) => {
                tracing::error!("Publish error: {:?}", e);
                (StatusCode::BAD_GATEWAY, "publish_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_domain_errors_map_to_validation() {
        let err: AppError = AmountError::NotPositive(dec!(0)).into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: AppError = AccountNameError::Empty.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound(AccountId::new(9)), StatusCode::NOT_FOUND),
            (
                AppError::InsufficientFunds {
                    account_id: AccountId::new(1),
                    requested: dec!(1000),
                    available: dec!(20),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::Persistence(StoreError::LockTimeout(AccountId::new(1))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AppError::Persistence(StoreError::StatementTimeout),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AppError::Publish(PublishError::Unavailable("down".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = AppError::InsufficientFunds {
            account_id: AccountId::new(1),
            requested: dec!(1000),
            available: dec!(20),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds in account 1: requested 1000, available 20"
        );
    }
}
